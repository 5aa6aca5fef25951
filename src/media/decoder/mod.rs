//! Video decoder traits and registry
//!
//! Decoding is an external capability consumed behind a trait seam: a
//! bridge asks the registry for a decoder once the video format has been
//! negotiated, and feeds it whole access units. Factories advertise
//! availability and priority so alternative backends can be slotted in
//! without touching the bridge.

pub mod h264;

use tracing::{debug, info};

use super::format::VideoCodec;
use super::frame::RawFrame;
use crate::error::{AppError, Result};

/// Generic video decoder
///
/// Not Sync: a decoder instance is owned by exactly one bridge task.
pub trait Decoder: Send {
    /// Decoder name (for logs)
    fn name(&self) -> &'static str;

    /// Codec this instance decodes
    fn codec(&self) -> VideoCodec;

    /// Decode one access unit into zero or more raw frames.
    ///
    /// `timestamp` is the RTP capture timestamp of the access unit and is
    /// attached to every frame produced from it.
    fn decode(&mut self, payload: &[u8], timestamp: u32) -> Result<Vec<RawFrame>>;

    /// Reset decoder state (e.g. after renegotiation)
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory for creating decoders
pub trait DecoderFactory: Send + Sync {
    /// Factory type name
    fn decoder_type(&self) -> &'static str;

    /// Whether this factory can decode the given codec
    fn supports(&self, codec: VideoCodec) -> bool;

    /// Whether the backend is usable on this system
    fn is_available(&self) -> bool;

    /// Selection priority (higher = preferred)
    fn priority(&self) -> u32;

    /// Create a decoder for the given codec
    fn create(&self, codec: VideoCodec) -> Result<Box<dyn Decoder>>;
}

/// Registry of available decoder factories
pub struct DecoderRegistry {
    factories: Vec<Box<dyn DecoderFactory>>,
}

impl DecoderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self { factories: vec![] }
    }

    /// Registry with all compiled-in backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "h264")]
        registry.register(Box::new(h264::OpenH264Factory::new()));

        let names: Vec<&str> = registry
            .factories
            .iter()
            .map(|f| f.decoder_type())
            .collect();
        info!("Decoder backends registered: {:?}", names);

        registry
    }

    /// Add a factory
    pub fn register(&mut self, factory: Box<dyn DecoderFactory>) {
        self.factories.push(factory);
        self.factories.sort_by_key(|f| std::cmp::Reverse(f.priority()));
    }

    /// Whether any available backend can decode the codec
    pub fn supports(&self, codec: VideoCodec) -> bool {
        self.factories
            .iter()
            .any(|f| f.supports(codec) && f.is_available())
    }

    /// Create a decoder for the codec using the best available backend
    pub fn create(&self, codec: VideoCodec) -> Result<Box<dyn Decoder>> {
        let factory = self
            .factories
            .iter()
            .find(|f| f.supports(codec) && f.is_available())
            .ok_or_else(|| AppError::Decode(format!("no decoder available for {}", codec)))?;

        debug!("Creating {} decoder via {}", codec, factory.decoder_type());
        factory.create(codec)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
