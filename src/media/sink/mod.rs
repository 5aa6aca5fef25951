//! Output sink traits
//!
//! A sink is the named, external destination for one bridge's finished
//! frames. Each bridge owns exactly one sink; the bridge closes it on every
//! exit path before the supervisor releases the slot.

pub mod tcp;

use async_trait::async_trait;

use super::format::PixelFormat;
use super::frame::RawFrame;
use crate::error::Result;

/// Destination for finished frames
pub trait FrameSink: Send {
    /// Sink name (the client identity it was opened for)
    fn name(&self) -> &str;

    /// Pixel layout this sink expects
    fn expected_format(&self) -> PixelFormat;

    /// Forward one frame
    fn send(&mut self, frame: &RawFrame) -> Result<()>;

    /// Release the sink. Called exactly once, by the owning bridge.
    fn close(&mut self);
}

/// Factory for opening sinks by name
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self, name: &str) -> Result<Box<dyn FrameSink>>;
}
