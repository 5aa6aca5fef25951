//! H264 software decoding via openh264
//!
//! Access units arrive in Annex B layout (the RTP depacketizer restores
//! start codes), which is what openh264 expects. The decoder may buffer:
//! an access unit can legitimately produce no frame.

#![cfg(feature = "h264")]

use bytes::BytesMut;
use openh264::decoder::Decoder as H264Inner;
use openh264::formats::YUVSource;

use super::{Decoder, DecoderFactory};
use crate::error::{AppError, Result};
use crate::media::format::{PixelFormat, VideoCodec};
use crate::media::frame::RawFrame;

pub struct OpenH264Decoder {
    inner: H264Inner,
}

impl OpenH264Decoder {
    pub fn new() -> Result<Self> {
        let inner = H264Inner::new()
            .map_err(|e| AppError::Decode(format!("failed to create openh264 decoder: {}", e)))?;
        Ok(Self { inner })
    }
}

impl Decoder for OpenH264Decoder {
    fn name(&self) -> &'static str {
        "openh264"
    }

    fn codec(&self) -> VideoCodec {
        VideoCodec::H264
    }

    fn decode(&mut self, payload: &[u8], timestamp: u32) -> Result<Vec<RawFrame>> {
        let decoded = self
            .inner
            .decode(payload)
            .map_err(|e| AppError::Decode(format!("openh264: {}", e)))?;

        let Some(yuv) = decoded else {
            return Ok(vec![]);
        };

        let (width, height) = yuv.dimensions();
        if width == 0 || height == 0 {
            return Err(AppError::Decode(format!(
                "decoded frame has degenerate dimensions {}x{}",
                width, height
            )));
        }

        Ok(vec![pack_i420(&yuv, width, height, timestamp)])
    }

    fn reset(&mut self) -> Result<()> {
        // openh264 keeps reference frames internally; replace the instance
        self.inner = H264Inner::new()
            .map_err(|e| AppError::Decode(format!("failed to reset openh264 decoder: {}", e)))?;
        Ok(())
    }
}

/// Copy possibly-strided decoder planes into a tightly packed I420 buffer
fn pack_i420(yuv: &impl YUVSource, width: usize, height: usize, timestamp: u32) -> RawFrame {
    let (y_stride, u_stride, v_stride) = yuv.strides();
    let chroma_width = width / 2;
    let chroma_height = height / 2;

    let mut data = BytesMut::with_capacity(width * height + chroma_width * chroma_height * 2);

    for row in 0..height {
        let start = row * y_stride;
        data.extend_from_slice(&yuv.y()[start..start + width]);
    }
    for row in 0..chroma_height {
        let start = row * u_stride;
        data.extend_from_slice(&yuv.u()[start..start + chroma_width]);
    }
    for row in 0..chroma_height {
        let start = row * v_stride;
        data.extend_from_slice(&yuv.v()[start..start + chroma_width]);
    }

    RawFrame::new(
        data.freeze(),
        width as u32,
        height as u32,
        PixelFormat::I420,
        timestamp,
    )
}

/// Factory for openh264-backed decoders
pub struct OpenH264Factory;

impl OpenH264Factory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OpenH264Factory {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderFactory for OpenH264Factory {
    fn decoder_type(&self) -> &'static str {
        "openh264"
    }

    fn supports(&self, codec: VideoCodec) -> bool {
        codec == VideoCodec::H264
    }

    fn is_available(&self) -> bool {
        // Pure software, statically linked
        true
    }

    fn priority(&self) -> u32 {
        10
    }

    fn create(&self, codec: VideoCodec) -> Result<Box<dyn Decoder>> {
        if codec != VideoCodec::H264 {
            return Err(AppError::Decode(format!(
                "openh264 cannot decode {}",
                codec
            )));
        }
        Ok(Box::new(OpenH264Decoder::new()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_foreign_codec() {
        let factory = OpenH264Factory::new();
        assert!(factory.supports(VideoCodec::H264));
        assert!(!factory.supports(VideoCodec::VP8));
        assert!(factory.create(VideoCodec::VP8).is_err());
    }
}
