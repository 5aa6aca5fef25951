//! Raw (decoded) video frame

use bytes::Bytes;

use super::format::PixelFormat;

/// A decoded video frame with its original capture timestamp.
///
/// The timestamp is the RTP capture timestamp (90 kHz clock) carried
/// end-to-end from the sending browser. It is never rewritten or smoothed
/// on the way to the output sink.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Pixel data, tightly packed in `format` layout
    pub data: Bytes,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: PixelFormat,
    /// RTP capture timestamp (90 kHz)
    pub timestamp: u32,
}

impl RawFrame {
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp: u32,
    ) -> Self {
        Self {
            data,
            width,
            height,
            format,
            timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the buffer length matches the declared dimensions and layout
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.format.frame_size(self.width, self.height)
    }
}
