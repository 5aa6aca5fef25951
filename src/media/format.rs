//! Video codec and pixel format definitions

use serde::{Deserialize, Serialize};

/// Video codec negotiated over WebRTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    VP8,
    VP9,
}

impl VideoCodec {
    /// RTP MIME type as registered in SDP
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
        }
    }

    /// Parse a MIME type string (case-insensitive)
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "video/h264" => Some(VideoCodec::H264),
            "video/vp8" => Some(VideoCodec::VP8),
            "video/vp9" => Some(VideoCodec::VP9),
            _ => None,
        }
    }

    /// Static RTP payload type used when offering this codec
    pub fn payload_type(&self) -> u8 {
        match self {
            VideoCodec::H264 => 102,
            VideoCodec::VP8 => 96,
            VideoCodec::VP9 => 98,
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::VP8 => write!(f, "VP8"),
            VideoCodec::VP9 => write!(f, "VP9"),
        }
    }
}

/// Pixel layout of a raw (decoded) video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, Y then U then V, tightly packed
    I420,
    /// Interleaved 8-bit blue/green/red/alpha
    Bgra,
}

impl PixelFormat {
    /// Buffer size in bytes for a frame of the given dimensions
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = (width as usize) * (height as usize);
        match self {
            PixelFormat::I420 => pixels + pixels / 2,
            PixelFormat::Bgra => pixels * 4,
        }
    }

    /// FourCC tag used in the sink wire header
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::I420 => *b"I420",
            PixelFormat::Bgra => *b"BGRA",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::I420 => write!(f, "I420"),
            PixelFormat::Bgra => write!(f, "BGRA"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_round_trip() {
        for codec in [VideoCodec::H264, VideoCodec::VP8, VideoCodec::VP9] {
            assert_eq!(VideoCodec::from_mime_type(codec.mime_type()), Some(codec));
        }
        assert_eq!(VideoCodec::from_mime_type("video/h264"), Some(VideoCodec::H264));
        assert_eq!(VideoCodec::from_mime_type("audio/opus"), None);
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(PixelFormat::I420.frame_size(4, 2), 12);
        assert_eq!(PixelFormat::Bgra.frame_size(4, 2), 32);
        assert_eq!(PixelFormat::I420.frame_size(1920, 1080), 1920 * 1080 * 3 / 2);
    }
}
