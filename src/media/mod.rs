//! Media pipeline: formats, frames, decoding, conversion and output sinks

pub mod convert;
pub mod decoder;
pub mod format;
pub mod frame;
pub mod sink;

pub use format::{PixelFormat, VideoCodec};
pub use frame::RawFrame;
