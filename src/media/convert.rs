//! Pixel format conversion
//!
//! Converts decoded I420 frames to the layout an output sink expects.
//! Fixed-point BT.601 math, one pass, no lookup tables.

use bytes::Bytes;

use super::format::PixelFormat;
use super::frame::RawFrame;
use crate::error::{AppError, Result};

/// Convert a frame to the target pixel layout.
///
/// Returns the input unchanged (cheap clone, shared buffer) when it is
/// already in the target layout.
pub fn convert_frame(frame: &RawFrame, target: PixelFormat) -> Result<RawFrame> {
    if !frame.is_well_formed() {
        return Err(AppError::Decode(format!(
            "malformed {} frame: {} bytes for {}x{}",
            frame.format,
            frame.len(),
            frame.width,
            frame.height
        )));
    }

    match (frame.format, target) {
        (from, to) if from == to => Ok(frame.clone()),
        (PixelFormat::I420, PixelFormat::Bgra) => Ok(i420_to_bgra(frame)),
        (from, to) => Err(AppError::Decode(format!(
            "unsupported pixel conversion {} -> {}",
            from, to
        ))),
    }
}

fn i420_to_bgra(frame: &RawFrame) -> RawFrame {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let y_size = width * height;
    let chroma_width = width.div_ceil(2);
    let chroma_size = chroma_width * height.div_ceil(2);

    let y_plane = &frame.data[..y_size];
    let u_plane = &frame.data[y_size..y_size + chroma_size];
    let v_plane = &frame.data[y_size + chroma_size..];

    let mut out = vec![0u8; y_size * 4];
    for row in 0..height {
        let chroma_row = row / 2;
        for col in 0..width {
            let y = y_plane[row * width + col] as i32;
            let u = u_plane[chroma_row * chroma_width + col / 2] as i32;
            let v = v_plane[chroma_row * chroma_width + col / 2] as i32;

            let c = 298 * (y - 16);
            let d = u - 128;
            let e = v - 128;

            let r = (c + 409 * e + 128) >> 8;
            let g = (c - 100 * d - 208 * e + 128) >> 8;
            let b = (c + 516 * d + 128) >> 8;

            let base = (row * width + col) * 4;
            out[base] = b.clamp(0, 255) as u8;
            out[base + 1] = g.clamp(0, 255) as u8;
            out[base + 2] = r.clamp(0, 255) as u8;
            out[base + 3] = 255;
        }
    }

    RawFrame::new(
        Bytes::from(out),
        frame.width,
        frame.height,
        PixelFormat::Bgra,
        frame.timestamp,
    )
}
