use anyhow::{anyhow, Result};

use crate::frame::rgb_len;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    /// Four bytes per pixel, alpha last (stereo cameras typically deliver this).
    Rgba32,
    /// Packed 4:2:2, Y0 U Y1 V.
    Yuyv,
}

impl PixelFormat {
    /// Capture formats in order of preference when negotiating with a device.
    pub const NEGOTIATION_ORDER: [PixelFormat; 3] =
        [PixelFormat::Rgb24, PixelFormat::Rgba32, PixelFormat::Yuyv];

    /// V4L2 fourcc code for this layout.
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Rgba32 => *b"AB24",
            PixelFormat::Yuyv => *b"YUYV",
        }
    }

    pub fn from_fourcc(code: &[u8; 4]) -> Option<PixelFormat> {
        match code {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"AB24" => Some(PixelFormat::Rgba32),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    pub fn bytes_per_frame(self, width: u32, height: u32) -> Result<usize> {
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let bpp = match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
            PixelFormat::Yuyv => 2,
        };
        pixels
            .checked_mul(bpp)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

/// Converts a captured buffer to packed RGB24.
pub fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let expected = format.bytes_per_frame(width, height)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    match format {
        PixelFormat::Rgb24 => Ok(pixels.to_vec()),
        PixelFormat::Rgba32 => {
            let mut rgb = Vec::with_capacity(rgb_len(width, height)?);
            for px in pixels.chunks_exact(4) {
                rgb.extend_from_slice(&px[..3]);
            }
            Ok(rgb)
        }
        PixelFormat::Yuyv => Ok(yuyv_to_rgb(pixels, width, height)),
    }
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for quad in pixels.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
