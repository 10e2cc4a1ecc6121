use std::fmt;

use bytes::Bytes;
use half::f16;
use serde::{Deserialize, Serialize};

use crate::utils::fourcc_to_string;

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit B, G, R, A
    Bgra32,
    /// Little-endian IEEE half floats, meters
    DepthFloat16,
    Rgb24,
    /// Any tag we can name but not lay out
    Unknown(u32),
}

impl PixelFormat {
    pub const BGRA32_FOURCC: u32 = u32::from_be_bytes(*b"BGRA");
    pub const DEPTH_FLOAT16_FOURCC: u32 = u32::from_be_bytes(*b"hdep");
    pub const RGB24_FOURCC: u32 = 24;

    pub const fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Bgra32 => Self::BGRA32_FOURCC,
            PixelFormat::DepthFloat16 => Self::DEPTH_FLOAT16_FOURCC,
            PixelFormat::Rgb24 => Self::RGB24_FOURCC,
            PixelFormat::Unknown(tag) => tag,
        }
    }

    pub const fn from_fourcc(tag: u32) -> Self {
        match tag {
            Self::BGRA32_FOURCC => PixelFormat::Bgra32,
            Self::DEPTH_FLOAT16_FOURCC => PixelFormat::DepthFloat16,
            Self::RGB24_FOURCC => PixelFormat::Rgb24,
            other => PixelFormat::Unknown(other),
        }
    }

    pub const fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Bgra32 => Some(4),
            PixelFormat::DepthFloat16 => Some(2),
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Unknown(_) => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fourcc_to_string(self.fourcc()))
    }
}

/// Geometry and layout of an image plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub bytes_per_row: u32,
}

impl FrameShape {
    /// Shape with rows packed tightly (no padding)
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Self {
        let bpp = format.bytes_per_pixel().unwrap_or(0) as u32;
        Self {
            width,
            height,
            format,
            bytes_per_row: width.saturating_mul(bpp),
        }
    }

    /// Bytes a single row of pixels occupies without padding
    pub fn min_bytes_per_row(&self) -> Option<usize> {
        self.format
            .bytes_per_pixel()?
            .checked_mul(self.width as usize)
    }

    /// Total plane size, `None` on overflow
    pub fn byte_len(&self) -> Option<usize> {
        (self.bytes_per_row as usize).checked_mul(self.height as usize)
    }

    pub fn is_valid(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        match self.min_bytes_per_row() {
            Some(row) => row <= self.bytes_per_row as usize && self.byte_len().is_some(),
            None => false,
        }
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} ({} bytes/row)",
            self.width, self.height, self.format, self.bytes_per_row
        )
    }
}

/// Plane of range samples straight from the sensor
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    /// Samples per row, `>= width`
    pub stride: u32,
    pub samples: Vec<f16>,
}

impl DepthFrame {
    /// Zero-filled frame with a packed stride
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stride: width,
            samples: vec![f16::ZERO; width as usize * height as usize],
        }
    }

    /// Wrap packed samples; `None` if the count doesn't match the dimensions
    pub fn from_samples(width: u32, height: u32, samples: Vec<f16>) -> Option<Self> {
        if samples.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            stride: width,
            samples,
        })
    }

    /// Single-value frame, handy for calibration and tests
    pub fn filled(width: u32, height: u32, depth: f32) -> Self {
        let mut frame = Self::new(width, height);
        frame.samples.fill(f16::from_f32(depth));
        frame
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.samples
            .get(y as usize * self.stride as usize + x as usize)
            .copied()
    }

    /// Row-major iteration over the visible part of each row
    pub fn rows(&self) -> impl Iterator<Item = &[f16]> + '_ {
        let width = self.width as usize;
        self.samples
            .chunks(self.stride.max(1) as usize)
            .take(self.height as usize)
            .map(move |row| &row[..width.min(row.len())])
    }

    /// Sample count the plane must hold for its stride and height
    pub fn required_len(&self) -> usize {
        if self.height == 0 {
            return 0;
        }
        (self.height as usize - 1) * self.stride as usize + self.width as usize
    }
}

/// Depth plane expressed as 8-bit color, ready for a color-only transport
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub shape: FrameShape,
    /// Immutable plane data - can be shared across threads without copying
    pub data: Bytes,
}

impl EncodedFrame {
    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    /// The 4 bytes of the pixel at `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.shape.width || y >= self.shape.height {
            return None;
        }
        let offset = y as usize * self.shape.bytes_per_row as usize + x as usize * 4;
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}
