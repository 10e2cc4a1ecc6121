use bytes::{Buf, BufMut};

use crate::capture::frame::{FrameShape, PixelFormat};
use crate::error::WireError;
use crate::utils::fourcc_to_string;

/// Size of the fixed header in front of every frame
pub const HEADER_LEN: usize = 16;

/// Fixed 16-byte little-endian frame header:
/// `width:i32, height:i32, pixel_format:u32, bytes_per_row:i32`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: i32,
    pub height: i32,
    pub pixel_format: u32,
    pub bytes_per_row: i32,
}

impl FrameHeader {
    pub fn from_shape(shape: &FrameShape) -> Result<Self, WireError> {
        let field = |name: &str, value: u32| {
            i32::try_from(value)
                .map_err(|_| WireError::InvalidHeader(format!("{} {} does not fit in i32", name, value)))
        };
        Ok(Self {
            width: field("width", shape.width)?,
            height: field("height", shape.height)?,
            pixel_format: shape.format.fourcc(),
            bytes_per_row: field("bytes_per_row", shape.bytes_per_row)?,
        })
    }

    /// Parse the leading 16 bytes of `data`
    pub fn parse(mut data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN {
            return Err(WireError::TooShort(data.len()));
        }
        Ok(Self {
            width: data.get_i32_le(),
            height: data.get_i32_le(),
            pixel_format: data.get_u32_le(),
            bytes_per_row: data.get_i32_le(),
        })
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.width);
        buf.put_i32_le(self.height);
        buf.put_u32_le(self.pixel_format);
        buf.put_i32_le(self.bytes_per_row);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        self.write_to(&mut &mut out[..]);
        out
    }

    /// Validate the declared geometry and turn it into a buffer shape
    pub fn shape(&self) -> Result<FrameShape, WireError> {
        if self.width <= 0 || self.height <= 0 || self.bytes_per_row <= 0 {
            return Err(WireError::InvalidHeader(format!(
                "non-positive geometry {}x{} stride {}",
                self.width, self.height, self.bytes_per_row
            )));
        }

        let format = PixelFormat::from_fourcc(self.pixel_format);
        if let PixelFormat::Unknown(tag) = format {
            return Err(WireError::InvalidHeader(format!(
                "unknown pixel format {}",
                fourcc_to_string(tag)
            )));
        }

        let shape = FrameShape {
            width: self.width as u32,
            height: self.height as u32,
            format,
            bytes_per_row: self.bytes_per_row as u32,
        };
        if !shape.is_valid() {
            return Err(WireError::InvalidHeader(format!(
                "stride {} too narrow for {}",
                self.bytes_per_row, shape
            )));
        }
        Ok(shape)
    }
}
