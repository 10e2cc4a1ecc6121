use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::instrument;

use super::header::{FrameHeader, HEADER_LEN};
use crate::buffer::PixelBuffer;
use crate::capture::frame::FrameShape;
use crate::error::WireError;

/// Inflated size limit: a 1080p BGRA frame plus header, with headroom
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Serializes frames into compressed wire messages and back.
/// One message carries exactly one frame.
#[derive(Debug)]
pub struct FrameFramer {
    compression: Compression,
    max_message_bytes: usize,
    scratch: Vec<u8>,
}

impl FrameFramer {
    pub fn new(compression_level: u32, max_message_bytes: usize) -> Self {
        Self {
            compression: Compression::new(compression_level.min(9)),
            max_message_bytes,
            scratch: Vec::new(),
        }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Header for `shape` followed by its `bytes_per_row * height` pixel
    /// bytes, deflated as one block
    #[instrument(skip(self, pixels), fields(shape = %shape))]
    pub fn serialize(&self, shape: &FrameShape, pixels: &[u8]) -> Result<Bytes, WireError> {
        let header = FrameHeader::from_shape(shape)?;
        let declared = shape
            .byte_len()
            .ok_or_else(|| WireError::InvalidHeader(format!("{} overflows", shape)))?;
        if pixels.len() < declared {
            return Err(WireError::PayloadTruncated {
                declared,
                actual: pixels.len(),
            });
        }

        let mut raw = BytesMut::with_capacity(HEADER_LEN + declared);
        header.write_to(&mut raw);
        raw.put_slice(&pixels[..declared]);

        let writer = BytesMut::with_capacity(declared / 4).writer();
        let mut encoder = DeflateEncoder::new(writer, self.compression);
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?.into_inner().freeze())
    }

    /// Serialize the whole plane of a pooled buffer under a read guard
    pub fn serialize_buffer(&self, buffer: &PixelBuffer) -> Result<Bytes, WireError> {
        let plane = buffer.read()?;
        self.serialize(buffer.shape(), &plane)
    }

    /// Inflate `message` into the internal scratch space. The returned block
    /// still starts with the header.
    pub fn decompress(&mut self, message: &[u8]) -> Result<&[u8], WireError> {
        self.scratch.clear();
        let limit = self.max_message_bytes as u64;
        DeflateDecoder::new(message)
            .take(limit + 1)
            .read_to_end(&mut self.scratch)
            .map_err(|e| WireError::Decompress(e.to_string()))?;

        if self.scratch.len() as u64 > limit {
            return Err(WireError::Decompress(format!(
                "inflated size exceeds {} bytes",
                self.max_message_bytes
            )));
        }
        Ok(&self.scratch)
    }

    /// Inflate and split a message into its header and pixel payload
    pub fn deserialize(&mut self, message: &[u8]) -> Result<(FrameHeader, &[u8]), WireError> {
        let block = self.decompress(message)?;
        let header = FrameHeader::parse(block)?;
        Ok((header, &block[HEADER_LEN..]))
    }
}

impl Default for FrameFramer {
    fn default() -> Self {
        Self::new(Compression::fast().level(), DEFAULT_MAX_MESSAGE_BYTES)
    }
}
