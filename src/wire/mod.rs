//! Wire format: `deflate(header ++ pixels)`, one message per frame.
//!
//! The header is 16 bytes, little-endian: width, height, FourCC pixel
//! format and bytes per row. The payload is `bytes_per_row * height` raw
//! pixel bytes. The transport is an opaque message channel.

pub mod framer;
pub mod header;
pub mod receiver;

pub use framer::{FrameFramer, DEFAULT_MAX_MESSAGE_BYTES};
pub use header::{FrameHeader, HEADER_LEN};
pub use receiver::{FrameReady, FrameReceiver, ReceiverStats};
