//! Error types for each pipeline stage

use crate::capture::frame::{FrameShape, PixelFormat};

/// Pixel buffer allocation and access errors
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// Buffer memory could not be reserved
    #[error("Failed to allocate {bytes} bytes for {shape}")]
    Allocation { shape: FrameShape, bytes: usize },

    /// Requested shape cannot describe a buffer
    #[error("Invalid buffer shape {0}")]
    InvalidShape(FrameShape),

    /// Lock is held elsewhere and the caller asked not to wait
    #[error("Buffer {0} is busy")]
    Busy(u64),

    /// A writer panicked while holding the buffer
    #[error("Buffer {0} is poisoned")]
    Poisoned(u64),
}

/// Depth codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid depth range {min}..{max}")]
    InvalidRange { min: f32, max: f32 },

    #[error("Expected {expected:?} buffer, got {actual:?}")]
    FormatMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    #[error("Dimension mismatch: input {input_width}x{input_height}, output {output_width}x{output_height}")]
    DimensionMismatch {
        input_width: u32,
        input_height: u32,
        output_width: u32,
        output_height: u32,
    },

    /// Plane is smaller than its declared stride and height
    #[error("Plane too small: need {needed}, have {actual}")]
    PlaneTooSmall { needed: usize, actual: usize },

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Wire protocol errors. Each one drops a single message.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Failed to decompress message: {0}")]
    Decompress(String),

    #[error("Failed to compress message: {0}")]
    Compress(#[from] std::io::Error),

    #[error("Message too short: {0} bytes, header needs 16")]
    TooShort(usize),

    #[error("Invalid frame header: {0}")]
    InvalidHeader(String),

    /// Header disagrees with the negotiated destination buffer
    #[error("Header {actual} does not match destination {expected}")]
    ContractMismatch {
        expected: FrameShape,
        actual: FrameShape,
    },

    #[error("Payload truncated: declared {declared} bytes, received {actual}")]
    PayloadTruncated { declared: usize, actual: usize },

    #[error("Declared payload {declared} exceeds destination capacity {capacity}")]
    CapacityExceeded { declared: usize, capacity: usize },

    /// Every receive buffer is still held downstream
    #[error("All {0} receive buffers are in flight")]
    SlotsExhausted(usize),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
