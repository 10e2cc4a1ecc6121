//! Single-slot buffer cache keyed by frame shape

use std::sync::Arc;

use tracing::{debug, warn};

use super::{CachedBuffer, PixelBuffer};
use crate::capture::frame::{FrameShape, PixelFormat};
use crate::error::BufferError;

/// Owns one reusable buffer. Asking for the same shape returns the same
/// allocation; a new shape replaces it.
///
/// Replacement is treated as anomalous: producers are expected to hold a
/// stable resolution, so frequent reallocation points at an upstream bug.
#[derive(Debug)]
pub struct CachedBufferPool {
    label: &'static str,
    buffer: Option<CachedBuffer>,
    reallocations: u64,
}

impl CachedBufferPool {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            buffer: None,
            reallocations: 0,
        }
    }

    /// Buffer for a tightly packed `width x height` plane of `format`
    pub fn acquire(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<CachedBuffer, BufferError> {
        self.acquire_shape(FrameShape::packed(width, height, format))
    }

    /// Buffer for an explicit shape, including its row stride
    pub fn acquire_shape(&mut self, shape: FrameShape) -> Result<CachedBuffer, BufferError> {
        if let Some(buffer) = &self.buffer {
            if *buffer.shape() == shape {
                return Ok(Arc::clone(buffer));
            }
        }

        // On failure the previous buffer stays cached
        let buffer = Arc::new(PixelBuffer::allocate(shape)?);

        match self.buffer.replace(Arc::clone(&buffer)) {
            Some(previous) => {
                self.reallocations += 1;
                metrics::counter!("buffer_reallocations_total", "pool" => self.label).increment(1);
                warn!(
                    pool = self.label,
                    from = %previous.shape(),
                    to = %shape,
                    reallocations = self.reallocations,
                    "Rebuilding cached buffer for a different shape; if this happens often the producer is not holding a stable resolution"
                );
            }
            None => {
                debug!(pool = self.label, shape = %shape, id = buffer.id(), "Allocated cached buffer");
            }
        }

        Ok(buffer)
    }

    /// The cached buffer, if one has been allocated
    pub fn current(&self) -> Option<&CachedBuffer> {
        self.buffer.as_ref()
    }

    /// Whether the cached buffer is still held outside the pool
    pub fn in_use(&self) -> bool {
        self.buffer
            .as_ref()
            .is_some_and(|buffer| Arc::strong_count(buffer) > 1)
    }

    /// Number of anomalous (shape-change) reallocations so far
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Drop the cached buffer; the next acquire allocates fresh memory
    pub fn release(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            debug!(pool = self.label, id = buffer.id(), "Released cached buffer");
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}
