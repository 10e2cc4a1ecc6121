//! Pooled pixel buffers with scoped access

pub mod pool;

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::Instant;

use arc_swap::ArcSwapOption;

use crate::capture::frame::FrameShape;
use crate::error::BufferError;

pub use pool::CachedBufferPool;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a pooled buffer
pub type CachedBuffer = Arc<PixelBuffer>;

/// Fixed-shape pixel memory. The shape never changes after allocation;
/// a different shape means a different buffer.
#[derive(Debug)]
pub struct PixelBuffer {
    id: u64,
    shape: FrameShape,
    len: usize,
    data: RwLock<Vec<u8>>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer, reporting allocation failure instead of aborting
    pub fn allocate(shape: FrameShape) -> Result<Self, BufferError> {
        if !shape.is_valid() {
            return Err(BufferError::InvalidShape(shape));
        }
        let len = shape.byte_len().ok_or(BufferError::InvalidShape(shape))?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| BufferError::Allocation { shape, bytes: len })?;
        data.resize(len, 0);

        Ok(Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            shape,
            len,
            data: RwLock::new(data),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn shape(&self) -> &FrameShape {
        &self.shape
    }

    /// Size of the plane in bytes
    pub fn capacity(&self) -> usize {
        self.len
    }

    pub fn read(&self) -> Result<BufferReadGuard<'_>, BufferError> {
        self.data
            .read()
            .map(BufferReadGuard)
            .map_err(|_| BufferError::Poisoned(self.id))
    }

    pub fn write(&self) -> Result<BufferWriteGuard<'_>, BufferError> {
        self.data
            .write()
            .map(BufferWriteGuard)
            .map_err(|_| BufferError::Poisoned(self.id))
    }

    /// Non-blocking read access
    pub fn try_read(&self) -> Result<BufferReadGuard<'_>, BufferError> {
        match self.data.try_read() {
            Ok(guard) => Ok(BufferReadGuard(guard)),
            Err(TryLockError::WouldBlock) => Err(BufferError::Busy(self.id)),
            Err(TryLockError::Poisoned(_)) => Err(BufferError::Poisoned(self.id)),
        }
    }

    /// Non-blocking write access
    pub fn try_write(&self) -> Result<BufferWriteGuard<'_>, BufferError> {
        match self.data.try_write() {
            Ok(guard) => Ok(BufferWriteGuard(guard)),
            Err(TryLockError::WouldBlock) => Err(BufferError::Busy(self.id)),
            Err(TryLockError::Poisoned(_)) => Err(BufferError::Poisoned(self.id)),
        }
    }

    /// Copy the plane out, mostly for tests and previews
    pub fn to_vec(&self) -> Result<Vec<u8>, BufferError> {
        Ok(self.read()?.to_vec())
    }
}

/// Scoped read access; released when dropped
pub struct BufferReadGuard<'a>(RwLockReadGuard<'a, Vec<u8>>);

impl Deref for BufferReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Scoped write access; released when dropped. The plane can be
/// modified but never resized.
pub struct BufferWriteGuard<'a>(RwLockWriteGuard<'a, Vec<u8>>);

impl Deref for BufferWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for BufferWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// A frame published into a [`FrameSlot`]
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub buffer: CachedBuffer,
    pub sequence: u64,
    pub published_at: Instant,
}

/// Lock-free holder of the most recent frame. Publishing replaces the
/// previous frame; readers only ever see the newest one.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: ArcSwapOption<PublishedFrame>,
    sequence: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a frame, returning its sequence number
    pub fn publish(&self, buffer: CachedBuffer) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        self.latest.store(Some(Arc::new(PublishedFrame {
            buffer,
            sequence,
            published_at: Instant::now(),
        })));
        sequence
    }

    pub fn latest(&self) -> Option<Arc<PublishedFrame>> {
        self.latest.load_full()
    }

    pub fn clear(&self) {
        self.latest.store(None);
    }
}
