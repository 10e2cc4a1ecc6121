//! Lock-free bounded frame queue between the scheduler and the device

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::buffer::CachedBuffer;
use crate::capture::frame::FrameShape;

/// Where a queued frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Received frame already at the output shape
    Forwarded,
    /// Received frame scaled to the output shape
    Resized,
    /// Placeholder generated while no source frame exists
    Filler,
}

/// A frame handle plus its presentation time on the host clock
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub buffer: CachedBuffer,
    pub presentation_time: Instant,
    pub sequence: u64,
    pub origin: FrameOrigin,
}

/// Result of handing a frame to the downstream device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Accepted,
    QueueFull,
    /// Frame does not match the negotiated output
    Rejected,
}

/// Downstream side of the scheduler
pub trait FrameSink: Send {
    /// Fixed output shape negotiated with the device
    fn output_shape(&self) -> FrameShape;

    /// Consume the consumer's readiness signal, if raised
    fn take_ready(&self) -> bool;

    /// Hand over a frame without blocking
    fn submit(&mut self, entry: QueueEntry) -> SinkStatus;
}

#[derive(Debug, Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
    frames_rejected: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub written: usize,
    pub read: usize,
    pub dropped: usize,
    pub rejected: usize,
}

#[derive(Debug, Default)]
struct Shared {
    ready: CachePadded<AtomicBool>,
    stats: CachePadded<Stats>,
}

impl Shared {
    fn stats(&self) -> QueueStats {
        QueueStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            rejected: self.stats.frames_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-capacity SPSC ring of frame handles. Enqueue fails fast when
/// full; nothing is ever evicted.
pub struct FrameQueue {
    ring: HeapRb<QueueEntry>,
    output_shape: FrameShape,
}

impl FrameQueue {
    pub fn new(capacity: usize, output_shape: FrameShape) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            output_shape,
        }
    }

    /// Split into the scheduler end and the device end
    pub fn split(self) -> (FrameQueueProducer, FrameQueueConsumer) {
        let shared = Arc::new(Shared::default());
        let (prod, cons) = self.ring.split();
        (
            FrameQueueProducer {
                prod,
                shared: shared.clone(),
                output_shape: self.output_shape,
            },
            FrameQueueConsumer { cons, shared },
        )
    }
}

pub struct FrameQueueProducer {
    prod: HeapProd<QueueEntry>,
    shared: Arc<Shared>,
    output_shape: FrameShape,
}

impl FrameQueueProducer {
    /// Push without blocking; a full queue hands the entry back
    pub fn try_enqueue(&mut self, entry: QueueEntry) -> Result<(), QueueEntry> {
        match self.prod.try_push(entry) {
            Ok(()) => {
                self.shared.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_enqueued_total").increment(1);
                Ok(())
            }
            Err(entry) => {
                self.shared.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped_total", "reason" => "queue_full").increment(1);
                Err(entry)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.prod.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.prod.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.prod.capacity().get()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }
}

impl FrameSink for FrameQueueProducer {
    fn output_shape(&self) -> FrameShape {
        self.output_shape
    }

    fn take_ready(&self) -> bool {
        self.shared.ready.swap(false, Ordering::AcqRel)
    }

    fn submit(&mut self, entry: QueueEntry) -> SinkStatus {
        if *entry.buffer.shape() != self.output_shape {
            self.shared.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("frames_dropped_total", "reason" => "rejected").increment(1);
            return SinkStatus::Rejected;
        }
        match self.try_enqueue(entry) {
            Ok(()) => SinkStatus::Accepted,
            Err(_) => SinkStatus::QueueFull,
        }
    }
}

pub struct FrameQueueConsumer {
    cons: HeapCons<QueueEntry>,
    shared: Arc<Shared>,
}

impl FrameQueueConsumer {
    /// Take the oldest entry and signal readiness for the next one
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.cons.try_pop()?;
        self.shared.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        self.shared.ready.store(true, Ordering::Release);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.cons.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelBuffer;
    use crate::capture::frame::PixelFormat;

    fn output() -> FrameShape {
        FrameShape::packed(4, 4, PixelFormat::Bgra32)
    }

    fn entry(sequence: u64, shape: FrameShape) -> QueueEntry {
        QueueEntry {
            buffer: Arc::new(PixelBuffer::allocate(shape).unwrap()),
            presentation_time: Instant::now(),
            sequence,
            origin: FrameOrigin::Forwarded,
        }
    }

    #[test]
    fn test_capacity_five_sixth_fails() {
        let (mut producer, consumer) = FrameQueue::new(5, output()).split();

        for i in 0..5 {
            assert_eq!(producer.submit(entry(i, output())), SinkStatus::Accepted);
        }
        assert_eq!(producer.submit(entry(5, output())), SinkStatus::QueueFull);
        assert_eq!(producer.len(), 5);
        assert_eq!(consumer.len(), 5);

        let stats = producer.stats();
        assert_eq!(stats.written, 5);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_full_queue_contents_unchanged() {
        let (mut producer, mut consumer) = FrameQueue::new(2, output()).split();
        producer.try_enqueue(entry(1, output())).unwrap();
        producer.try_enqueue(entry(2, output())).unwrap();

        let rejected = producer.try_enqueue(entry(3, output())).unwrap_err();
        assert_eq!(rejected.sequence, 3);

        assert_eq!(consumer.pop().unwrap().sequence, 1);
        assert_eq!(consumer.pop().unwrap().sequence, 2);
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_pop_raises_ready() {
        let (mut producer, mut consumer) = FrameQueue::new(2, output()).split();
        assert!(!producer.take_ready());

        producer.try_enqueue(entry(1, output())).unwrap();
        assert!(!producer.take_ready());

        consumer.pop().unwrap();
        assert!(producer.take_ready());
        // consumed by the first take
        assert!(!producer.take_ready());
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let (mut producer, consumer) = FrameQueue::new(2, output()).split();
        let other = FrameShape::packed(8, 4, PixelFormat::Bgra32);
        assert_eq!(producer.submit(entry(1, other)), SinkStatus::Rejected);
        assert!(consumer.is_empty());
        assert_eq!(producer.stats().rejected, 1);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let (producer, _consumer) = FrameQueue::new(0, output()).split();
        assert_eq!(producer.capacity(), 1);
    }
}
