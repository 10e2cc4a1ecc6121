use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::utils::CachePadded;
use flume::TrySendError;
use tracing::{debug, info, instrument, warn};

use super::framer::FrameFramer;
use crate::buffer::{CachedBuffer, CachedBufferPool, FrameSlot};
use crate::capture::frame::FrameShape;
use crate::error::WireError;
use crate::WireConfig;

/// Notification that a new frame has been published
#[derive(Debug, Clone)]
pub struct FrameReady {
    pub sequence: u64,
    pub buffer: CachedBuffer,
    pub received_at: Instant,
}

/// Receive-side counters, padded to avoid false sharing with readers
#[derive(Debug, Default)]
pub struct ReceiverStats {
    accepted: CachePadded<AtomicU64>,
    rejected: CachePadded<AtomicU64>,
    decompress_failures: CachePadded<AtomicU64>,
    ready_dropped: CachePadded<AtomicU64>,
}

impl ReceiverStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Messages dropped for any reason other than decompression
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn decompress_failures(&self) -> u64 {
        self.decompress_failures.load(Ordering::Relaxed)
    }

    /// Ready events dropped because the listener fell behind
    pub fn ready_dropped(&self) -> u64 {
        self.ready_dropped.load(Ordering::Relaxed)
    }
}

/// Receive side of the wire protocol.
///
/// The first accepted message fixes the destination contract (width,
/// height, format, stride). Later messages must match it exactly. Each
/// frame is written into a slot nobody else holds and then published, so a
/// buffer handed out through the slot, a ready event or the frame queue is
/// never written again.
pub struct FrameReceiver {
    framer: FrameFramer,
    contract: Option<FrameShape>,
    slots: Vec<CachedBufferPool>,
    max_slots: usize,
    back: usize,
    output: Arc<FrameSlot>,
    ready_tx: flume::Sender<FrameReady>,
    stats: Arc<ReceiverStats>,
}

impl FrameReceiver {
    /// Create a receiver publishing into `output`. The returned channel
    /// carries one event per accepted frame.
    pub fn new(config: &WireConfig, output: Arc<FrameSlot>) -> (Self, flume::Receiver<FrameReady>) {
        let (ready_tx, ready_rx) = flume::bounded(config.ready_channel_capacity.max(1));
        let receiver = Self {
            framer: FrameFramer::new(config.compression_level, config.max_message_bytes),
            contract: None,
            slots: vec![CachedBufferPool::new("receive"), CachedBufferPool::new("receive")],
            max_slots: config.receive_slots.max(2),
            back: 0,
            output,
            ready_tx,
            stats: Arc::new(ReceiverStats::default()),
        };
        (receiver, ready_rx)
    }

    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Negotiated destination shape, if any message has been accepted
    pub fn contract(&self) -> Option<FrameShape> {
        self.contract
    }

    pub fn output(&self) -> &Arc<FrameSlot> {
        &self.output
    }

    /// Receive buffers allocated so far
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Apply one wire message. Any error drops just this message and
    /// leaves the published frame untouched.
    #[instrument(skip_all, fields(len = message.len()))]
    pub fn receive(&mut self, message: &[u8]) -> Result<FrameReady, WireError> {
        match self.apply(message) {
            Ok(ready) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(sequence = ready.sequence, "Frame published");
                Ok(ready)
            }
            Err(e @ WireError::Decompress(_)) => {
                self.stats.decompress_failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("wire_decompress_failures_total").increment(1);
                warn!("Dropping message: {}", e);
                Err(e)
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("wire_messages_rejected_total").increment(1);
                warn!("Dropping message: {}", e);
                Err(e)
            }
        }
    }

    fn apply(&mut self, message: &[u8]) -> Result<FrameReady, WireError> {
        let (header, payload) = self.framer.deserialize(message)?;
        let declared_shape = header.shape()?;

        let contract = self.contract.unwrap_or(declared_shape);
        if declared_shape != contract {
            return Err(WireError::ContractMismatch {
                expected: contract,
                actual: declared_shape,
            });
        }

        let declared = contract
            .byte_len()
            .ok_or_else(|| WireError::InvalidHeader(format!("{} overflows", contract)))?;
        if payload.len() < declared {
            return Err(WireError::PayloadTruncated {
                declared,
                actual: payload.len(),
            });
        }

        let index = Self::free_slot(&mut self.slots, self.back, self.max_slots)?;
        let buffer = self.slots[index].acquire_shape(contract)?;
        if declared > buffer.capacity() {
            return Err(WireError::CapacityExceeded {
                declared,
                capacity: buffer.capacity(),
            });
        }
        {
            let copy_len = declared.min(payload.len()).min(buffer.capacity());
            let mut plane = buffer.write()?;
            plane[..copy_len].copy_from_slice(&payload[..copy_len]);
        }

        if self.contract.is_none() {
            info!(shape = %contract, "Negotiated receive contract");
            self.contract = Some(contract);
        }
        self.back = (index + 1) % self.slots.len();

        let sequence = self.output.publish(buffer.clone());
        let ready = FrameReady {
            sequence,
            buffer,
            received_at: Instant::now(),
        };
        match self.ready_tx.try_send(ready.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.ready_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(sequence, "Ready listener behind, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
        Ok(ready)
    }

    /// Next slot, starting at the back one, whose buffer is not held
    /// downstream. Grows the ring while under `max_slots`.
    fn free_slot(
        slots: &mut Vec<CachedBufferPool>,
        back: usize,
        max_slots: usize,
    ) -> Result<usize, WireError> {
        let count = slots.len();
        if let Some(index) = (0..count)
            .map(|i| (back + i) % count)
            .find(|&i| !slots[i].in_use())
        {
            return Ok(index);
        }
        if count < max_slots {
            slots.push(CachedBufferPool::new("receive"));
            metrics::counter!("wire_receive_slots_added_total").increment(1);
            debug!(slots = count + 1, "Receive buffers all in flight, adding one");
            return Ok(count);
        }
        Err(WireError::SlotsExhausted(count))
    }

    /// Forget the destination contract and drop every slot; the next
    /// message negotiates a new one
    pub fn reset(&mut self) {
        self.contract = None;
        self.back = 0;
        self.slots.truncate(2);
        for slot in &mut self.slots {
            slot.release();
        }
        self.output.clear();
        info!("Receiver reset");
    }
}
