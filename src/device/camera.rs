//! Reference downstream device.
//! Drains the frame queue at its own pace and publishes how many clients
//! are attached through the status property the heartbeat polls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::capture::frame::FrameShape;
use crate::pipeline::heartbeat::StatusProperty;
use crate::pipeline::ringbuf::{FrameOrigin, FrameQueueConsumer, QueueEntry};

/// A frame handed to the device's clients
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub entry: QueueEntry,
    /// Time between enqueue and presentation
    pub latency: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraStats {
    pub presented: u64,
    pub filler: u64,
    pub last_sequence: u64,
}

pub struct VirtualCamera {
    output: FrameShape,
    consumer: FrameQueueConsumer,
    status: Arc<StatusProperty>,
    clients: u32,
    stats: CameraStats,
}

impl VirtualCamera {
    pub fn new(output: FrameShape, consumer: FrameQueueConsumer) -> Self {
        let status = Arc::new(StatusProperty::new());
        status.set_clients(0);
        info!(shape = %output, "Virtual camera ready");
        Self {
            output,
            consumer,
            status,
            clients: 0,
            stats: CameraStats::default(),
        }
    }

    pub fn output_shape(&self) -> FrameShape {
        self.output
    }

    /// Property the heartbeat reads
    pub fn status_property(&self) -> Arc<StatusProperty> {
        self.status.clone()
    }

    pub fn connect_client(&mut self) {
        self.clients += 1;
        self.status.set_clients(self.clients);
        info!(clients = self.clients, "Client connected");
    }

    pub fn disconnect_client(&mut self) {
        self.clients = self.clients.saturating_sub(1);
        self.status.set_clients(self.clients);
        info!(clients = self.clients, "Client disconnected");
    }

    pub fn clients(&self) -> u32 {
        self.clients
    }

    /// Take the next queued frame, if any
    pub fn present(&mut self) -> Option<PresentedFrame> {
        let entry = self.consumer.pop()?;
        let latency = Instant::now().saturating_duration_since(entry.presentation_time);
        metrics::histogram!("frame_latency_ms").record(latency.as_secs_f64() * 1000.0);

        self.stats.presented += 1;
        self.stats.last_sequence = entry.sequence;
        if entry.origin == FrameOrigin::Filler {
            self.stats.filler += 1;
        }
        debug!(sequence = entry.sequence, origin = ?entry.origin, ?latency, "Presented frame");

        Some(PresentedFrame { entry, latency })
    }

    pub fn queued(&self) -> usize {
        self.consumer.len()
    }

    pub fn stats(&self) -> CameraStats {
        self.stats
    }
}
