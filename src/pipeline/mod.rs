pub mod control;
pub mod heartbeat;
pub mod ringbuf;
pub mod scheduler;

pub use control::{ControlEvent, ControlState, ControlSurface};
pub use heartbeat::{Heartbeat, StatusProperty, StreamStatusProbe};
pub use ringbuf::{
    FrameOrigin, FrameQueue, FrameQueueConsumer, FrameQueueProducer, FrameSink, QueueEntry,
    QueueStats, SinkStatus,
};
pub use scheduler::{SchedulerHandle, StreamScheduler, TickOutcome};
