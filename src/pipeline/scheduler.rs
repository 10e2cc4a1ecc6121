//! Fixed-rate driver between the receive path and the device.
//!
//! Every tick samples the newest published frame, adapts it to the device's
//! output shape and hands it to the sink. A tick never blocks: contended
//! buffers, a busy consumer or a full queue just skip that tick.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use image::{ImageBuffer, Rgba};
use tracing::{debug, info, instrument, trace, warn};

use super::control::{ControlState, ControlSurface};
use super::ringbuf::{FrameOrigin, FrameSink, QueueEntry, SinkStatus};
use crate::buffer::{CachedBuffer, CachedBufferPool, FrameSlot};
use crate::capture::frame::{FrameShape, PixelFormat};
use crate::error::{BufferError, CodecError};
use crate::utils::{frame_period, host_time_nanos};

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Should-stream is off
    Disabled,
    /// Previous frame pending and the consumer has not asked for more
    AwaitingConsumer,
    Enqueued(FrameOrigin),
    QueueFull,
    Rejected,
    /// A buffer was locked elsewhere
    Busy,
    Failed,
}

/// Filler colors, left to right, as B, G, R, A
const FILLER_BARS: [[u8; 4]; 8] = [
    [255, 255, 255, 255],
    [0, 255, 255, 255],
    [255, 255, 0, 255],
    [0, 255, 0, 255],
    [255, 0, 255, 255],
    [0, 0, 255, 255],
    [255, 0, 0, 255],
    [0, 0, 0, 255],
];

pub struct StreamScheduler<S: FrameSink> {
    sink: S,
    source: Arc<FrameSlot>,
    control: Arc<ControlSurface>,
    resize_pool: CachedBufferPool,
    filler_pool: CachedBufferPool,
    /// (buffer id, mirrored) of the last filler drawn
    filler_drawn: Option<(u64, bool)>,
    enqueued: bool,
    ready_carry: bool,
    sequence: u64,
}

impl<S: FrameSink> StreamScheduler<S> {
    pub fn new(sink: S, source: Arc<FrameSlot>, control: Arc<ControlSurface>) -> Self {
        Self {
            sink,
            source,
            control,
            resize_pool: CachedBufferPool::new("resize"),
            filler_pool: CachedBufferPool::new("filler"),
            filler_drawn: None,
            enqueued: false,
            ready_carry: false,
            sequence: 0,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Run one scheduling step
    pub fn tick(&mut self) -> TickOutcome {
        let control = self.control.snapshot();
        if !control.should_stream {
            return TickOutcome::Disabled;
        }

        let ready = self.ready_carry || self.sink.take_ready();
        if self.enqueued && !ready {
            return TickOutcome::AwaitingConsumer;
        }

        let (buffer, origin) = match self.prepare(&control) {
            Ok(prepared) => prepared,
            Err(CodecError::Buffer(BufferError::Busy(id))) => {
                self.ready_carry = ready;
                debug!(id, "Buffer busy, skipping tick");
                return TickOutcome::Busy;
            }
            Err(e) => {
                self.ready_carry = ready;
                warn!("Failed to prepare frame: {}", e);
                return TickOutcome::Failed;
            }
        };

        self.enqueued = true;
        self.ready_carry = false;
        self.sequence += 1;

        let presentation_time = Instant::now();
        let entry = QueueEntry {
            buffer,
            presentation_time,
            sequence: self.sequence,
            origin,
        };
        match self.sink.submit(entry) {
            SinkStatus::Accepted => {
                trace!(
                    sequence = self.sequence,
                    pts_ns = host_time_nanos(presentation_time),
                    ?origin,
                    "Frame enqueued"
                );
                TickOutcome::Enqueued(origin)
            }
            SinkStatus::QueueFull => {
                warn!(sequence = self.sequence, "Queue full, dropping frame");
                TickOutcome::QueueFull
            }
            SinkStatus::Rejected => {
                // nothing is pending downstream
                self.enqueued = false;
                warn!(sequence = self.sequence, "Device rejected frame");
                TickOutcome::Rejected
            }
        }
    }

    fn prepare(&mut self, control: &ControlState) -> Result<(CachedBuffer, FrameOrigin), CodecError> {
        let output = self.sink.output_shape();

        let Some(frame) = self.source.latest() else {
            return Ok((self.fill(&output, control.mirror)?, FrameOrigin::Filler));
        };

        let source_shape = *frame.buffer.shape();
        if source_shape == output {
            return Ok((frame.buffer.clone(), FrameOrigin::Forwarded));
        }
        if source_shape.format != output.format {
            return Err(CodecError::FormatMismatch {
                expected: output.format,
                actual: source_shape.format,
            });
        }

        let target = self.resize_pool.acquire_shape(output)?;
        {
            let src = frame.buffer.try_read()?;
            let mut dst = target.try_write()?;
            resize_nearest(&source_shape, &src, &output, &mut dst)?;
        }
        Ok((target, FrameOrigin::Resized))
    }

    fn fill(&mut self, output: &FrameShape, mirror: bool) -> Result<CachedBuffer, CodecError> {
        let buffer = self.filler_pool.acquire_shape(*output)?;
        if self.filler_drawn == Some((buffer.id(), mirror)) {
            return Ok(buffer);
        }

        {
            let mut plane = buffer.try_write()?;
            draw_filler(output, &mut plane);
            if mirror {
                mirror_in_place(output, &mut plane)?;
            }
        }
        self.filler_drawn = Some((buffer.id(), mirror));
        Ok(buffer)
    }

    /// Drop pooled buffers; the next tick allocates fresh ones
    pub fn release(&mut self) {
        self.resize_pool.release();
        self.filler_pool.release();
        self.filler_drawn = None;
        self.enqueued = false;
        self.ready_carry = false;
    }
}

impl<S: FrameSink + 'static> StreamScheduler<S> {
    /// Drive `tick` at `fps` on a dedicated thread
    #[instrument(skip(self))]
    pub fn start(self, fps: u32) -> std::io::Result<SchedulerHandle<S>> {
        let period = frame_period(fps);
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let mut scheduler = self;

        let thread = std::thread::Builder::new()
            .name("stream-scheduler".into())
            .spawn(move || {
                let ticker = channel::tick(period);
                info!(?period, "Scheduler started");
                loop {
                    channel::select! {
                        recv(ticker) -> _ => {
                            let started = Instant::now();
                            let outcome = scheduler.tick();
                            trace!(?outcome, elapsed = ?started.elapsed(), "Tick");
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                scheduler.release();
                info!("Scheduler stopped");
                scheduler
            })?;

        Ok(SchedulerHandle {
            stop_tx,
            thread: Some(thread),
            period,
        })
    }
}

/// Running scheduler. Dropping it stops the timer.
pub struct SchedulerHandle<S: FrameSink> {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<StreamScheduler<S>>>,
    period: Duration,
}

impl<S: FrameSink> SchedulerHandle<S> {
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cancel the timer, wait for the current tick and hand back the
    /// scheduler with its pools released
    pub fn stop(mut self) -> Option<StreamScheduler<S>> {
        self.join()
    }

    fn join(&mut self) -> Option<StreamScheduler<S>> {
        let thread = self.thread.take()?;
        let _ = self.stop_tx.try_send(());
        match thread.join() {
            Ok(scheduler) => Some(scheduler),
            Err(_) => {
                warn!("Scheduler thread panicked");
                None
            }
        }
    }
}

impl<S: FrameSink> Drop for SchedulerHandle<S> {
    fn drop(&mut self) {
        self.join();
    }
}

/// Nearest-neighbour scale of a 4-byte-per-pixel plane. Ratios are
/// computed in floating point so non-integer scale factors map evenly.
pub fn resize_nearest(
    src_shape: &FrameShape,
    src: &[u8],
    dst_shape: &FrameShape,
    dst: &mut [u8],
) -> Result<(), CodecError> {
    const BPP: usize = 4;
    for (shape, len) in [(src_shape, src.len()), (dst_shape, dst.len())] {
        if shape.format.bytes_per_pixel() != Some(BPP) {
            return Err(CodecError::FormatMismatch {
                expected: PixelFormat::Bgra32,
                actual: shape.format,
            });
        }
        let needed = shape.byte_len().unwrap_or(usize::MAX);
        if !shape.is_valid() || len < needed {
            return Err(CodecError::PlaneTooSmall { needed, actual: len });
        }
    }

    let x_ratio = src_shape.width as f32 / dst_shape.width as f32;
    let y_ratio = src_shape.height as f32 / dst_shape.height as f32;
    let src_stride = src_shape.bytes_per_row as usize;
    let dst_stride = dst_shape.bytes_per_row as usize;
    let dst_row_len = dst_shape.width as usize * BPP;

    for (y, dst_row) in dst.chunks_mut(dst_stride).take(dst_shape.height as usize).enumerate() {
        let sy = ((y as f32 * y_ratio) as u32).min(src_shape.height - 1) as usize;
        let src_row = &src[sy * src_stride..];

        for (x, px) in dst_row[..dst_row_len].chunks_exact_mut(BPP).enumerate() {
            let sx = ((x as f32 * x_ratio) as u32).min(src_shape.width - 1) as usize;
            px.copy_from_slice(&src_row[sx * BPP..sx * BPP + BPP]);
        }
    }
    Ok(())
}

/// Vertical color bars, the last one black
fn draw_filler(shape: &FrameShape, plane: &mut [u8]) {
    let width = shape.width as usize;
    let stride = shape.bytes_per_row as usize;
    for row in plane.chunks_mut(stride).take(shape.height as usize) {
        for (x, px) in row[..width * 4].chunks_exact_mut(4).enumerate() {
            let bar = x * FILLER_BARS.len() / width;
            px.copy_from_slice(&FILLER_BARS[bar]);
        }
    }
}

fn mirror_in_place(shape: &FrameShape, plane: &mut [u8]) -> Result<(), CodecError> {
    if shape.format != PixelFormat::Bgra32 || shape.bytes_per_row != shape.width * 4 {
        return Err(CodecError::FormatMismatch {
            expected: PixelFormat::Bgra32,
            actual: shape.format,
        });
    }
    let needed = shape.byte_len().unwrap_or(usize::MAX);
    let actual = plane.len();
    // channel order does not matter for a flip
    let mut image = ImageBuffer::<Rgba<u8>, &mut [u8]>::from_raw(shape.width, shape.height, plane)
        .ok_or(CodecError::PlaneTooSmall { needed, actual })?;
    image::imageops::flip_horizontal_in_place(&mut image);
    Ok(())
}
