//! depthlink demo pipeline
//!
//! synthetic sensor -> depth codec -> wire -> receiver -> scheduler -> virtual camera
//!
//! Usage: `depthlink [config.toml] [preview.png]`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use color_eyre::Result;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use depthlink::capture::{DepthFrame, SyntheticSensor};
use depthlink::codec::{grayscale_preview, DecodeOutcome, DepthCodec, DepthTranscoder};
use depthlink::device::VirtualCamera;
use depthlink::pipeline::{ControlSurface, FrameQueue, Heartbeat, StreamScheduler};
use depthlink::utils::frame_period;
use depthlink::wire::{FrameFramer, FrameReady, FrameReceiver};
use depthlink::{Config, FrameSlot};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    info!("depthlink launching...");

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let preview_path = args.next().map(PathBuf::from);

    let config = Config::load(config_path.as_deref())?;
    info!(?config, "Configuration loaded");

    let control = Arc::new(ControlSurface::new(
        config.control,
        config.stream.control_event_capacity,
    ));

    // Opaque message channel standing in for the real-time transport
    let (wire_tx, wire_rx) = flume::bounded::<Bytes>(2);
    let (stop_tx, stop_rx) = flume::bounded::<()>(1);

    // Sender side: sensor -> codec -> framer
    let sender = {
        let control = control.clone();
        let stream = config.stream.clone();
        let framer = FrameFramer::new(config.wire.compression_level, config.wire.max_message_bytes);
        tokio::spawn(async move {
            let mut sensor = SyntheticSensor::from_config(&stream);
            let mut transcoder = DepthTranscoder::new();
            let mut interval = tokio::time::interval(frame_period(stream.fps));
            loop {
                interval.tick().await;
                let codec = control.snapshot().codec();
                let message = match encode_frame(sensor.capture_frame(), &codec, &mut transcoder, &framer) {
                    Ok(message) => message,
                    Err(e) => {
                        error!("Encode error: {}", e);
                        continue;
                    }
                };
                if wire_tx.send_async(message).await.is_err() {
                    break;
                }
            }
        })
    };

    // Receive side: framer -> double-buffered slot
    let slot = Arc::new(FrameSlot::new());
    let (mut receiver, ready_rx) = FrameReceiver::new(&config.wire, slot.clone());
    let receiver_stats = receiver.stats();
    let receive_task = tokio::spawn(async move {
        while let Ok(message) = wire_rx.recv_async().await {
            // errors are counted and logged by the receiver
            let _ = receiver.receive(&message);
        }
    });

    let ready_task = tokio::spawn(listen_ready(ready_rx, control.clone(), preview_path));

    // Device side: queue -> virtual camera
    let output = config.stream.output_shape();
    let (producer, consumer) = FrameQueue::new(config.stream.queue_capacity, output).split();
    let mut camera = VirtualCamera::new(output, consumer);
    camera.connect_client();

    let heartbeat = Heartbeat::start(
        camera.status_property(),
        control.clone(),
        config.stream.heartbeat_interval(),
    )?;
    let scheduler = StreamScheduler::new(producer, slot, control.clone()).start(config.stream.fps)?;

    let camera_task = {
        let period = frame_period(config.stream.fps);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        camera.present();
                    }
                    _ = stop_rx.recv_async() => break,
                }
            }
            camera
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = stop_tx.send(());
    let camera = camera_task.await?;
    if scheduler.stop().is_none() {
        warn!("Scheduler did not stop cleanly");
    }
    heartbeat.stop();
    sender.abort();
    let _ = receive_task.await;
    ready_task.abort();

    let stats = camera.stats();
    info!(
        presented = stats.presented,
        filler = stats.filler,
        accepted = receiver_stats.accepted(),
        rejected = receiver_stats.rejected(),
        decompress_failures = receiver_stats.decompress_failures(),
        "depthlink stopped"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("depthlink=debug"));
    let registry = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()),
    );

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

fn encode_frame(
    frame: &DepthFrame,
    codec: &DepthCodec,
    transcoder: &mut DepthTranscoder,
    framer: &FrameFramer,
) -> Result<Bytes> {
    let buffer = transcoder.encode(frame, codec)?;
    Ok(framer.serialize_buffer(&buffer)?)
}

/// Frame-ready listener. Writes one grayscale preview if a path was given.
async fn listen_ready(
    ready_rx: flume::Receiver<FrameReady>,
    control: Arc<ControlSurface>,
    preview_path: Option<PathBuf>,
) {
    let mut transcoder = DepthTranscoder::new();
    let mut preview_path = preview_path;

    while let Ok(ready) = ready_rx.recv_async().await {
        if ready.sequence % 30 == 0 {
            debug!(sequence = ready.sequence, "Frame ready");
        }

        let Some(path) = preview_path.as_deref() else {
            continue;
        };
        let state = control.snapshot();
        match transcoder.decode(&ready.buffer, &state.codec()) {
            Ok((depth, DecodeOutcome::Decoded)) => {
                if let Err(e) = save_preview(depth, &state.codec(), path) {
                    error!("Failed to write preview: {}", e);
                }
                preview_path = None;
            }
            Ok((_, DecodeOutcome::Unsupported)) => {
                warn!(algorithm = ?state.algorithm, "Codec cannot be decoded, no preview");
                preview_path = None;
            }
            Err(e) => error!("Decode error: {}", e),
        }
    }
}

fn save_preview(depth: &DepthFrame, codec: &DepthCodec, path: &Path) -> Result<()> {
    grayscale_preview(depth, codec.range()).save(path)?;
    info!(path = %path.display(), "Preview written");
    Ok(())
}
