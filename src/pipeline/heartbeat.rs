//! Should-stream derivation from the device's status property.
//!
//! The device publishes a text property `sc=N` where N is the number of
//! attached clients. A slow heartbeat polls it, independent of the frame
//! timer, and flips the control surface's should-stream flag.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam::channel::{self, Sender};
use tracing::{debug, info, warn};

use super::control::ControlSurface;

/// Side channel the heartbeat reads
pub trait StreamStatusProbe: Send + Sync {
    /// Current raw property value, if the device exposes one
    fn stream_status(&self) -> Option<String>;
}

/// Parse `sc=N`. Anything else is ignored.
pub fn parse_stream_count(value: &str) -> Option<u32> {
    value.trim().strip_prefix("sc=")?.trim().parse().ok()
}

/// In-process status property, written by the device side
#[derive(Debug)]
pub struct StatusProperty {
    value: ArcSwap<String>,
}

impl StatusProperty {
    pub fn new() -> Self {
        Self {
            value: ArcSwap::from_pointee(String::new()),
        }
    }

    pub fn set(&self, value: impl Into<String>) {
        self.value.store(Arc::new(value.into()));
    }

    pub fn set_clients(&self, clients: u32) {
        self.set(format!("sc={}", clients));
    }
}

impl Default for StatusProperty {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStatusProbe for StatusProperty {
    fn stream_status(&self) -> Option<String> {
        let value = self.value.load();
        (!value.is_empty()).then(|| value.to_string())
    }
}

/// Poll once and apply the result. Returns the parsed client count.
pub fn poll_once(probe: &dyn StreamStatusProbe, control: &ControlSurface) -> Option<u32> {
    let raw = probe.stream_status()?;
    match parse_stream_count(&raw) {
        Some(clients) => {
            control.set_should_stream(clients > 0);
            Some(clients)
        }
        None => {
            debug!(value = %raw, "Ignoring unparseable stream status");
            None
        }
    }
}

pub struct Heartbeat {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Start polling `probe` every `interval` on a dedicated thread.
    /// The first poll happens immediately.
    pub fn start(
        probe: Arc<dyn StreamStatusProbe>,
        control: Arc<ControlSurface>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);

        let thread = std::thread::Builder::new()
            .name("heartbeat".into())
            .spawn(move || {
                info!(?interval, "Heartbeat started");
                poll_once(probe.as_ref(), &control);
                loop {
                    channel::select! {
                        recv(ticker) -> _ => {
                            poll_once(probe.as_ref(), &control);
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                info!("Heartbeat stopped");
            })?;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Heartbeat thread panicked");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::control::ControlEvent;

    #[test]
    fn test_parse_stream_count() {
        assert_eq!(parse_stream_count("sc=1"), Some(1));
        assert_eq!(parse_stream_count("sc=0"), Some(0));
        assert_eq!(parse_stream_count(" sc=12 "), Some(12));
        assert_eq!(parse_stream_count("sc="), None);
        assert_eq!(parse_stream_count("sc=-1"), None);
        assert_eq!(parse_stream_count("clients=1"), None);
    }

    #[test]
    fn test_poll_sets_flag() {
        let control = ControlSurface::default();
        let property = StatusProperty::new();

        property.set_clients(2);
        assert_eq!(poll_once(&property, &control), Some(2));
        assert!(control.snapshot().should_stream);

        property.set_clients(0);
        poll_once(&property, &control);
        assert!(!control.snapshot().should_stream);
    }

    #[test]
    fn test_garbage_leaves_flag() {
        let control = ControlSurface::default();
        control.set_should_stream(true);
        let property = StatusProperty::new();

        assert_eq!(poll_once(&property, &control), None);
        property.set("starting");
        assert_eq!(poll_once(&property, &control), None);
        assert!(control.snapshot().should_stream);
    }

    #[test]
    fn test_heartbeat_thread_polls() {
        let control = Arc::new(ControlSurface::default());
        let property = Arc::new(StatusProperty::new());
        property.set_clients(1);

        let heartbeat = Heartbeat::start(property.clone(), control.clone(), Duration::from_millis(5)).unwrap();
        let events = control.events();
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, ControlEvent::ShouldStream(true));

        property.set_clients(0);
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, ControlEvent::ShouldStream(false));

        heartbeat.stop();
    }
}
