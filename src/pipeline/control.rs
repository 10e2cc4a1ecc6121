//! Runtime control surface: codec selection, depth range, mirror and
//! should-stream flags. Readers take one snapshot per pass.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec::{CodecAlgorithm, DepthCodec, DepthRange};
use crate::error::CodecError;

/// Everything the control context can change while streaming
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlState {
    pub algorithm: CodecAlgorithm,
    pub range: DepthRange,
    pub mirror: bool,
    pub should_stream: bool,
}

impl ControlState {
    pub fn codec(&self) -> DepthCodec {
        DepthCodec::new(self.algorithm, self.range)
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            algorithm: CodecAlgorithm::Hue,
            range: DepthRange::default(),
            mirror: false,
            should_stream: false,
        }
    }
}

/// Change notification, sent after the new state is visible
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    Algorithm(CodecAlgorithm),
    Range(DepthRange),
    Mirror(bool),
    ShouldStream(bool),
}

pub struct ControlSurface {
    state: ArcSwap<ControlState>,
    events_tx: flume::Sender<ControlEvent>,
    events_rx: flume::Receiver<ControlEvent>,
}

impl ControlSurface {
    pub fn new(initial: ControlState, event_capacity: usize) -> Self {
        let (events_tx, events_rx) = flume::bounded(event_capacity.max(1));
        Self {
            state: ArcSwap::from_pointee(initial),
            events_tx,
            events_rx,
        }
    }

    /// Consistent view of all settings for one pass
    pub fn snapshot(&self) -> Arc<ControlState> {
        self.state.load_full()
    }

    /// Receiver of change events. Events are dropped when nobody keeps up.
    pub fn events(&self) -> flume::Receiver<ControlEvent> {
        self.events_rx.clone()
    }

    pub fn set_algorithm(&self, algorithm: CodecAlgorithm) {
        self.update(ControlEvent::Algorithm(algorithm), |s| s.algorithm = algorithm);
    }

    /// Install a new depth range; invalid ranges leave the current one
    pub fn set_range(&self, min: f32, max: f32) -> Result<(), CodecError> {
        let range = DepthRange::new(min, max)?;
        self.update(ControlEvent::Range(range), |s| s.range = range);
        Ok(())
    }

    pub fn set_mirror(&self, mirror: bool) {
        self.update(ControlEvent::Mirror(mirror), |s| s.mirror = mirror);
    }

    pub fn set_should_stream(&self, should_stream: bool) {
        self.update(ControlEvent::ShouldStream(should_stream), |s| {
            s.should_stream = should_stream
        });
    }

    fn update(&self, event: ControlEvent, apply: impl Fn(&mut ControlState)) {
        let previous = self.state.rcu(|current| {
            let mut next = **current;
            apply(&mut next);
            next
        });

        let mut next = *previous;
        apply(&mut next);
        if next == *previous {
            return;
        }

        info!(?event, "Control changed");
        if self.events_tx.try_send(event).is_err() {
            debug!(?event, "Control event dropped");
        }
    }
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self::new(ControlState::default(), 16)
    }
}
