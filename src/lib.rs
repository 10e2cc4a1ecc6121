pub mod buffer;
pub mod capture;
pub mod codec;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod utils;
pub mod wire;

use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use capture::frame::{FrameShape, PixelFormat};
use error::ConfigError;
use pipeline::control::ControlState;

pub use buffer::{CachedBuffer, CachedBufferPool, FrameSlot, PixelBuffer};
pub use capture::{DepthFrame, EncodedFrame};
pub use codec::{CodecAlgorithm, DepthCodec, DepthRange, DepthTranscoder};

/// Environment variables override file settings, e.g. `DEPTHLINK__STREAM__FPS=60`
pub const ENV_PREFIX: &str = "DEPTHLINK";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub wire: WireConfig,
    /// Initial control state; changed at runtime through the control surface
    pub control: ControlState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Fixed device output, always BGRA
    pub output_width: u32,
    pub output_height: u32,
    pub fps: u32,
    pub queue_capacity: usize,
    pub heartbeat_interval_ms: u64,
    pub control_event_capacity: usize,
    pub sensor_width: u32,
    pub sensor_height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// DEFLATE level, 0-9
    pub compression_level: u32,
    /// Upper bound on an inflated message
    pub max_message_bytes: usize,
    pub ready_channel_capacity: usize,
    /// Receive buffers that may be in flight at once: ready events, queued
    /// entries and the published frame
    pub receive_slots: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            output_width: 1920,
            output_height: 1080,
            fps: 30,
            queue_capacity: 5,
            heartbeat_interval_ms: 2000,
            control_event_capacity: 16,
            sensor_width: 640,
            sensor_height: 480,
        }
    }
}

impl StreamConfig {
    pub fn output_shape(&self) -> FrameShape {
        FrameShape::packed(self.output_width, self.output_height, PixelFormat::Bgra32)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            compression_level: 1,
            max_message_bytes: wire::DEFAULT_MAX_MESSAGE_BYTES,
            ready_channel_capacity: 4,
            // ready channel + default queue depth + published + back
            receive_slots: 4 + 5 + 2,
        }
    }
}

impl Config {
    /// Defaults, then an optional TOML file, then `DEPTHLINK__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );
        Self::finish(builder)
    }

    /// Defaults overlaid with an inline TOML document
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::finish(Self::defaults()?.add_source(File::from_str(text, FileFormat::Toml)))
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = config::Config::try_from(&Config::default())?;
        Ok(config::Config::builder().add_source(defaults))
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if !self.stream.output_shape().is_valid() {
            return invalid("output size must be non-zero");
        }
        if self.stream.fps == 0 {
            return invalid("fps must be positive");
        }
        if self.stream.queue_capacity == 0 {
            return invalid("queue_capacity must be positive");
        }
        if self.stream.heartbeat_interval_ms == 0 {
            return invalid("heartbeat_interval_ms must be positive");
        }
        if self.stream.sensor_width == 0 || self.stream.sensor_height == 0 {
            return invalid("sensor size must be non-zero");
        }
        if self.wire.compression_level > 9 {
            return invalid("compression_level must be 0-9");
        }
        if self.wire.max_message_bytes <= wire::HEADER_LEN {
            return invalid("max_message_bytes must exceed the header size");
        }
        if self.wire.receive_slots < 2 {
            return invalid("receive_slots must be at least 2");
        }
        Ok(())
    }
}
