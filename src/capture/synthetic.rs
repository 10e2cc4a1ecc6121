//! Synthetic depth sensor.
//! Produces a sloped floor with a target sweeping across it, plus the
//! dropouts real sensors emit: NaN holes and out-of-range returns.

use std::time::Instant;

use half::f16;
use tracing::{info, instrument};

use super::frame::DepthFrame;
use crate::StreamConfig;

pub struct SyntheticSensor {
    width: u32,
    height: u32,
    near: f32,
    far: f32,
    sequence: u64,
    started: Instant,
    frame: DepthFrame,
}

impl SyntheticSensor {
    /// Sensor covering `near..far` meters
    pub fn new(width: u32, height: u32, near: f32, far: f32) -> Self {
        info!(width, height, near, far, "Synthetic sensor ready");
        Self {
            width,
            height,
            near,
            far,
            sequence: 0,
            started: Instant::now(),
            frame: DepthFrame::new(width, height),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.sensor_width, config.sensor_height, 0.3, 5.0)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Render the next frame at the current wall time
    pub fn capture_frame(&mut self) -> &DepthFrame {
        let t = self.started.elapsed().as_secs_f32();
        self.render(t)
    }

    /// Render the frame at time `t` seconds. Deterministic in `t`.
    #[instrument(skip(self))]
    pub fn render(&mut self, t: f32) -> &DepthFrame {
        self.sequence += 1;
        let (w, h) = (self.width.max(1) as f32, self.height.max(1) as f32);
        let span = self.far - self.near;

        // target center sweeps left to right every 4 s
        let cx = (t / 4.0).fract() * w;
        let cy = h / 2.0;
        let radius = h / 4.0;

        let stride = self.frame.stride as usize;
        for (y, row) in self.frame.samples.chunks_mut(stride).enumerate() {
            let floor = self.near + span * (1.0 - y as f32 / h);
            for (x, sample) in row.iter_mut().enumerate() {
                let (dx, dy) = (x as f32 - cx, y as f32 - cy);
                let depth = if (x * 31 + y * 17) % 97 == 0 {
                    f32::NAN
                } else if x == 0 {
                    // edge returns past the rated range
                    self.far * 2.0
                } else if dx * dx + dy * dy < radius * radius {
                    self.near + span * 0.25
                } else {
                    floor
                };
                *sample = f16::from_f32(depth);
            }
        }
        &self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shape() {
        let mut sensor = SyntheticSensor::new(16, 8, 0.3, 5.0);
        let frame = sensor.render(0.0);
        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(frame.samples.len(), 128);
        assert_eq!(sensor.sequence(), 1);
    }

    #[test]
    fn test_contains_dropouts() {
        let mut sensor = SyntheticSensor::new(64, 48, 0.3, 5.0);
        let frame = sensor.render(1.0);
        assert!(frame.samples.iter().any(|s| s.is_nan()));
        assert!(frame.samples.iter().any(|s| s.to_f32() > 5.0));
        assert!(frame
            .samples
            .iter()
            .filter(|s| !s.is_nan())
            .all(|s| s.to_f32() >= 0.29));
    }

    #[test]
    fn test_target_moves() {
        let mut sensor = SyntheticSensor::new(64, 48, 0.3, 5.0);
        let before = sensor.render(0.5).get(8, 24).unwrap().to_f32();
        let after = sensor.render(1.5).get(8, 24).unwrap().to_f32();
        assert!(before < after);
    }
}
