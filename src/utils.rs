use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Reference point for host timestamps
static HOST_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Render a FourCC tag as text, e.g. `0x42475241` -> `"BGRA"`.
/// Non-printable bytes (numeric tags such as 24-bit RGB) fall back to hex.
pub fn fourcc_to_string(tag: u32) -> String {
    let bytes = tag.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bytes.iter().map(|b| *b as char).collect()
    } else {
        format!("{:#010x}", tag)
    }
}

/// Monotonic host clock, nanoseconds since the first call in this process
pub fn host_time_nanos(at: Instant) -> u64 {
    at.saturating_duration_since(*HOST_EPOCH).as_nanos() as u64
}

/// Frame period for a target rate; clamps a zero rate to 1 fps
pub fn frame_period(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}
