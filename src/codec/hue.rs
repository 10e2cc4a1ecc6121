//! Hue mapping: depth sweeps the color wheel once across the range.
//!
//! This mapping is one-way. Decoding is deliberately not implemented (hue
//! wraps at both ends of the range, so red is ambiguous), and the codec
//! reports [`DecodeOutcome::Unsupported`](super::DecodeOutcome) instead.

use super::color::hsv_to_rgb;

/// Encode a normalized depth as B, G, R, A
pub fn encode_sample(normalized: f32) -> [u8; 4] {
    let (r, g, b) = hsv_to_rgb(normalized * 360.0, 1.0, 1.0);
    [b, g, r, 255]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midpoint_is_cyan() {
        assert_eq!(encode_sample(0.5), [255, 255, 0, 255]);
    }

    #[test]
    fn test_range_ends_are_red() {
        assert_eq!(encode_sample(0.0), [0, 0, 255, 255]);
        assert_eq!(encode_sample(1.0), [0, 0, 255, 255]);
    }
}
