//! Linear grayscale rendering of a depth frame for local previews.
//! Not a transport codec: 8 bits of gray cannot be decoded back to depth.

use image::{GrayImage, Luma};

use super::DepthRange;
use crate::capture::frame::DepthFrame;

/// Render `frame` as gray levels, near = dark, far = bright.
/// Invalid samples render black.
pub fn grayscale_preview(frame: &DepthFrame, range: DepthRange) -> GrayImage {
    // Snapshot before the pass; the caller may be sharing the range
    let (min, span) = (range.min(), range.span());

    GrayImage::from_fn(frame.width, frame.height, |x, y| {
        let depth = frame.get(x, y).map(|s| s.to_f32()).unwrap_or(f32::NAN);
        let normalized = ((depth - min) / span).clamp(0.0, 1.0);
        // NaN casts to 0
        Luma([(normalized * 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_gradient_levels() {
        let samples = [0.0, 3.0, 6.0, 9.0]
            .iter()
            .map(|v| f16::from_f32(*v))
            .collect();
        let frame = DepthFrame::from_samples(4, 1, samples).unwrap();
        let image = grayscale_preview(&frame, DepthRange::new(0.0, 6.0).unwrap());
        let levels: Vec<u8> = image.pixels().map(|p| p.0[0]).collect();
        assert_eq!(levels, vec![0, 127, 255, 255]);
    }

    #[test]
    fn test_nan_is_black() {
        let frame = DepthFrame::filled(2, 2, f32::NAN);
        let image = grayscale_preview(&frame, DepthRange::default());
        assert!(image.pixels().all(|p| p.0[0] == 0));
    }
}
