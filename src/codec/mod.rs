//! Depth codecs: pack f16 range samples into 8-bit color channels and back.
//!
//! All three mappings share one preprocessing policy, applied per sample:
//!
//! 1. NaN and infinite values become `min`.
//! 2. Values outside `[min, max]` become `min`. Values above the range fold
//!    to the *minimum*, not the maximum.
//! 3. `normalized = (value - min) / (max - min)`, clamped to `[0, 1]`.
//!
//! The mappings then differ only in how `normalized` becomes B, G, R (alpha
//! is always 255):
//!
//! | Mapping  | Layout                                  | Decode        |
//! |----------|-----------------------------------------|---------------|
//! | `Hue`    | hue wheel, `normalized * 360°`          | unsupported   |
//! | `Log`    | `log2(n + 1)` as 24 bits over R, G, B    | exact inverse |
//! | `Packed` | `n * 65504` as 16 bits, 5/6/5 over R, G, B | within one step |

pub mod color;
pub mod hue;
pub mod log;
pub mod packed;
pub mod preview;

use bytes::Bytes;
use half::f16;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::buffer::{CachedBuffer, CachedBufferPool, PixelBuffer};
use crate::capture::frame::{DepthFrame, EncodedFrame, FrameShape, PixelFormat};
use crate::error::CodecError;

pub use preview::grayscale_preview;

/// Depth interval mapped onto the code space, in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDepthRange")]
pub struct DepthRange {
    min: f32,
    max: f32,
}

#[derive(Deserialize)]
struct RawDepthRange {
    min: f32,
    max: f32,
}

impl TryFrom<RawDepthRange> for DepthRange {
    type Error = CodecError;

    fn try_from(raw: RawDepthRange) -> Result<Self, Self::Error> {
        DepthRange::new(raw.min, raw.max)
    }
}

impl DepthRange {
    pub fn new(min: f32, max: f32) -> Result<Self, CodecError> {
        if !min.is_finite() || !max.is_finite() || max <= min {
            return Err(CodecError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// Size of one packed-mapping code in meters
    pub fn packed_step(&self) -> f32 {
        self.span() / packed::MAX_BOUND
    }

    /// Apply the shared sample policy and map into `[0, 1]`
    pub fn normalize(&self, sample: f16) -> f32 {
        let mut depth = sample.to_f32();
        if !depth.is_finite() {
            depth = self.min;
        }
        if depth > self.max || depth < self.min {
            depth = self.min;
        }
        ((depth - self.min) / self.span()).clamp(0.0, 1.0)
    }

    pub fn denormalize(&self, normalized: f32) -> f32 {
        normalized * self.span() + self.min
    }
}

impl Default for DepthRange {
    /// Sensor is rated to ~5 m
    fn default() -> Self {
        Self { min: 0.0, max: 6.0 }
    }
}

/// Mapping selector, as exposed to configuration and the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecAlgorithm {
    Hue,
    Log,
    Packed,
}

/// What a decode call produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Output holds reconstructed depth
    Decoded,
    /// The mapping is one-way; the call succeeded but output is untouched
    Unsupported,
}

/// A depth codec: one mapping together with the range it was configured with
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthCodec {
    Hue(DepthRange),
    Log(DepthRange),
    Packed(DepthRange),
}

impl DepthCodec {
    pub fn new(algorithm: CodecAlgorithm, range: DepthRange) -> Self {
        match algorithm {
            CodecAlgorithm::Hue => DepthCodec::Hue(range),
            CodecAlgorithm::Log => DepthCodec::Log(range),
            CodecAlgorithm::Packed => DepthCodec::Packed(range),
        }
    }

    pub fn algorithm(&self) -> CodecAlgorithm {
        match self {
            DepthCodec::Hue(_) => CodecAlgorithm::Hue,
            DepthCodec::Log(_) => CodecAlgorithm::Log,
            DepthCodec::Packed(_) => CodecAlgorithm::Packed,
        }
    }

    pub fn range(&self) -> DepthRange {
        match self {
            DepthCodec::Hue(range) | DepthCodec::Log(range) | DepthCodec::Packed(range) => *range,
        }
    }

    /// Same mapping, different range
    pub fn with_range(&self, range: DepthRange) -> Self {
        Self::new(self.algorithm(), range)
    }

    pub fn supports_decode(&self) -> bool {
        !matches!(self, DepthCodec::Hue(_))
    }

    fn encode_sample(&self, sample: f16) -> [u8; 4] {
        let normalized = self.range().normalize(sample);
        match self {
            DepthCodec::Hue(_) => hue::encode_sample(normalized),
            DepthCodec::Log(_) => log::encode_sample(normalized),
            DepthCodec::Packed(_) => packed::encode_sample(normalized),
        }
    }

    fn decode_sample(&self, px: [u8; 4]) -> Option<f32> {
        let range = self.range();
        match self {
            DepthCodec::Hue(_) => None,
            DepthCodec::Log(_) => Some(range.denormalize(log::decode_sample(px))),
            DepthCodec::Packed(_) => {
                let normalized = packed::dequantize(packed::decode_sample(px));
                Some(range.denormalize(normalized).min(range.max()))
            }
        }
    }

    /// Encode `input` into a BGRA plane described by `shape`
    pub fn encode_into(
        &self,
        input: &DepthFrame,
        shape: &FrameShape,
        output: &mut [u8],
    ) -> Result<(), CodecError> {
        check_format(shape, PixelFormat::Bgra32)?;
        check_dimensions(input, shape)?;
        check_depth_plane(input)?;
        check_color_plane(shape, output.len())?;

        let bytes_per_row = shape.bytes_per_row as usize;
        let row_len = input.width as usize * 4;

        for (y, row) in input.rows().enumerate() {
            let start = y * bytes_per_row;
            let out_row = &mut output[start..start + row_len];
            for (px, sample) in out_row.chunks_exact_mut(4).zip(row) {
                px.copy_from_slice(&self.encode_sample(*sample));
            }
        }
        Ok(())
    }

    /// Encode into a freshly allocated frame
    pub fn encode(&self, input: &DepthFrame) -> Result<EncodedFrame, CodecError> {
        let shape = FrameShape::packed(input.width, input.height, PixelFormat::Bgra32);
        let mut data = vec![0u8; shape.byte_len().unwrap_or(0)];
        self.encode_into(input, &shape, &mut data)?;
        Ok(EncodedFrame {
            shape,
            data: Bytes::from(data),
        })
    }

    /// Decode a BGRA plane into `output`.
    ///
    /// For the hue mapping this succeeds with [`DecodeOutcome::Unsupported`]
    /// and leaves `output` as it was.
    pub fn decode_into(
        &self,
        shape: &FrameShape,
        input: &[u8],
        output: &mut DepthFrame,
    ) -> Result<DecodeOutcome, CodecError> {
        check_format(shape, PixelFormat::Bgra32)?;
        check_dimensions(output, shape)?;
        check_depth_plane(output)?;
        check_color_plane(shape, input.len())?;

        if !self.supports_decode() {
            return Ok(DecodeOutcome::Unsupported);
        }

        let width = output.width as usize;
        let stride = output.stride as usize;
        let bytes_per_row = shape.bytes_per_row as usize;

        for y in 0..output.height as usize {
            let in_row = &input[y * bytes_per_row..y * bytes_per_row + width * 4];
            let out_row = &mut output.samples[y * stride..y * stride + width];
            for (sample, px) in out_row.iter_mut().zip(in_row.chunks_exact(4)) {
                if let Some(depth) = self.decode_sample([px[0], px[1], px[2], px[3]]) {
                    *sample = f16::from_f32(depth);
                }
            }
        }
        Ok(DecodeOutcome::Decoded)
    }

    /// Decode into a freshly allocated frame. A one-way mapping yields a
    /// zero-filled frame; use [`decode_into`](Self::decode_into) to observe that.
    pub fn decode(&self, input: &EncodedFrame) -> Result<DepthFrame, CodecError> {
        let mut output = DepthFrame::new(input.width(), input.height());
        self.decode_into(&input.shape, &input.data, &mut output)?;
        Ok(output)
    }
}

impl Default for DepthCodec {
    fn default() -> Self {
        DepthCodec::Hue(DepthRange::default())
    }
}

fn check_format(shape: &FrameShape, expected: PixelFormat) -> Result<(), CodecError> {
    if shape.format != expected {
        return Err(CodecError::FormatMismatch {
            expected,
            actual: shape.format,
        });
    }
    Ok(())
}

fn check_dimensions(depth: &DepthFrame, shape: &FrameShape) -> Result<(), CodecError> {
    if depth.width != shape.width || depth.height != shape.height {
        return Err(CodecError::DimensionMismatch {
            input_width: depth.width,
            input_height: depth.height,
            output_width: shape.width,
            output_height: shape.height,
        });
    }
    Ok(())
}

fn check_depth_plane(depth: &DepthFrame) -> Result<(), CodecError> {
    let needed = depth.required_len();
    if depth.stride < depth.width || depth.samples.len() < needed {
        return Err(CodecError::PlaneTooSmall {
            needed,
            actual: depth.samples.len(),
        });
    }
    Ok(())
}

fn check_color_plane(shape: &FrameShape, len: usize) -> Result<(), CodecError> {
    let needed = shape.byte_len().unwrap_or(usize::MAX);
    if !shape.is_valid() || len < needed {
        return Err(CodecError::PlaneTooSmall { needed, actual: len });
    }
    Ok(())
}

/// Runs a codec over pooled buffers so steady-state streaming allocates nothing
pub struct DepthTranscoder {
    encode_pool: CachedBufferPool,
    decode_cache: Option<DepthFrame>,
}

impl DepthTranscoder {
    pub fn new() -> Self {
        Self {
            encode_pool: CachedBufferPool::new("encode"),
            decode_cache: None,
        }
    }

    /// Encode into the cached BGRA buffer. `codec` is the snapshot for this
    /// pass; changes made to the control surface meanwhile apply next frame.
    #[instrument(skip_all, fields(algorithm = ?codec.algorithm(), width = input.width, height = input.height))]
    pub fn encode(
        &mut self,
        input: &DepthFrame,
        codec: &DepthCodec,
    ) -> Result<CachedBuffer, CodecError> {
        let buffer = self
            .encode_pool
            .acquire(input.width, input.height, PixelFormat::Bgra32)?;
        {
            let mut plane = buffer.write()?;
            codec.encode_into(input, buffer.shape(), &mut plane)?;
        }
        Ok(buffer)
    }

    /// Decode a BGRA buffer into the cached depth frame
    #[instrument(skip_all, fields(algorithm = ?codec.algorithm(), id = input.id()))]
    pub fn decode(
        &mut self,
        input: &PixelBuffer,
        codec: &DepthCodec,
    ) -> Result<(&DepthFrame, DecodeOutcome), CodecError> {
        let shape = *input.shape();
        let output = match self.decode_cache.take() {
            Some(frame) if frame.width == shape.width && frame.height == shape.height => frame,
            Some(frame) => {
                warn!(
                    from = %format!("{}x{}", frame.width, frame.height),
                    to = %format!("{}x{}", shape.width, shape.height),
                    "Rebuilding cached decode frame because it received a different size"
                );
                DepthFrame::new(shape.width, shape.height)
            }
            None => DepthFrame::new(shape.width, shape.height),
        };

        let output = self.decode_cache.insert(output);
        let plane = input.read()?;
        let outcome = codec.decode_into(&shape, &plane, output)?;
        Ok((output, outcome))
    }

    pub fn encode_pool(&self) -> &CachedBufferPool {
        &self.encode_pool
    }
}

impl Default for DepthTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn range() -> DepthRange {
        DepthRange::new(0.0, 6.0).unwrap()
    }

    fn single(depth: f32) -> DepthFrame {
        DepthFrame::filled(1, 1, depth)
    }

    fn encode_one(codec: DepthCodec, depth: f32) -> [u8; 4] {
        codec.encode(&single(depth)).unwrap().pixel(0, 0).unwrap()
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        assert!(DepthRange::new(1.0, 1.0).is_err());
        assert!(DepthRange::new(2.0, 1.0).is_err());
        assert!(DepthRange::new(f32::NAN, 1.0).is_err());
        assert!(DepthRange::new(0.0, f32::INFINITY).is_err());
    }

    #[test]
    fn test_hue_midpoint_scenario() {
        // 3 m in [0, 6] -> hue 180 -> RGB (0, 255, 255) -> BGRA (255, 255, 0, 255)
        assert_eq!(encode_one(DepthCodec::Hue(range()), 3.0), [255, 255, 0, 255]);
    }

    #[test]
    fn test_nan_encodes_like_min() {
        for codec in [
            DepthCodec::Hue(range()),
            DepthCodec::Log(range()),
            DepthCodec::Packed(range()),
        ] {
            let at_min = encode_one(codec, 0.0);
            assert_eq!(encode_one(codec, f32::NAN), at_min);
            assert_eq!(encode_one(codec, f32::INFINITY), at_min);
            assert_eq!(encode_one(codec, f32::NEG_INFINITY), at_min);
        }
    }

    #[test]
    fn test_out_of_range_folds_to_min() {
        let range = DepthRange::new(1.0, 4.0).unwrap();
        for codec in [
            DepthCodec::Hue(range),
            DepthCodec::Log(range),
            DepthCodec::Packed(range),
        ] {
            let at_min = encode_one(codec, 1.0);
            // above max folds to min, not max
            assert_eq!(encode_one(codec, 4.5), at_min);
            assert_eq!(encode_one(codec, 0.5), at_min);
            assert_ne!(encode_one(codec, 2.5), at_min, "{:?}", codec.algorithm());
        }
    }

    #[test]
    fn test_packed_round_trip_within_one_step() {
        let codec = DepthCodec::Packed(range());
        let step = range().packed_step();

        // every f16 in [0, 6.0], subnormals included
        let samples: Vec<f16> = (f16::from_f32(0.0).to_bits()..=f16::from_f32(6.0).to_bits())
            .map(f16::from_bits)
            .collect();
        let width = samples.len() as u32;
        let frame = DepthFrame::from_samples(width, 1, samples).unwrap();

        let decoded = codec.decode(&codec.encode(&frame).unwrap()).unwrap();
        for (x, y) in frame.samples.iter().zip(&decoded.samples) {
            let err = (x.to_f32() - y.to_f32()).abs();
            assert!(err <= step, "{} decoded as {} (step {})", x, y, step);
        }
    }

    #[test]
    fn test_log_round_trip() {
        let codec = DepthCodec::Log(range());
        let samples: Vec<f16> = (0..=60).map(|i| f16::from_f32(i as f32 / 10.0)).collect();
        let frame = DepthFrame::from_samples(61, 1, samples).unwrap();

        let decoded = codec.decode(&codec.encode(&frame).unwrap()).unwrap();
        for (x, y) in frame.samples.iter().zip(&decoded.samples) {
            // f16 output precision dominates the 24-bit quantization
            assert!((x.to_f32() - y.to_f32()).abs() <= 0.004, "{} decoded as {}", x, y);
        }
    }

    #[test]
    fn test_hue_decode_is_unsupported_noop() {
        // Known non-property: the hue mapping does not round-trip.
        let codec = DepthCodec::Hue(range());
        let encoded = codec.encode(&single(3.0)).unwrap();

        let mut output = DepthFrame::filled(1, 1, 1.25);
        let outcome = codec
            .decode_into(&encoded.shape, &encoded.data, &mut output)
            .unwrap();
        assert_eq!(outcome, DecodeOutcome::Unsupported);
        assert_eq!(output.samples[0].to_f32(), 1.25);
        assert!(!codec.supports_decode());
    }

    #[test]
    fn test_packed_decode_stays_inside_range() {
        let range = DepthRange::new(0.5, 2.0).unwrap();
        let codec = DepthCodec::Packed(range);
        let decoded = codec
            .decode(&codec.encode(&DepthFrame::filled(2, 1, 2.0)).unwrap())
            .unwrap();
        assert_eq!(decoded.samples[0].to_f32(), 2.0);

        let decoded = codec
            .decode(&codec.encode(&DepthFrame::filled(2, 1, 0.5)).unwrap())
            .unwrap();
        assert!((decoded.samples[0].to_f32() - 0.5).abs() <= range.packed_step());
    }

    #[test]
    fn test_encode_rejects_dimension_mismatch() {
        let codec = DepthCodec::Packed(range());
        let shape = FrameShape::packed(2, 2, PixelFormat::Bgra32);
        let mut out = vec![0u8; 16];
        let err = codec
            .encode_into(&DepthFrame::new(3, 2), &shape, &mut out)
            .unwrap_err();
        assert!(matches!(err, CodecError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_encode_rejects_wrong_format() {
        let codec = DepthCodec::Log(range());
        let shape = FrameShape::packed(2, 2, PixelFormat::DepthFloat16);
        let mut out = vec![0u8; 16];
        let err = codec
            .encode_into(&DepthFrame::new(2, 2), &shape, &mut out)
            .unwrap_err();
        assert!(matches!(err, CodecError::FormatMismatch { .. }));
    }

    #[test]
    fn test_encode_rejects_short_output() {
        let codec = DepthCodec::Log(range());
        let shape = FrameShape::packed(2, 2, PixelFormat::Bgra32);
        let mut out = vec![0u8; 15];
        assert!(matches!(
            codec.encode_into(&DepthFrame::new(2, 2), &shape, &mut out),
            Err(CodecError::PlaneTooSmall { .. })
        ));
    }

    #[test]
    fn test_encode_honours_padded_stride() {
        let codec = DepthCodec::Packed(range());
        let shape = FrameShape {
            bytes_per_row: 12,
            ..FrameShape::packed(2, 2, PixelFormat::Bgra32)
        };
        let mut out = vec![0xAAu8; 24];
        codec
            .encode_into(&DepthFrame::filled(2, 2, 6.0), &shape, &mut out)
            .unwrap();
        // padding bytes untouched
        assert_eq!(&out[8..12], &[0xAA; 4]);
        assert_eq!(&out[20..24], &[0xAA; 4]);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn test_encode_leaves_input_unmodified() {
        let codec = DepthCodec::Hue(range());
        let frame = DepthFrame::filled(4, 4, f32::NAN);
        let bits = |f: &DepthFrame| f.samples.iter().map(|s| s.to_bits()).collect::<Vec<_>>();
        let before = bits(&frame);
        codec.encode(&frame).unwrap();
        assert_eq!(bits(&frame), before);
    }

    #[test]
    fn test_transcoder_reuses_buffer() {
        let mut transcoder = DepthTranscoder::new();
        let codec = DepthCodec::Packed(range());

        let a = transcoder.encode(&DepthFrame::filled(4, 4, 1.0), &codec).unwrap();
        let b = transcoder.encode(&DepthFrame::filled(4, 4, 2.0), &codec).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(transcoder.encode_pool().reallocations(), 0);

        let (decoded, outcome) = transcoder.decode(&b, &codec).unwrap();
        assert_eq!(outcome, DecodeOutcome::Decoded);
        assert!((decoded.samples[0].to_f32() - 2.0).abs() <= range().packed_step());
    }

    #[test]
    fn test_transcoder_failure_releases_lock() {
        let mut transcoder = DepthTranscoder::new();
        let codec = DepthCodec::Log(range());
        let mut bad = DepthFrame::new(4, 4);
        bad.samples.truncate(3);

        assert!(transcoder.encode(&bad, &codec).is_err());
        let buffer = transcoder.encode_pool().current().unwrap();
        assert!(buffer.try_write().is_ok());
    }

    #[test]
    fn test_codec_range_swap_keeps_algorithm() {
        let codec = DepthCodec::Log(range());
        let narrowed = codec.with_range(DepthRange::new(0.5, 2.0).unwrap());
        assert_eq!(narrowed.algorithm(), CodecAlgorithm::Log);
        assert_eq!(narrowed.range().max(), 2.0);
    }
}
