//! Packed 5/6/5 mapping. The normalized depth is scaled to the largest
//! finite f16 value (65504) and split unevenly over R, G and B, each field
//! shifted to the top of its 8-bit channel.

/// Scale applied to normalized depth before packing
pub const MAX_BOUND: f32 = 65504.0;

pub fn quantize(normalized: f32) -> u16 {
    (normalized * MAX_BOUND) as u16
}

/// Normalized depth at the centre of code `q`'s bucket
pub fn dequantize(q: u16) -> f32 {
    (q as f32 + 0.5) / MAX_BOUND
}

/// Encode a normalized depth as B, G, R, A
pub fn encode_sample(normalized: f32) -> [u8; 4] {
    let q = quantize(normalized);
    let r = ((q >> 11) & 0x1F) as u8;
    let g = ((q >> 5) & 0x3F) as u8;
    let b = (q & 0x1F) as u8;
    [b << 3, g << 2, r << 3, 255]
}

/// Rebuild the 16-bit quantity from B, G, R, A
pub fn decode_sample(px: [u8; 4]) -> u16 {
    let r = (px[2] >> 3) as u16;
    let g = (px[1] >> 2) as u16;
    let b = (px[0] >> 3) as u16;
    r << 11 | g << 5 | b
}
