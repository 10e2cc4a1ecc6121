//! Logarithmic mapping into a 24-bit integer spread over R, G and B.
//! Near depths get more of the code space than far ones.

const MAX_24: f64 = 16_777_215.0;

/// Encode a normalized depth as B, G, R, A
pub fn encode_sample(normalized: f32) -> [u8; 4] {
    let t = (normalized as f64 + 1.0).log2();
    let depth24 = (t * MAX_24) as u32;

    let r = ((depth24 >> 16) & 0xFF) as u8;
    let g = ((depth24 >> 8) & 0xFF) as u8;
    let b = (depth24 & 0xFF) as u8;
    [b, g, r, 255]
}

/// Recover the normalized depth from B, G, R, A
pub fn decode_sample(px: [u8; 4]) -> f32 {
    let depth24 = (px[2] as u32) << 16 | (px[1] as u32) << 8 | px[0] as u32;
    let t = depth24 as f64 / MAX_24;
    (t.exp2() - 1.0) as f32
}
