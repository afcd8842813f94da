//! Pure numeric building blocks shared by the priority engine and the
//! duplicate/semantic validator (C2): vector cosine similarity, perceptual
//! hashing over a 64-bit difference hash, and haversine distance.

use image::imageops::FilterType;
use image::{GenericImageView, RgbImage};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Cosine similarity between two vectors, clamped to `[-1, 1]` and `0.0`
/// when either vector has zero norm or the vectors differ in length.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Great-circle distance between two (lng, lat) points, in meters.
#[must_use]
pub fn haversine_meters(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let value = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let value = value.clamp(0.0, 1.0);

    EARTH_RADIUS_METERS * 2.0 * value.sqrt().atan2((1.0 - value).sqrt())
}

/// Computes the 64-bit difference hash (dHash) of an RGB raster: grayscale,
/// resize to 9x8, then compare each pixel to its right-hand neighbor.
/// Returned as a lowercase, zero-padded 16-character hex string.
#[must_use]
pub fn difference_hash(image: &RgbImage) -> String {
    let resized = image::imageops::resize(image, 9, 8, FilterType::Triangle);

    let mut bits: u64 = 0;
    for row in 0..8u32 {
        for col in 0..8u32 {
            let left = grayscale_value(&resized, col, row);
            let right = grayscale_value(&resized, col + 1, row);
            bits <<= 1;
            if left > right {
                bits |= 1;
            }
        }
    }

    format!("{bits:016x}")
}

fn grayscale_value(image: &RgbImage, x: u32, y: u32) -> u32 {
    let pixel = image.get_pixel(x, y);
    // ITU-R BT.601 luma, matching PIL's default "L" conversion closely enough
    // for a difference hash, where only relative ordering matters.
    let [r, g, b] = pixel.0;
    (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000
}

/// Similarity between two dHash fingerprints: `1 - hamming/64`, clamped to
/// `[0, 1]`. Invalid (non-hex, wrong-length) input yields `0.0`.
#[must_use]
pub fn fingerprint_similarity(a: &str, b: &str) -> f64 {
    let (Ok(left), Ok(right)) = (u64::from_str_radix(a, 16), u64::from_str_radix(b, 16)) else {
        return 0.0;
    };

    let distance = (left ^ right).count_ones();
    (1.0 - f64::from(distance) / 64.0).clamp(0.0, 1.0)
}
