//! Low-discrepancy sequences and warping functions for sample placement.

use core::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use euclid::Vector2D;

use crate::math::{Normalized, UvVector};

/// The radical inverse of `index` in the given `base`: the `index`th element of the
/// van der Corput sequence, in `[0, 1)`.
#[allow(clippy::missing_inline_in_public_items)]
pub fn radical_inverse(mut index: u32, base: u32) -> f32 {
    let inverse_base = 1.0 / base as f32;
    let mut factor = inverse_base;
    let mut result = 0.0;
    while index > 0 {
        result += (index % base) as f32 * factor;
        index /= base;
        factor *= inverse_base;
    }
    result
}

/// Sub-pixel offset of the `sample_index`th sample of a pixel, from the Halton (2, 3)
/// sequence. Sample 0 is the pixel center.
#[inline]
pub fn pixel_offset(sample_index: u32) -> UvVector {
    if sample_index == 0 {
        return Vector2D::new(0.5, 0.5);
    }
    Vector2D::new(
        radical_inverse(sample_index, 2),
        radical_inverse(sample_index, 3),
    )
}

/// Maps the unit square onto the unit disk with low distortion (Shirley & Chiu).
///
/// The input is in `[0, 1]²` and the output in the disk of radius 1 centered on zero.
#[allow(clippy::missing_inline_in_public_items)]
pub fn square_to_disk(u: Vector2D<f32, Normalized>) -> Vector2D<f32, Normalized> {
    let a = 2.0 * u.x - 1.0;
    let b = 2.0 * u.y - 1.0;
    if a == 0.0 && b == 0.0 {
        return Vector2D::zero();
    }
    let (radius, phi) = if a * a > b * b {
        (a, FRAC_PI_4 * (b / a))
    } else {
        (b, FRAC_PI_2 - FRAC_PI_4 * (a / b))
    };
    Vector2D::new(radius * phi.cos(), radius * phi.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radical_inverse_base_2() {
        let seq: Vec<f32> = (0..5).map(|i| radical_inverse(i, 2)).collect();
        assert_eq!(seq, vec![0.0, 0.5, 0.25, 0.75, 0.125]);
    }

    #[test]
    fn pixel_offsets_in_range() {
        assert_eq!(pixel_offset(0), Vector2D::new(0.5, 0.5));
        for i in 0..1000 {
            let o = pixel_offset(i);
            assert!((0.0..1.0).contains(&o.x) && (0.0..1.0).contains(&o.y), "{o:?}");
        }
    }

    #[test]
    fn square_to_disk_stays_in_disk() {
        for i in 0..=10 {
            for j in 0..=10 {
                let p = square_to_disk(Vector2D::new(i as f32 / 10.0, j as f32 / 10.0));
                assert!(p.length() <= 1.0 + 1e-5, "{p:?}");
            }
        }
    }
}
