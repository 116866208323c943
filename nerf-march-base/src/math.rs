//! Mathematical utilities and decisions.

mod aab;
pub use aab::*;
mod color;
pub use color::*;
mod coord;
pub use coord::*;
mod rigid;
pub use rigid::*;
mod sample;
pub use sample::*;

/// Smallest `x` with `x >= value` and `x` a multiple of `granularity`.
///
/// `granularity` must be nonzero.
#[inline]
#[must_use]
pub const fn next_multiple(value: u32, granularity: u32) -> u32 {
    value.div_ceil(granularity) * granularity
}

/// Replace NaN and negative values with zero.
///
/// Returns the sanitized value and whether a replacement happened.
#[inline]
#[must_use]
pub fn clamp_nonnegative(value: f32) -> (f32, bool) {
    if value >= 0.0 {
        (value, false)
    } else {
        // also catches NaN, since comparisons with it are false
        (0.0, true)
    }
}
