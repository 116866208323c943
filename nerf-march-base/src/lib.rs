//! This library is an internal component of `nerf-march`,
//! which defines the geometry, color, and small utility types shared by the engine.
//! Prefer the re-exports from `nerf-march` over depending on this library directly.

// Crate-specific lint settings. (General settings can be found in the workspace manifest.)
#![warn(clippy::missing_inline_in_public_items)]

pub mod math;

pub mod raycast;

pub mod util;

// reexport for convenience of our tests
#[doc(hidden)]
pub use euclid;
