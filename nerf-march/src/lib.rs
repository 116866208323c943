//! Occupancy-grid ray marching and training-batch engine for neural radiance fields.
//!
//! A radiance field maps a position and viewing direction to a color and a density.
//! This library supplies everything around such a field that is needed to fit it to
//! posed photographs and to render novel views of it:
//!
//! * [`density_grid`]: a cascaded occupancy grid that lets rays skip empty space;
//! * [`tracer`]: camera-ray generation and adaptive, compacting ray marching;
//! * [`error_map`]: importance sampling of pixels in proportion to recent error;
//! * [`envmap`]: a background looked up by ray direction, optionally learned;
//! * [`training`]: construction of fixed-size training batches, losses, and gradients;
//! * [`camera_opt`]: joint refinement of camera poses, focal length, exposure and
//!   lens distortion.
//!
//! The field itself is external; it is reached only through the [`RadianceField`] and
//! [`TrainableField`] traits. [`VoxelField`] is a small trainable implementation suitable
//! for tests and previews.
//!
//! All engine state lives in a [`NerfContext`], which is passed explicitly to the
//! training phase functions.
//!
//! ## Package features
//!
//! This package, `nerf-march`, defines the following feature flags:
//!
//! * `"auto-threads"` (enabled by default):
//!   Enable use of threads for the per-ray, per-sample and per-cell kernels, via
//!   [`rayon`]’s global thread pool.
//!   This feature does not affect the public API, only performance and dependencies.
//!   Results are identical with and without it.

// Crate-specific lint settings. (General settings can be found in the workspace manifest.)
#![forbid(unsafe_code)]

// -------------------------------------------------------------------------------------------------

pub use nerf_march_base::{math, raycast, util};

pub mod camera;
pub mod camera_opt;
pub mod config;
mod context;
pub use context::NerfContext;
pub mod dataset;
pub mod density_grid;
pub mod envmap;
mod error;
pub use error::NerfError;
pub mod error_map;
mod field;
pub use field::{Activation, NetworkInput, NetworkOutput, RadianceField, TrainableField};
mod flaws;
pub use flaws::TraceFlaws;
pub mod march;
pub mod optimizer;
mod par;
#[doc(hidden)]
pub mod testing;
pub mod tracer;
pub mod training;
mod voxel_field;
pub use voxel_field::VoxelField;

// -------------------------------------------------------------------------------------------------

/// Factor by which gradients with respect to network outputs are multiplied before being
/// stored in half precision, so that small gradients do not flush to zero.
pub const LOSS_SCALE: f32 = 128.0;

/// Alias for results of this crate's fallible operations.
pub type Result<T, E = NerfError> = core::result::Result<T, E>;
