//! Engine configuration.
//!
//! All options have defaults, so a configuration file need only mention what it changes:
//!
//! ```
//! use nerf_march::config::NerfConfig;
//! use nerf_march::training::LossKind;
//!
//! let config = NerfConfig::from_json_str(r#"{ "training": { "loss": "huber" } }"#).unwrap();
//! assert_eq!(config.training.loss, LossKind::Huber);
//! assert_eq!(config.grid.grid_size, 128);
//! ```

use serde::{Deserialize, Serialize};

use crate::camera::Aperture;
use crate::density_grid::OccupancyThreshold;
use crate::field::Activation;
use crate::math::{Aab, Rgb};
use crate::optimizer::AdamHyperparameters;
use crate::tracer::RenderMode;
use crate::training::LossKind;

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct NerfConfig {
    /// Occupancy grid options.
    pub grid: GridOptions,
    /// Rendering options.
    pub render: RenderOptions,
    /// Training options.
    pub training: TrainingOptions,
    /// Camera parameter optimization options.
    pub camera: CameraOptimizerOptions,
}

impl NerfConfig {
    /// Parses a configuration from JSON. Missing fields take their default values.
    pub fn from_json_str(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Formats the configuration as pretty-printed JSON.
    pub fn to_json_string(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Options for the occupancy grid and the step policy derived from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct GridOptions {
    /// Cells per axis in each cascade. Must be a power of two between 2 and 512.
    pub grid_size: u32,
    /// Number of minimal steps across the unit cube's diagonal.
    pub steps_per_unit: u32,
    /// Rule deciding which cells are occupied.
    pub threshold: OccupancyThreshold,
    /// Weight of the old value in the moving average of cell densities.
    pub decay: f32,
    /// Number of training steps during which every cell is sampled on each update.
    pub warmup_steps: u32,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            grid_size: 128,
            steps_per_unit: 1024,
            threshold: OccupancyThreshold::default(),
            decay: 0.95,
            warmup_steps: 256,
        }
    }
}

/// Options for rendering images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct RenderOptions {
    /// Quantity composited along each ray.
    pub mode: RenderMode,
    /// Factor applied to distances in [`RenderMode::Depth`].
    pub depth_scale: f32,
    /// Growth of the step length per unit distance along the ray.
    pub cone_angle: f32,
    /// Samples whose opacity is below this contribute nothing.
    pub min_alpha: f32,
    /// Rays stop once their transmittance falls below this.
    pub min_transmittance: f32,
    /// Maximum number of samples per ray.
    pub max_steps: u32,
    /// Maximum number of march/evaluate/composite iterations per trace.
    pub max_iterations: u32,
    /// Color behind the volume, in linear space.
    pub background: Rgb,
    /// Rays per pixel per rendered frame.
    pub samples_per_pixel: u32,
    /// Whether to shoot every ray through its pixel's center instead of jittering.
    pub snap_to_pixel_centers: bool,
    /// Depth of field.
    pub aperture: Aperture,
    /// Exposure correction in stops.
    pub exposure: f32,
    /// Whether to encode output as sRGB when reading out 8-bit pixels.
    pub to_srgb: bool,
    /// Region to render; the training bounds if absent.
    pub render_aabb: Option<Aab>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mode: RenderMode::Shade,
            depth_scale: 1.0,
            cone_angle: 1.0 / 256.0,
            min_alpha: 0.01,
            min_transmittance: 1e-4,
            max_steps: 2048,
            max_iterations: 1000,
            background: Rgb::ZERO,
            samples_per_pixel: 1,
            snap_to_pixel_centers: false,
            aperture: Aperture::default(),
            exposure: 0.0,
            to_srgb: true,
            render_aabb: None,
        }
    }
}

/// Options for training.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct TrainingOptions {
    /// Per-channel loss function.
    pub loss: LossKind,
    /// Activation applied to the field's raw color outputs.
    pub rgb_activation: Activation,
    /// Activation applied to the field's raw density output.
    pub density_activation: Activation,
    /// Growth of the step length per unit distance along training rays.
    pub cone_angle: f32,
    /// Composite each training ray over a random color instead of [`Self::background`],
    /// which discourages the field from explaining the background with density.
    pub random_bg_color: bool,
    /// Background color when [`Self::random_bg_color`] is off, in the images' color space.
    pub background: Rgb,
    /// Convert targets from sRGB to linear before comparing.
    pub linear_colors: bool,
    /// Shoot training rays through pixel centers instead of random points in the pixel.
    pub snap_to_pixel_centers: bool,
    /// Maximum number of samples along one training ray.
    pub max_samples_per_ray: u32,
    /// Number of rays in the first batch, before the batch size controller adapts it.
    pub initial_rays_per_batch: u32,
    /// Seed for all random choices made during training.
    pub seed: u64,
    /// Error map options.
    pub error_map: ErrorMapOptions,
    /// Optimizer for the field's parameters.
    pub field_optimizer: AdamHyperparameters,
    /// Whether to learn the environment map's texels, if the context has one.
    pub train_envmap: bool,
    /// Optimizer for the environment map's texels.
    pub envmap_optimizer: AdamHyperparameters,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            loss: LossKind::L2,
            rgb_activation: Activation::Exponential,
            density_activation: Activation::Exponential,
            cone_angle: 0.0,
            random_bg_color: true,
            background: Rgb::ZERO,
            linear_colors: false,
            snap_to_pixel_centers: false,
            max_samples_per_ray: 1024,
            initial_rays_per_batch: 1 << 12,
            seed: 1337,
            error_map: ErrorMapOptions::default(),
            field_optimizer: AdamHyperparameters::with_learning_rate(1e-2),
            train_envmap: false,
            envmap_optimizer: AdamHyperparameters::with_learning_rate(1e-2),
        }
    }
}

/// Options for importance sampling of training pixels by recent error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ErrorMapOptions {
    /// Whether to sample pixels through the error map at all.
    pub enabled: bool,
    /// Cells per axis in each image's map.
    pub resolution: u32,
    /// Training steps between rebuilds.
    pub update_interval: u32,
    /// Rebuild early once this many rays have been traced since the last rebuild.
    pub ray_threshold: u64,
    /// Factor applied to accumulated error after each rebuild.
    pub decay: f32,
    /// Choose images in proportion to their total error, instead of uniformly.
    pub sample_image_proportional_to_error: bool,
    /// Weight the error by image sharpness, emphasizing detailed regions.
    pub include_sharpness: bool,
}

impl Default for ErrorMapOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            resolution: 16,
            update_interval: 128,
            ray_threshold: 1 << 26,
            decay: 0.5,
            sample_image_proportional_to_error: false,
            include_sharpness: false,
        }
    }
}

/// Options for optimizing camera parameters alongside the field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct CameraOptimizerOptions {
    /// Refine camera positions and orientations.
    pub optimize_extrinsics: bool,
    /// Refine per-image exposure.
    pub optimize_exposure: bool,
    /// Refine the shared focal length.
    pub optimize_focal_length: bool,
    /// Refine the distortion field.
    pub optimize_distortion: bool,
    /// Training steps between camera updates.
    pub update_interval: u32,
    /// Control points per axis of the distortion field.
    pub distortion_resolution: u32,
    /// Learning rate for position offsets.
    pub position_learning_rate: f32,
    /// Learning rate for rotation offsets.
    pub rotation_learning_rate: f32,
    /// Learning rate for exposure.
    pub exposure_learning_rate: f32,
    /// Learning rate for the focal length.
    pub focal_length_learning_rate: f32,
    /// Learning rate for the distortion field.
    pub distortion_learning_rate: f32,
}

impl CameraOptimizerOptions {
    /// Whether any group of camera parameters is being optimized.
    pub fn any_enabled(&self) -> bool {
        self.optimize_extrinsics
            || self.optimize_exposure
            || self.optimize_focal_length
            || self.optimize_distortion
    }
}

impl Default for CameraOptimizerOptions {
    fn default() -> Self {
        Self {
            optimize_extrinsics: false,
            optimize_exposure: false,
            optimize_focal_length: false,
            optimize_distortion: false,
            update_interval: 16,
            distortion_resolution: 32,
            position_learning_rate: 1e-4,
            rotation_learning_rate: 1e-4,
            exposure_learning_rate: 1e-3,
            focal_length_learning_rate: 1e-5,
            distortion_learning_rate: 1e-4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NerfError;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(NerfConfig::from_json_str("{}").unwrap(), NerfConfig::default());
    }

    #[test]
    fn round_trip() {
        let mut config = NerfConfig::default();
        config.training.loss = LossKind::Smape;
        config.training.error_map.enabled = true;
        config.grid.threshold = OccupancyThreshold::Fixed(0.5);
        config.render.render_aabb = Some(Aab::centered_cube(4.0));
        config.camera.optimize_exposure = true;
        config.render.mode = RenderMode::Alpha;
        config.training.train_envmap = true;
        let text = config.to_json_string().unwrap();
        assert_eq!(NerfConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn enum_names() {
        let config = NerfConfig::from_json_str(
            r#"{
                "grid": { "threshold": "cascade_mean" },
                "render": { "mode": "depth" },
                "training": { "loss": "log_l1", "rgb_activation": "logistic" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.render.mode, RenderMode::Depth);
        assert_eq!(config.grid.threshold, OccupancyThreshold::CascadeMean);
        assert_eq!(config.training.loss, LossKind::LogL1);
        assert_eq!(config.training.rgb_activation, Activation::Logistic);
    }

    #[test]
    fn unknown_loss_rejected() {
        let error = NerfConfig::from_json_str(r#"{ "training": { "loss": "l3" } }"#).unwrap_err();
        assert!(matches!(error, NerfError::InvalidConfig(_)), "{error:?}");
    }
}
