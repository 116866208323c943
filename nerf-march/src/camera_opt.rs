//! Joint refinement of camera parameters alongside the field.
//!
//! Each training image's camera gets a learned position offset, rotation offset, and
//! per-channel exposure; all images share a learned focal length offset and a
//! [`DistortionMap`]. Gradients are accumulated by the training steps and applied every
//! [`CameraOptimizerOptions::update_interval`] steps.

use euclid::vec2;

use crate::LOSS_SCALE;
use crate::camera::{Camera, DistortionMap};
use crate::config::CameraOptimizerOptions;
use crate::dataset::Dataset;
use crate::math::{FreeVector, Uv, UvVector};
use crate::optimizer::{Adam, AdamHyperparameters, RotationAdam};

/// Gradient contributions of one training ray to its image's camera parameters, in
/// loss-scaled units (multiplied by [`LOSS_SCALE`]).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[allow(clippy::exhaustive_structs)]
pub struct RayCameraGradient {
    /// With respect to the camera position.
    pub position: FreeVector,
    /// With respect to an infinitesimal rotation of the camera about its position.
    pub rotation: FreeVector,
    /// With respect to the exposure of each channel, in stops.
    pub exposure: [f32; 3],
    /// With respect to the focal length on each axis, in pixels.
    pub focal_length: [f32; 2],
    /// Image position at which the ray sampled the distortion map.
    pub uv: Uv,
    /// With respect to the distortion map's offset at [`Self::uv`].
    pub distortion: UvVector,
}

/// Accumulated gradients of one image's own parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ImageGradient {
    position: FreeVector,
    rotation: FreeVector,
    exposure: [f32; 3],
}

/// Optimizer state for all camera parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraOptimizer {
    options: CameraOptimizerOptions,
    base_cameras: Vec<Camera>,

    positions: Vec<Adam<3>>,
    rotations: Vec<RotationAdam>,
    exposures: Vec<Adam<3>>,
    focal_length: Adam<2>,
    distortion: DistortionMap,
    distortion_optimizers: Vec<Adam<2>>,

    image_gradients: Vec<ImageGradient>,
    focal_length_gradient: [f32; 2],
    distortion_gradients: Vec<UvVector>,
    steps_accumulated: u32,
}

impl CameraOptimizer {
    /// Creates an optimizer with all offsets zero for the cameras of `dataset`.
    pub fn new(dataset: &Dataset, options: CameraOptimizerOptions) -> Self {
        let n = dataset.len();
        let hp = AdamHyperparameters::with_learning_rate;
        let distortion = DistortionMap::new(options.distortion_resolution.max(2));
        let n_control_points = distortion.offsets().len();
        Self {
            base_cameras: dataset.images().iter().map(|image| image.camera().clone()).collect(),
            positions: vec![Adam::new([0.0; 3], hp(options.position_learning_rate)); n],
            rotations: vec![
                RotationAdam::new(FreeVector::zero(), hp(options.rotation_learning_rate));
                n
            ],
            exposures: vec![Adam::new([0.0; 3], hp(options.exposure_learning_rate)); n],
            focal_length: Adam::new([0.0; 2], hp(options.focal_length_learning_rate)),
            distortion_optimizers: vec![
                Adam::new([0.0; 2], hp(options.distortion_learning_rate));
                n_control_points
            ],
            distortion,
            image_gradients: vec![ImageGradient::default(); n],
            focal_length_gradient: [0.0; 2],
            distortion_gradients: vec![UvVector::zero(); n_control_points],
            steps_accumulated: 0,
            options,
        }
    }

    /// The options this optimizer was created with.
    pub fn options(&self) -> &CameraOptimizerOptions {
        &self.options
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.base_cameras.len()
    }

    /// Whether there are no images.
    pub fn is_empty(&self) -> bool {
        self.base_cameras.is_empty()
    }

    /// The camera of `image` with the learned offsets applied.
    pub fn camera(&self, image: usize) -> Camera {
        let base = &self.base_cameras[image];
        let mut camera = base.clone();
        camera.pose = base.pose.with_offsets(
            self.positions[image].variable().into(),
            self.rotations[image].variable(),
        );
        let [fx, fy] = self.focal_length.variable();
        camera.focal_length = base.focal_length + vec2(fx, fy);
        camera
    }

    /// All cameras with the learned offsets applied.
    pub fn cameras(&self) -> Vec<Camera> {
        (0..self.len()).map(|image| self.camera(image)).collect()
    }

    /// Learned exposure correction of `image`, in stops per channel.
    pub fn exposure(&self, image: usize) -> [f32; 3] {
        self.exposures[image].variable()
    }

    /// The learned distortion map, if distortion is being optimized.
    pub fn distortion(&self) -> Option<&DistortionMap> {
        self.options.optimize_distortion.then_some(&self.distortion)
    }

    /// Adds one ray's gradients to the accumulators of `image`.
    pub fn accumulate(&mut self, image: usize, gradient: &RayCameraGradient) {
        let accumulated = &mut self.image_gradients[image];
        accumulated.position += gradient.position;
        accumulated.rotation += gradient.rotation;
        for (a, g) in accumulated.exposure.iter_mut().zip(gradient.exposure) {
            *a += g;
        }
        for (a, g) in self.focal_length_gradient.iter_mut().zip(gradient.focal_length) {
            *a += g;
        }
        if self.options.optimize_distortion {
            for (index, weight) in self.distortion.bilinear_weights(gradient.uv) {
                self.distortion_gradients[index] += gradient.distortion * weight;
            }
        }
    }

    /// Records that one training step's gradients have been accumulated.
    pub fn finish_step(&mut self) {
        self.steps_accumulated += 1;
    }

    /// Number of training steps accumulated since the last [`Self::step()`].
    pub fn steps_accumulated(&self) -> u32 {
        self.steps_accumulated
    }

    /// Applies the accumulated gradients to the enabled parameter groups, then clears them.
    ///
    /// Gradients are averaged over the accumulated steps, un-scaled by [`LOSS_SCALE`], and
    /// multiplied by the number of images, since each image receives only its share of each
    /// batch.
    pub fn step(&mut self) {
        if self.steps_accumulated == 0 {
            return;
        }
        let scale = self.len() as f32 / LOSS_SCALE / self.steps_accumulated as f32;
        let options = &self.options;

        for (image, gradient) in self.image_gradients.iter().enumerate() {
            if options.optimize_extrinsics {
                self.positions[image].step((gradient.position * scale).to_array());
                self.rotations[image].step(gradient.rotation * scale);
            }
            if options.optimize_exposure {
                self.exposures[image].step(gradient.exposure.map(|g| g * scale));
            }
        }
        if options.optimize_focal_length {
            self.focal_length.step(self.focal_length_gradient.map(|g| g * scale));
        }
        if options.optimize_distortion {
            for ((optimizer, gradient), offset) in self
                .distortion_optimizers
                .iter_mut()
                .zip(&self.distortion_gradients)
                .zip(self.distortion.offsets_mut())
            {
                optimizer.step((*gradient * scale).to_array());
                let [x, y] = optimizer.variable();
                *offset = vec2(x, y);
            }
        }
        log::debug!(
            "camera update after {} steps",
            self.steps_accumulated
        );

        self.image_gradients.fill(ImageGradient::default());
        self.focal_length_gradient = [0.0; 2];
        self.distortion_gradients.fill(UvVector::zero());
        self.steps_accumulated = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Rgb;
    use crate::testing::sphere_dataset;
    use euclid::vec3;

    fn optimizer(options: CameraOptimizerOptions) -> CameraOptimizer {
        let dataset = sphere_dataset(2, 4, 0.2, Rgb::ONE, Rgb::ZERO);
        CameraOptimizer::new(&dataset, options)
    }

    fn position_gradient() -> RayCameraGradient {
        RayCameraGradient {
            position: vec3(LOSS_SCALE, 0.0, 0.0),
            exposure: [1.0, 0.0, 0.0],
            ..RayCameraGradient::default()
        }
    }

    #[test]
    fn starts_at_dataset_cameras() {
        let dataset = sphere_dataset(2, 4, 0.2, Rgb::ONE, Rgb::ZERO);
        let optimizer = CameraOptimizer::new(&dataset, CameraOptimizerOptions::default());
        assert_eq!(&optimizer.camera(1), dataset.images()[1].camera());
        assert_eq!(optimizer.exposure(0), [0.0; 3]);
        assert!(optimizer.distortion().is_none());
    }

    #[test]
    fn enabled_groups_move_against_gradient() {
        let mut optimizer = optimizer(CameraOptimizerOptions {
            optimize_extrinsics: true,
            ..CameraOptimizerOptions::default()
        });
        let before = optimizer.cameras();
        optimizer.accumulate(1, &position_gradient());
        optimizer.finish_step();
        optimizer.step();

        let moved = optimizer.camera(1).pose.position.x - before[1].pose.position.x;
        assert!(moved < 0.0 && moved > -2e-4, "{moved}");
        // Images without gradient stay put.
        assert_eq!(optimizer.camera(0), before[0]);
        // Exposure is disabled.
        assert_eq!(optimizer.exposure(1), [0.0; 3]);
        assert_eq!(optimizer.steps_accumulated(), 0);
    }

    #[test]
    fn step_without_accumulation_is_noop() {
        let mut optimizer = optimizer(CameraOptimizerOptions {
            optimize_extrinsics: true,
            optimize_exposure: true,
            ..CameraOptimizerOptions::default()
        });
        let before = optimizer.clone();
        optimizer.accumulate(0, &position_gradient());
        let accumulated = optimizer.clone();
        optimizer.step();
        assert_eq!(optimizer, accumulated);
        assert_ne!(optimizer, before);
    }

    #[test]
    fn distortion_receives_splatted_gradient() {
        let mut optimizer = optimizer(CameraOptimizerOptions {
            optimize_distortion: true,
            distortion_resolution: 3,
            ..CameraOptimizerOptions::default()
        });
        optimizer.accumulate(
            0,
            &RayCameraGradient {
                uv: Uv::new(0.0, 0.0),
                distortion: vec2(LOSS_SCALE, 0.0),
                ..RayCameraGradient::default()
            },
        );
        optimizer.finish_step();
        optimizer.step();
        let offsets = optimizer.distortion().unwrap().offsets();
        assert!(offsets[0].x < 0.0, "{offsets:?}");
        assert!(offsets[1..].iter().all(|o| *o == UvVector::zero()));
    }
}
