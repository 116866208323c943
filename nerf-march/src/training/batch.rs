//! Construction of one training batch: ray selection, sample generation, compaction,
//! loss, and backpropagation through compositing.

use core::f32::consts::LN_2;

use euclid::vec2;
use half::f16;
use rand::{Rng, SeedableRng as _};
use rand_xoshiro::Xoshiro256PlusPlus;
use scopeguard::ScopeGuard;

use crate::camera::{Aperture, Camera, DistortionMap};
use crate::camera_opt::RayCameraGradient;
use crate::config::TrainingOptions;
use crate::context::NerfContext;
use crate::dataset::Dataset;
use crate::density_grid::DensityGrid;
use crate::envmap::EnvironmentMap;
use crate::error::resize_buffer;
use crate::error_map::ErrorMap;
use crate::field::{Activation, NetworkInput, NetworkOutput, TrainableField};
use crate::march::{StepPolicy, entry_distance, next_sample, skip_empty};
use crate::math::{Aab, CameraVector, FreeVector, Rgb, Uv, clamp_nonnegative};
use crate::optimizer::ParameterOptimizer as _;
use crate::par;
use crate::raycast::Ray;
use crate::training::{LossKind, StepMetrics};
use crate::{LOSS_SCALE, NerfError, TraceFlaws};

/// Ratio of the uncompacted sample buffer's capacity to the target batch size.
pub const UNCOMPACTED_BATCH_FACTOR: usize = 16;

/// Training rays stop contributing samples once their transmittance falls below this.
pub const MIN_TRANSMITTANCE: f32 = 1e-4;

/// Buffers for one training step, reused across steps.
#[derive(Debug, Default)]
pub(crate) struct TrainingBatch {
    rays: Vec<TrainingRay>,
    inputs: Vec<NetworkInput>,
    outputs: Vec<NetworkOutput>,
    compacted_inputs: Vec<NetworkInput>,
    gradients: Vec<[f16; 4]>,
    output_gradients: Vec<NetworkOutput>,
    position_gradients: Vec<FreeVector>,
}

impl TrainingBatch {
    fn lease(&mut self) -> ScopeGuard<&mut Self, fn(&mut Self)> {
        let release: fn(&mut Self) = Self::release;
        scopeguard::guard(self, release)
    }

    fn release(&mut self) {
        self.rays.clear();
        self.inputs.clear();
        self.outputs.clear();
        self.compacted_inputs.clear();
        self.gradients.clear();
        self.output_gradients.clear();
        self.position_gradients.clear();
    }
}

/// One ray of a training batch.
#[derive(Clone, Copy, Debug)]
struct TrainingRay {
    image: usize,
    /// Position in the image the ray was shot through.
    uv: Uv,
    /// Pixel whose color is the target.
    pixel: (u32, u32),
    /// Ray with unit direction.
    ray: Ray,
    direction_length: f32,
    camera_direction: CameraVector,
    /// Flat color behind the environment map, or behind the volume if there is none.
    flat_background: Rgb,
    /// Color the ray sees where the volume is transparent.
    background: Rgb,
    t_start: f32,
    n_samples: usize,
    /// Whether the ray was discarded because the sample buffer was full.
    dropped: bool,
}

/// Outcome of the loss computation for one ray.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct RayResult {
    used: bool,
    /// Mean loss over the color channels.
    loss: f32,
    /// Loss-scaled gradient with respect to the exposure of each channel.
    exposure_gradient: [f32; 3],
    /// Loss-scaled gradient with respect to the background color.
    background_gradient: [f32; 3],
    clamped: bool,
}

#[derive(Clone, Copy, Debug)]
struct Activations {
    rgb: Activation,
    density: Activation,
}

/// Activated values of one sample.
struct SampleValues {
    rgb: Rgb,
    alpha: f32,
    clamped: bool,
}

impl Activations {
    #[inline]
    fn sample(self, input: &NetworkInput, output: &NetworkOutput) -> SampleValues {
        let (density, clamped) = clamp_nonnegative(self.density.apply(output.density));
        SampleValues {
            rgb: Rgb::from_array(output.rgb.map(|c| self.rgb.apply(c))),
            alpha: 1.0 - (-density * input.dt).exp(),
            clamped,
        }
    }
}

/// Marching parameters for training rays.
struct MarchSetup<'a> {
    grid: &'a DensityGrid,
    policy: StepPolicy,
    aabb: Aab,
    max_samples: usize,
}

impl MarchSetup<'_> {
    /// Distance at which the ray enters its first occupied cell, if any.
    fn start(&self, ray: &Ray) -> Option<f32> {
        let mut t = entry_distance(&self.aabb, ray)?;
        skip_empty(self.grid, &self.policy, &self.aabb, ray, &mut t).then_some(t)
    }

    /// Marches from `t`, passing each sample to `visit`; returns the number of samples.
    fn march(&self, ray: &Ray, mut t: f32, mut visit: impl FnMut(usize, NetworkInput)) -> usize {
        let mut n = 0;
        while n < self.max_samples {
            let Some(sample) = next_sample(self.grid, &self.policy, &self.aabb, ray, &mut t) else {
                break;
            };
            visit(n, NetworkInput::new(sample.position, ray.direction, sample.dt));
            n += 1;
        }
        n
    }
}

/// Chooses training pixels and builds their rays.
struct PixelSampler<'a> {
    dataset: &'a Dataset,
    cameras: &'a [Camera],
    distortion: Option<&'a DistortionMap>,
    error_map: Option<&'a ErrorMap>,
    envmap: Option<&'a EnvironmentMap>,
    options: &'a TrainingOptions,
}

impl PixelSampler<'_> {
    fn choose<R: Rng>(&self, rng: &mut R, setup: &MarchSetup<'_>) -> TrainingRay {
        let n_images = self.dataset.len();
        let (image, uv) = match self.error_map {
            Some(map) => {
                let u = rng.random();
                let v = rng.random();
                let sample = if self.options.error_map.sample_image_proportional_to_error {
                    map.sample(u, v, rng.random())
                } else {
                    map.sample_in_image(rng.random_range(0..n_images), u, v)
                };
                (sample.image, sample.uv)
            }
            None => (
                rng.random_range(0..n_images),
                Uv::new(rng.random(), rng.random()),
            ),
        };
        let camera = &self.cameras[image];
        let pixel = camera.pixel_at(uv);
        let uv = if self.options.snap_to_pixel_centers {
            camera.pixel_uv(pixel.0, pixel.1, vec2(0.5, 0.5))
        } else {
            uv
        };
        let flat_background = if self.options.random_bg_color {
            Rgb::new(rng.random(), rng.random(), rng.random())
        } else {
            self.options.background
        };

        let camera_ray = camera.ray_for_uv(uv, self.distortion, Aperture::default(), vec2(0.5, 0.5));
        let background = match self.envmap {
            Some(envmap) => envmap.background(camera_ray.ray.direction, flat_background),
            None => flat_background,
        };
        let start = setup.start(&camera_ray.ray);
        let n_samples = match start {
            Some(t) => setup.march(&camera_ray.ray, t, |_, _| {}),
            None => 0,
        };
        TrainingRay {
            image,
            uv,
            pixel,
            ray: camera_ray.ray,
            direction_length: camera_ray.direction_length,
            camera_direction: camera_ray.camera_direction,
            flat_background,
            background,
            t_start: start.unwrap_or(0.0),
            n_samples,
            dropped: false,
        }
    }

    /// The color the ray should produce.
    fn target_color(&self, ray: &TrainingRay) -> Rgb {
        let pixel = self.dataset.images()[ray.image].pixel(ray.pixel.0, ray.pixel.1);
        let rgb = if self.options.linear_colors {
            pixel.to_rgb().srgb_to_linear()
        } else {
            pixel.to_rgb()
        };
        rgb.with_alpha(pixel.alpha()).composite_over(ray.background)
    }
}

/// Random stream for one ray of one step, independent of scheduling.
fn ray_rng(seed: u64, step: u32, ray: usize) -> Xoshiro256PlusPlus {
    let stream = (u64::from(step) << 32) | ray as u64;
    Xoshiro256PlusPlus::seed_from_u64(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Runs one training step; see [`crate::training::train_nerf_step()`].
pub(crate) fn train_step<F>(
    ctx: &mut NerfContext<F>,
    target_batch_size: u32,
    n_rays: u32,
) -> crate::Result<StepMetrics>
where
    F: TrainableField,
{
    if target_batch_size == 0 || n_rays == 0 {
        return Err(NerfError::ZeroBatchSize);
    }
    let NerfContext {
        dataset,
        field,
        config,
        grid,
        cameras,
        camera_optimizer,
        error_map,
        error_accumulator,
        field_optimizer,
        envmap,
        envmap_optimizer,
        training_step,
        batch,
        ..
    } = ctx;
    let options = &config.training;
    let step = *training_step;
    let target = target_batch_size as usize;
    let n_rays = n_rays as usize;
    let capacity = target * UNCOMPACTED_BATCH_FACTOR;
    let mut flags = TraceFlaws::empty();

    let mut scratch = batch.lease();
    let TrainingBatch {
        rays,
        inputs,
        outputs,
        compacted_inputs,
        gradients,
        output_gradients,
        position_gradients,
    } = &mut **scratch;

    let setup = MarchSetup {
        grid,
        policy: StepPolicy::new(config.grid.steps_per_unit, grid.grid_size(), options.cone_angle),
        aabb: dataset.aabb(),
        max_samples: options.max_samples_per_ray as usize,
    };
    let sampler = PixelSampler {
        dataset,
        cameras,
        distortion: camera_optimizer.distortion(),
        error_map: options.error_map.enabled.then_some(&*error_map),
        envmap: envmap.as_ref(),
        options,
    };

    // Choose rays and count their samples.
    *rays = par::map_collect(n_rays, |i| {
        sampler.choose(&mut ray_rng(options.seed, step, i), &setup)
    });

    // Place samples in ray order; once the buffer would overflow, drop every later ray.
    let mut sample_offsets = Vec::with_capacity(n_rays);
    let mut total_samples = 0;
    let mut overflowed = false;
    for ray in rays.iter_mut() {
        if overflowed || total_samples + ray.n_samples > capacity {
            overflowed = true;
            ray.dropped = true;
            ray.n_samples = 0;
        }
        sample_offsets.push(total_samples);
        total_samples += ray.n_samples;
    }
    if overflowed {
        flags |= TraceFlaws::BATCH_OVERFLOW;
        let dropped = rays.iter().filter(|ray| ray.dropped).count();
        log::debug!("training step {step}: sample buffer full, dropped {dropped} rays");
    }
    let rays: &[TrainingRay] = rays;

    resize_buffer(inputs, total_samples, NetworkInput::default())?;
    let chunks = par::split_lengths_mut(inputs, rays.iter().map(|ray| ray.n_samples));
    par::zip_map_collect(rays, chunks, |_, ray, chunk| {
        if !chunk.is_empty() {
            let written = setup.march(&ray.ray, ray.t_start, |n, input| chunk[n] = input);
            debug_assert_eq!(written, chunk.len());
        }
    });
    let inputs: &[NetworkInput] = inputs;

    resize_buffer(outputs, total_samples, NetworkOutput::default())?;
    field.evaluate(inputs, outputs);
    let outputs: &[NetworkOutput] = outputs;

    // Compaction: each ray keeps its samples up to where it becomes opaque, and the batch is
    // truncated at the target size.
    let activations = Activations {
        rgb: options.rgb_activation,
        density: options.density_activation,
    };
    let full_counts = par::map_collect(n_rays, |i| {
        let start = sample_offsets[i];
        let n = rays[i].n_samples;
        compacted_count(activations, &inputs[start..][..n], &outputs[start..][..n])
    });
    let mut compacted_offsets = Vec::with_capacity(n_rays);
    let mut allotted = Vec::with_capacity(n_rays);
    let mut samples_in_batch = 0;
    for &full in &full_counts {
        let n = full.min(target - samples_in_batch);
        compacted_offsets.push(samples_in_batch);
        allotted.push(n);
        samples_in_batch += n;
    }
    let samples_after_compaction: usize = full_counts.iter().sum();

    // Loss and gradients with respect to raw outputs.
    let exposures: Vec<[f32; 3]> = (0..dataset.len())
        .map(|image| camera_optimizer.exposure(image))
        .collect();
    let gradient_scale = LOSS_SCALE / n_rays as f32;
    resize_buffer(gradients, target, [f16::ZERO; 4])?;
    let chunks = par::split_lengths_mut(gradients, allotted.iter().copied());
    let results = par::zip_map_collect(rays, chunks, |i, ray, chunk| {
        if ray.dropped || (chunk.is_empty() && full_counts[i] > 0) {
            return RayResult::default();
        }
        let start = sample_offsets[i];
        let n = chunk.len();
        ray_loss_and_gradients(
            activations,
            options.loss,
            &inputs[start..][..n],
            &outputs[start..][..n],
            ray.background,
            exposures[ray.image],
            sampler.target_color(ray),
            gradient_scale,
            chunk,
        )
    });

    resize_buffer(compacted_inputs, target, NetworkInput::default())?;
    for (i, &n) in allotted.iter().enumerate() {
        compacted_inputs[compacted_offsets[i]..][..n]
            .copy_from_slice(&inputs[sample_offsets[i]..][..n]);
    }
    resize_buffer(output_gradients, target, NetworkOutput::default())?;
    for (unscaled, scaled) in output_gradients.iter_mut().zip(gradients.iter()) {
        *unscaled = NetworkOutput::from_array(scaled.map(|g| g.to_f32() / LOSS_SCALE));
    }

    // Backpropagate into the field, and through its input positions into the cameras.
    let optimize_cameras = config.camera.any_enabled();
    field.zero_gradients();
    if optimize_cameras {
        resize_buffer(position_gradients, target, FreeVector::zero())?;
        field.backward(
            compacted_inputs,
            output_gradients,
            Some(position_gradients.as_mut_slice()),
        );
        let compacted_inputs: &[NetworkInput] = compacted_inputs;
        let position_gradients: &[FreeVector] = position_gradients;
        let ray_gradients = par::map_collect(n_rays, |i| {
            let start = compacted_offsets[i];
            let n = allotted[i];
            ray_camera_gradient(
                &rays[i],
                &cameras[rays[i].image],
                &compacted_inputs[start..][..n],
                &position_gradients[start..][..n],
                results[i].exposure_gradient,
            )
        });
        for ((ray, result), gradient) in rays.iter().zip(&results).zip(&ray_gradients) {
            if result.used {
                camera_optimizer.accumulate(ray.image, gradient);
            }
        }
        camera_optimizer.finish_step();
    } else {
        field.backward(compacted_inputs, output_gradients, None);
    }
    let (parameters, parameter_gradients) = field.parameters_and_gradients();
    field_optimizer.step(parameters, parameter_gradients);

    // The environment map only learns through the prediction; the target is held fixed.
    if let Some(envmap) = envmap.as_mut().filter(|_| options.train_envmap) {
        envmap.zero_gradients();
        for (ray, result) in rays.iter().zip(&results) {
            if result.used {
                let gradient = Rgb::from_array(result.background_gradient) * LOSS_SCALE.recip();
                envmap.accumulate_gradient(ray.ray.direction, ray.flat_background, gradient);
            }
        }
        let (texels, texel_gradients) = envmap.parameters_and_gradients();
        envmap_optimizer.step(texels, texel_gradients);
    }

    let mut loss_sum = 0.0;
    let mut rays_used = 0;
    let mut rays_clamped = 0;
    for (ray, result) in rays.iter().zip(&results) {
        if !result.used {
            continue;
        }
        loss_sum += result.loss;
        rays_used += 1;
        rays_clamped += usize::from(result.clamped);
        if options.error_map.enabled {
            error_accumulator.deposit(ray.image, ray.uv, result.loss);
        }
    }
    if rays_clamped > 0 {
        flags |= TraceFlaws::CLAMPED_NUMERICS;
        log::debug!("training step {step}: clamped densities on {rays_clamped} rays");
    }
    if total_samples == 0 {
        log::warn!("training step {step} produced no samples");
    }

    *training_step += 1;
    let metrics = StepMetrics {
        loss: if rays_used > 0 {
            loss_sum / rays_used as f32
        } else {
            0.0
        },
        rays: n_rays,
        rays_used,
        samples_before_compaction: total_samples,
        samples_after_compaction,
        samples_in_batch,
        flags,
    };
    log::debug!("training step {step}: {metrics}");
    Ok(metrics)
}

/// Number of leading samples needed before the ray's transmittance falls below
/// [`MIN_TRANSMITTANCE`], or all of them.
fn compacted_count(
    activations: Activations,
    inputs: &[NetworkInput],
    outputs: &[NetworkOutput],
) -> usize {
    let mut transmittance = 1.0;
    for (n, (input, output)) in inputs.iter().zip(outputs).enumerate() {
        transmittance *= 1.0 - activations.sample(input, output).alpha;
        if transmittance < MIN_TRANSMITTANCE {
            return n + 1;
        }
    }
    inputs.len()
}

/// Composites one ray's samples, compares the result with `target`, and writes the
/// loss-scaled gradient with respect to each sample's raw outputs to `gradients`.
///
/// The prediction is `(C + T * background) * 2^exposure`, where `C` is the composited color
/// and `T` the remaining transmittance.
#[allow(clippy::too_many_arguments)]
fn ray_loss_and_gradients(
    activations: Activations,
    loss: LossKind,
    inputs: &[NetworkInput],
    outputs: &[NetworkOutput],
    background: Rgb,
    exposure: [f32; 3],
    target: Rgb,
    gradient_scale: f32,
    gradients: &mut [[f16; 4]],
) -> RayResult {
    let mut transmittance = 1.0;
    let mut color = Rgb::ZERO;
    let mut clamped = false;
    for (input, output) in inputs.iter().zip(outputs) {
        let sample = activations.sample(input, output);
        color += sample.rgb * (sample.alpha * transmittance);
        transmittance *= 1.0 - sample.alpha;
        clamped |= sample.clamped;
    }
    let composite = color + background * transmittance;
    let exposure_scale = Rgb::from_array(exposure.map(libm::exp2f));
    let prediction = composite * exposure_scale;

    let losses = loss.evaluate_rgb(prediction, target);
    let mean_loss = losses.iter().map(|l| l.loss).sum::<f32>() / 3.0;
    let d_prediction = Rgb::from_array(losses.map(|l| l.gradient * gradient_scale / 3.0));
    let exposure_gradient = (d_prediction * prediction * LN_2).to_array();
    let d_composite = d_prediction * exposure_scale;
    let background_gradient = (d_composite * transmittance).to_array();

    let mut transmittance = 1.0;
    let mut prefix = Rgb::ZERO;
    for ((input, output), slot) in inputs.iter().zip(outputs).zip(gradients) {
        let sample = activations.sample(input, output);
        let weight = sample.alpha * transmittance;
        prefix += sample.rgb * weight;
        let next_transmittance = transmittance * (1.0 - sample.alpha);
        let suffix = composite - prefix;

        let d_rgb = d_composite.to_array();
        let [r, g, b] = [0, 1, 2].map(|c| d_rgb[c] * weight * activations.rgb.derivative(output.rgb[c]));
        let density = if sample.clamped {
            0.0
        } else {
            input.dt
                * d_composite.dot(sample.rgb * next_transmittance - suffix)
                * activations.density.derivative(output.density)
        };
        *slot = [r, g, b, density].map(to_half);
        transmittance = next_transmittance;
    }

    RayResult {
        used: true,
        loss: mean_loss,
        exposure_gradient,
        background_gradient,
        clamped,
    }
}

/// Converts to half precision, saturating instead of overflowing to infinity.
fn to_half(x: f32) -> f16 {
    let max = f16::MAX.to_f32();
    f16::from_f32(x.clamp(-max, max))
}

/// Gradients of one ray's loss with respect to its camera's parameters, given the gradients
/// with respect to its samples' positions.
fn ray_camera_gradient(
    ray: &TrainingRay,
    camera: &Camera,
    inputs: &[NetworkInput],
    position_gradients: &[FreeVector],
    exposure_gradient: [f32; 3],
) -> RayCameraGradient {
    let origin = ray.ray.origin;
    let unit = ray.ray.direction;
    let mut position = FreeVector::zero();
    let mut rotation = FreeVector::zero();
    let mut direction = FreeVector::zero();
    for (input, &g) in inputs.iter().zip(position_gradients) {
        let offset = input.position - origin;
        position += g;
        rotation += offset.cross(g);
        // Sample positions depend on the unnormalized direction through its normalization.
        let t = offset.dot(unit);
        direction += (g - unit * unit.dot(g)) * (t / ray.direction_length);
    }

    let in_camera: CameraVector = camera.pose.rotation.inverse().transform_vector3d(direction);
    let fx = camera.focal_length.x;
    let fy = camera.focal_length.y;
    let d = ray.camera_direction;
    RayCameraGradient {
        position: position * LOSS_SCALE,
        rotation: rotation * LOSS_SCALE,
        exposure: exposure_gradient,
        focal_length: [
            in_camera.x * (-d.x / fx) * LOSS_SCALE,
            in_camera.y * (-d.y / fy) * LOSS_SCALE,
        ],
        uv: ray.uv,
        distortion: vec2(
            in_camera.x * camera.resolution.width as f32 / fx,
            in_camera.y * camera.resolution.height as f32 / fy,
        ) * LOSS_SCALE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use euclid::{point3, vec3};
    use rstest::rstest;

    fn samples() -> (Vec<NetworkInput>, Vec<NetworkOutput>) {
        let inputs = (0..4)
            .map(|i| NetworkInput::new(point3(0.5, 0.5, 0.1 * i as f32), vec3(0.0, 0.0, 1.0), 0.1))
            .collect();
        let outputs = vec![
            NetworkOutput::new([0.2, -0.3, 0.5], 1.0),
            NetworkOutput::new([0.9, 0.1, -0.4], 2.0),
            NetworkOutput::new([-0.5, 0.6, 0.0], 0.5),
            NetworkOutput::new([0.3, 0.3, 0.3], 1.5),
        ];
        (inputs, outputs)
    }

    const ACTIVATIONS: Activations = Activations {
        rgb: Activation::Logistic,
        density: Activation::Exponential,
    };

    fn loss_of(outputs: &[NetworkOutput], inputs: &[NetworkInput], loss: LossKind) -> f32 {
        let mut scratch = vec![[f16::ZERO; 4]; inputs.len()];
        ray_loss_and_gradients(
            ACTIVATIONS,
            loss,
            inputs,
            outputs,
            Rgb::new(0.1, 0.7, 0.3),
            [0.2, 0.0, -0.1],
            Rgb::new(0.8, 0.2, 0.4),
            1.0,
            &mut scratch,
        )
        .loss
    }

    #[rstest]
    fn compositing_gradient_matches_finite_difference(
        #[values(LossKind::L2, LossKind::L1, LossKind::Huber)] loss: LossKind,
    ) {
        let (inputs, outputs) = samples();
        let mut gradients = vec![[f16::ZERO; 4]; inputs.len()];
        ray_loss_and_gradients(
            ACTIVATIONS,
            loss,
            &inputs,
            &outputs,
            Rgb::new(0.1, 0.7, 0.3),
            [0.2, 0.0, -0.1],
            Rgb::new(0.8, 0.2, 0.4),
            1.0,
            &mut gradients,
        );

        let h = 1e-2;
        for j in 0..outputs.len() {
            for channel in 0..4 {
                let perturbed = |delta: f32| {
                    let mut outputs = outputs.clone();
                    let mut raw = outputs[j].to_array();
                    raw[channel] += delta;
                    outputs[j] = NetworkOutput::from_array(raw);
                    loss_of(&outputs, &inputs, loss)
                };
                let numeric = (perturbed(h) - perturbed(-h)) / (2.0 * h);
                let analytic = gradients[j][channel].to_f32();
                assert!(
                    (numeric - analytic).abs() <= 0.02 * analytic.abs().max(0.05),
                    "sample {j} channel {channel}: numeric {numeric} analytic {analytic}"
                );
            }
        }
    }

    #[test]
    fn background_gradient_matches_finite_difference() {
        let (inputs, outputs) = samples();
        let run = |background: Rgb| {
            let mut scratch = vec![[f16::ZERO; 4]; inputs.len()];
            ray_loss_and_gradients(
                ACTIVATIONS,
                LossKind::L2,
                &inputs,
                &outputs,
                background,
                [0.2, 0.0, -0.1],
                Rgb::new(0.8, 0.2, 0.4),
                1.0,
                &mut scratch,
            )
        };
        let background = [0.1, 0.7, 0.3];
        let analytic = run(Rgb::from_array(background)).background_gradient;
        let h = 1e-2;
        for channel in 0..3 {
            let loss_with = |delta: f32| {
                let mut perturbed = background;
                perturbed[channel] += delta;
                run(Rgb::from_array(perturbed)).loss
            };
            let numeric = (loss_with(h) - loss_with(-h)) / (2.0 * h);
            assert!(
                (numeric - analytic[channel]).abs() <= 0.02 * analytic[channel].abs().max(0.05),
                "channel {channel}: numeric {numeric} analytic {}",
                analytic[channel]
            );
        }
    }

    #[test]
    fn compaction_stops_at_opacity() {
        let (inputs, mut outputs) = samples();
        assert_eq!(compacted_count(ACTIVATIONS, &inputs, &outputs), 4);
        outputs[1].density = 12.0;
        assert_eq!(compacted_count(ACTIVATIONS, &inputs, &outputs), 2);
    }

    #[test]
    fn no_samples_predicts_background() {
        let mut gradients: [[f16; 4]; 0] = [];
        let result = ray_loss_and_gradients(
            ACTIVATIONS,
            LossKind::L2,
            &[],
            &[],
            Rgb::new(0.5, 0.5, 0.5),
            [0.0; 3],
            Rgb::new(0.5, 0.5, 0.5),
            1.0,
            &mut gradients,
        );
        assert!(result.used);
        assert_eq!(result.loss, 0.0);
    }

    #[test]
    fn ray_streams_are_distinct_and_reproducible() {
        let a = ray_rng(1, 2, 3).random::<u64>();
        assert_eq!(a, ray_rng(1, 2, 3).random::<u64>());
        assert_ne!(a, ray_rng(1, 2, 4).random::<u64>());
        assert_ne!(a, ray_rng(1, 3, 3).random::<u64>());
    }

    #[test]
    fn half_conversion_saturates() {
        assert_eq!(to_half(1e9), f16::MAX);
        assert_eq!(to_half(-1e9), f16::MIN);
        assert_eq!(to_half(0.5).to_f32(), 0.5);
    }
}
