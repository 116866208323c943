//! Training: fixed-size batches of supervised samples, losses, and the schedule that ties
//! the occupancy grid, error map, and camera optimizer together.
//!
//! The three phase functions operate on a [`NerfContext`]:
//!
//! * [`training_prep_nerf()`] refreshes the working cameras and updates the occupancy grid;
//! * [`train_nerf_step()`] builds one batch and takes one optimizer step;
//! * [`train_nerf()`] runs a prep followed by a number of steps, adapting the batch size and
//!   updating cameras and the error map on their own schedules.

use core::fmt;

use rand::SeedableRng as _;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::context::NerfContext;
use crate::density_grid::GridUpdateInfo;
use crate::error_map::sharpness_map;
use crate::field::TrainableField;
use crate::{NerfError, TraceFlaws};

mod batch;
pub(crate) use batch::TrainingBatch;
pub use batch::{MIN_TRANSMITTANCE, UNCOMPACTED_BATCH_FACTOR};
mod controller;
pub use controller::{BATCH_SIZE_GRANULARITY, BatchSizeController, MAX_RAYS_PER_BATCH};
mod loss;
pub use loss::{HUBER_ALPHA, LossAndGradient, LossKind};

/// Distinguishes the grid update random stream from the per-ray streams.
const GRID_STREAM: u64 = 0x6772_6964;

/// Results of [`training_prep_nerf()`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct PrepMetrics {
    /// Number of uniformly placed density samples.
    pub n_uniform_samples: usize,
    /// Number of density samples biased toward occupied cells.
    pub n_nonuniform_samples: usize,
    /// Outcome of the grid update, if one was made.
    pub grid: Option<GridUpdateInfo>,
    /// Fraction of level-0 cells marked occupied afterward.
    pub occupancy_ratio: f32,
}

/// Results of [`train_nerf_step()`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct StepMetrics {
    /// Mean loss over the rays used.
    pub loss: f32,
    /// Number of rays requested.
    pub rays: usize,
    /// Number of rays that contributed to the loss.
    pub rays_used: usize,
    /// Samples generated by marching, before compaction.
    pub samples_before_compaction: usize,
    /// Samples remaining after each ray was cut off where it became opaque, before the
    /// batch was truncated to its target size.
    pub samples_after_compaction: usize,
    /// Samples in the batch given to the field; at most the target batch size.
    pub samples_in_batch: usize,
    /// Ways the step was inexact.
    pub flags: TraceFlaws,
}

impl fmt::Display for StepMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss {:.5}, {}/{} rays, samples {} -> {} -> {}",
            self.loss,
            self.rays_used,
            self.rays,
            self.samples_before_compaction,
            self.samples_after_compaction,
            self.samples_in_batch,
        )?;
        if !self.flags.is_empty() {
            write!(f, " ({})", self.flags)?;
        }
        Ok(())
    }
}

/// Results of [`train_nerf()`].
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct TrainingMetrics {
    /// The preparation phase.
    pub prep: PrepMetrics,
    /// Each step, in order.
    pub steps: Vec<StepMetrics>,
    /// Whether the error map was rebuilt.
    pub error_map_updated: bool,
    /// Number of camera updates applied.
    pub camera_updates: u32,
}

impl TrainingMetrics {
    /// Mean loss over the steps.
    pub fn mean_loss(&self) -> f32 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.steps.iter().map(|step| step.loss).sum::<f32>() / self.steps.len() as f32
    }
}

/// Prepares for the next `n_training_steps` steps with batches of `batch_size` samples.
///
/// Applies the camera optimizer's current offsets to the working cameras, then samples the
/// field's density into the occupancy grid. During the first
/// [`GridOptions::warmup_steps`](crate::config::GridOptions::warmup_steps) steps every cell
/// is sampled; afterward a quarter of the cells are sampled uniformly and a quarter
/// preferentially among occupied cells. If `n_training_steps` is zero, only the cameras are
/// refreshed.
pub fn training_prep_nerf<F>(
    ctx: &mut NerfContext<F>,
    batch_size: u32,
    n_training_steps: u32,
) -> crate::Result<PrepMetrics>
where
    F: TrainableField,
{
    if ctx.dataset.is_empty() {
        return Err(NerfError::EmptyDataset);
    }
    if batch_size == 0 {
        return Err(NerfError::ZeroBatchSize);
    }
    ctx.cameras = ctx.camera_optimizer.cameras();
    if n_training_steps == 0 {
        return Ok(PrepMetrics {
            occupancy_ratio: ctx.grid.occupancy_ratio(),
            ..PrepMetrics::default()
        });
    }

    let cells = ctx.grid.cells_per_cascade() * ctx.grid.n_cascades() as usize;
    let (n_uniform, n_nonuniform) = if ctx.training_step < ctx.config.grid.warmup_steps {
        (cells, 0)
    } else {
        (cells / 4, cells / 4)
    };
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(
        ctx.config.training.seed ^ GRID_STREAM ^ (u64::from(ctx.training_step) << 32),
    );
    let info = ctx.grid.update(
        &ctx.field,
        ctx.config.training.density_activation,
        ctx.config.grid.decay,
        n_uniform,
        n_nonuniform,
        &mut rng,
    )?;
    let occupancy_ratio = ctx.grid.occupancy_ratio();
    log::info!(
        "density grid update at step {}: {} occupied cells ({:.1}%), mean {:.4}",
        ctx.training_step,
        info.occupied_cells,
        occupancy_ratio * 100.0,
        ctx.grid.mean_density(),
    );
    Ok(PrepMetrics {
        n_uniform_samples: n_uniform,
        n_nonuniform_samples: n_nonuniform,
        grid: Some(info),
        occupancy_ratio,
    })
}

/// Builds one batch of `n_rays` rays, truncated to `target_batch_size` samples after
/// compaction, and takes one optimizer step on the field.
///
/// The batch depends only on the context's state and the configured seed, so repeating a
/// step from the same state gives the same result.
pub fn train_nerf_step<F>(
    ctx: &mut NerfContext<F>,
    target_batch_size: u32,
    n_rays: u32,
) -> crate::Result<StepMetrics>
where
    F: TrainableField,
{
    batch::train_step(ctx, target_batch_size, n_rays)
}

/// Runs [`training_prep_nerf()`] and then `n_training_steps` training steps.
///
/// After each step the batch size controller adjusts the ray count toward
/// `target_batch_size` samples, the camera optimizer is stepped every
/// [`CameraOptimizerOptions::update_interval`](crate::config::CameraOptimizerOptions) steps
/// if any camera parameter is being optimized, and the error map is rebuilt every
/// [`ErrorMapOptions::update_interval`](crate::config::ErrorMapOptions) steps or once
/// enough rays have been traced, if enabled.
pub fn train_nerf<F>(
    ctx: &mut NerfContext<F>,
    target_batch_size: u32,
    n_training_steps: u32,
) -> crate::Result<TrainingMetrics>
where
    F: TrainableField,
{
    let mut metrics = TrainingMetrics {
        prep: training_prep_nerf(ctx, target_batch_size, n_training_steps)?,
        ..TrainingMetrics::default()
    };
    for _ in 0..n_training_steps {
        let rays = ctx.batch_controller.rays_per_batch();
        let step = train_nerf_step(ctx, target_batch_size, rays)?;
        ctx.batch_controller
            .update(target_batch_size, step.samples_after_compaction as u32);
        ctx.rays_since_error_map_update += u64::from(rays);

        let camera_options = ctx.camera_optimizer.options();
        if camera_options.any_enabled()
            && ctx.camera_optimizer.steps_accumulated() >= camera_options.update_interval.max(1)
        {
            ctx.camera_optimizer.step();
            ctx.cameras = ctx.camera_optimizer.cameras();
            metrics.camera_updates += 1;
        }

        let error_map_options = &ctx.config.training.error_map;
        if error_map_options.enabled
            && (ctx.training_step % error_map_options.update_interval.max(1) == 0
                || ctx.rays_since_error_map_update >= error_map_options.ray_threshold)
        {
            update_error_map(ctx);
            metrics.error_map_updated = true;
        }
        metrics.steps.push(step);
    }
    if let Some(last) = metrics.steps.last() {
        log::info!(
            "trained {n_training_steps} steps to step {}: mean loss {:.5}, last {last}, {} rays per batch",
            ctx.training_step,
            metrics.mean_loss(),
            ctx.batch_controller.rays_per_batch(),
        );
    }
    Ok(metrics)
}

/// Rebuilds the error map from the accumulated error, weighted by image sharpness if
/// configured, and decays the accumulator.
pub fn update_error_map<F>(ctx: &mut NerfContext<F>) {
    let options = &ctx.config.training.error_map;
    let weights = if options.include_sharpness {
        let resolution = options.resolution;
        let dataset = &ctx.dataset;
        Some(&*ctx.sharpness.get_or_insert_with(|| {
            dataset
                .images()
                .iter()
                .map(|image| sharpness_map(image, resolution))
                .collect()
        }))
    } else {
        None
    };
    ctx.error_map = ctx
        .error_accumulator
        .to_error_map(weights.map(|w| w.as_slice()));
    ctx.error_accumulator.decay(options.decay);
    ctx.rays_since_error_map_update = 0;
    log::info!("error map rebuilt at step {}", ctx.training_step);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NerfConfig;
    use crate::math::{Aab, Rgb};
    use crate::testing::sphere_dataset;
    use crate::{Activation, NetworkOutput, VoxelField};
    use pretty_assertions::assert_eq;

    fn context(config: NerfConfig) -> NerfContext<VoxelField> {
        let dataset = sphere_dataset(3, 8, 0.25, Rgb::new(0.9, 0.2, 0.1), Rgb::ZERO);
        let field = VoxelField::new(8, Aab::UNIT_CUBE, NetworkOutput::new([0.0; 3], 0.0));
        NerfContext::new(dataset, field, config).unwrap()
    }

    fn small_config() -> NerfConfig {
        let mut config = NerfConfig::default();
        config.grid.grid_size = 16;
        config.grid.steps_per_unit = 64;
        config.training.rgb_activation = Activation::Logistic;
        config.training.random_bg_color = false;
        config
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut ctx = context(small_config());
        assert!(matches!(
            train_nerf_step(&mut ctx, 0, 256),
            Err(NerfError::ZeroBatchSize)
        ));
        assert!(matches!(
            train_nerf_step(&mut ctx, 256, 0),
            Err(NerfError::ZeroBatchSize)
        ));
        assert!(matches!(
            training_prep_nerf(&mut ctx, 0, 1),
            Err(NerfError::ZeroBatchSize)
        ));
    }

    #[test]
    fn steps_are_deterministic() {
        let run = || {
            let mut ctx = context(small_config());
            let metrics = train_nerf(&mut ctx, 4096, 3).unwrap();
            (metrics, ctx.field().parameters().to_vec())
        };
        let (first_metrics, first_parameters) = run();
        let (second_metrics, second_parameters) = run();
        assert_eq!(first_metrics, second_metrics);
        assert!(first_parameters == second_parameters);
    }

    #[test]
    fn step_fills_batch_and_counts_samples() {
        let mut ctx = context(small_config());
        training_prep_nerf(&mut ctx, 4096, 1).unwrap();
        let metrics = train_nerf_step(&mut ctx, 4096, 256).unwrap();
        assert_eq!(metrics.rays, 256);
        assert!(metrics.rays_used > 0);
        assert!(metrics.samples_before_compaction > 0);
        assert!(metrics.samples_after_compaction <= metrics.samples_before_compaction);
        assert!(metrics.samples_in_batch <= 4096);
        assert!(metrics.loss > 0.0);
        assert_eq!(ctx.training_step(), 1);
    }

    #[test]
    fn overflow_drops_rays() {
        let mut config = small_config();
        config.training.max_samples_per_ray = 8;
        let mut ctx = context(config);
        training_prep_nerf(&mut ctx, 1, 1).unwrap();
        let metrics = train_nerf_step(&mut ctx, 1, 256).unwrap();
        assert!(metrics.flags.contains(TraceFlaws::BATCH_OVERFLOW), "{metrics}");
        assert!(metrics.samples_before_compaction <= UNCOMPACTED_BATCH_FACTOR);
        assert_eq!(metrics.samples_in_batch, 1);
    }

    #[test]
    fn prep_schedule() {
        let mut ctx = context(small_config());
        let cells = 16 * 16 * 16;
        let prep = training_prep_nerf(&mut ctx, 1024, 1).unwrap();
        assert_eq!((prep.n_uniform_samples, prep.n_nonuniform_samples), (cells, 0));
        assert!(prep.grid.is_some());

        let mut config = small_config();
        config.grid.warmup_steps = 0;
        let mut ctx = context(config);
        let prep = training_prep_nerf(&mut ctx, 1024, 1).unwrap();
        assert_eq!(
            (prep.n_uniform_samples, prep.n_nonuniform_samples),
            (cells / 4, cells / 4)
        );
        assert!(training_prep_nerf(&mut ctx, 1024, 0).unwrap().grid.is_none());
    }

    #[test]
    fn error_map_is_rebuilt_on_schedule() {
        let mut config = small_config();
        config.training.error_map.enabled = true;
        config.training.error_map.update_interval = 2;
        config.training.error_map.include_sharpness = true;
        let mut ctx = context(config);
        let uniform = ctx.error_map().clone();
        let metrics = train_nerf(&mut ctx, 2048, 2).unwrap();
        assert!(metrics.error_map_updated);
        assert_ne!(ctx.error_map(), &uniform);
    }

    #[test]
    fn camera_updates_follow_interval() {
        let mut config = small_config();
        config.camera.optimize_exposure = true;
        config.camera.update_interval = 2;
        let mut ctx = context(config);
        let metrics = train_nerf(&mut ctx, 2048, 4).unwrap();
        assert_eq!(metrics.camera_updates, 2);
        assert_eq!(ctx.camera_optimizer().steps_accumulated(), 0);
    }
}
