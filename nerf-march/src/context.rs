use crate::camera::Camera;
use crate::camera_opt::CameraOptimizer;
use crate::config::NerfConfig;
use crate::dataset::Dataset;
use crate::density_grid::{DensityGrid, cascades_for_aabb_scale};
use crate::envmap::EnvironmentMap;
use crate::error_map::{ErrorAccumulator, ErrorMap};
use crate::field::RadianceField;
use crate::march::StepPolicy;
use crate::optimizer::{FlatAdam, ParameterOptimizer};
use crate::tracer::{RenderBuffer, TraceInfo, TraceSetup, Tracer};
use crate::training::{BatchSizeController, TrainingBatch};

/// All state of one reconstruction: the dataset, the field being trained, and everything
/// the engine learns or caches alongside it.
///
/// Training functions in [`crate::training`] take the context mutably; rendering takes it
/// shared, so a render between two training steps sees the state as of the last step.
#[derive(Debug)]
pub struct NerfContext<F> {
    pub(crate) dataset: Dataset,
    pub(crate) field: F,
    pub(crate) config: NerfConfig,

    pub(crate) grid: DensityGrid,
    /// Dataset cameras with the camera optimizer's offsets as of the last prep or update.
    pub(crate) cameras: Vec<Camera>,
    pub(crate) camera_optimizer: CameraOptimizer,
    pub(crate) error_map: ErrorMap,
    pub(crate) error_accumulator: ErrorAccumulator,
    /// Per-image sharpness, computed on first use.
    pub(crate) sharpness: Option<Vec<Vec<f32>>>,
    pub(crate) batch_controller: BatchSizeController,
    pub(crate) field_optimizer: Box<dyn ParameterOptimizer>,
    pub(crate) envmap: Option<EnvironmentMap>,
    pub(crate) envmap_optimizer: FlatAdam,

    pub(crate) training_step: u32,
    pub(crate) rays_since_error_map_update: u64,
    pub(crate) batch: TrainingBatch,
}

impl<F> NerfContext<F> {
    /// Creates a context for training `field` on `dataset`.
    ///
    /// The occupancy grid starts with every cell occupied, the error map uniform, and the
    /// camera offsets zero. The field's parameters are optimized with [`FlatAdam`] unless
    /// replaced with [`Self::with_field_optimizer()`].
    pub fn new(dataset: Dataset, field: F, config: NerfConfig) -> crate::Result<Self> {
        let grid = new_grid(&dataset, &config)?;
        let error_accumulator =
            ErrorAccumulator::new(dataset.len(), config.training.error_map.resolution)?;
        let camera_optimizer = CameraOptimizer::new(&dataset, config.camera.clone());
        Ok(Self {
            cameras: camera_optimizer.cameras(),
            camera_optimizer,
            error_map: error_accumulator.to_error_map(None),
            error_accumulator,
            sharpness: None,
            batch_controller: BatchSizeController::new(config.training.initial_rays_per_batch),
            field_optimizer: Box::new(FlatAdam::new(config.training.field_optimizer)),
            envmap: None,
            envmap_optimizer: FlatAdam::new(config.training.envmap_optimizer),
            training_step: 0,
            rays_since_error_map_update: 0,
            batch: TrainingBatch::default(),
            grid,
            dataset,
            field,
            config,
        })
    }

    /// Replaces the optimizer used for the field's parameters.
    #[must_use]
    pub fn with_field_optimizer(mut self, optimizer: impl ParameterOptimizer + 'static) -> Self {
        self.field_optimizer = Box::new(optimizer);
        self
    }

    /// Places `envmap` behind the volume, for training and rendering. Its texels are
    /// learned only if [`crate::config::TrainingOptions::train_envmap`] is set.
    #[must_use]
    pub fn with_envmap(mut self, envmap: EnvironmentMap) -> Self {
        self.envmap = Some(envmap);
        self.envmap_optimizer.reset();
        self
    }

    /// Returns everything learned during training, other than the field itself, to its
    /// initial state: the occupancy grid, error map, camera offsets, batch size, optimizer
    /// state and step counter.
    ///
    /// Call this after replacing the field's parameters.
    pub fn reset_training(&mut self) {
        self.grid.reset();
        self.camera_optimizer = CameraOptimizer::new(&self.dataset, self.config.camera.clone());
        self.cameras = self.camera_optimizer.cameras();
        self.error_accumulator.clear();
        self.error_map = self.error_accumulator.to_error_map(None);
        self.batch_controller = BatchSizeController::new(self.config.training.initial_rays_per_batch);
        self.field_optimizer.reset();
        self.envmap_optimizer.reset();
        self.training_step = 0;
        self.rays_since_error_map_update = 0;
        log::info!("training state reset");
    }

    /// The training images.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// The field.
    pub fn field(&self) -> &F {
        &self.field
    }

    /// The field, for modification. Consider [`Self::reset_training()`] afterward.
    pub fn field_mut(&mut self) -> &mut F {
        &mut self.field
    }

    /// The configuration.
    pub fn config(&self) -> &NerfConfig {
        &self.config
    }

    /// Changes the rendering options, which take effect on the next render.
    pub fn set_render_options(&mut self, options: crate::config::RenderOptions) {
        self.config.render = options;
    }

    /// The environment map, if any.
    pub fn envmap(&self) -> Option<&EnvironmentMap> {
        self.envmap.as_ref()
    }

    /// The environment map, for modification.
    pub fn envmap_mut(&mut self) -> Option<&mut EnvironmentMap> {
        self.envmap.as_mut()
    }

    /// The occupancy grid.
    pub fn grid(&self) -> &DensityGrid {
        &self.grid
    }

    /// The error map that training rays are currently drawn from.
    pub fn error_map(&self) -> &ErrorMap {
        &self.error_map
    }

    /// Error accumulated since the last error map rebuild.
    pub fn error_accumulator(&self) -> &ErrorAccumulator {
        &self.error_accumulator
    }

    /// The camera parameter optimizer.
    pub fn camera_optimizer(&self) -> &CameraOptimizer {
        &self.camera_optimizer
    }

    /// The batch size controller used by [`crate::training::train_nerf()`].
    pub fn batch_controller(&self) -> &BatchSizeController {
        &self.batch_controller
    }

    /// Number of training steps taken.
    pub fn training_step(&self) -> u32 {
        self.training_step
    }

    /// How rendering rays are marched: the grid, the render cone angle, the render bounds
    /// (the training bounds unless configured), and the training activations.
    pub fn trace_setup(&self) -> TraceSetup<'_> {
        let render = &self.config.render;
        TraceSetup {
            grid: &self.grid,
            policy: StepPolicy::new(
                self.config.grid.steps_per_unit,
                self.grid.grid_size(),
                render.cone_angle,
            ),
            aabb: render.render_aabb.unwrap_or_else(|| self.dataset.aabb()),
            rgb_activation: self.config.training.rgb_activation,
            density_activation: self.config.training.density_activation,
            envmap: self.envmap.as_ref(),
        }
    }
}

impl<F: RadianceField> NerfContext<F> {
    /// Renders one frame of `camera` with the configured render options and adds it to
    /// `buffer`.
    pub fn render(
        &self,
        tracer: &mut Tracer,
        camera: &Camera,
        buffer: &mut RenderBuffer,
    ) -> crate::Result<TraceInfo> {
        tracer.render(
            &self.field,
            camera,
            None,
            &self.trace_setup(),
            &self.config.render,
            buffer,
        )
    }

    /// Renders one frame from the viewpoint of training image `image`, with the learned
    /// camera offsets and distortion applied, and adds it to `buffer`.
    ///
    /// Panics if `image` is out of range.
    pub fn render_training_view(
        &self,
        tracer: &mut Tracer,
        image: usize,
        buffer: &mut RenderBuffer,
    ) -> crate::Result<TraceInfo> {
        tracer.render(
            &self.field,
            &self.camera_optimizer.camera(image),
            self.camera_optimizer.distortion(),
            &self.trace_setup(),
            &self.config.render,
            buffer,
        )
    }
}

fn new_grid(dataset: &Dataset, config: &NerfConfig) -> crate::Result<DensityGrid> {
    let options = &config.grid;
    let policy = StepPolicy::new(
        options.steps_per_unit,
        options.grid_size,
        config.training.cone_angle,
    );
    DensityGrid::new(
        options.grid_size,
        cascades_for_aabb_scale(dataset.aabb_scale()),
        policy.min_step(),
        options.threshold,
    )
}
