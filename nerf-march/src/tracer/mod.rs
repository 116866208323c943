//! Adaptive ray marching through the occupancy grid, for rendering.
//!
//! A trace proceeds in iterations. Each iteration compacts the live rays, marches every
//! live ray a few samples forward, evaluates the field on all of those samples in one
//! batch, and composites the results front to back. As rays finish, the survivors are
//! given more samples per iteration so that batches stay large.

use core::{fmt, ops};

use scopeguard::ScopeGuard;
use serde::{Deserialize, Serialize};

use crate::camera::{Camera, DistortionMap};
use crate::config::RenderOptions;
use crate::density_grid::DensityGrid;
use crate::envmap::EnvironmentMap;
use crate::error::resize_buffer;
use crate::field::{Activation, NetworkInput, NetworkOutput, RadianceField};
use crate::march::{StepPolicy, entry_distance, next_sample, skip_empty};
use crate::math::{Aab, Rgb, clamp_nonnegative, pixel_offset, radical_inverse};
use crate::par;
use crate::raycast::Ray;
use crate::TraceFlaws;

mod buffer;
pub use buffer::RenderBuffer;
mod rays;
pub use rays::{RayArena, RaySoa, RayState};

/// Upper bound on samples per ray per iteration.
const MAX_STEPS_PER_ITERATION: usize = 8;

/// Quantity composited along each ray when rendering.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[non_exhaustive]
pub enum RenderMode {
    /// The field's color, over the environment map and background.
    #[default]
    Shade,
    /// Distance along the ray, scaled by
    /// [`RenderOptions::depth_scale`](crate::config::RenderOptions::depth_scale), in every
    /// color channel. No background.
    Depth,
    /// Opacity in every color channel. No background.
    Alpha,
}

/// The acceleration structure and conventions used to march rays.
#[allow(clippy::exhaustive_structs)]
#[derive(Clone, Copy, Debug)]
pub struct TraceSetup<'a> {
    /// Occupancy grid used to skip empty space.
    pub grid: &'a DensityGrid,
    /// Step length policy.
    pub policy: StepPolicy,
    /// Region outside which rays stop.
    pub aabb: Aab,
    /// Activation of the field's raw colors.
    pub rgb_activation: Activation,
    /// Activation of the field's raw density.
    pub density_activation: Activation,
    /// Background seen by rays in [`RenderMode::Shade`] in front of the flat background
    /// color, if any.
    pub envmap: Option<&'a EnvironmentMap>,
}

/// Statistics about a trace.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct TraceInfo {
    /// Number of rays initialized.
    pub rays: usize,
    /// Number of field evaluations that were samples (padding excluded).
    pub samples: usize,
    /// Number of iterations, counting the final one that found no live rays.
    pub iterations: u32,
    /// Number of rays that finished.
    pub rays_hit: usize,
    /// Ways the result is inexact.
    pub flags: TraceFlaws,
}

impl ops::Add for TraceInfo {
    type Output = Self;
    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}
impl ops::AddAssign for TraceInfo {
    fn add_assign(&mut self, other: Self) {
        self.rays += other.rays;
        self.samples += other.samples;
        self.iterations += other.iterations;
        self.rays_hit += other.rays_hit;
        self.flags |= other.flags;
    }
}
impl core::iter::Sum for TraceInfo {
    fn sum<I>(iter: I) -> Self
    where
        I: Iterator<Item = Self>,
    {
        let mut sum = Self::default();
        for part in iter {
            sum += part;
        }
        sum
    }
}

impl fmt::Display for TraceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let &Self {
            rays,
            samples,
            iterations,
            rays_hit,
            flags,
        } = self;
        write!(
            f,
            "{rays} rays, {samples} samples, {iterations} iterations, {rays_hit} finished"
        )?;
        if !flags.is_empty() {
            write!(f, " ({flags})")?;
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// Buffers for field inputs and outputs, reused across traces.
#[derive(Debug, Default)]
struct Scratch {
    inputs: Vec<NetworkInput>,
    outputs: Vec<NetworkOutput>,
}

/// Exclusive use of a [`Scratch`], which is emptied (keeping capacity) when released.
type ScratchGuard<'a> = ScopeGuard<&'a mut Scratch, fn(&mut Scratch)>;

impl Scratch {
    fn lease(&mut self) -> ScratchGuard<'_> {
        let release: fn(&mut Scratch) = Scratch::release;
        scopeguard::guard(self, release)
    }

    fn release(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }
}

/// Ray marcher for rendering.
///
/// Keeps its ray and sample buffers between traces to avoid reallocation.
#[derive(Debug, Default)]
pub struct Tracer {
    arena: RayArena,
    scratch: Scratch,
    n_rays_initialized: usize,
}

impl Tracer {
    /// Creates a tracer with empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The rays of the most recent trace.
    pub fn arena(&self) -> &RayArena {
        &self.arena
    }

    /// Replaces the rays with the given ones, identified by the accompanying ids.
    ///
    /// Each ray is clipped to `setup.aabb` and advanced to its first occupied cell. Rays
    /// that miss the box, or find nothing occupied within it, start dead.
    ///
    /// Returns the number of rays that start alive.
    pub fn init_rays(
        &mut self,
        rays: impl IntoIterator<Item = (u32, Ray)>,
        setup: &TraceSetup<'_>,
    ) -> crate::Result<usize> {
        self.arena.clear();
        let rays = rays.into_iter();
        let generation = self.arena.current_mut();
        generation.try_reserve(rays.size_hint().0)?;
        for (id, ray) in rays {
            let (ray, _) = ray.normalized();
            let state = match entry_distance(&setup.aabb, &ray) {
                Some(t) => RayState::start(t),
                None => RayState::dead(),
            };
            generation.push(ray, id, state);
        }
        self.n_rays_initialized = generation.len();

        let (origins, directions, states) = generation.split_mut();
        let alive: usize = par::map_sum_mut(states, |i, state| {
            if state.alive {
                let ray = Ray {
                    origin: origins[i],
                    direction: directions[i],
                };
                state.alive =
                    skip_empty(setup.grid, &setup.policy, &setup.aabb, &ray, &mut state.t);
            }
            usize::from(state.alive)
        });
        Ok(alive)
    }

    /// Replaces the rays with `samples_per_pixel` rays per pixel of `camera`, using
    /// sub-pixel sample indices starting at `spp_index`.
    ///
    /// Ray ids are `pixel_index * samples_per_pixel + sample`, where pixels are numbered
    /// row-major.
    pub fn init_rays_from_camera(
        &mut self,
        camera: &Camera,
        distortion: Option<&DistortionMap>,
        spp_index: u32,
        setup: &TraceSetup<'_>,
        options: &RenderOptions,
    ) -> crate::Result<usize> {
        let spp = options.samples_per_pixel.max(1);
        let width = camera.resolution.width;
        let n_rays = camera.pixel_count() * spp as usize;
        let rays = par::map_collect(n_rays, |id| {
            let pixel = (id / spp as usize) as u32;
            let sample = spp_index + (id as u32 % spp);
            let offset = if options.snap_to_pixel_centers {
                pixel_offset(0)
            } else {
                pixel_offset(sample)
            };
            let uv = camera.pixel_uv(pixel % width, pixel / width, offset);
            let aperture_sample =
                euclid::vec2(radical_inverse(sample, 5), radical_inverse(sample, 7));
            let ray = camera.ray_for_uv(uv, distortion, options.aperture, aperture_sample);
            (id as u32, ray.ray)
        });
        self.init_rays(rays, setup)
    }

    /// Marches all initialized rays to completion, evaluating `field` on their samples.
    ///
    /// Afterward every ray is in the hit set with its accumulated color and opacity.
    pub fn trace<F>(
        &mut self,
        field: &F,
        setup: &TraceSetup<'_>,
        options: &RenderOptions,
    ) -> crate::Result<TraceInfo>
    where
        F: RadianceField + ?Sized,
    {
        let n_initialized = self.n_rays_initialized;
        let mut info = TraceInfo {
            rays: n_initialized,
            ..TraceInfo::default()
        };
        let mut scratch = self.scratch.lease();

        loop {
            info.iterations += 1;
            let (n_alive, _) = self.arena.compact();
            if n_alive == 0 {
                break;
            }
            if info.iterations > options.max_iterations {
                info.flags |= TraceFlaws::ITERATION_LIMIT;
                break;
            }

            let n_steps = (n_initialized / n_alive).clamp(1, MAX_STEPS_PER_ITERATION);
            let Scratch { inputs, outputs } = &mut **scratch;
            resize_buffer(inputs, n_alive * n_steps, NetworkInput::default())?;
            resize_buffer(outputs, n_alive * n_steps, NetworkOutput::default())?;

            let (origins, directions, states) = self.arena.current_mut().split_mut();
            info += par::map_sum_chunks(states, inputs, n_steps, |i, state, chunk| {
                let ray = Ray {
                    origin: origins[i],
                    direction: directions[i],
                };
                march_ray(setup, options.max_steps, &ray, state, chunk)
            });

            field.evaluate(inputs, outputs);

            let inputs = &*inputs;
            info += par::map_sum_chunks(states, outputs, n_steps, |i, state, outputs| {
                let ray = Ray {
                    origin: origins[i],
                    direction: directions[i],
                };
                composite_ray(
                    setup,
                    options,
                    &ray,
                    &inputs[i * n_steps..][..n_steps],
                    outputs,
                    state,
                )
            });
            log::trace!(
                "iteration {}: {n_alive} alive, {n_steps} steps each",
                info.iterations
            );
        }

        self.arena.retire_all();
        info.rays_hit = self.arena.hit().len();
        log::debug!("trace: {info}");
        Ok(info)
    }

    /// Final colors of the traced rays, as `(id, rgba)` with premultiplied color.
    pub fn results(&self) -> impl Iterator<Item = (u32, [f32; 4])> + '_ {
        let hit = self.arena.hit();
        hit.ids()
            .iter()
            .zip(hit.states())
            .map(|(&id, state)| (id, state.rgba))
    }

    /// Renders one frame of `camera` and adds it to `buffer`, which is reset first if its
    /// resolution differs from the camera's.
    ///
    /// The result is a function of the field, setup, options, and the number of samples
    /// already in the buffer only; repeating a render gives bit-identical output.
    pub fn render<F>(
        &mut self,
        field: &F,
        camera: &Camera,
        distortion: Option<&DistortionMap>,
        setup: &TraceSetup<'_>,
        options: &RenderOptions,
        buffer: &mut RenderBuffer,
    ) -> crate::Result<TraceInfo>
    where
        F: RadianceField + ?Sized,
    {
        buffer.ensure_resolution(camera.resolution);
        let spp = options.samples_per_pixel.max(1) as usize;
        self.init_rays_from_camera(camera, distortion, buffer.spp(), setup, options)?;
        let info = self.trace(field, setup, options)?;

        // Reduce per pixel in id order, independent of the order rays finished in.
        let mut by_id = Vec::new();
        resize_buffer(&mut by_id, camera.pixel_count() * spp, [0.0f32; 4])?;
        let exposure = libm::exp2f(options.exposure);
        let hit = self.arena.hit();
        for (i, (&id, state)) in hit.ids().iter().zip(hit.states()).enumerate() {
            let [r, g, b, a] = state.rgba;
            by_id[id as usize] = match options.mode {
                RenderMode::Shade => {
                    let background = match setup.envmap {
                        Some(envmap) => envmap.background(hit.ray(i).direction, options.background),
                        None => options.background,
                    };
                    let [r, g, b] = ((Rgb::new(r, g, b) + background * (1.0 - a)) * exposure).to_array();
                    [r, g, b, a]
                }
                RenderMode::Depth | RenderMode::Alpha => state.rgba,
            };
        }
        let frame: Vec<[f32; 4]> = by_id
            .chunks_exact(spp)
            .map(|samples| {
                let mut sum = [0.0; 4];
                for sample in samples {
                    for (s, c) in sum.iter_mut().zip(sample) {
                        *s += c;
                    }
                }
                sum
            })
            .collect();
        buffer.accumulate(&frame, spp as u32);
        Ok(info)
    }
}

/// Marches one ray for up to `chunk.len()` samples, writing them to `chunk` and padding the
/// rest with unused inputs.
fn march_ray(
    setup: &TraceSetup<'_>,
    max_steps: u32,
    ray: &Ray,
    state: &mut RayState,
    chunk: &mut [NetworkInput],
) -> TraceInfo {
    let mut info = TraceInfo::default();
    let mut n = 0;
    while n < chunk.len() {
        if state.steps >= max_steps {
            state.alive = false;
            info.flags |= TraceFlaws::STEP_BUDGET_EXHAUSTED;
            break;
        }
        match next_sample(setup.grid, &setup.policy, &setup.aabb, ray, &mut state.t) {
            Some(sample) => {
                chunk[n] = NetworkInput::new(sample.position, ray.direction, sample.dt);
                n += 1;
                state.steps += 1;
            }
            None => {
                state.alive = false;
                break;
            }
        }
    }
    chunk[n..].fill(NetworkInput::default());
    info.samples = n;
    info
}

/// Composites one ray's new samples onto its accumulated color, front to back.
fn composite_ray(
    setup: &TraceSetup<'_>,
    options: &RenderOptions,
    ray: &Ray,
    inputs: &[NetworkInput],
    outputs: &[NetworkOutput],
    state: &mut RayState,
) -> TraceInfo {
    let mut info = TraceInfo::default();
    let [mut r, mut g, mut b, mut a] = state.rgba;
    for (input, output) in inputs.iter().zip(outputs) {
        if !input.is_used() {
            break;
        }
        let (density, clamped) = clamp_nonnegative(setup.density_activation.apply(output.density));
        if clamped {
            info.flags |= TraceFlaws::CLAMPED_NUMERICS;
        }
        let alpha = 1.0 - (-density * input.dt).exp();
        if alpha < options.min_alpha {
            continue;
        }
        let weight = alpha * (1.0 - a);
        let [cr, cg, cb] = match options.mode {
            RenderMode::Shade => output.rgb.map(|c| setup.rgb_activation.apply(c)),
            RenderMode::Depth => {
                [(input.position - ray.origin).dot(ray.direction) * options.depth_scale; 3]
            }
            RenderMode::Alpha => [1.0; 3],
        };
        r += weight * cr;
        g += weight * cg;
        b += weight * cb;
        a += weight;
        if a > 1.0 - options.min_transmittance {
            state.alive = false;
            break;
        }
    }
    state.rgba = [r, g, b, a];
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density_grid::OccupancyThreshold;
    use crate::math::{CameraPose, Rgba};
    use crate::testing::{ConstantField, SphereField};
    use euclid::{point3, size2, vec3};
    use rand::{Rng as _, SeedableRng as _};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn grid() -> DensityGrid {
        let min_step = StepPolicy::new(128, 16, 0.0).min_step();
        DensityGrid::new(16, 1, min_step, OccupancyThreshold::default()).unwrap()
    }

    fn setup(grid: &DensityGrid) -> TraceSetup<'_> {
        TraceSetup {
            grid,
            policy: StepPolicy::new(128, 16, 0.0),
            aabb: Aab::UNIT_CUBE,
            rgb_activation: Activation::None,
            density_activation: Activation::None,
            envmap: None,
        }
    }

    #[test]
    fn opaque_sphere_is_its_color() {
        let grid = grid();
        let setup = setup(&grid);
        let field = SphereField::new(point3(0.5, 0.5, 0.5), 0.3, [0.2, 0.4, 0.6], 1000.0);
        let mut tracer = Tracer::new();
        tracer
            .init_rays([(0, Ray::new([0.5, 0.5, -1.0], [0.0, 0.0, 1.0]))], &setup)
            .unwrap();
        let info = tracer.trace(&field, &setup, &RenderOptions::default()).unwrap();
        assert_eq!(info.rays_hit, 1);
        assert!(info.flags.is_empty(), "{info}");
        let (id, [r, g, b, a]) = tracer.results().next().unwrap();
        assert_eq!(id, 0);
        assert!(a > 0.999, "{a}");
        assert!((r - 0.2).abs() < 1e-3 && (g - 0.4).abs() < 1e-3 && (b - 0.6).abs() < 1e-3);
    }

    #[test]
    fn empty_field_is_transparent() {
        let grid = grid();
        let setup = setup(&grid);
        let field = SphereField::new(point3(0.5, 0.5, 0.5), 0.0, [1.0; 3], 0.0);
        let mut tracer = Tracer::new();
        let rays = (0..10).map(|i| (i, Ray::new([0.05 * i as f32, 0.5, -1.0], [0.0, 0.1, 1.0])));
        tracer.init_rays(rays, &setup).unwrap();
        let info = tracer.trace(&field, &setup, &RenderOptions::default()).unwrap();
        assert_eq!(info.rays_hit, 10);
        assert!(tracer.results().all(|(_, rgba)| rgba == [0.0; 4]));
    }

    #[test]
    fn step_budget_is_reported() {
        let grid = grid();
        let setup = setup(&grid);
        let field = SphereField::new(point3(0.5, 0.5, 0.5), 1.0, [1.0; 3], 0.001);
        let mut tracer = Tracer::new();
        tracer
            .init_rays([(0, Ray::new([0.5, 0.5, -1.0], [0.0, 0.0, 1.0]))], &setup)
            .unwrap();
        let options = RenderOptions {
            max_steps: 10,
            min_alpha: 0.0,
            ..RenderOptions::default()
        };
        let info = tracer.trace(&field, &setup, &options).unwrap();
        assert_eq!(info.samples, 10);
        assert!(info.flags.contains(TraceFlaws::STEP_BUDGET_EXHAUSTED));
    }

    #[test]
    fn render_is_reproducible_and_progressive() {
        let grid = grid();
        let setup = setup(&grid);
        let field = SphereField::new(point3(0.5, 0.5, 0.5), 0.25, [1.0, 0.5, 0.0], 200.0);
        let camera = Camera::new(
            CameraPose::look_at(point3(0.5, 0.5, -1.5), point3(0.5, 0.5, 0.5), vec3(0.0, 1.0, 0.0)),
            size2(12, 10),
            12.0,
        );
        let options = RenderOptions {
            samples_per_pixel: 2,
            background: Rgb::new(0.0, 0.0, 1.0),
            ..RenderOptions::default()
        };
        let render = || {
            let mut buffer = RenderBuffer::new(size2(1, 1));
            let mut tracer = Tracer::new();
            tracer.render(&field, &camera, None, &setup, &options, &mut buffer).unwrap();
            tracer.render(&field, &camera, None, &setup, &options, &mut buffer).unwrap();
            buffer
        };
        let first = render();
        assert_eq!(first.spp(), 4);
        assert_eq!(first.resolution(), size2(12, 10));
        assert_eq!(first.pixels(), render().pixels());

        // Center of the image sees the sphere; the corner sees the background.
        let center = first.pixel(6, 5);
        assert!(center.alpha() > 0.99 && center.to_rgb().red() > 0.95, "{center:?}");
        let corner = first.pixel(0, 0);
        assert_eq!(corner, Rgba::new(0.0, 0.0, 1.0, 0.0));
    }

    /// Rays entering the box through any face at any angle are clipped to a start inside
    /// it, so none is lost before its first sample.
    #[test]
    fn oblique_rays_entering_box_are_traced() {
        let grid = grid();
        let setup = setup(&grid);
        let center = point3(0.5, 0.5, 0.5);
        let field = SphereField::new(center, 0.25, [1.0, 0.5, 0.0], 200.0);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let mut rays = vec![(0, Ray::new([0.5, 0.5, -1.5], [-0.0416, -0.0277, 0.9987]))];
        while rays.len() < 2000 {
            let outward = vec3(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0f32),
            );
            if outward.length() < 0.1 {
                continue;
            }
            let origin = center + outward.normalize() * 2.0;
            let target = center
                + vec3(
                    rng.random_range(-0.1..0.1),
                    rng.random_range(-0.1..0.1),
                    rng.random_range(-0.1..0.1),
                );
            rays.push((rays.len() as u32, Ray { origin, direction: target - origin }));
        }

        let mut tracer = Tracer::new();
        assert_eq!(tracer.init_rays(rays, &setup).unwrap(), 2000);
        let info = tracer.trace(&field, &setup, &RenderOptions::default()).unwrap();
        assert_eq!(info.rays_hit, 2000);
        let faint: Vec<_> = tracer.results().filter(|&(_, rgba)| rgba[3] < 0.99).collect();
        assert_eq!(faint, vec![]);
    }

    #[test]
    fn depth_mode_reports_distance_to_surface() {
        let grid = grid();
        let setup = setup(&grid);
        let field = SphereField::new(point3(0.5, 0.5, 0.5), 0.3, [0.2, 0.4, 0.6], 1000.0);
        let mut tracer = Tracer::new();
        tracer
            .init_rays([(0, Ray::new([0.5, 0.5, -1.0], [0.0, 0.0, 1.0]))], &setup)
            .unwrap();
        let options = RenderOptions {
            mode: RenderMode::Depth,
            depth_scale: 0.5,
            ..RenderOptions::default()
        };
        tracer.trace(&field, &setup, &options).unwrap();
        let (_, [r, g, b, a]) = tracer.results().next().unwrap();
        // The surface is 1.2 away; the first sample inside is less than a step past it.
        assert!(a > 0.999, "{a}");
        assert!((0.599..0.61).contains(&r), "{r}");
        assert_eq!([g, b], [r, r]);
    }

    #[test]
    fn alpha_mode_reports_opacity_without_background() {
        let grid = grid();
        let setup = setup(&grid);
        let field = ConstantField::new([0.3, 0.6, 0.9], 0.5);
        let camera = Camera::new(
            CameraPose::look_at(point3(0.5, 0.5, -1.5), point3(0.5, 0.5, 0.5), vec3(0.0, 1.0, 0.0)),
            size2(12, 10),
            12.0,
        );
        let options = RenderOptions {
            mode: RenderMode::Alpha,
            min_alpha: 0.0,
            background: Rgb::new(0.0, 0.0, 1.0),
            ..RenderOptions::default()
        };
        let mut buffer = RenderBuffer::new(size2(1, 1));
        Tracer::new()
            .render(&field, &camera, None, &setup, &options, &mut buffer)
            .unwrap();

        let center = buffer.pixel(6, 5);
        let a = center.alpha();
        // About one unit of density 0.5.
        assert!((0.3..0.5).contains(&a), "{center:?}");
        // The blue background is not added.
        assert_eq!(center.to_rgb().to_array(), [a; 3]);
    }

    #[test]
    fn envmap_is_seen_where_the_volume_is_empty() {
        let grid = grid();
        let envmap = EnvironmentMap::uniform(size2(8, 4), Rgba::new(1.0, 0.0, 0.0, 0.5)).unwrap();
        let setup = TraceSetup {
            envmap: Some(&envmap),
            ..setup(&grid)
        };
        let field = SphereField::new(point3(0.5, 0.5, 0.5), 0.25, [0.0, 1.0, 0.0], 200.0);
        let camera = Camera::new(
            CameraPose::look_at(point3(0.5, 0.5, -1.5), point3(0.5, 0.5, 0.5), vec3(0.0, 1.0, 0.0)),
            size2(12, 10),
            12.0,
        );
        let options = RenderOptions {
            background: Rgb::new(0.0, 0.0, 1.0),
            ..RenderOptions::default()
        };
        let mut buffer = RenderBuffer::new(size2(1, 1));
        Tracer::new()
            .render(&field, &camera, None, &setup, &options, &mut buffer)
            .unwrap();

        let corner = buffer.pixel(0, 0).to_rgb().to_array();
        for (c, expected) in corner.into_iter().zip([0.5, 0.0, 0.5]) {
            assert!((c - expected).abs() < 1e-5, "{corner:?}");
        }
        let center = buffer.pixel(6, 5);
        assert!(center.to_rgb().green() > 0.99, "{center:?}");
    }
}
