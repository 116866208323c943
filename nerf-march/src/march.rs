//! Step-size policy and the per-ray marching primitives shared by rendering and training.
//!
//! A ray is marched in steps whose length grows with distance (cone tracing) between a
//! minimum set by the desired sampling density and a maximum set by the coarsest cascade's
//! cell size. Positions where the occupancy grid is empty produce no samples; the ray is
//! advanced past the whole empty block in whole steps instead.

use crate::density_grid::{DensityGrid, MAX_CASCADES};
use crate::math::{Aab, FreePoint};
use crate::raycast::Ray;

/// Step length policy for marching.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepPolicy {
    min_step: f32,
    max_step: f32,
    cone_angle: f32,
}

impl StepPolicy {
    /// Constructs the policy for a grid of `grid_size` cells per axis, sampled at
    /// `steps_per_unit` steps along the unit cube's diagonal, with steps growing by
    /// `cone_angle` per unit of distance.
    pub fn new(steps_per_unit: u32, grid_size: u32, cone_angle: f32) -> Self {
        let min_step = 3f32.sqrt() / steps_per_unit as f32;
        let max_step = min_step * (1u32 << (MAX_CASCADES - 1)) as f32 * steps_per_unit as f32
            / grid_size as f32;
        Self {
            min_step,
            max_step,
            cone_angle,
        }
    }

    /// Shortest step.
    pub fn min_step(&self) -> f32 {
        self.min_step
    }

    /// Longest step.
    pub fn max_step(&self) -> f32 {
        self.max_step
    }

    /// Growth of the step length per unit distance.
    pub fn cone_angle(&self) -> f32 {
        self.cone_angle
    }

    /// Step length at distance `t` along the ray.
    #[inline]
    pub fn dt(&self, t: f32) -> f32 {
        (t * self.cone_angle).clamp(self.min_step, self.max_step)
    }
}

/// One sample produced by marching.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarchSample {
    /// Position of the sample.
    pub position: FreePoint,
    /// Length of the segment the sample stands for.
    pub dt: f32,
}

/// Advances `t` past the pyramid block of `level` in `cascade` containing the point at `t`,
/// in whole steps of [`StepPolicy::dt()`]. Always advances by at least one step.
pub fn advance_past_block(
    grid: &DensityGrid,
    policy: &StepPolicy,
    ray: &Ray,
    t: f32,
    cascade: u32,
    level: u32,
) -> f32 {
    let size = grid.cell_size(cascade, level);
    let origin = DensityGrid::cascade_origin(cascade);
    let position = ray.at(t);

    let mut distance = f32::INFINITY;
    for (p, d) in position.to_array().into_iter().zip(ray.direction.to_array()) {
        if d == 0.0 {
            continue;
        }
        let p = (p - origin) / size;
        let to_boundary = (p + 0.5 + 0.5 * d.signum()).floor() - p;
        distance = distance.min(to_boundary * size / d);
    }
    let target = t + distance.max(0.0);

    let mut t = t;
    loop {
        t += policy.dt(t);
        if t >= target {
            return t;
        }
    }
}

/// Relative distance that a ray's starting point is moved into the box past its entry.
const ENTRY_NUDGE: f32 = 1e-4;

/// Distance along `ray` at which marching through `aabb` starts: just past the point where
/// the ray enters the box, or the origin if it is already inside.
///
/// The point at the exact entry distance may round to outside the box, which would end the
/// ray before its first sample, so the start is moved inward by a small margin that scales
/// with the distance. Returns [`None`] if the ray misses the box.
#[inline]
pub fn entry_distance(aabb: &Aab, ray: &Ray) -> Option<f32> {
    let (t_near, t_far) = aabb.intersect_ray(ray)?;
    let t_near = t_near.max(0.0);
    let nudged = t_near + ENTRY_NUDGE * (1.0 + t_near);
    // A ray that only grazes an edge starts halfway through its short chord.
    Some(nudged.min(t_near + (t_far - t_near) * 0.5))
}

/// Advances `t` until the point on the ray is in an occupied cell.
///
/// Returns false, leaving `t` past the exit, if the ray leaves `aabb` first.
#[inline]
pub fn skip_empty(grid: &DensityGrid, policy: &StepPolicy, aabb: &Aab, ray: &Ray, t: &mut f32) -> bool {
    loop {
        let position = ray.at(*t);
        if !aabb.contains(position) {
            return false;
        }
        let dt = policy.dt(*t);
        let cascade = grid.cascade_for(position, dt);
        match grid.empty_level(position, cascade) {
            None => return true,
            Some(level) => *t = advance_past_block(grid, policy, ray, *t, cascade, level),
        }
    }
}

/// Produces the next sample along the ray at or after `t`, advancing `t` past it.
///
/// Returns [`None`] once the ray leaves `aabb`.
#[inline]
pub fn next_sample(
    grid: &DensityGrid,
    policy: &StepPolicy,
    aabb: &Aab,
    ray: &Ray,
    t: &mut f32,
) -> Option<MarchSample> {
    if !skip_empty(grid, policy, aabb, ray, t) {
        return None;
    }
    let position = ray.at(*t);
    let dt = policy.dt(*t);
    *t += dt;
    Some(MarchSample { position, dt })
}
