//! Cascaded occupancy grid used to skip empty space while marching.
//!
//! The grid holds, for each of up to [`MAX_CASCADES`] nested cubes of doubling size, a
//! `grid_size³` array of exponentially-averaged density estimates. From those estimates a
//! bitfield pyramid is derived per cascade: level 0 marks occupied cells, and each level above
//! marks 2×2×2 blocks containing any occupied cell, so that marching can skip large empty
//! regions in one step.

use bitvec::vec::BitVec;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::NerfError;
use crate::field::{Activation, RadianceField};
use crate::math::{FreePoint, clamp_nonnegative, max_abs_component};

/// Maximum number of cascades.
pub const MAX_CASCADES: u32 = 8;

/// Number of attempts made to find an occupied cell for each non-uniform sample.
const NONUNIFORM_TRIES: u32 = 16;

/// How to decide, from the averaged densities, which cells are occupied.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum OccupancyThreshold {
    /// Cells whose value exceeds the given optical thickness are occupied.
    Fixed(f32),
    /// Cells whose value exceeds the mean of the finest cascade are occupied.
    GlobalMean,
    /// Cells whose value exceeds the mean of their own cascade are occupied.
    CascadeMean,
    /// Cells whose value exceeds the smaller of the given optical thickness and the mean of
    /// the finest cascade are occupied.
    FixedOrGlobalMean(f32),
}

impl Default for OccupancyThreshold {
    fn default() -> Self {
        Self::FixedOrGlobalMean(0.01)
    }
}

/// Statistics from one call to [`DensityGrid::update()`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct GridUpdateInfo {
    /// Number of density samples taken.
    pub samples: usize,
    /// Number of samples whose density was NaN or negative and was replaced by zero.
    pub clamped: usize,
    /// Number of cells marked occupied after the update.
    pub occupied_cells: usize,
}

/// Cascaded density grid with a per-cascade bitfield pyramid.
#[derive(Clone, Debug)]
pub struct DensityGrid {
    grid_size: u32,
    n_cascades: u32,
    /// Length of the smallest step, used to convert density into optical thickness.
    min_step: f32,
    threshold: OccupancyThreshold,

    /// Averaged optical thickness per cell; cascade-major, then x, y, z.
    values: Vec<f32>,
    /// Number of updates each cell has received.
    update_counts: Vec<u32>,
    /// `pyramids[cascade][level]`; level `l` has `(grid_size >> l)³` bits.
    pyramids: Vec<Vec<BitVec>>,

    global_mean: f32,
    cascade_means: Vec<f32>,
    n_updates: u32,
}

impl DensityGrid {
    /// Creates a grid with every cell marked occupied.
    ///
    /// `grid_size` must be a power of two between 2 and 512; `n_cascades` is clamped to
    /// `1..=MAX_CASCADES`.
    pub fn new(
        grid_size: u32,
        n_cascades: u32,
        min_step: f32,
        threshold: OccupancyThreshold,
    ) -> crate::Result<Self> {
        if !grid_size.is_power_of_two() || !(2..=512).contains(&grid_size) {
            return Err(NerfError::InvalidGridSize(grid_size));
        }
        let n_cascades = n_cascades.clamp(1, MAX_CASCADES);
        let cells = (grid_size as usize).pow(3) * n_cascades as usize;
        let mut values = Vec::new();
        crate::error::resize_buffer(&mut values, cells, 0.0)?;
        let mut update_counts = Vec::new();
        crate::error::resize_buffer(&mut update_counts, cells, 0)?;
        let n_levels = grid_size.trailing_zeros() + 1;
        let pyramids = (0..n_cascades)
            .map(|_| {
                (0..n_levels)
                    .map(|level| BitVec::repeat(true, ((grid_size >> level) as usize).pow(3)))
                    .collect()
            })
            .collect();
        Ok(Self {
            grid_size,
            n_cascades,
            min_step,
            threshold,
            values,
            update_counts,
            pyramids,
            global_mean: 0.0,
            cascade_means: vec![0.0; n_cascades as usize],
            n_updates: 0,
        })
    }

    /// Resets all cells to the never-updated, occupied state.
    pub fn reset(&mut self) {
        self.values.fill(0.0);
        self.update_counts.fill(0);
        for level in self.pyramids.iter_mut().flatten() {
            level.fill(true);
        }
        self.global_mean = 0.0;
        self.cascade_means.fill(0.0);
        self.n_updates = 0;
    }

    /// Cells per axis in each cascade.
    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Number of cascades.
    pub fn n_cascades(&self) -> u32 {
        self.n_cascades
    }

    /// Number of cells in one cascade.
    pub fn cells_per_cascade(&self) -> usize {
        (self.grid_size as usize).pow(3)
    }

    /// Number of pyramid levels per cascade.
    pub fn n_levels(&self) -> u32 {
        self.grid_size.trailing_zeros() + 1
    }

    /// The configured threshold policy.
    pub fn threshold_policy(&self) -> OccupancyThreshold {
        self.threshold
    }

    /// Mean value of the finest cascade, as of the last rebuild.
    pub fn mean_density(&self) -> f32 {
        self.global_mean
    }

    /// Number of times [`Self::update()`] has run.
    pub fn n_updates(&self) -> u32 {
        self.n_updates
    }

    /// Averaged optical thickness of every cell, cascade-major.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// One level of one cascade's bitfield pyramid.
    pub fn mip(&self, cascade: u32, level: u32) -> &BitVec {
        &self.pyramids[cascade as usize][level as usize]
    }

    /// Fraction of finest-level cells, over all cascades, that are occupied.
    pub fn occupancy_ratio(&self) -> f32 {
        let occupied: usize = self.pyramids.iter().map(|p| p[0].count_ones()).sum();
        occupied as f32 / self.values.len() as f32
    }

    // ---------------------------------------------------------------------------------------------
    // Geometry

    /// Chooses the cascade to consult for a sample at `position` with step length `dt`:
    /// the finest cascade containing the position whose cells are not much smaller than
    /// the step.
    #[inline]
    pub fn cascade_for(&self, position: FreePoint, dt: f32) -> u32 {
        let from_position = {
            let extent = max_abs_component(position - FreePoint::splat(0.5));
            if extent <= 0.0 {
                0
            } else {
                // extent in [2^(e-1), 2^e) belongs to cascade e + 1
                libm::frexpf(extent).1 + 1
            }
        };
        let from_dt = libm::frexpf(dt * self.grid_size as f32).1;
        let cascade = from_position.max(from_dt).clamp(0, MAX_CASCADES as i32 - 1) as u32;
        cascade.min(self.n_cascades - 1)
    }

    /// Edge length of a cell of `cascade` at pyramid `level`, in scene units.
    #[inline]
    pub fn cell_size(&self, cascade: u32, level: u32) -> f32 {
        libm::ldexpf(1.0, cascade as i32 + level as i32) / self.grid_size as f32
    }

    /// Position of the most negative corner of `cascade`.
    #[inline]
    pub(crate) fn cascade_origin(cascade: u32) -> f32 {
        0.5 - libm::ldexpf(1.0, cascade as i32 - 1)
    }

    /// Returns the level-0 cell containing `position` in `cascade`, or [`None`] if the position
    /// is outside that cascade.
    #[inline]
    pub fn cell_of(&self, position: FreePoint, cascade: u32) -> Option<[u32; 3]> {
        let origin = Self::cascade_origin(cascade);
        let inverse_size = self.cell_size(cascade, 0).recip();
        let g = self.grid_size as f32;
        let mut cell = [0; 3];
        for (c, p) in cell.iter_mut().zip(position.to_array()) {
            let scaled = (p - origin) * inverse_size;
            if !(0.0..=g).contains(&scaled) {
                return None;
            }
            *c = (scaled as u32).min(self.grid_size - 1);
        }
        Some(cell)
    }

    #[inline]
    fn linear_index(resolution: u32, [x, y, z]: [u32; 3]) -> usize {
        let r = resolution as usize;
        (x as usize * r + y as usize) * r + z as usize
    }

    /// Whether the cell containing `position` in `cascade` is occupied.
    /// Positions outside the cascade are unoccupied.
    #[inline]
    pub fn is_occupied(&self, position: FreePoint, cascade: u32) -> bool {
        self.cell_of(position, cascade).is_some_and(|cell| {
            self.pyramids[cascade as usize][0][Self::linear_index(self.grid_size, cell)]
        })
    }

    /// If the cell containing `position` is empty, returns the coarsest pyramid level at
    /// which the enclosing block is still entirely empty. Returns [`None`] if the cell is
    /// occupied.
    ///
    /// Positions outside the cascade report level 0.
    #[inline]
    pub fn empty_level(&self, position: FreePoint, cascade: u32) -> Option<u32> {
        let Some(cell) = self.cell_of(position, cascade) else {
            return Some(0);
        };
        let pyramid = &self.pyramids[cascade as usize];
        if pyramid[0][Self::linear_index(self.grid_size, cell)] {
            return None;
        }
        let mut level = 0;
        while level + 1 < self.n_levels() {
            let next = level + 1;
            let block = cell.map(|c| c >> next);
            if pyramid[next as usize][Self::linear_index(self.grid_size >> next, block)] {
                break;
            }
            level = next;
        }
        Some(level)
    }

    /// Center of a level-0 cell, in scene coordinates.
    fn cell_position(&self, cascade: u32, cell: [u32; 3], offset: [f32; 3]) -> FreePoint {
        let origin = Self::cascade_origin(cascade);
        let size = self.cell_size(cascade, 0);
        let [x, y, z] = cell;
        FreePoint::new(
            origin + (x as f32 + offset[0]) * size,
            origin + (y as f32 + offset[1]) * size,
            origin + (z as f32 + offset[2]) * size,
        )
    }

    fn cell_from_index(&self, index: usize) -> (u32, [u32; 3]) {
        let per = self.cells_per_cascade();
        let cascade = (index / per) as u32;
        let mut rest = index % per;
        let g = self.grid_size as usize;
        let z = rest % g;
        rest /= g;
        let y = rest % g;
        let x = rest / g;
        (cascade, [x as u32, y as u32, z as u32])
    }

    // ---------------------------------------------------------------------------------------------
    // Updating

    /// The value above which a cell of `cascade` counts as occupied.
    fn threshold_value(&self, cascade: u32) -> f32 {
        match self.threshold {
            OccupancyThreshold::Fixed(t) => t,
            OccupancyThreshold::GlobalMean => self.global_mean,
            OccupancyThreshold::CascadeMean => self.cascade_means[cascade as usize],
            OccupancyThreshold::FixedOrGlobalMean(t) => t.min(self.global_mean),
        }
    }

    /// Samples the field's density throughout the grid and blends the results into the
    /// averaged values, then rebuilds the bitfield.
    ///
    /// * `n_uniform` samples go to uniformly random cells over all cascades.
    /// * `n_nonuniform` samples go preferentially to cells already above the occupancy
    ///   threshold, which refines the estimate where the field is changing.
    ///
    /// Each cell takes the largest of its new samples `s`; a cell that has never been
    /// updated stores `s`, otherwise its value becomes `decay * old + (1 - decay) * s`.
    pub fn update<F, R>(
        &mut self,
        field: &F,
        density_activation: Activation,
        decay: f32,
        n_uniform: usize,
        n_nonuniform: usize,
        rng: &mut R,
    ) -> crate::Result<GridUpdateInfo>
    where
        F: RadianceField + ?Sized,
        R: Rng,
    {
        let total_cells = self.values.len();
        let n_samples = n_uniform + n_nonuniform;
        let mut sample_cells: Vec<usize> = Vec::new();
        crate::error::resize_buffer(&mut sample_cells, n_samples, 0)?;
        let mut positions: Vec<FreePoint> = Vec::new();
        crate::error::resize_buffer(&mut positions, n_samples, FreePoint::origin())?;

        for (i, (cell_slot, position)) in sample_cells.iter_mut().zip(&mut positions).enumerate() {
            let mut index = rng.random_range(0..total_cells);
            if i >= n_uniform {
                let mut tries = 1;
                while tries < NONUNIFORM_TRIES
                    && self.values[index] <= self.threshold_value(self.cell_from_index(index).0)
                {
                    index = rng.random_range(0..total_cells);
                    tries += 1;
                }
            }
            let (cascade, cell) = self.cell_from_index(index);
            *cell_slot = index;
            *position = self.cell_position(cascade, cell, rng.random());
        }

        let mut densities = Vec::new();
        crate::error::resize_buffer(&mut densities, n_samples, 0.0)?;
        field.density(&positions, &mut densities);

        // Reduce samples per cell by maximum; negative marks "no sample".
        let mut new_values = Vec::new();
        crate::error::resize_buffer(&mut new_values, total_cells, -1.0f32)?;
        let mut clamped = 0;
        for (&index, &raw) in sample_cells.iter().zip(&densities) {
            let (density, was_clamped) = clamp_nonnegative(density_activation.apply(raw));
            clamped += usize::from(was_clamped);
            let cascade = self.cell_from_index(index).0;
            let thickness = density * self.min_step * libm::ldexpf(1.0, cascade as i32);
            let slot = &mut new_values[index];
            *slot = slot.max(thickness);
        }
        if clamped > 0 {
            log::debug!("density grid update clamped {clamped} invalid densities");
        }

        for ((value, count), &sample) in self
            .values
            .iter_mut()
            .zip(&mut self.update_counts)
            .zip(&new_values)
        {
            if sample < 0.0 {
                continue;
            }
            *value = if *count == 0 {
                sample
            } else {
                decay * *value + (1.0 - decay) * sample
            };
            *count = count.saturating_add(1);
        }
        self.n_updates += 1;

        let occupied_cells = self.rebuild_bitfield_and_mean();
        Ok(GridUpdateInfo {
            samples: n_samples,
            clamped,
            occupied_cells,
        })
    }

    /// Recomputes the means and derives the bitfield pyramid from the current values.
    ///
    /// Cells that have never been updated are marked occupied. Returns the number of
    /// occupied level-0 cells.
    pub fn rebuild_bitfield_and_mean(&mut self) -> usize {
        let per = self.cells_per_cascade();
        for (mean, chunk) in self.cascade_means.iter_mut().zip(self.values.chunks(per)) {
            *mean = chunk.iter().sum::<f32>() / per as f32;
        }
        self.global_mean = self.cascade_means[0];

        let mut occupied = 0;
        for cascade in 0..self.n_cascades {
            let threshold = self.threshold_value(cascade);
            let start = cascade as usize * per;
            let values = &self.values[start..start + per];
            let counts = &self.update_counts[start..start + per];
            let pyramid = &mut self.pyramids[cascade as usize];
            for (i, (&value, &count)) in values.iter().zip(counts).enumerate() {
                let is_occupied = count == 0 || value > threshold;
                pyramid[0].set(i, is_occupied);
                occupied += usize::from(is_occupied);
            }
            for level in 1..pyramid.len() {
                let (finer, coarser) = pyramid.split_at_mut(level);
                reduce_level(&finer[level - 1], &mut coarser[0], self.grid_size >> level);
            }
        }
        log::trace!(
            "density grid rebuilt: {occupied} occupied cells, mean {}",
            self.global_mean
        );
        occupied
    }
}

/// Sets each bit of `coarse` (`resolution³` bits) to the OR of the corresponding 2×2×2 block
/// of `fine`.
fn reduce_level(fine: &BitVec, coarse: &mut BitVec, resolution: u32) {
    let fine_resolution = resolution * 2;
    for x in 0..resolution {
        for y in 0..resolution {
            for z in 0..resolution {
                let mut any = false;
                for (dx, dy, dz) in itertools::iproduct!(0..2, 0..2, 0..2) {
                    let child = [x * 2 + dx, y * 2 + dy, z * 2 + dz];
                    any |= fine[DensityGrid::linear_index(fine_resolution, child)];
                }
                coarse.set(DensityGrid::linear_index(resolution, [x, y, z]), any);
            }
        }
    }
}

/// Number of cascades needed to cover a scene of the given size: the smallest `c` such that
/// cascade `c - 1`, of edge length `2^(c-1)`, is at least `aabb_scale` across.
pub fn cascades_for_aabb_scale(aabb_scale: u32) -> u32 {
    let mut cascades = 1;
    while (1u32 << (cascades - 1)) < aabb_scale && cascades < MAX_CASCADES {
        cascades += 1;
    }
    cascades
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ConstantField, SphereField};
    use euclid::point3;
    use nerf_march_base::util::MultiFailure;
    use rand::SeedableRng as _;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn grid(grid_size: u32, n_cascades: u32) -> DensityGrid {
        DensityGrid::new(grid_size, n_cascades, 3f32.sqrt() / 128.0, OccupancyThreshold::default())
            .unwrap()
    }

    #[test]
    fn rejects_bad_grid_size() {
        assert!(matches!(
            DensityGrid::new(24, 1, 0.01, OccupancyThreshold::default()),
            Err(NerfError::InvalidGridSize(24))
        ));
    }

    #[test]
    fn cascades_for_scale() {
        assert_eq!(cascades_for_aabb_scale(1), 1);
        assert_eq!(cascades_for_aabb_scale(2), 2);
        assert_eq!(cascades_for_aabb_scale(3), 3);
        assert_eq!(cascades_for_aabb_scale(16), 5);
        assert_eq!(cascades_for_aabb_scale(1 << 20), MAX_CASCADES);
    }

    #[test]
    fn new_grid_is_all_occupied() {
        let grid = grid(16, 2);
        assert_eq!(grid.occupancy_ratio(), 1.0);
        assert_eq!(grid.empty_level(point3(0.5, 0.5, 0.5), 0), None);
    }

    #[test]
    fn cascade_selection() {
        let grid = grid(16, 4);
        let tiny = 1e-4;
        assert_eq!(grid.cascade_for(point3(0.5, 0.5, 0.5), tiny), 0);
        assert_eq!(grid.cascade_for(point3(0.9, 0.1, 0.5), tiny), 0);
        assert_eq!(grid.cascade_for(point3(1.2, 0.5, 0.5), tiny), 1);
        assert_eq!(grid.cascade_for(point3(-1.0, 0.5, 0.5), tiny), 2);
        // Beyond the last cascade, clamp.
        assert_eq!(grid.cascade_for(point3(100.0, 0.5, 0.5), tiny), 3);
        // Large steps promote to coarser cascades: 0.1 * 16 = 1.6 = 0.8 * 2^1
        assert_eq!(grid.cascade_for(point3(0.5, 0.5, 0.5), 0.1), 1);
    }

    #[test]
    fn cell_of_positions() {
        let grid = grid(16, 2);
        assert_eq!(grid.cell_of(point3(0.0, 0.0, 0.0), 0), Some([0, 0, 0]));
        assert_eq!(grid.cell_of(point3(1.0, 1.0, 1.0), 0), Some([15, 15, 15]));
        assert_eq!(grid.cell_of(point3(0.53, 0.0, 0.99), 0), Some([8, 0, 15]));
        assert_eq!(grid.cell_of(point3(1.2, 0.5, 0.5), 0), None);
        // Cascade 1 spans [-0.5, 1.5].
        assert_eq!(grid.cell_of(point3(-0.5, 1.5, 0.5), 1), Some([0, 15, 8]));
    }

    #[test]
    fn first_update_stores_sample_then_blends() {
        let mut grid = grid(8, 1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let cells = grid.cells_per_cascade();
        let field = ConstantField::new([0.0; 3], 2.0f32.ln());
        // Enough uniform samples that every cell is hit with overwhelming probability.
        grid.update(&field, Activation::Exponential, 0.5, cells * 20, 0, &mut rng)
            .unwrap();
        let expected = 2.0 * 3f32.sqrt() / 128.0;
        for &v in grid.values() {
            assert!((v - expected).abs() < 1e-6, "{v} vs {expected}");
        }

        let field = ConstantField::new([0.0; 3], 4.0f32.ln());
        grid.update(&field, Activation::Exponential, 0.5, cells * 20, 0, &mut rng)
            .unwrap();
        let blended = 0.5 * expected + 0.5 * 2.0 * expected;
        for &v in grid.values() {
            assert!((v - blended).abs() < 1e-6, "{v} vs {blended}");
        }
        assert_eq!(grid.n_updates(), 2);
    }

    #[test]
    fn nan_density_is_clamped() {
        let mut grid = grid(8, 1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let info = grid
            .update(
                &ConstantField::new([0.0; 3], f32::NAN),
                Activation::None,
                0.9,
                100,
                0,
                &mut rng,
            )
            .unwrap();
        assert_eq!(info.clamped, 100);
        assert!(grid.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn sphere_is_occupied_and_outside_is_not() {
        let mut grid = DensityGrid::new(16, 1, 3f32.sqrt() / 128.0, OccupancyThreshold::Fixed(0.01))
            .unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let field = SphereField::new(point3(0.5, 0.5, 0.5), 0.25, [1.0, 0.0, 0.0], 50.0);
        let cells = grid.cells_per_cascade();
        grid.update(&field, Activation::None, 0.95, cells * 20, 0, &mut rng)
            .unwrap();
        assert!(grid.is_occupied(point3(0.5, 0.5, 0.5), 0));
        assert!(!grid.is_occupied(point3(0.05, 0.05, 0.05), 0));
        // Corner region is empty at a coarse level too.
        assert!(grid.empty_level(point3(0.01, 0.01, 0.01), 0).unwrap() >= 1);
    }

    #[test]
    fn pyramid_levels_are_or_reductions() {
        let mut grid = DensityGrid::new(16, 3, 3f32.sqrt() / 128.0, OccupancyThreshold::CascadeMean)
            .unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let field = crate::testing::NoiseField::new(17);
        for _ in 0..5 {
            let cells = grid.cells_per_cascade() * 3;
            grid.update(&field, Activation::Exponential, 0.8, cells / 2, cells / 4, &mut rng)
                .unwrap();
        }

        let mut failures = MultiFailure::new();
        for cascade in 0..grid.n_cascades() {
            for level in 0..grid.n_levels() - 1 {
                let fine = grid.mip(cascade, level).clone();
                let coarse = grid.mip(cascade, level + 1).clone();
                let resolution = grid.grid_size() >> (level + 1);
                failures.catch(format!("cascade {cascade} level {level}"), move || {
                    let mut expected = BitVec::repeat(false, coarse.len());
                    reduce_level(&fine, &mut expected, resolution);
                    assert_eq!(coarse, expected);
                });
            }
        }
    }
}
