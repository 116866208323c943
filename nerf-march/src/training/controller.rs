use crate::math::next_multiple;

/// Ray counts chosen by [`BatchSizeController`] are multiples of this.
pub const BATCH_SIZE_GRANULARITY: u32 = 256;

/// Upper bound on rays per batch.
pub const MAX_RAYS_PER_BATCH: u32 = 1 << 18;

/// Adapts the number of rays per training batch so that the number of samples after
/// compaction approaches a target.
///
/// Each update assumes that the number of samples is proportional to the number of rays,
/// and scales the ray count accordingly.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchSizeController {
    rays_per_batch: u32,
    last_measured: u32,
}

impl BatchSizeController {
    /// Creates a controller starting at `initial_rays` rays, rounded up to the granularity.
    pub fn new(initial_rays: u32) -> Self {
        Self {
            rays_per_batch: Self::constrain(initial_rays),
            last_measured: 0,
        }
    }

    /// The number of rays to use for the next batch.
    pub fn rays_per_batch(&self) -> u32 {
        self.rays_per_batch
    }

    /// Samples measured at the most recent update.
    pub fn last_measured(&self) -> u32 {
        self.last_measured
    }

    /// Adjusts the ray count given the number of compacted samples the current ray count
    /// produced. A measurement of zero leaves the ray count unchanged.
    ///
    /// Returns the new ray count.
    pub fn update(&mut self, target_samples: u32, measured_samples: u32) -> u32 {
        self.last_measured = measured_samples;
        if measured_samples == 0 {
            return self.rays_per_batch;
        }
        let scaled = u64::from(self.rays_per_batch) * u64::from(target_samples)
            / u64::from(measured_samples);
        let previous = self.rays_per_batch;
        self.rays_per_batch = Self::constrain(scaled.min(u64::from(MAX_RAYS_PER_BATCH)) as u32);
        if self.rays_per_batch != previous {
            log::debug!(
                "rays per batch {previous} -> {} ({measured_samples} samples for target {target_samples})",
                self.rays_per_batch
            );
        }
        self.rays_per_batch
    }

    fn constrain(rays: u32) -> u32 {
        next_multiple(rays, BATCH_SIZE_GRANULARITY).clamp(BATCH_SIZE_GRANULARITY, MAX_RAYS_PER_BATCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_with_constant_yield() {
        let target = 1 << 18;
        let samples_per_ray = 37.3f32;
        let mut controller = BatchSizeController::new(1024);
        for _ in 0..5 {
            let measured = (controller.rays_per_batch() as f32 * samples_per_ray) as u32;
            controller.update(target, measured);
        }
        let produced = controller.rays_per_batch() as f32 * samples_per_ray;
        assert!(
            produced >= target as f32 * 0.99
                && produced <= target as f32 + BATCH_SIZE_GRANULARITY as f32 * samples_per_ray,
            "{produced}"
        );
        assert_eq!(controller.rays_per_batch() % BATCH_SIZE_GRANULARITY, 0);
    }

    #[test]
    fn zero_measurement_keeps_count() {
        let mut controller = BatchSizeController::new(4096);
        assert_eq!(controller.update(1 << 18, 0), 4096);
    }

    #[test]
    fn bounded() {
        let mut controller = BatchSizeController::new(300);
        assert_eq!(controller.rays_per_batch(), 512);
        assert_eq!(controller.update(1 << 20, 1), MAX_RAYS_PER_BATCH);
        assert_eq!(controller.update(1, 1 << 20), BATCH_SIZE_GRANULARITY);
    }
}
