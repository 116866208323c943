use core::sync::atomic::{AtomicUsize, Ordering};

use crate::math::{FreePoint, FreeVector};
use crate::par;
use crate::raycast::Ray;

/// Mutable marching state of one ray.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RayState {
    /// Distance marched along the ray.
    pub t: f32,
    /// Number of samples taken so far.
    pub steps: u32,
    /// Accumulated color (premultiplied by opacity) and opacity.
    pub rgba: [f32; 4],
    /// Whether the ray needs further marching.
    pub alive: bool,
}

impl RayState {
    /// State of a ray about to start marching at `t`.
    pub fn start(t: f32) -> Self {
        Self {
            t,
            steps: 0,
            rgba: [0.0; 4],
            alive: true,
        }
    }

    /// State of a ray that will produce no samples.
    pub fn dead() -> Self {
        Self::default()
    }
}

/// A set of rays stored as parallel arrays.
#[derive(Clone, Debug, Default)]
pub struct RaySoa {
    origins: Vec<FreePoint>,
    directions: Vec<FreeVector>,
    ids: Vec<u32>,
    states: Vec<RayState>,
}

impl RaySoa {
    /// Number of rays.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether there are no rays.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Removes all rays, keeping capacity.
    pub fn clear(&mut self) {
        self.origins.clear();
        self.directions.clear();
        self.ids.clear();
        self.states.clear();
    }

    /// Appends a ray.
    pub fn push(&mut self, ray: Ray, id: u32, state: RayState) {
        self.origins.push(ray.origin);
        self.directions.push(ray.direction);
        self.ids.push(id);
        self.states.push(state);
    }

    /// Reserves space for `additional` more rays, reporting failure.
    pub(crate) fn try_reserve(&mut self, additional: usize) -> crate::Result<()> {
        let requested = self.ids.len() + additional;
        let map = |source| crate::NerfError::OutOfMemory { requested, source };
        self.origins.try_reserve(additional).map_err(map)?;
        self.directions.try_reserve(additional).map_err(map)?;
        self.ids.try_reserve(additional).map_err(map)?;
        self.states.try_reserve(additional).map_err(map)?;
        Ok(())
    }

    /// The `i`th ray's geometry.
    #[inline]
    pub fn ray(&self, i: usize) -> Ray {
        Ray {
            origin: self.origins[i],
            direction: self.directions[i],
        }
    }

    /// Identifiers of the rays.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Marching states of the rays.
    pub fn states(&self) -> &[RayState] {
        &self.states
    }

    /// Borrows the geometry immutably and the states mutably, for kernels.
    pub(crate) fn split_mut(&mut self) -> (&[FreePoint], &[FreeVector], &mut [RayState]) {
        (&self.origins, &self.directions, &mut self.states)
    }

    fn resize(&mut self, len: usize) {
        self.origins.resize(len, FreePoint::origin());
        self.directions.resize(len, FreeVector::zero());
        self.ids.resize(len, 0);
        self.states.resize(len, RayState::default());
    }

    fn copy_ray(&mut self, to: usize, from: &RaySoa, index: usize) {
        self.origins[to] = from.origins[index];
        self.directions[to] = from.directions[index];
        self.ids[to] = from.ids[index];
        self.states[to] = from.states[index];
    }
}

/// Which output set a ray is moved to by compaction, and where.
#[derive(Clone, Copy, Debug)]
enum Destination {
    Alive(usize),
    Hit(usize),
}

/// Storage for the rays of one trace: two generations of live rays, alternating as
/// compaction copies survivors from one to the other, and the set of finished rays.
#[derive(Clone, Debug, Default)]
pub struct RayArena {
    generations: [RaySoa; 2],
    hit: RaySoa,
    current: usize,
}

impl RayArena {
    /// Removes all rays.
    pub fn clear(&mut self) {
        for generation in &mut self.generations {
            generation.clear();
        }
        self.hit.clear();
        self.current = 0;
    }

    /// The generation currently being marched.
    pub fn current(&self) -> &RaySoa {
        &self.generations[self.current]
    }

    /// The generation currently being marched.
    pub fn current_mut(&mut self) -> &mut RaySoa {
        &mut self.generations[self.current]
    }

    /// Rays that have finished.
    pub fn hit(&self) -> &RaySoa {
        &self.hit
    }

    /// Index of the current generation; changes on every compaction.
    pub fn generation(&self) -> usize {
        self.current
    }

    /// Moves the current generation's alive rays into the other generation, which becomes
    /// current, and appends the dead ones to the hit set.
    ///
    /// Returns the number of rays moved to each. Their sum is the size of the previous
    /// generation. The order of rays within the outputs is unspecified.
    pub fn compact(&mut self) -> (usize, usize) {
        let previous_hits = self.hit.len();
        let source_index = self.current;
        let source = &self.generations[source_index];
        let n = source.len();

        let alive_counter = AtomicUsize::new(0);
        let hit_counter = AtomicUsize::new(previous_hits);
        let destinations = par::map_collect(n, |i| {
            if source.states[i].alive {
                Destination::Alive(alive_counter.fetch_add(1, Ordering::Relaxed))
            } else {
                Destination::Hit(hit_counter.fetch_add(1, Ordering::Relaxed))
            }
        });
        let n_alive = alive_counter.into_inner();
        let n_hit = hit_counter.into_inner() - previous_hits;

        let [first, second] = &mut self.generations;
        let (source, target) = if source_index == 0 {
            (&*first, second)
        } else {
            (&*second, first)
        };
        target.clear();
        target.resize(n_alive);
        self.hit.resize(previous_hits + n_hit);
        for (i, destination) in destinations.into_iter().enumerate() {
            match destination {
                Destination::Alive(to) => target.copy_ray(to, source, i),
                Destination::Hit(to) => self.hit.copy_ray(to, source, i),
            }
        }
        self.current = 1 - source_index;
        self.generations[source_index].clear();
        (n_alive, n_hit)
    }

    /// Moves every remaining ray to the hit set, marking it dead.
    pub fn retire_all(&mut self) {
        let current = &mut self.generations[self.current];
        for state in &mut current.states {
            state.alive = false;
        }
        self.compact();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng as _, SeedableRng as _};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn arena_with(alive: &[bool]) -> RayArena {
        let mut arena = RayArena::default();
        for (i, &alive) in alive.iter().enumerate() {
            let state = if alive {
                RayState::start(i as f32)
            } else {
                RayState::dead()
            };
            arena
                .current_mut()
                .push(Ray::new([i as f32, 0.0, 0.0], [1.0, 0.0, 0.0]), i as u32, state);
        }
        arena
    }

    #[test]
    fn compaction_partitions_rays() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        let flags: Vec<bool> = (0..1000).map(|_| rng.random_bool(0.3)).collect();
        let mut arena = arena_with(&flags);
        let generation = arena.generation();

        let (alive, hit) = arena.compact();
        assert_eq!(alive + hit, flags.len());
        assert_eq!(alive, flags.iter().filter(|&&a| a).count());
        assert_ne!(arena.generation(), generation);

        let mut alive_ids: Vec<u32> = arena.current().ids().to_vec();
        alive_ids.sort_unstable();
        let expected: Vec<u32> = (0..1000).filter(|&i| flags[i as usize]).collect();
        assert_eq!(alive_ids, expected);

        // Geometry and state travel with the id.
        for i in 0..arena.current().len() {
            let id = arena.current().ids()[i];
            assert_eq!(arena.current().ray(i).origin.x, id as f32);
            assert_eq!(arena.current().states()[i].t, id as f32);
        }

        let mut hit_ids: Vec<u32> = arena.hit().ids().to_vec();
        hit_ids.sort_unstable();
        hit_ids.dedup();
        assert_eq!(hit_ids.len(), hit);
    }

    #[test]
    fn repeated_compaction_accumulates_hits() {
        let mut arena = arena_with(&[true, false, true, true]);
        assert_eq!(arena.compact(), (3, 1));
        arena.current_mut().split_mut().2[0].alive = false;
        assert_eq!(arena.compact(), (2, 1));
        assert_eq!(arena.hit().len(), 2);
        arena.retire_all();
        assert_eq!(arena.hit().len(), 4);
        assert!(arena.current().is_empty());
    }
}
