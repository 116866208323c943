use core::fmt;

use euclid::{Point3D, Vector3D};

use crate::math::{FreeCoordinate, FreePoint};
use crate::raycast::Ray;

/// Axis-Aligned Box data type.
///
/// The scene's training and rendering regions are both described by this type.
#[derive(Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Aab {
    lower_bounds: FreePoint,
    upper_bounds: FreePoint,
}

impl Aab {
    /// The unit cube `[0, 1]³`.
    pub const UNIT_CUBE: Aab = Aab {
        lower_bounds: Point3D::new(0., 0., 0.),
        upper_bounds: Point3D::new(1., 1., 1.),
    };

    /// Constructs an [`Aab`] from individual coordinates.
    #[inline]
    #[track_caller]
    pub fn new(
        lx: FreeCoordinate,
        hx: FreeCoordinate,
        ly: FreeCoordinate,
        hy: FreeCoordinate,
        lz: FreeCoordinate,
        hz: FreeCoordinate,
    ) -> Self {
        Self::from_lower_upper(Point3D::new(lx, ly, lz), Point3D::new(hx, hy, hz))
    }

    /// Constructs an [`Aab`] from most-negative and most-positive corner points.
    ///
    /// Panics if the points are not in the proper order or if they are NaN.
    #[inline]
    #[track_caller]
    pub fn from_lower_upper(
        lower_bounds: impl Into<FreePoint>,
        upper_bounds: impl Into<FreePoint>,
    ) -> Self {
        let lower_bounds = lower_bounds.into();
        let upper_bounds = upper_bounds.into();
        match Self::checked_from_lower_upper(lower_bounds, upper_bounds) {
            Some(aab) => aab,
            None => panic!(
                "invalid AAB points that are misordered or NaN: \
                lower {lower_bounds:?} upper {upper_bounds:?}"
            ),
        }
    }

    /// Constructs an [`Aab`] from most-negative and most-positive corner points.
    ///
    /// Returns [`None`] if the points are not in the proper order or if they are NaN.
    #[inline]
    pub fn checked_from_lower_upper(lower_bounds: FreePoint, upper_bounds: FreePoint) -> Option<Self> {
        if lower_bounds.x <= upper_bounds.x
            && lower_bounds.y <= upper_bounds.y
            && lower_bounds.z <= upper_bounds.z
        {
            Some(Self {
                lower_bounds,
                upper_bounds,
            })
        } else {
            None
        }
    }

    /// The cube of edge length `size` centered on `(0.5, 0.5, 0.5)`.
    ///
    /// This is the shape of the scene bounds for a dataset with the given `aabb_scale`.
    #[inline]
    #[must_use]
    pub fn centered_cube(size: FreeCoordinate) -> Self {
        let half = size.abs() * 0.5;
        Self::new(
            0.5 - half,
            0.5 + half,
            0.5 - half,
            0.5 + half,
            0.5 - half,
            0.5 + half,
        )
    }

    /// The most negative corner of the box, as a [`Point3D`].
    #[inline]
    pub const fn lower_bounds_p(&self) -> FreePoint {
        self.lower_bounds
    }

    /// The most positive corner of the box, as a [`Point3D`].
    #[inline]
    pub const fn upper_bounds_p(&self) -> FreePoint {
        self.upper_bounds
    }

    /// Size of the box in each axis; equivalent to
    /// `self.upper_bounds_p() - self.lower_bounds_p()`.
    #[inline]
    pub fn size(&self) -> Vector3D<FreeCoordinate, crate::math::Scene> {
        self.upper_bounds - self.lower_bounds
    }

    /// The center of the enclosed volume.
    #[inline]
    pub fn center(&self) -> FreePoint {
        self.lower_bounds.lerp(self.upper_bounds, 0.5)
    }

    /// Returns whether this AAB, including the boundary, contains the point.
    #[inline]
    pub fn contains(&self, point: FreePoint) -> bool {
        (self.lower_bounds.x..=self.upper_bounds.x).contains(&point.x)
            && (self.lower_bounds.y..=self.upper_bounds.y).contains(&point.y)
            && (self.lower_bounds.z..=self.upper_bounds.z).contains(&point.z)
    }

    /// Returns a random point within this box, using inclusive ranges
    /// (`lower_bounds[axis] ≤ random_point()[axis] ≤ upper_bounds[axis]`).
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn random_point(self, rng: &mut impl rand::Rng) -> FreePoint {
        Point3D::new(
            rng.random_range(self.lower_bounds.x..=self.upper_bounds.x),
            rng.random_range(self.lower_bounds.y..=self.upper_bounds.y),
            rng.random_range(self.lower_bounds.z..=self.upper_bounds.z),
        )
    }

    /// Enlarges the AAB by moving each face outward by the specified distance (or inward
    /// if negative).
    ///
    /// If this would result in a negative or NaN size, produces a zero size AAB located
    /// at the center point of `self`.
    #[must_use]
    #[inline]
    pub fn expand(self, distance: FreeCoordinate) -> Self {
        let distance_vec = Vector3D::splat(distance);
        match Self::checked_from_lower_upper(
            self.lower_bounds - distance_vec,
            self.upper_bounds + distance_vec,
        ) {
            Some(aab) => aab,
            None => {
                let center = self.center();
                Aab::from_lower_upper(center, center)
            }
        }
    }

    /// Intersects the ray with this box using the slab method.
    ///
    /// Returns the ray parameters `(t_near, t_far)` of the entry and exit points, or [`None`]
    /// if the line misses the box entirely or the box lies behind the ray's origin.
    /// `t_near` may be negative when the origin is inside the box.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn intersect_ray(&self, ray: &Ray) -> Option<(FreeCoordinate, FreeCoordinate)> {
        let mut t_near = FreeCoordinate::NEG_INFINITY;
        let mut t_far = FreeCoordinate::INFINITY;
        for (origin, direction, lower, upper) in [
            (ray.origin.x, ray.direction.x, self.lower_bounds.x, self.upper_bounds.x),
            (ray.origin.y, ray.direction.y, self.lower_bounds.y, self.upper_bounds.y),
            (ray.origin.z, ray.direction.z, self.lower_bounds.z, self.upper_bounds.z),
        ] {
            if direction == 0.0 {
                if origin < lower || origin > upper {
                    return None;
                }
                continue;
            }
            let inverse = direction.recip();
            let t0 = (lower - origin) * inverse;
            let t1 = (upper - origin) * inverse;
            t_near = t_near.max(t0.min(t1));
            t_far = t_far.min(t0.max(t1));
        }
        if t_near > t_far || t_far < 0.0 {
            None
        } else {
            Some((t_near, t_far))
        }
    }
}

impl fmt::Debug for Aab {
    #[allow(clippy::missing_inline_in_public_items)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Aab {
            lower_bounds: l,
            upper_bounds: u,
        } = *self;
        f.debug_tuple("Aab")
            .field(&(l.x..=u.x))
            .field(&(l.y..=u.y))
            .field(&(l.z..=u.z))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use euclid::{point3, vec3};

    #[test]
    #[should_panic = "invalid AAB points that are misordered or NaN"]
    fn new_wrong_order() {
        let _ = Aab::new(2., 1., 0., 1., 0., 1.);
    }

    #[test]
    fn new_nan() {
        assert_eq!(
            Aab::checked_from_lower_upper(point3(0., 0., 0.), point3(1., f32::NAN, 1.)),
            None
        );
    }

    #[test]
    fn debug() {
        let aab = Aab::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        assert_eq!(format!("{aab:?}"), "Aab(1.0..=2.0, 3.0..=4.0, 5.0..=6.0)");
    }

    #[test]
    fn centered_cube() {
        let aab = Aab::centered_cube(4.0);
        assert_eq!(aab.lower_bounds_p(), point3(-1.5, -1.5, -1.5));
        assert_eq!(aab.upper_bounds_p(), point3(2.5, 2.5, 2.5));
        assert_eq!(aab.center(), point3(0.5, 0.5, 0.5));
    }

    #[test]
    fn intersect_ray_through() {
        let ray = Ray::new([-1.0, 0.5, 0.5], [1.0, 0.0, 0.0]);
        assert_eq!(Aab::UNIT_CUBE.intersect_ray(&ray), Some((1.0, 2.0)));
    }

    #[test]
    fn intersect_ray_from_inside() {
        let ray = Ray::new([0.5, 0.5, 0.5], [0.0, 0.0, -1.0]);
        assert_eq!(Aab::UNIT_CUBE.intersect_ray(&ray), Some((-0.5, 0.5)));
    }

    #[test]
    fn intersect_ray_pointing_away() {
        let ray = Ray::new([2.0, 0.5, 0.5], [1.0, 0.0, 0.0]);
        assert_eq!(Aab::UNIT_CUBE.intersect_ray(&ray), None);
    }

    #[test]
    fn intersect_ray_parallel_outside() {
        let ray = Ray::new([-1.0, 2.0, 0.5], [1.0, 0.0, 0.0]);
        assert_eq!(Aab::UNIT_CUBE.intersect_ray(&ray), None);
    }

    #[test]
    fn random_point_inside() {
        use rand::SeedableRng as _;
        let mut rng = rand_xoshiro::Xoshiro256Plus::seed_from_u64(4);
        let aab = Aab::new(-1.0, 0.0, 2.0, 3.0, 0.5, 0.75);
        for _ in 0..100 {
            assert!(aab.contains(aab.random_point(&mut rng)));
        }
    }

    #[test]
    fn expand_negative_collapses_to_center() {
        let aab = Aab::UNIT_CUBE.expand(-1.0);
        assert_eq!(aab.size(), vec3(0.0, 0.0, 0.0));
        assert_eq!(aab.center(), point3(0.5, 0.5, 0.5));
    }
}
