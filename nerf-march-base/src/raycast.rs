//! Rays and related geometry.

use crate::math::{FreeCoordinate, FreePoint, FreeVector};

/// A ray; a half-infinite line segment.
#[allow(clippy::exhaustive_structs)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// The sole endpoint of the ray.
    pub origin: FreePoint,

    /// The direction in which the ray extends infinitely.
    ///
    /// Rays produced by cameras have unit-length directions, so that the ray parameter
    /// is a distance.
    pub direction: FreeVector,
}

impl Ray {
    /// Constructs a [`Ray`] from convertible types (e.g. tuples or 3-element arrays).
    /// Other than the use of [`Into`], this is equivalent to a struct literal.
    ///
    /// ```
    /// use nerf_march_base::euclid::{point3, vec3};
    /// use nerf_march_base::raycast::Ray;
    ///
    /// assert_eq!(
    ///     Ray::new([1., 2., 3.], [4., 5., 6.]),
    ///     Ray {
    ///         origin: point3(1., 2., 3.),
    ///         direction: vec3(4., 5., 6.),
    ///     }
    /// );
    /// ```
    #[allow(clippy::missing_inline_in_public_items)] // is generic already
    pub fn new(origin: impl Into<FreePoint>, direction: impl Into<FreeVector>) -> Self {
        Self {
            origin: origin.into(),
            direction: direction.into(),
        }
    }

    /// Returns the point at parameter `t` along the ray.
    #[inline]
    #[must_use]
    pub fn at(&self, t: FreeCoordinate) -> FreePoint {
        self.origin + self.direction * t
    }

    /// Returns the same ray with a unit-length direction, and the original length.
    #[inline]
    #[must_use]
    pub fn normalized(self) -> (Self, FreeCoordinate) {
        let length = self.direction.length();
        (
            Self {
                origin: self.origin,
                direction: self.direction / length,
            },
            length,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use euclid::point3;

    #[test]
    fn at() {
        let ray = Ray::new([1.0, 0.0, 0.0], [0.0, 2.0, 0.0]);
        assert_eq!(ray.at(1.5), point3(1.0, 3.0, 0.0));
    }

    #[test]
    fn normalized() {
        let (ray, length) = Ray::new([0.0, 0.0, 0.0], [3.0, 4.0, 0.0]).normalized();
        assert_eq!(length, 5.0);
        assert!((ray.direction.length() - 1.0).abs() < 1e-6);
    }
}
