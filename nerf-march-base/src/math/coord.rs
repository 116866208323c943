//! Numeric types used for coordinates and related quantities.

use euclid::{Point2D, Point3D, Size2D, Vector2D, Vector3D};

/// Unit-of-measure type for the scene frame.
///
/// The scene frame is normalized so that the region of interest is centered on
/// `(0.5, 0.5, 0.5)`; the finest occupancy cascade covers exactly the unit cube.
#[allow(clippy::exhaustive_enums)]
#[derive(Debug)]
pub enum Scene {}

/// Unit-of-measure type for the frame of a camera, where +Z is the viewing direction,
/// +X is the image's rightward direction and +Y is the image's downward direction.
#[allow(clippy::exhaustive_enums)]
#[derive(Debug)]
pub enum CameraSpace {}

/// Unit-of-measure type for image pixels, with the origin at the top left corner.
#[allow(clippy::exhaustive_enums)]
#[derive(Debug)]
pub enum Pixel {}

/// Unit-of-measure type for image positions normalized to `[0, 1]` on both axes.
#[allow(clippy::exhaustive_enums)]
#[derive(Debug)]
pub enum Normalized {}

/// Coordinates in continuous space.
///
/// Single precision matches the precision of the sample buffers handed to the
/// radiance field, and halves their memory footprint.
pub type FreeCoordinate = f32;

/// Positions in the scene frame.
pub type FreePoint = Point3D<FreeCoordinate, Scene>;

/// Vectors in the scene frame.
pub type FreeVector = Vector3D<FreeCoordinate, Scene>;

/// Vectors in a camera's frame.
pub type CameraVector = Vector3D<FreeCoordinate, CameraSpace>;

/// Size of an image in pixels.
pub type ImageSize = Size2D<u32, Pixel>;

/// Position within an image, normalized to `[0, 1]`.
pub type Uv = Point2D<f32, Normalized>;

/// Offset within an image, normalized to `[0, 1]`.
pub type UvVector = Vector2D<f32, Normalized>;

/// Additional element-wise operations on `euclid` types.
pub trait VectorOps<O> {
    /// Input vector element type.
    type Elem;
    /// Output vector type.
    type Output;
    /// Apply the function to each element.
    fn map<F: FnMut(Self::Elem) -> O>(self, f: F) -> Self::Output;
    /// Apply the function to each element of the two inputs, pairwise.
    fn zip<F: FnMut(Self::Elem, Self::Elem) -> O>(self, rhs: Self, f: F) -> Self::Output;
}

mod impl_euclid {
    use super::*;

    macro_rules! impl_vector_ops {
        ($vec:ident, ($( $field:ident )*)) => {
            impl<T, O, U> VectorOps<O> for $vec<T, U> {
                type Elem = T;
                type Output = $vec<O, U>;

                #[inline]
                fn map<F: FnMut(Self::Elem) -> O>(self, mut f: F) -> Self::Output {
                    $vec::new($(f(self.$field)),*)
                }

                #[inline]
                fn zip<F: FnMut(Self::Elem, Self::Elem) -> O>(
                    self,
                    rhs: Self,
                    mut f: F,
                ) -> Self::Output {
                    $vec::new($(f(self.$field, rhs.$field)),*)
                }
            }
        };
    }

    impl_vector_ops!(Vector3D, (x y z));
    impl_vector_ops!(Point3D, (x y z));
    impl_vector_ops!(Vector2D, (x y));
    impl_vector_ops!(Point2D, (x y));
}

/// Largest absolute value among the components.
#[inline]
#[must_use]
pub fn max_abs_component(v: FreeVector) -> FreeCoordinate {
    v.x.abs().max(v.y.abs()).max(v.z.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use euclid::vec3;

    #[test]
    fn vector_ops() {
        let v: FreeVector = vec3(1.5, -2.0, 0.25);
        assert_eq!(v.map(f32::floor), vec3(1.0, -2.0, 0.0));
        assert_eq!(v.zip(vec3(1.0, 1.0, 1.0), f32::max), vec3(1.5, 1.0, 1.0));
        assert_eq!(max_abs_component(v), 2.0);
    }
}
