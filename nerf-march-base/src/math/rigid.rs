use euclid::{Angle, Rotation3D, Vector3D};

use crate::math::{CameraSpace, FreeCoordinate, FreePoint, FreeVector, Scene};

/// Rotation from a camera's frame into the scene frame.
pub type CameraRotation = Rotation3D<FreeCoordinate, CameraSpace, Scene>;

/// Rotation within the scene frame, used for pose corrections.
pub type SceneRotation = Rotation3D<FreeCoordinate, Scene, Scene>;

/// A rigid transformation placing a camera in the scene: a rotation followed by a
/// translation.
///
/// Equivalent to the 3×4 camera-to-world matrix whose columns are the camera's
/// rightward, downward, and forward axes followed by its position.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CameraPose {
    /// Orientation of the camera.
    pub rotation: CameraRotation,
    /// Position of the camera's center of projection.
    pub position: FreePoint,
}

impl CameraPose {
    /// A camera at the origin looking along +Z.
    #[inline]
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3D::identity(),
            position: FreePoint::origin(),
        }
    }

    /// Constructs a pose from the columns of a camera-to-world matrix.
    ///
    /// The three axis vectors should be orthonormal and right-handed; they are
    /// converted to a unit quaternion and any residual scale is discarded.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn from_columns(
        right: FreeVector,
        down: FreeVector,
        forward: FreeVector,
        position: FreePoint,
    ) -> Self {
        Self {
            rotation: quaternion_from_axes([right, down, forward]),
            position,
        }
    }

    /// Constructs a pose looking from `position` toward `target`, with `up` indicating
    /// roughly which scene direction should appear upward in the image.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn look_at(position: FreePoint, target: FreePoint, up: FreeVector) -> Self {
        let forward = (target - position).normalize();
        let right = forward.cross(up).normalize();
        let down = forward.cross(right);
        Self::from_columns(right, down, forward, position)
    }

    /// Transforms a direction from the camera's frame into the scene.
    #[inline]
    pub fn transform_vector(&self, v: Vector3D<FreeCoordinate, CameraSpace>) -> FreeVector {
        self.rotation.transform_vector3d(v)
    }

    /// Returns the camera's right, down and forward axes in scene coordinates.
    #[inline]
    pub fn axes(&self) -> [FreeVector; 3] {
        [
            self.transform_vector(Vector3D::new(1., 0., 0.)),
            self.transform_vector(Vector3D::new(0., 1., 0.)),
            self.transform_vector(Vector3D::new(0., 0., 1.)),
        ]
    }

    /// Applies a correction: the position is offset, and the orientation is rotated
    /// (in the scene frame) by the rotation vector `rotation_offset`.
    #[must_use]
    #[inline]
    pub fn with_offsets(&self, position_offset: FreeVector, rotation_offset: FreeVector) -> Self {
        Self {
            rotation: self.rotation.then(&rotation_from_vector(rotation_offset)),
            position: self.position + position_offset,
        }
    }
}

/// Converts a rotation vector (axis scaled by angle in radians) to a rotation.
#[allow(clippy::missing_inline_in_public_items)]
pub fn rotation_from_vector(v: FreeVector) -> SceneRotation {
    let angle = v.length();
    if angle < 1e-12 {
        return Rotation3D::identity();
    }
    Rotation3D::around_axis(v / angle, Angle::radians(angle))
}

/// Converts a rotation to a rotation vector (axis scaled by angle in radians), choosing
/// the angle in `[0, π]`.
#[allow(clippy::missing_inline_in_public_items)]
pub fn rotation_to_vector(r: SceneRotation) -> FreeVector {
    let r = r.normalize();
    // q and -q are the same rotation; pick the one with nonnegative real part.
    let sign = if r.r < 0.0 { -1.0 } else { 1.0 };
    let imaginary = Vector3D::new(r.i, r.j, r.k) * sign;
    let real = r.r * sign;
    let sin_half = imaginary.length();
    if sin_half < 1e-12 {
        return imaginary * 2.0;
    }
    let angle = 2.0 * sin_half.atan2(real);
    imaginary * (angle / sin_half)
}

/// Converts an orthonormal basis (given as the images of the unit axes) to a unit
/// quaternion, using Shepperd's method for numerical stability.
fn quaternion_from_axes([x, y, z]: [FreeVector; 3]) -> CameraRotation {
    // Matrix element m[row][col]; columns are the axis images.
    let (m00, m10, m20) = (x.x, x.y, x.z);
    let (m01, m11, m21) = (y.x, y.y, y.z);
    let (m02, m12, m22) = (z.x, z.y, z.z);
    let trace = m00 + m11 + m22;
    let (i, j, k, r) = if trace > 0.0 {
        let s = (trace + 1.0).sqrt() * 2.0;
        ((m21 - m12) / s, (m02 - m20) / s, (m10 - m01) / s, 0.25 * s)
    } else if m00 > m11 && m00 > m22 {
        let s = (1.0 + m00 - m11 - m22).sqrt() * 2.0;
        (0.25 * s, (m01 + m10) / s, (m02 + m20) / s, (m21 - m12) / s)
    } else if m11 > m22 {
        let s = (1.0 + m11 - m00 - m22).sqrt() * 2.0;
        ((m01 + m10) / s, 0.25 * s, (m12 + m21) / s, (m02 - m20) / s)
    } else {
        let s = (1.0 + m22 - m00 - m11).sqrt() * 2.0;
        ((m02 + m20) / s, (m12 + m21) / s, 0.25 * s, (m10 - m01) / s)
    };
    Rotation3D::quaternion(i, j, k, r).normalize()
}
