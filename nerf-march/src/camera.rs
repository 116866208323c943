//! Pinhole cameras with lens models, and the learned distortion field.

use euclid::{Vector2D, vec2};
use serde::{Deserialize, Serialize};

use crate::math::{
    CameraPose, CameraVector, FreeVector, ImageSize, Normalized, Pixel, Uv, UvVector,
    square_to_disk,
};
use crate::raycast::Ray;

/// Number of fixed-point iterations used to invert radial-tangential distortion.
const UNDISTORT_ITERATIONS: usize = 10;

/// How the lens maps directions to image positions, beyond the ideal pinhole projection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LensModel {
    /// Ideal pinhole projection.
    #[default]
    Pinhole,
    /// Brown–Conrady distortion with two radial and two tangential coefficients,
    /// as estimated by common calibration tools.
    RadialTangential {
        /// Second-order radial coefficient.
        k1: f32,
        /// Fourth-order radial coefficient.
        k2: f32,
        /// First tangential coefficient.
        p1: f32,
        /// Second tangential coefficient.
        p2: f32,
    },
}

impl LensModel {
    /// Applies the forward distortion to normalized image-plane coordinates.
    pub fn distort(self, x: f32, y: f32) -> (f32, f32) {
        match self {
            LensModel::Pinhole => (x, y),
            LensModel::RadialTangential { k1, k2, p1, p2 } => {
                let r2 = x * x + y * y;
                let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
                (
                    x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
                    y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
                )
            }
        }
    }

    /// Inverts [`Self::distort()`] iteratively.
    pub fn undistort(self, x: f32, y: f32) -> (f32, f32) {
        match self {
            LensModel::Pinhole => (x, y),
            LensModel::RadialTangential { k1, k2, p1, p2 } => {
                let (mut ux, mut uy) = (x, y);
                for _ in 0..UNDISTORT_ITERATIONS {
                    let r2 = ux * ux + uy * uy;
                    let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
                    let dx = 2.0 * p1 * ux * uy + p2 * (r2 + 2.0 * ux * ux);
                    let dy = p1 * (r2 + 2.0 * uy * uy) + 2.0 * p2 * ux * uy;
                    ux = (x - dx) / radial;
                    uy = (y - dy) / radial;
                }
                (ux, uy)
            }
        }
    }
}

/// Depth-of-field parameters: rays start on a disk and converge at the focus distance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Aperture {
    /// Radius of the lens disk, in scene units. Zero means a pinhole.
    pub size: f32,
    /// Distance along the viewing axis at which objects are in focus.
    pub focus_distance: f32,
}

impl Aperture {
    /// Constructs aperture parameters.
    pub fn new(size: f32, focus_distance: f32) -> Self {
        Self {
            size,
            focus_distance,
        }
    }
}

/// A ray from a camera, with the quantities needed to propagate gradients back to the
/// camera's parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraRay {
    /// The ray, with unit-length direction.
    pub ray: Ray,
    /// Length of the direction before normalization.
    pub direction_length: f32,
    /// Unnormalized direction in the camera's frame, with z = 1 (before any
    /// depth-of-field adjustment).
    pub camera_direction: CameraVector,
}

/// A posed camera with intrinsics, as attached to each training image.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct Camera {
    /// Camera-to-scene transform.
    pub pose: CameraPose,
    /// Size of the image, in pixels.
    pub resolution: ImageSize,
    /// Focal length in pixels, per axis.
    pub focal_length: Vector2D<f32, Pixel>,
    /// Position of the optical axis in the image, normalized to `[0, 1]`.
    pub principal_point: Uv,
    /// Lens distortion.
    pub lens: LensModel,
}

impl Camera {
    /// Constructs a pinhole camera with the principal point at the image center and the
    /// same focal length on both axes.
    pub fn new(pose: CameraPose, resolution: ImageSize, focal_length: f32) -> Self {
        Self {
            pose,
            resolution,
            focal_length: vec2(focal_length, focal_length),
            principal_point: Uv::new(0.5, 0.5),
            lens: LensModel::Pinhole,
        }
    }

    /// Constructs a pinhole camera with the given vertical field of view in radians.
    pub fn from_fov_y(pose: CameraPose, resolution: ImageSize, fov_y: f32) -> Self {
        let focal_length = resolution.height as f32 * 0.5 / (fov_y * 0.5).tan();
        Self::new(pose, resolution, focal_length)
    }

    /// Returns a copy with a different lens model.
    #[must_use]
    pub fn with_lens(mut self, lens: LensModel) -> Self {
        self.lens = lens;
        self
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.resolution.area() as usize
    }

    /// Normalized position of a point within pixel `(x, y)`; `offset` is in pixel units,
    /// with `(0.5, 0.5)` being the pixel center.
    #[inline]
    pub fn pixel_uv(&self, x: u32, y: u32, offset: UvVector) -> Uv {
        Uv::new(
            (x as f32 + offset.x) / self.resolution.width as f32,
            (y as f32 + offset.y) / self.resolution.height as f32,
        )
    }

    /// Pixel containing the normalized position `uv`, clamped to the image.
    #[inline]
    pub fn pixel_at(&self, uv: Uv) -> (u32, u32) {
        let w = self.resolution.width;
        let h = self.resolution.height;
        (
            ((uv.x * w as f32) as u32).min(w.saturating_sub(1)),
            ((uv.y * h as f32) as u32).min(h.saturating_sub(1)),
        )
    }

    /// Unit-depth direction in the camera frame for the normalized image position `uv`,
    /// after the distortion field and lens model are taken into account.
    pub fn camera_direction(&self, uv: Uv, distortion: Option<&DistortionMap>) -> CameraVector {
        let uv = match distortion {
            Some(map) => uv + map.offset(uv),
            None => uv,
        };
        let x = (uv.x - self.principal_point.x) * self.resolution.width as f32 / self.focal_length.x;
        let y =
            (uv.y - self.principal_point.y) * self.resolution.height as f32 / self.focal_length.y;
        let (x, y) = self.lens.undistort(x, y);
        CameraVector::new(x, y, 1.0)
    }

    /// Constructs the ray through the normalized image position `uv`.
    ///
    /// `aperture_sample` in `[0, 1]²` chooses the point on the lens disk when `aperture`
    /// has nonzero size.
    pub fn ray_for_uv(
        &self,
        uv: Uv,
        distortion: Option<&DistortionMap>,
        aperture: Aperture,
        aperture_sample: UvVector,
    ) -> CameraRay {
        let camera_direction = self.camera_direction(uv, distortion);
        let mut origin = self.pose.position;
        let mut direction_in_camera = camera_direction;
        if aperture.size > 0.0 {
            let disk = square_to_disk(aperture_sample) * aperture.size;
            let offset = CameraVector::new(disk.x, disk.y, 0.0);
            origin += self.pose.transform_vector(offset);
            direction_in_camera = camera_direction * aperture.focus_distance - offset;
        }
        let (ray, direction_length) = Ray {
            origin,
            direction: self.pose.transform_vector(direction_in_camera),
        }
        .normalized();
        CameraRay {
            ray,
            direction_length,
            camera_direction,
        }
    }

    /// Projects a scene-frame direction to a normalized image position, ignoring the lens
    /// model. Returns [`None`] for directions behind the camera.
    pub fn project_direction(&self, direction: FreeVector) -> Option<Uv> {
        let [right, down, forward] = self.pose.axes();
        let z = direction.dot(forward);
        if z <= 0.0 {
            return None;
        }
        let x = direction.dot(right) / z;
        let y = direction.dot(down) / z;
        Some(Uv::new(
            x * self.focal_length.x / self.resolution.width as f32 + self.principal_point.x,
            y * self.focal_length.y / self.resolution.height as f32 + self.principal_point.y,
        ))
    }
}

// -------------------------------------------------------------------------------------------------

/// A learned correction to image positions: a grid of offsets over the normalized image,
/// bilinearly interpolated, that is added to each position before it is converted to a ray.
#[derive(Clone, Debug, PartialEq)]
pub struct DistortionMap {
    resolution: u32,
    offsets: Vec<UvVector>,
}

impl DistortionMap {
    /// Creates a map of `resolution × resolution` control points, all zero.
    ///
    /// Panics if `resolution < 2`.
    pub fn new(resolution: u32) -> Self {
        assert!(resolution >= 2, "distortion map resolution must be at least 2");
        Self {
            resolution,
            offsets: vec![Vector2D::zero(); (resolution * resolution) as usize],
        }
    }

    /// Control points per axis.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Control point values, row-major.
    pub fn offsets(&self) -> &[UvVector] {
        &self.offsets
    }

    /// Mutable control point values, row-major.
    pub fn offsets_mut(&mut self) -> &mut [UvVector] {
        &mut self.offsets
    }

    /// The four control points surrounding `uv` and their bilinear weights.
    ///
    /// The control points are spaced evenly with the first and last on the image edges.
    pub fn bilinear_weights(&self, uv: Uv) -> [(usize, f32); 4] {
        let max = (self.resolution - 1) as f32;
        let p = vec2::<f32, Normalized>(uv.x.clamp(0.0, 1.0), uv.y.clamp(0.0, 1.0)) * max;
        let x0 = (p.x.floor() as u32).min(self.resolution - 2);
        let y0 = (p.y.floor() as u32).min(self.resolution - 2);
        let fx = p.x - x0 as f32;
        let fy = p.y - y0 as f32;
        let index = |x: u32, y: u32| (y * self.resolution + x) as usize;
        [
            (index(x0, y0), (1.0 - fx) * (1.0 - fy)),
            (index(x0 + 1, y0), fx * (1.0 - fy)),
            (index(x0, y0 + 1), (1.0 - fx) * fy),
            (index(x0 + 1, y0 + 1), fx * fy),
        ]
    }

    /// Interpolated offset at `uv`.
    pub fn offset(&self, uv: Uv) -> UvVector {
        self.bilinear_weights(uv)
            .into_iter()
            .fold(Vector2D::zero(), |sum, (i, w)| sum + self.offsets[i] * w)
    }
}
