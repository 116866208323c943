//! In-memory training data: posed images.
//!
//! Parsing image files and camera descriptions is left to the caller; this module only
//! validates and holds the result.

use crate::NerfError;
use crate::camera::Camera;
use crate::math::{Aab, Rgb, Rgba};

/// One posed photograph.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingImage {
    camera: Camera,
    /// Row-major, top row first, straight (not premultiplied) alpha.
    pixels: Vec<Rgba>,
}

impl TrainingImage {
    /// Constructs an image; `pixels` must have one entry per pixel of `camera.resolution`,
    /// which is checked by [`Dataset::new()`].
    pub fn new(camera: Camera, pixels: Vec<Rgba>) -> Self {
        Self { camera, pixels }
    }

    /// The camera that took this image.
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Pixel colors, row-major, top row first.
    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.camera.resolution.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.camera.resolution.height
    }

    /// The pixel at `(x, y)`. Panics if out of bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        self.pixels[(y * self.width() + x) as usize]
    }

    /// The pixel color composited over `background`.
    #[inline]
    pub fn pixel_over(&self, x: u32, y: u32, background: Rgb) -> Rgb {
        self.pixel(x, y).composite_over(background)
    }

    fn validate(&self, index: usize) -> crate::Result<()> {
        let invalid = |reason: String| NerfError::InvalidImage { index, reason };
        if self.camera.resolution.is_empty() {
            return Err(invalid(format!(
                "resolution {}×{} is empty",
                self.width(),
                self.height()
            )));
        }
        if self.pixels.len() != self.camera.pixel_count() {
            return Err(invalid(format!(
                "expected {} pixels, got {}",
                self.camera.pixel_count(),
                self.pixels.len()
            )));
        }
        let focal = self.camera.focal_length;
        if !(focal.x > 0.0 && focal.y > 0.0) {
            return Err(invalid(format!("focal length {focal:?} is not positive")));
        }
        Ok(())
    }
}

/// A validated set of training images sharing one scene.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    images: Vec<TrainingImage>,
    aabb_scale: u32,
}

impl Dataset {
    /// Largest supported `aabb_scale`.
    pub const MAX_AABB_SCALE: u32 = 128;

    /// Validates and collects the images.
    ///
    /// `aabb_scale` is the edge length of the scene bounds, centered on the unit cube's
    /// center; it must be a power of two no greater than [`Self::MAX_AABB_SCALE`].
    pub fn new(images: Vec<TrainingImage>, aabb_scale: u32) -> crate::Result<Self> {
        if images.is_empty() {
            return Err(NerfError::EmptyDataset);
        }
        if !aabb_scale.is_power_of_two() || aabb_scale > Self::MAX_AABB_SCALE {
            return Err(NerfError::InvalidAabbScale(aabb_scale));
        }
        for (index, image) in images.iter().enumerate() {
            image.validate(index)?;
        }
        log::debug!(
            "dataset of {} images, aabb_scale {aabb_scale}",
            images.len()
        );
        Ok(Self { images, aabb_scale })
    }

    /// The images.
    pub fn images(&self) -> &[TrainingImage] {
        &self.images
    }

    /// Number of images; never zero.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Always false; present for API convention.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Edge length of the scene bounds.
    pub fn aabb_scale(&self) -> u32 {
        self.aabb_scale
    }

    /// Scene bounds used for training.
    pub fn aabb(&self) -> Aab {
        Aab::centered_cube(self.aabb_scale as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::CameraPose;
    use euclid::size2;

    fn image(w: u32, h: u32, n: usize) -> TrainingImage {
        TrainingImage::new(
            Camera::new(CameraPose::identity(), size2(w, h), 10.0),
            vec![Rgba::new(1.0, 0.0, 0.0, 1.0); n],
        )
    }

    #[test]
    fn valid() {
        let dataset = Dataset::new(vec![image(4, 2, 8)], 2).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.aabb(), Aab::centered_cube(2.0));
        assert_eq!(dataset.images()[0].pixel(3, 1), Rgba::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn empty() {
        assert!(matches!(Dataset::new(vec![], 1), Err(NerfError::EmptyDataset)));
    }

    #[test]
    fn wrong_pixel_count() {
        let error = Dataset::new(vec![image(4, 2, 8), image(4, 2, 7)], 1).unwrap_err();
        assert_eq!(
            error.to_string(),
            "training image 1 is invalid: expected 8 pixels, got 7"
        );
    }

    #[test]
    fn bad_scale() {
        assert!(matches!(
            Dataset::new(vec![image(1, 1, 1)], 3),
            Err(NerfError::InvalidAabbScale(3))
        ));
        assert!(matches!(
            Dataset::new(vec![image(1, 1, 1)], 256),
            Err(NerfError::InvalidAabbScale(256))
        ));
    }
}
