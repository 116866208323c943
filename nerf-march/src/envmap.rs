//! Environment map: a background looked up by ray direction, optionally learned during
//! training.
//!
//! The map is an equirectangular (latitude-longitude) image. Its colors are linear and not
//! premultiplied; a ray that leaves the volume sees the map's color composited over the
//! configured flat background.

use euclid::vec2;

use crate::NerfError;
use crate::math::{FreeVector, ImageSize, Normalized, Rgb, Rgba, Uv};

/// Equirectangular image of the surroundings, with trainable texels.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentMap {
    resolution: ImageSize,
    /// `[r, g, b, a]` per texel, row-major.
    texels: Vec<f32>,
    gradients: Vec<f32>,
}

impl EnvironmentMap {
    /// Creates a map from row-major texels, the top row looking along +Y.
    ///
    /// Fails if the resolution is empty or does not match the number of texels.
    pub fn new(resolution: ImageSize, texels: &[Rgba]) -> crate::Result<Self> {
        if resolution.is_empty() {
            return Err(NerfError::InvalidEnvironmentMap(format!(
                "resolution {}×{} is empty",
                resolution.width, resolution.height
            )));
        }
        if texels.len() != resolution.area() as usize {
            return Err(NerfError::InvalidEnvironmentMap(format!(
                "{} texels given for a {}×{} map",
                texels.len(),
                resolution.width,
                resolution.height
            )));
        }
        let texels: Vec<f32> = texels.iter().flat_map(|t| t.to_array()).collect();
        Ok(Self {
            resolution,
            gradients: vec![0.0; texels.len()],
            texels,
        })
    }

    /// Creates a map of a single color.
    pub fn uniform(resolution: ImageSize, color: Rgba) -> crate::Result<Self> {
        Self::new(resolution, &vec![color; resolution.area() as usize])
    }

    /// Texels per axis.
    pub fn resolution(&self) -> ImageSize {
        self.resolution
    }

    /// The texel in column `x` and row `y`.
    pub fn texel(&self, x: u32, y: u32) -> Rgba {
        let i = (y * self.resolution.width + x) as usize * 4;
        let [r, g, b, a] = [0, 1, 2, 3].map(|c| self.texels[i + c]);
        Rgba::new(r, g, b, a)
    }

    /// Position in the map seen in `direction`, which need not be normalized.
    ///
    /// `u` goes once around the vertical axis and wraps; `v` goes from +Y (0) to -Y (1).
    pub fn direction_to_uv(direction: FreeVector) -> Uv {
        let d = direction.normalize();
        let u = libm::atan2f(d.z, d.x) / core::f32::consts::TAU + 0.5;
        let v = libm::acosf(d.y.clamp(-1.0, 1.0)) / core::f32::consts::PI;
        Uv::new(u.rem_euclid(1.0), v)
    }

    /// The four texels surrounding `uv` and their bilinear weights; texel centers are at
    /// half-integer positions, wrapping around horizontally and clamped vertically.
    pub fn bilinear_weights(&self, uv: Uv) -> [(usize, f32); 4] {
        let (w, h) = (self.resolution.width, self.resolution.height);
        let p = vec2::<f32, Normalized>(uv.x * w as f32 - 0.5, uv.y * h as f32 - 0.5);
        let x0 = p.x.floor();
        let y0 = p.y.floor();
        let fx = p.x - x0;
        let fy = p.y - y0;
        let column = |x: f32| (x as i64).rem_euclid(i64::from(w)) as u32;
        let row = |y: f32| (y as i64).clamp(0, i64::from(h) - 1) as u32;
        let index = |x: f32, y: f32| (row(y) * w + column(x)) as usize;
        [
            (index(x0, y0), (1.0 - fx) * (1.0 - fy)),
            (index(x0 + 1.0, y0), fx * (1.0 - fy)),
            (index(x0, y0 + 1.0), (1.0 - fx) * fy),
            (index(x0 + 1.0, y0 + 1.0), fx * fy),
        ]
    }

    /// Interpolated color seen in `direction`.
    pub fn sample(&self, direction: FreeVector) -> Rgba {
        let mut sum = [0.0; 4];
        for (texel, weight) in self.bilinear_weights(Self::direction_to_uv(direction)) {
            for (s, &t) in sum.iter_mut().zip(&self.texels[texel * 4..][..4]) {
                *s += weight * t;
            }
        }
        Rgba::from(sum)
    }

    /// Color a ray leaving the volume in `direction` sees in front of `background`.
    #[inline]
    pub fn background(&self, direction: FreeVector, background: Rgb) -> Rgb {
        self.sample(direction).composite_over(background)
    }

    /// Adds to the texel gradients the effect of `gradient`, the derivative of the loss with
    /// respect to [`Self::background()`] of the same arguments.
    pub fn accumulate_gradient(&mut self, direction: FreeVector, background: Rgb, gradient: Rgb) {
        let sample = self.sample(direction);
        let d_rgb = gradient * sample.alpha();
        let d_alpha = gradient.dot(sample.to_rgb() - background);
        let d_texel = d_rgb.to_array().into_iter().chain([d_alpha]);
        let weights = self.bilinear_weights(Self::direction_to_uv(direction));
        for (texel, weight) in weights {
            for (g, d) in self.gradients[texel * 4..][..4].iter_mut().zip(d_texel.clone()) {
                *g += weight * d;
            }
        }
    }

    /// Returns the flat texel buffer and the matching gradient accumulator.
    pub fn parameters_and_gradients(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.texels, &mut self.gradients)
    }

    /// Resets accumulated gradients to zero.
    pub fn zero_gradients(&mut self) {
        self.gradients.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use euclid::{size2, vec3};

    fn gradient_map() -> EnvironmentMap {
        let resolution = size2(8, 4);
        let texels: Vec<Rgba> = (0..32)
            .map(|i| Rgba::new(i as f32 / 32.0, 0.5, 1.0 - i as f32 / 32.0, 0.25 + i as f32 / 64.0))
            .collect();
        EnvironmentMap::new(resolution, &texels).unwrap()
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let error = EnvironmentMap::new(size2(4, 2), &[Rgba::TRANSPARENT; 7]).unwrap_err();
        assert!(matches!(error, NerfError::InvalidEnvironmentMap(_)), "{error:?}");
        let error = EnvironmentMap::uniform(size2(0, 2), Rgba::TRANSPARENT).unwrap_err();
        assert!(matches!(error, NerfError::InvalidEnvironmentMap(_)), "{error:?}");
    }

    #[test]
    fn poles_and_horizon() {
        assert_eq!(EnvironmentMap::direction_to_uv(vec3(0.0, 1.0, 0.0)).y, 0.0);
        assert!((EnvironmentMap::direction_to_uv(vec3(0.0, -2.0, 0.0)).y - 1.0).abs() < 1e-6);
        let uv = EnvironmentMap::direction_to_uv(vec3(-1.0, 0.0, 0.0));
        assert!((uv.y - 0.5).abs() < 1e-6, "{uv:?}");
        for direction in [vec3(1.0, 0.3, 0.0), vec3(0.0, -0.2, -1.0), vec3(-0.5, 0.0, 0.5)] {
            let uv = EnvironmentMap::direction_to_uv(direction);
            assert!((0.0..1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y), "{uv:?}");
        }
    }

    #[test]
    fn uniform_map_samples_its_color() {
        let color = Rgba::new(0.2, 0.4, 0.6, 0.5);
        let map = EnvironmentMap::uniform(size2(6, 3), color).unwrap();
        for direction in [vec3(1.0, 0.0, 0.0), vec3(0.3, -0.9, 0.1), vec3(0.0, 1.0, 0.0)] {
            let sample = map.sample(direction).to_array();
            for (s, c) in sample.into_iter().zip(color.to_array()) {
                assert!((s - c).abs() < 1e-6, "{sample:?}");
            }
        }
        let background = map.background(vec3(0.0, 0.0, 1.0), Rgb::ONE);
        assert!((background.red() - 0.6).abs() < 1e-6, "{background:?}");
    }

    #[test]
    fn weights_wrap_horizontally() {
        let map = gradient_map();
        // Between the last and first columns of row 1.
        let weights = map.bilinear_weights(Uv::new(0.0, 0.375));
        let mut texels: Vec<usize> = weights.iter().map(|&(i, _)| i).collect();
        texels.sort_unstable();
        assert_eq!(texels, vec![8, 15, 16, 23]);
        let total: f32 = weights.iter().map(|&(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let direction = vec3(0.3, 0.2, -0.8);
        let background = Rgb::new(0.1, 0.9, 0.4);
        let upstream = Rgb::new(0.7, -0.3, 0.5);
        let mut map = gradient_map();
        map.accumulate_gradient(direction, background, upstream);
        let analytic = map.gradients.clone();

        let h = 1e-2;
        for i in 0..map.texels.len() {
            let loss_with = |delta: f32| {
                let mut map = map.clone();
                map.texels[i] += delta;
                map.background(direction, background).dot(upstream)
            };
            let numeric = (loss_with(h) - loss_with(-h)) / (2.0 * h);
            assert!(
                (numeric - analytic[i]).abs() < 1e-3,
                "parameter {i}: numeric {numeric} analytic {}",
                analytic[i]
            );
        }

        map.zero_gradients();
        assert!(map.parameters_and_gradients().1.iter().all(|&g| g == 0.0));
    }
}
