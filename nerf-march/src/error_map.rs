//! Importance sampling of training pixels in proportion to recent error.
//!
//! Each image is divided into `resolution × resolution` cells. Training deposits each ray's
//! loss into an [`ErrorAccumulator`]; periodically an [`ErrorMap`] is built from the
//! accumulated values, and the next rays are drawn from it: first an image, then a row of
//! cells, then a cell within the row, then a uniformly random point within the cell.

use crate::dataset::TrainingImage;
use crate::math::Uv;

/// Smallest probability given to an outcome with positive weight, so that no such outcome
/// is absorbed by rounding into its neighbors' share.
const MIN_PROBABILITY: f64 = 1e-6;

/// Per-image sampling tables.
#[derive(Clone, Debug, PartialEq)]
struct ImageTables {
    /// Cumulative distribution over rows.
    row_cdf: Vec<f32>,
    /// For each row, the cumulative distribution over cells in that row; row-major.
    column_cdfs: Vec<f32>,
    /// Sum of the error over the image.
    total: f64,
}

/// Result of [`ErrorMap::sample()`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub struct ErrorMapSample {
    /// Chosen image.
    pub image: usize,
    /// Column of the chosen cell.
    pub x: u32,
    /// Row of the chosen cell.
    pub y: u32,
    /// Chosen position within the image.
    pub uv: Uv,
    /// Probability density of choosing `uv` given the image, relative to uniform sampling
    /// (so uniform sampling has density 1).
    pub pdf: f32,
}

/// Sampling tables built from per-cell error.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorMap {
    resolution: u32,
    images: Vec<ImageTables>,
    image_cdf: Vec<f32>,
}

impl ErrorMap {
    /// A map that samples every image and position uniformly.
    ///
    /// This is the same map [`Self::build()`] makes from all-zero error.
    pub fn uniform(n_images: usize, resolution: u32) -> crate::Result<Self> {
        let cells = (resolution * resolution) as usize;
        Self::build(&vec![vec![0.0; cells]; n_images], resolution)
    }

    /// Builds sampling tables from per-image, per-cell error (`resolution²` row-major values
    /// per image).
    ///
    /// Negative and NaN values count as zero. An image whose error is all zero is sampled
    /// uniformly within itself; if every image is all zero, images are chosen uniformly.
    /// Every image, row and cell with positive error has positive probability, however
    /// small its error is relative to the rest.
    ///
    /// Fails if `resolution` is zero. Panics if an image's error does not have
    /// `resolution²` entries.
    pub fn build(per_image_error: &[Vec<f32>], resolution: u32) -> crate::Result<Self> {
        check_resolution(resolution)?;
        Ok(Self::build_checked(per_image_error, resolution))
    }

    fn build_checked(per_image_error: &[Vec<f32>], resolution: u32) -> Self {
        let cells = (resolution * resolution) as usize;
        let res = resolution as usize;
        let images: Vec<ImageTables> = per_image_error
            .iter()
            .map(|error| {
                assert_eq!(error.len(), cells, "error map image has wrong size");
                let error: Vec<f64> = error
                    .iter()
                    .map(|&e| if e > 0.0 && e.is_finite() { f64::from(e) } else { 0.0 })
                    .collect();
                let row_sums: Vec<f64> = error.chunks_exact(res).map(|row| row.iter().sum()).collect();
                ImageTables {
                    row_cdf: cdf(&row_sums),
                    column_cdfs: error.chunks_exact(res).flat_map(cdf).collect(),
                    total: row_sums.iter().sum(),
                }
            })
            .collect();
        let totals: Vec<f64> = images.iter().map(|image| image.total).collect();
        Self {
            resolution,
            image_cdf: cdf(&totals),
            images,
        }
    }

    /// Cells per axis.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Number of images.
    pub fn n_images(&self) -> usize {
        self.images.len()
    }

    /// Cumulative distribution over images.
    pub fn image_cdf(&self) -> &[f32] {
        &self.image_cdf
    }

    /// Cumulative distribution over the rows of an image.
    pub fn row_cdf(&self, image: usize) -> &[f32] {
        &self.images[image].row_cdf
    }

    /// Cumulative distribution over the cells of one row of an image.
    pub fn column_cdf(&self, image: usize, row: u32) -> &[f32] {
        let res = self.resolution as usize;
        &self.images[image].column_cdfs[row as usize * res..][..res]
    }

    /// Probability of the image being chosen by [`Self::sample()`].
    pub fn image_probability(&self, image: usize) -> f32 {
        bucket_probability(&self.image_cdf, image)
    }

    /// Chooses an image with `w` and a position within it with `u` and `v`; all three
    /// should be uniformly distributed in `[0, 1)`.
    pub fn sample(&self, u: f32, v: f32, w: f32) -> ErrorMapSample {
        let (image, _) = invert_cdf(&self.image_cdf, w);
        self.sample_in_image(image, u, v)
    }

    /// Chooses a position within `image` with `u` and `v`, uniformly distributed in `[0, 1)`.
    pub fn sample_in_image(&self, image: usize, u: f32, v: f32) -> ErrorMapSample {
        let res = self.resolution;
        let row_cdf = self.row_cdf(image);
        let (y, fy) = invert_cdf(row_cdf, v);
        let column_cdf = self.column_cdf(image, y as u32);
        let (x, fx) = invert_cdf(column_cdf, u);
        let probability = bucket_probability(row_cdf, y) * bucket_probability(column_cdf, x);
        let (x, y) = (x as u32, y as u32);
        ErrorMapSample {
            image,
            x,
            y,
            uv: Uv::new((x as f32 + fx) / res as f32, (y as f32 + fy) / res as f32),
            pdf: probability * (res * res) as f32,
        }
    }
}

fn check_resolution(resolution: u32) -> crate::Result<()> {
    if resolution == 0 {
        Err(crate::NerfError::InvalidErrorMapResolution(resolution))
    } else {
        Ok(())
    }
}

/// Normalized inclusive prefix sum; uniform if the weights sum to zero.
///
/// Each positive weight's step is at least about [`MIN_PROBABILITY`], and each zero
/// weight's step is exactly zero. The entries from the last positive weight on are exactly 1.
fn cdf(weights: &[f64]) -> Vec<f32> {
    let n = weights.len();
    let total: f64 = weights.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        let mut cdf: Vec<f32> = (1..=n).map(|i| (i as f64 / n as f64) as f32).collect();
        if let Some(last) = cdf.last_mut() {
            *last = 1.0;
        }
        return cdf;
    }

    let probabilities: Vec<f64> = weights
        .iter()
        .map(|&w| if w > 0.0 { (w / total).max(MIN_PROBABILITY) } else { 0.0 })
        .collect();
    let floored_total: f64 = probabilities.iter().sum();
    let mut running = 0.0;
    let mut cdf: Vec<f32> = probabilities
        .iter()
        .map(|p| {
            running += p;
            (running / floored_total) as f32
        })
        .collect();
    if let Some(last_positive) = weights.iter().rposition(|&w| w > 0.0) {
        cdf[last_positive..].fill(1.0);
    }
    cdf
}

/// Size of the step of `cdf` at `index`.
fn bucket_probability(cdf: &[f32], index: usize) -> f32 {
    let previous = if index == 0 { 0.0 } else { cdf[index - 1] };
    cdf[index] - previous
}

/// Finds the bucket of `cdf` containing `x`, and `x`'s relative position within that bucket.
fn invert_cdf(cdf: &[f32], x: f32) -> (usize, f32) {
    let index = cdf.partition_point(|&c| c <= x).min(cdf.len() - 1);
    let low = if index == 0 { 0.0 } else { cdf[index - 1] };
    let high = cdf[index];
    let fraction = if high > low {
        ((x - low) / (high - low)).clamp(0.0, 0.999_999)
    } else {
        0.5
    };
    (index, fraction)
}

// -------------------------------------------------------------------------------------------------

/// Per-image accumulation of training error between rebuilds of the [`ErrorMap`].
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorAccumulator {
    resolution: u32,
    errors: Vec<Vec<f32>>,
}

impl ErrorAccumulator {
    /// Creates an accumulator with all error zero.
    ///
    /// Fails if `resolution` is zero.
    pub fn new(n_images: usize, resolution: u32) -> crate::Result<Self> {
        check_resolution(resolution)?;
        Ok(Self {
            resolution,
            errors: vec![vec![0.0; (resolution * resolution) as usize]; n_images],
        })
    }

    /// Sets all accumulated error to zero.
    pub fn clear(&mut self) {
        for e in self.errors.iter_mut().flatten() {
            *e = 0.0;
        }
    }

    /// Accumulated error, per image, row-major.
    pub fn errors(&self) -> &[Vec<f32>] {
        &self.errors
    }

    /// Total accumulated error over all images.
    pub fn total(&self) -> f32 {
        self.errors.iter().flatten().sum()
    }

    /// Adds `value` at position `uv` of `image`, split bilinearly among the nearest cell
    /// centers.
    pub fn deposit(&mut self, image: usize, uv: Uv, value: f32) {
        let res = self.resolution as i64;
        let px = uv.x * self.resolution as f32 - 0.5;
        let py = uv.y * self.resolution as f32 - 0.5;
        let x0 = px.floor();
        let y0 = py.floor();
        let fx = px - x0;
        let fy = py - y0;
        let errors = &mut self.errors[image];
        for (dx, dy, weight) in [
            (0, 0, (1.0 - fx) * (1.0 - fy)),
            (1, 0, fx * (1.0 - fy)),
            (0, 1, (1.0 - fx) * fy),
            (1, 1, fx * fy),
        ] {
            let x = (x0 as i64 + dx).clamp(0, res - 1);
            let y = (y0 as i64 + dy).clamp(0, res - 1);
            errors[(y * res + x) as usize] += weight * value;
        }
    }

    /// Multiplies all accumulated error by `factor`.
    pub fn decay(&mut self, factor: f32) {
        for e in self.errors.iter_mut().flatten() {
            *e *= factor;
        }
    }

    /// Builds an [`ErrorMap`] from the accumulated error, optionally weighted per cell.
    pub fn to_error_map(&self, weights: Option<&[Vec<f32>]>) -> ErrorMap {
        match weights {
            Some(weights) => {
                let weighted: Vec<Vec<f32>> = self
                    .errors
                    .iter()
                    .zip(weights)
                    .map(|(e, w)| e.iter().zip(w).map(|(e, w)| e * w).collect())
                    .collect();
                ErrorMap::build_checked(&weighted, self.resolution)
            }
            None => ErrorMap::build_checked(&self.errors, self.resolution),
        }
    }
}

/// Mean absolute Laplacian of luminance over each of `resolution²` cells of the image,
/// row-major. High values mark detailed regions.
pub fn sharpness_map(image: &TrainingImage, resolution: u32) -> Vec<f32> {
    let (w, h) = (image.width(), image.height());
    let luminance = |x: i64, y: i64| {
        let x = x.clamp(0, i64::from(w) - 1) as u32;
        let y = y.clamp(0, i64::from(h) - 1) as u32;
        image.pixel(x, y).to_rgb().luminance()
    };
    let cells = (resolution * resolution) as usize;
    let mut sums = vec![0.0f32; cells];
    let mut counts = vec![0u32; cells];
    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (i64::from(x), i64::from(y));
            let laplacian = 4.0 * luminance(xi, yi)
                - luminance(xi - 1, yi)
                - luminance(xi + 1, yi)
                - luminance(xi, yi - 1)
                - luminance(xi, yi + 1);
            let cx = (u64::from(x) * u64::from(resolution) / u64::from(w)) as u32;
            let cy = (u64::from(y) * u64::from(resolution) / u64::from(h)) as u32;
            let cell = (cy * resolution + cx) as usize;
            sums[cell] += laplacian.abs();
            counts[cell] += 1;
        }
    }
    sums.iter()
        .zip(&counts)
        .map(|(&s, &c)| if c > 0 { s / c as f32 } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::math::{CameraPose, Rgba};
    use euclid::size2;
    use nerf_march_base::util::MultiFailure;
    use rand::{Rng as _, SeedableRng as _};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn assert_valid_cdf(cdf: &[f32]) {
        assert!(cdf.windows(2).all(|w| w[0] <= w[1]), "{cdf:?}");
        assert_eq!(*cdf.last().unwrap(), 1.0);
    }

    #[test]
    fn cdfs_are_monotonic_and_normalized() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let res = 8;
        let errors: Vec<Vec<f32>> = (0..4)
            .map(|image| {
                (0..res * res)
                    .map(|_| if image == 2 { 0.0 } else { rng.random::<f32>().powi(4) })
                    .collect()
            })
            .collect();
        let map = ErrorMap::build(&errors, res).unwrap();

        let mut failures = MultiFailure::new();
        let cdf = map.image_cdf().to_vec();
        failures.catch("image cdf", move || assert_valid_cdf(&cdf));
        for image in 0..map.n_images() {
            let cdf = map.row_cdf(image).to_vec();
            failures.catch(format!("image {image} rows"), move || assert_valid_cdf(&cdf));
            for row in 0..res {
                let cdf = map.column_cdf(image, row).to_vec();
                failures.catch(format!("image {image} row {row}"), move || {
                    assert_valid_cdf(&cdf);
                });
            }
        }
    }

    #[test]
    fn samples_stay_in_range() {
        let map = ErrorMap::build(&[vec![0.0, 5.0, 0.0, 1.0]], 2).unwrap();
        for (u, v, w) in [(0.0, 0.0, 0.0), (0.999_999, 0.999_999, 0.999_999), (0.5, 0.5, 0.5)] {
            let sample = map.sample(u, v, w);
            assert!(sample.x < 2 && sample.y < 2);
            assert!((0.0..1.0).contains(&sample.uv.x) && (0.0..1.0).contains(&sample.uv.y));
            // Zero-error cells are never chosen.
            assert!(sample.x == 1, "{sample:?}");
        }
    }

    #[test]
    fn zero_error_is_uniform() {
        let map = ErrorMap::build(&[vec![0.0; 4], vec![0.0; 4]], 2).unwrap();
        assert_eq!(map.image_cdf(), &[0.5, 1.0]);
        assert_eq!(map.row_cdf(0), &[0.5, 1.0]);
        assert_eq!(map.sample(0.25, 0.75, 0.1).pdf, 1.0);
        assert_eq!(map, ErrorMap::uniform(2, 2).unwrap());
        assert_eq!(
            ErrorAccumulator::new(2, 2).unwrap().to_error_map(None),
            ErrorMap::uniform(2, 2).unwrap()
        );
    }

    #[test]
    fn nonzero_image_has_nonzero_probability() {
        let mut errors = vec![vec![0.0; 4]; 3];
        errors[0] = vec![1e6; 4];
        errors[2][3] = 1e-6;
        let map = ErrorMap::build(&errors, 2).unwrap();
        assert!(map.image_probability(2) > 0.0, "{:?}", map.image_cdf());
        assert_eq!(map.image_probability(1), 0.0);
        // Only the last cell of image 2 can be chosen in it.
        let sample = map.sample(0.0, 0.0, 0.999_999_9);
        assert_eq!((sample.image, sample.x, sample.y), (2, 1, 1));
    }

    #[test]
    fn small_row_after_large_rows_can_be_sampled() {
        let map = ErrorMap::build(&[vec![1e8, 1e8, 1.0, 0.0]], 2).unwrap();
        let row_cdf = map.row_cdf(0);
        assert!(row_cdf[0] < row_cdf[1], "{row_cdf:?}");
        assert_eq!(row_cdf[1], 1.0);
        let sample = map.sample_in_image(0, 0.5, 0.999_999_9);
        assert_eq!((sample.x, sample.y), (0, 1));
        assert!(sample.pdf > 0.0);
    }

    #[test]
    fn zero_resolution_is_rejected() {
        assert!(matches!(
            ErrorMap::build(&[], 0),
            Err(crate::NerfError::InvalidErrorMapResolution(0))
        ));
        assert!(matches!(
            ErrorAccumulator::new(1, 0),
            Err(crate::NerfError::InvalidErrorMapResolution(0))
        ));
    }

    #[test]
    fn deposit_splits_bilinearly() {
        let mut acc = ErrorAccumulator::new(1, 4).unwrap();
        // Exactly on a cell center.
        acc.deposit(0, Uv::new(0.375, 0.125), 2.0);
        assert_eq!(acc.errors()[0][1], 2.0);
        // Halfway between four centers.
        acc.deposit(0, Uv::new(0.5, 0.5), 4.0);
        for cell in [5, 6, 9, 10] {
            assert_eq!(acc.errors()[0][cell], 1.0);
        }
        assert_eq!(acc.total(), 6.0);
        acc.decay(0.5);
        assert_eq!(acc.total(), 3.0);
        acc.clear();
        assert_eq!(acc.total(), 0.0);
    }

    #[test]
    fn sharpness_finds_edges() {
        let (w, h) = (8, 8);
        let pixels = (0..w * h)
            .map(|i| {
                let x = i % w;
                // A vertical edge between columns 5 and 6.
                if x >= 6 {
                    Rgba::new(1.0, 1.0, 1.0, 1.0)
                } else {
                    Rgba::new(0.0, 0.0, 0.0, 1.0)
                }
            })
            .collect();
        let image = TrainingImage::new(
            Camera::new(CameraPose::identity(), size2(w, h), 8.0),
            pixels,
        );
        let sharpness = sharpness_map(&image, 2);
        assert_eq!(sharpness[0], 0.0);
        assert!(sharpness[1] > 0.1);
        assert_eq!(sharpness[0], sharpness[2]);
    }
}
