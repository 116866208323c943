use crate::math::{ImageSize, Rgba};

/// Accumulates rendered frames into a progressively refined image.
///
/// Each call to [`Tracer::render()`](super::Tracer::render) adds one or more samples per
/// pixel; [`Self::pixels()`] returns the running mean.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderBuffer {
    resolution: ImageSize,
    /// Per pixel, the sum over samples of linear color (over the background) and opacity.
    sums: Vec<[f32; 4]>,
    spp: u32,
}

impl RenderBuffer {
    /// Creates an empty buffer.
    pub fn new(resolution: ImageSize) -> Self {
        Self {
            resolution,
            sums: vec![[0.0; 4]; resolution.area() as usize],
            spp: 0,
        }
    }

    /// Size of the image.
    pub fn resolution(&self) -> ImageSize {
        self.resolution
    }

    /// Samples per pixel accumulated so far.
    pub fn spp(&self) -> u32 {
        self.spp
    }

    /// Discards all accumulated samples.
    pub fn reset(&mut self) {
        self.sums.fill([0.0; 4]);
        self.spp = 0;
    }

    /// Discards all accumulated samples and changes the resolution if it differs.
    pub fn ensure_resolution(&mut self, resolution: ImageSize) {
        if resolution != self.resolution {
            *self = Self::new(resolution);
        }
    }

    /// Adds a frame whose pixels are each the sum of `samples` samples.
    pub(crate) fn accumulate(&mut self, frame: &[[f32; 4]], samples: u32) {
        assert_eq!(frame.len(), self.sums.len());
        for (sum, add) in self.sums.iter_mut().zip(frame) {
            for (s, a) in sum.iter_mut().zip(add) {
                *s += a;
            }
        }
        self.spp += samples;
    }

    /// The mean of the accumulated samples at one pixel: linear color already composited over
    /// the background, with opacity of the volume alone in alpha.
    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        self.mean(self.sums[(y * self.resolution.width + x) as usize])
    }

    fn mean(&self, [r, g, b, a]: [f32; 4]) -> Rgba {
        if self.spp == 0 {
            return Rgba::TRANSPARENT;
        }
        let scale = (self.spp as f32).recip();
        Rgba::new(r * scale, g * scale, b * scale, a * scale)
    }

    /// Mean colors of all pixels, row-major, top row first.
    pub fn pixels(&self) -> Vec<Rgba> {
        self.sums.iter().map(|&sum| self.mean(sum)).collect()
    }

    /// Quantizes the image to 8 bits per channel, sRGB-encoding the color if `to_srgb`.
    pub fn to_rgba8(&self, to_srgb: bool) -> Vec<[u8; 4]> {
        self.sums
            .iter()
            .map(|&sum| {
                let color = self.mean(sum);
                if to_srgb {
                    color.to_srgb8()
                } else {
                    color.to_linear8()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use euclid::size2;

    #[test]
    fn progressive_mean() {
        let mut buffer = RenderBuffer::new(size2(2, 1));
        assert_eq!(buffer.pixel(0, 0), Rgba::TRANSPARENT);
        buffer.accumulate(&[[1.0, 0.0, 0.0, 1.0], [0.0; 4]], 1);
        buffer.accumulate(&[[0.0, 0.0, 2.0, 2.0], [0.0; 4]], 2);
        assert_eq!(buffer.spp(), 3);
        assert_eq!(
            buffer.pixel(0, 0),
            Rgba::new(1.0 / 3.0, 0.0, 2.0 / 3.0, 1.0)
        );
        buffer.reset();
        assert_eq!(buffer.spp(), 0);
    }

    #[test]
    fn rgba8_encoding() {
        let mut buffer = RenderBuffer::new(size2(1, 1));
        buffer.accumulate(&[[0.5, 0.0, 1.0, 1.0]], 1);
        assert_eq!(buffer.to_rgba8(false), vec![[128, 0, 255, 255]]);
        assert_eq!(buffer.to_rgba8(true)[0][0], 188);
    }
}
