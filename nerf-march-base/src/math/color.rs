//! Color data types. This module is private but reexported by its parent.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Mul, MulAssign, Sub};

use euclid::Vector3D;

/// Unit-of-measure type for vectors that contain color channels.
#[allow(clippy::exhaustive_enums)]
#[derive(Debug, Eq, PartialEq)]
pub enum Intensity {}

/// A floating-point RGB color value.
///
/// Whether the components are linear or sRGB-encoded depends on context; the
/// conversion functions say which they expect. Values are not clamped, since both
/// network predictions and intermediate sums may leave `[0, 1]`.
#[derive(Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgb(Vector3D<f32, Intensity>);

/// A floating-point RGBA color value with straight (not premultiplied) alpha.
#[derive(Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgba {
    rgb: Rgb,
    alpha: f32,
}

impl Rgb {
    /// Black; the constant equal to `Rgb::new(0., 0., 0.)`.
    pub const ZERO: Rgb = Rgb(Vector3D::new(0., 0., 0.));
    /// White; the constant equal to `Rgb::new(1., 1., 1.)`.
    pub const ONE: Rgb = Rgb(Vector3D::new(1., 1., 1.));

    /// Constructs a color from components.
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self(Vector3D::new(r, g, b))
    }

    /// Constructs a color from an array of components.
    #[inline]
    pub const fn from_array([r, g, b]: [f32; 3]) -> Self {
        Self::new(r, g, b)
    }

    /// Returns the red color component.
    #[inline]
    pub const fn red(self) -> f32 {
        self.0.x
    }
    /// Returns the green color component.
    #[inline]
    pub const fn green(self) -> f32 {
        self.0.y
    }
    /// Returns the blue color component.
    #[inline]
    pub const fn blue(self) -> f32 {
        self.0.z
    }

    /// Returns the components as an array.
    #[inline]
    pub const fn to_array(self) -> [f32; 3] {
        [self.0.x, self.0.y, self.0.z]
    }

    /// Applies `f` to each component.
    #[inline]
    #[must_use]
    pub fn map(self, mut f: impl FnMut(f32) -> f32) -> Self {
        Self::new(f(self.0.x), f(self.0.y), f(self.0.z))
    }

    /// Applies `f` to each pair of corresponding components.
    #[inline]
    #[must_use]
    pub fn zip(self, other: Self, mut f: impl FnMut(f32, f32) -> f32) -> Self {
        Self::new(
            f(self.0.x, other.0.x),
            f(self.0.y, other.0.y),
            f(self.0.z, other.0.z),
        )
    }

    /// Sum of the components.
    #[inline]
    pub fn component_sum(self) -> f32 {
        self.0.x + self.0.y + self.0.z
    }

    /// Dot product of the components, treating colors as vectors.
    #[inline]
    pub fn dot(self, other: Self) -> f32 {
        self.0.dot(other.0)
    }

    /// Mean of the components.
    #[inline]
    pub fn mean(self) -> f32 {
        self.component_sum() / 3.0
    }

    /// Combines the red, green, and blue components to obtain a relative luminance
    /// (“grayscale”) value. Expects linear components.
    #[inline]
    pub fn luminance(self) -> f32 {
        // Rec. 709 coefficients
        self.0.x * 0.2126 + self.0.y * 0.7152 + self.0.z * 0.0722
    }

    /// Converts sRGB-encoded components to linear.
    #[inline]
    #[must_use]
    pub fn srgb_to_linear(self) -> Self {
        self.map(component_from_srgb)
    }

    /// Converts linear components to sRGB encoding.
    #[inline]
    #[must_use]
    pub fn linear_to_srgb(self) -> Self {
        self.map(component_to_srgb)
    }

    /// Attaches an alpha value.
    #[inline]
    pub const fn with_alpha(self, alpha: f32) -> Rgba {
        Rgba { rgb: self, alpha }
    }

    /// Attaches an alpha value of 1.
    #[inline]
    pub const fn with_alpha_one(self) -> Rgba {
        self.with_alpha(1.0)
    }
}

impl Rgba {
    /// Transparent black (all components zero).
    pub const TRANSPARENT: Rgba = Rgb::ZERO.with_alpha(0.0);

    /// Constructs a color from components.
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Rgb::new(r, g, b).with_alpha(a)
    }

    /// Returns the color components without alpha.
    #[inline]
    pub const fn to_rgb(self) -> Rgb {
        self.rgb
    }

    /// Returns the alpha component.
    #[inline]
    pub const fn alpha(self) -> f32 {
        self.alpha
    }

    /// Returns the components as an array.
    #[inline]
    pub const fn to_array(self) -> [f32; 4] {
        let [r, g, b] = self.rgb.to_array();
        [r, g, b, self.alpha]
    }

    /// Composites this color over an opaque background.
    #[inline]
    pub fn composite_over(self, background: Rgb) -> Rgb {
        self.rgb * self.alpha + background * (1.0 - self.alpha)
    }

    /// Converts linear components to 8-bit sRGB, clamping out-of-range values.
    /// Alpha is stored linearly.
    #[inline]
    pub fn to_srgb8(self) -> [u8; 4] {
        let [r, g, b] = self.rgb.linear_to_srgb().to_array();
        [
            component_to_u8(r),
            component_to_u8(g),
            component_to_u8(b),
            component_to_u8(self.alpha),
        ]
    }

    /// Quantizes components to 8 bits without any transfer function.
    #[inline]
    pub fn to_linear8(self) -> [u8; 4] {
        self.to_array().map(component_to_u8)
    }
}

impl Add for Rgb {
    type Output = Self;
    #[inline]
    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}
impl AddAssign for Rgb {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}
impl Sub for Rgb {
    type Output = Self;
    #[inline]
    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}
/// Multiplies two color values componentwise.
impl Mul<Rgb> for Rgb {
    type Output = Self;
    #[inline]
    fn mul(self, other: Rgb) -> Self {
        Self(self.0.component_mul(other.0))
    }
}
/// Multiplies this color value by a scalar.
impl Mul<f32> for Rgb {
    type Output = Self;
    #[inline]
    fn mul(self, scalar: f32) -> Self {
        Self(self.0 * scalar)
    }
}
impl MulAssign<f32> for Rgb {
    #[inline]
    fn mul_assign(&mut self, scalar: f32) {
        self.0 *= scalar;
    }
}
impl Sum for Rgb {
    #[inline]
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Rgb::ZERO, |a, b| a + b)
    }
}

impl From<[f32; 3]> for Rgb {
    #[inline]
    fn from(value: [f32; 3]) -> Self {
        Self::from_array(value)
    }
}
impl From<Rgb> for [f32; 3] {
    #[inline]
    fn from(value: Rgb) -> Self {
        value.to_array()
    }
}
impl From<[f32; 4]> for Rgba {
    #[inline]
    fn from([r, g, b, a]: [f32; 4]) -> Self {
        Self::new(r, g, b, a)
    }
}

impl fmt::Debug for Rgb {
    #[allow(clippy::missing_inline_in_public_items)]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "Rgb({:?}, {:?}, {:?})",
            self.red(),
            self.green(),
            self.blue()
        )
    }
}
impl fmt::Debug for Rgba {
    #[allow(clippy::missing_inline_in_public_items)]
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "Rgba({:?}, {:?}, {:?}, {:?})",
            self.rgb.red(),
            self.rgb.green(),
            self.rgb.blue(),
            self.alpha
        )
    }
}

/// Applies the sRGB encoding curve to one linear component.
#[inline]
pub fn component_to_srgb(c: f32) -> f32 {
    // Source: <https://en.wikipedia.org/w/index.php?title=SRGB&oldid=1002296118#The_forward_transformation_(CIE_XYZ_to_sRGB)> (version as of Feb 3, 2020)
    if c <= 0.0031308 {
        c * (323. / 25.)
    } else {
        (211. * libm::powf(c, 5. / 12.) - 11.) / 200.
    }
}

/// Removes the sRGB encoding curve from one component.
#[inline]
pub fn component_from_srgb(c: f32) -> f32 {
    // Source: <https://en.wikipedia.org/w/index.php?title=SRGB&oldid=1002296118#The_reverse_transformation> (version as of Feb 3, 2020)
    if c <= 0.04045 {
        c * (25. / 323.)
    } else {
        // Use pure-Rust implementation from `libm` to avoid platform-dependent rounding.
        libm::powf((200. * c + 11.) / 211., 12. / 5.)
    }
}

#[inline]
fn component_to_u8(c: f32) -> u8 {
    // out of range values will be clamped by `as u8`
    (c * 255.).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn srgb_round_trip_endpoints() {
        assert_eq!(component_to_srgb(0.0), 0.0);
        assert!((component_to_srgb(1.0) - 1.0).abs() < 1e-6);
        assert!((component_from_srgb(1.0) - 1.0).abs() < 1e-6);
        for i in 0..=255u8 {
            let c = f32::from(i) / 255.0;
            let back = component_to_srgb(component_from_srgb(c));
            assert!((back - c).abs() < 1e-5, "{c} became {back}");
        }
    }

    #[test]
    fn srgb_midpoint() {
        // 50% sRGB gray is about 21.4% linear.
        assert!((component_from_srgb(0.5) - 0.21404).abs() < 1e-4);
    }

    #[test]
    fn to_srgb8_clamps() {
        assert_eq!(Rgba::new(2.0, -1.0, 1.0, 0.5).to_srgb8(), [255, 0, 255, 128]);
    }

    #[test]
    fn composite_over() {
        let c = Rgba::new(1.0, 0.0, 0.0, 0.25).composite_over(Rgb::new(0.0, 0.0, 1.0));
        assert_eq!(c, Rgb::new(0.25, 0.0, 0.75));
    }

    #[test]
    fn debug() {
        assert_eq!(format!("{:?}", Rgb::new(0.5, 1.0, 0.0)), "Rgb(0.5, 1.0, 0.0)");
    }
}
