//! Interface to the learned radiance field.

use euclid::Vector3D;
use serde::{Deserialize, Serialize};

use crate::math::{FreePoint, FreeVector};

/// One query of the radiance field: a sample point along a ray.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct NetworkInput {
    /// Sample position in the scene frame.
    pub position: FreePoint,
    /// Unit direction of the ray the sample lies on.
    pub direction: FreeVector,
    /// Length of the ray segment the sample represents. Zero marks an unused slot.
    pub dt: f32,
}

impl NetworkInput {
    /// Constructs a sample.
    pub fn new(position: FreePoint, direction: FreeVector, dt: f32) -> Self {
        Self {
            position,
            direction,
            dt,
        }
    }

    /// Whether this slot holds a sample.
    pub fn is_used(&self) -> bool {
        self.dt > 0.0
    }
}

/// Raw (pre-activation) output of the radiance field for one sample.
///
/// Also used for gradients with respect to those outputs.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct NetworkOutput {
    /// Raw color channels; the engine applies the configured color [`Activation`].
    pub rgb: [f32; 3],
    /// Raw density; the engine applies the configured density [`Activation`].
    pub density: f32,
}

impl NetworkOutput {
    /// Constructs an output from its raw channels.
    pub const fn new(rgb: [f32; 3], density: f32) -> Self {
        Self { rgb, density }
    }

    /// The channels as `[r, g, b, density]`.
    pub const fn to_array(self) -> [f32; 4] {
        let [r, g, b] = self.rgb;
        [r, g, b, self.density]
    }

    /// Inverse of [`Self::to_array()`].
    pub const fn from_array([r, g, b, density]: [f32; 4]) -> Self {
        Self::new([r, g, b], density)
    }
}

/// A learned function from position and direction to color and density.
///
/// Implementations must be pure functions of their parameters: evaluating the same
/// inputs twice must give bit-identical outputs, since rendering is required to be
/// reproducible.
pub trait RadianceField: Send + Sync {
    /// Evaluates the field on every input. `outputs` has the same length as `inputs`.
    ///
    /// Inputs whose `dt` is zero are padding; their outputs are ignored.
    fn evaluate(&self, inputs: &[NetworkInput], outputs: &mut [NetworkOutput]);

    /// Evaluates only the raw density at each position.
    ///
    /// The default implementation calls [`Self::evaluate()`] with an arbitrary direction.
    fn density(&self, positions: &[FreePoint], densities: &mut [f32]) {
        let inputs: Vec<NetworkInput> = positions
            .iter()
            .map(|&position| NetworkInput::new(position, Vector3D::new(0.0, 0.0, 1.0), 1.0))
            .collect();
        let mut outputs = vec![NetworkOutput::default(); inputs.len()];
        self.evaluate(&inputs, &mut outputs);
        for (d, o) in densities.iter_mut().zip(outputs) {
            *d = o.density;
        }
    }
}

/// A [`RadianceField`] whose parameters can be trained by backpropagation.
pub trait TrainableField: RadianceField {
    /// Accumulates parameter gradients for the given loss gradients with respect to raw
    /// outputs.
    ///
    /// If `position_gradients` is provided, it receives the gradient of the loss with
    /// respect to each input position (used to optimize cameras).
    fn backward(
        &mut self,
        inputs: &[NetworkInput],
        output_gradients: &[NetworkOutput],
        position_gradients: Option<&mut [FreeVector]>,
    );

    /// Returns the flat parameter buffer and the matching gradient accumulator.
    fn parameters_and_gradients(&mut self) -> (&mut [f32], &mut [f32]);

    /// Resets accumulated gradients to zero.
    fn zero_gradients(&mut self) {
        self.parameters_and_gradients().1.fill(0.0);
    }
}

impl<F: RadianceField + ?Sized> RadianceField for &F {
    fn evaluate(&self, inputs: &[NetworkInput], outputs: &mut [NetworkOutput]) {
        (**self).evaluate(inputs, outputs);
    }
    fn density(&self, positions: &[FreePoint], densities: &mut [f32]) {
        (**self).density(positions, densities);
    }
}

// -------------------------------------------------------------------------------------------------

/// Output activation functions, applied by the engine to raw field outputs.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[non_exhaustive]
pub enum Activation {
    /// Identity.
    None,
    /// `max(x, 0)`.
    #[strum(serialize = "relu")]
    #[serde(rename = "relu")]
    ReLU,
    /// The logistic sigmoid, `1 / (1 + e^-x)`.
    Logistic,
    /// `e^x`, with the argument clamped to avoid overflow.
    #[default]
    Exponential,
}

impl Activation {
    /// Argument bound for [`Activation::Exponential`].
    const EXP_CLAMP: f32 = 15.0;

    /// Applies the activation.
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::None => x,
            Activation::ReLU => x.max(0.0),
            Activation::Logistic => logistic(x),
            Activation::Exponential => x.clamp(-Self::EXP_CLAMP, Self::EXP_CLAMP).exp(),
        }
    }

    /// Derivative of the activation at raw value `x`.
    #[inline]
    pub fn derivative(self, x: f32) -> f32 {
        match self {
            Activation::None => 1.0,
            Activation::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Logistic => {
                let s = logistic(x);
                s * (1.0 - s)
            }
            Activation::Exponential => x.clamp(-Self::EXP_CLAMP, Self::EXP_CLAMP).exp(),
        }
    }

    /// Parses an activation name, reporting failure as a [`NerfError`](crate::NerfError).
    pub fn parse(name: &str) -> crate::Result<Self> {
        name.parse()
            .map_err(|_| crate::NerfError::UnknownActivation(name.to_owned()))
    }
}

#[inline]
fn logistic(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use strum::VariantArray as _;

    #[rstest]
    fn derivative_matches_finite_difference(
        #[values(Activation::None, Activation::ReLU, Activation::Logistic, Activation::Exponential)]
        activation: Activation,
        #[values(-1.3, 0.4, 2.0)] x: f32,
    ) {
        let h = 1e-3;
        let numeric = (activation.apply(x + h) - activation.apply(x - h)) / (2.0 * h);
        let analytic = activation.derivative(x);
        assert!(
            (numeric - analytic).abs() <= 1e-2 * analytic.abs().max(1.0),
            "{activation}: numeric {numeric} analytic {analytic}"
        );
    }

    #[test]
    fn exponential_does_not_overflow() {
        assert!(Activation::Exponential.apply(1000.0).is_finite());
    }

    #[test]
    fn parse_names() {
        for &activation in Activation::VARIANTS {
            assert_eq!(Activation::parse(&activation.to_string()).unwrap(), activation);
        }
        assert_eq!(Activation::parse("ReLU").unwrap(), Activation::ReLU);
        assert!(matches!(
            Activation::parse("softplus"),
            Err(crate::NerfError::UnknownActivation(name)) if name == "softplus"
        ));
    }
}
