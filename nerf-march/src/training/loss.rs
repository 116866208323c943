use serde::{Deserialize, Serialize};

use crate::math::Rgb;

/// Per-channel loss functions comparing predicted and target colors.
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
pub enum LossKind {
    /// Absolute difference.
    L1,
    /// Squared difference.
    #[default]
    L2,
    /// Absolute difference relative to the target.
    Mape,
    /// Absolute difference relative to the mean of prediction and target.
    Smape,
    /// Squared near zero, absolute beyond [`HUBER_ALPHA`].
    Huber,
    /// Logarithm of one plus the absolute difference.
    #[strum(serialize = "log_l1")]
    #[serde(rename = "log_l1")]
    LogL1,
    /// Squared difference relative to the squared prediction.
    #[strum(serialize = "relative_l2")]
    #[serde(rename = "relative_l2")]
    RelativeL2,
}

/// Transition point between the quadratic and linear parts of [`LossKind::Huber`].
pub const HUBER_ALPHA: f32 = 0.1;

/// Keeps relative losses finite for zero colors.
const RELATIVE_EPSILON: f32 = 0.01;

/// A loss value and its derivative with respect to the prediction.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[allow(clippy::exhaustive_structs)]
pub struct LossAndGradient {
    /// Value of the loss.
    pub loss: f32,
    /// Derivative of the loss with respect to the prediction.
    pub gradient: f32,
}

impl LossKind {
    /// Parses a loss name, reporting failure as a [`NerfError`](crate::NerfError).
    pub fn parse(name: &str) -> crate::Result<Self> {
        name.parse()
            .map_err(|_| crate::NerfError::UnknownLossKind(name.to_owned()))
    }

    /// Evaluates the loss for one channel.
    ///
    /// The relative losses treat their normalizing factor as a constant when
    /// differentiating.
    pub fn evaluate(self, prediction: f32, target: f32) -> LossAndGradient {
        let difference = prediction - target;
        let abs = difference.abs();
        let sign = sign(difference);
        let (loss, gradient) = match self {
            LossKind::L1 => (abs, sign),
            LossKind::L2 => (difference * difference, 2.0 * difference),
            LossKind::Mape => {
                let scale = 1.0 / (target.abs() + RELATIVE_EPSILON);
                (abs * scale, sign * scale)
            }
            LossKind::Smape => {
                let scale = 2.0 / (prediction.abs() + target.abs() + RELATIVE_EPSILON);
                (abs * scale, sign * scale)
            }
            LossKind::Huber => {
                if abs > HUBER_ALPHA {
                    (abs - HUBER_ALPHA * 0.5, sign)
                } else {
                    (
                        difference * difference / (2.0 * HUBER_ALPHA),
                        difference / HUBER_ALPHA,
                    )
                }
            }
            LossKind::LogL1 => ((abs + 1.0).ln(), sign / (abs + 1.0)),
            LossKind::RelativeL2 => {
                let scale = 1.0 / (prediction * prediction + RELATIVE_EPSILON);
                (difference * difference * scale, 2.0 * difference * scale)
            }
        };
        LossAndGradient { loss, gradient }
    }

    /// Evaluates the loss for each channel of a color.
    pub fn evaluate_rgb(self, prediction: Rgb, target: Rgb) -> [LossAndGradient; 3] {
        let p = prediction.to_array();
        let t = target.to_array();
        [0, 1, 2].map(|i| self.evaluate(p[i], t[i]))
    }
}

fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}
