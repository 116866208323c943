//! First-order optimizers: Adam on fixed-size vectors and on rotations, used for camera
//! parameters, and a flat-buffer Adam for field parameters.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::math::{FreeVector, rotation_from_vector, rotation_to_vector};

/// Hyperparameters of the Adam optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct AdamHyperparameters {
    /// Step size.
    pub learning_rate: f32,
    /// Decay rate of the first moment estimate.
    pub beta1: f32,
    /// Decay rate of the second moment estimate.
    pub beta2: f32,
    /// Added to the root of the second moment to avoid division by zero.
    pub epsilon: f32,
}

impl AdamHyperparameters {
    /// Default hyperparameters with the given learning rate.
    pub const fn with_learning_rate(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.99,
            epsilon: 1e-8,
        }
    }

    /// Learning rate for the `iteration`th step (counting from 1), including bias correction.
    fn corrected_learning_rate(&self, iteration: u32) -> f32 {
        let t = iteration as i32;
        self.learning_rate * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t))
    }

    /// Updates one element's moments in place and returns the step to subtract.
    #[inline]
    fn update(&self, lr: f32, first: &mut f32, second: &mut f32, gradient: f32) -> f32 {
        *first = self.beta1 * *first + (1.0 - self.beta1) * gradient;
        *second = self.beta2 * *second + (1.0 - self.beta2) * gradient * gradient;
        lr * *first / (second.sqrt() + self.epsilon)
    }
}

impl Default for AdamHyperparameters {
    fn default() -> Self {
        Self::with_learning_rate(1e-3)
    }
}

/// Adam optimizer state for a single `N`-dimensional variable.
#[derive(Clone, Debug, PartialEq)]
pub struct Adam<const N: usize> {
    hyperparameters: AdamHyperparameters,
    variable: [f32; N],
    first_moment: [f32; N],
    second_moment: [f32; N],
    iteration: u32,
}

impl<const N: usize> Adam<N> {
    /// Creates an optimizer whose variable starts at `initial`.
    pub fn new(initial: [f32; N], hyperparameters: AdamHyperparameters) -> Self {
        Self {
            hyperparameters,
            variable: initial,
            first_moment: [0.0; N],
            second_moment: [0.0; N],
            iteration: 0,
        }
    }

    /// Takes one step against `gradient`.
    pub fn step(&mut self, gradient: [f32; N]) {
        self.iteration += 1;
        let hp = self.hyperparameters;
        let lr = hp.corrected_learning_rate(self.iteration);
        for i in 0..N {
            self.variable[i] -= hp.update(
                lr,
                &mut self.first_moment[i],
                &mut self.second_moment[i],
                gradient[i],
            );
        }
    }

    /// The current value of the variable.
    pub fn variable(&self) -> [f32; N] {
        self.variable
    }

    /// Number of steps taken.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Changes the learning rate for future steps.
    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.hyperparameters.learning_rate = learning_rate;
    }
}

/// Adam optimizer for an orientation, represented as a rotation vector.
///
/// The moment estimates live in the tangent space; each step is a small rotation
/// composed onto the current orientation, so the variable always stays a valid rotation.
#[derive(Clone, Debug, PartialEq)]
pub struct RotationAdam {
    hyperparameters: AdamHyperparameters,
    variable: FreeVector,
    first_moment: [f32; 3],
    second_moment: [f32; 3],
    iteration: u32,
}

impl RotationAdam {
    /// Creates an optimizer starting at the rotation `initial`.
    pub fn new(initial: FreeVector, hyperparameters: AdamHyperparameters) -> Self {
        Self {
            hyperparameters,
            variable: initial,
            first_moment: [0.0; 3],
            second_moment: [0.0; 3],
            iteration: 0,
        }
    }

    /// Takes one step against `gradient`, the derivative of the loss with respect to an
    /// infinitesimal rotation applied after the current one.
    pub fn step(&mut self, gradient: FreeVector) {
        self.iteration += 1;
        let hp = self.hyperparameters;
        let lr = hp.corrected_learning_rate(self.iteration);
        let g = gradient.to_array();
        let mut delta = [0.0; 3];
        for i in 0..3 {
            delta[i] = -hp.update(
                lr,
                &mut self.first_moment[i],
                &mut self.second_moment[i],
                g[i],
            );
        }
        let current = rotation_from_vector(self.variable);
        let step = rotation_from_vector(delta.into());
        self.variable = rotation_to_vector(current.then(&step));
    }

    /// The current rotation vector.
    pub fn variable(&self) -> FreeVector {
        self.variable
    }
}

// -------------------------------------------------------------------------------------------------

/// An optimizer for the flat parameter buffer of a
/// [`TrainableField`](crate::TrainableField).
pub trait ParameterOptimizer: fmt::Debug + Send + Sync {
    /// Updates `parameters` in place given the accumulated `gradients`.
    fn step(&mut self, parameters: &mut [f32], gradients: &[f32]);

    /// Number of steps taken.
    fn step_count(&self) -> u32;

    /// Forgets all state accumulated by previous steps.
    fn reset(&mut self);
}

/// Adam over a flat parameter buffer, with one moment pair per parameter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatAdam {
    hyperparameters: AdamHyperparameters,
    first_moment: Vec<f32>,
    second_moment: Vec<f32>,
    iteration: u32,
}

impl FlatAdam {
    /// Creates an optimizer; moment buffers are sized on the first step.
    pub fn new(hyperparameters: AdamHyperparameters) -> Self {
        Self {
            hyperparameters,
            ..Self::default()
        }
    }
}

impl ParameterOptimizer for FlatAdam {
    fn step(&mut self, parameters: &mut [f32], gradients: &[f32]) {
        assert_eq!(parameters.len(), gradients.len());
        if self.first_moment.len() != parameters.len() {
            self.first_moment = vec![0.0; parameters.len()];
            self.second_moment = vec![0.0; parameters.len()];
        }
        self.iteration += 1;
        let hp = self.hyperparameters;
        let lr = hp.corrected_learning_rate(self.iteration);
        for (((p, &g), m), v) in parameters
            .iter_mut()
            .zip(gradients)
            .zip(&mut self.first_moment)
            .zip(&mut self.second_moment)
        {
            *p -= hp.update(lr, m, v, g);
        }
    }

    fn step_count(&self) -> u32 {
        self.iteration
    }

    fn reset(&mut self) {
        self.first_moment.clear();
        self.second_moment.clear();
        self.iteration = 0;
    }
}
