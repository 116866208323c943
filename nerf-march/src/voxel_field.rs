use crate::field::{NetworkInput, NetworkOutput, RadianceField, TrainableField};
use crate::math::{Aab, FreePoint, FreeVector};
use crate::par;

/// Number of parameters per lattice node: three raw color channels and raw density.
const CHANNELS: usize = 4;

/// A small trainable radiance field: raw outputs stored on a regular lattice of nodes
/// spanning a box, trilinearly interpolated, independent of view direction.
///
/// This is far less expressive than a neural field but has exact, cheap gradients with
/// respect to both its parameters and the sample position, which makes it suitable for
/// exercising the training machinery.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelField {
    resolution: u32,
    bounds: Aab,
    parameters: Vec<f32>,
    gradients: Vec<f32>,
}

/// Trilinear interpolation stencil at one position.
struct Stencil {
    nodes: [usize; 8],
    weights: [f32; 8],
    /// Derivative of each weight with respect to the scene position.
    weight_gradients: [FreeVector; 8],
}

impl VoxelField {
    /// Creates a field with `resolution³` nodes spanning `bounds`, all holding the same raw
    /// output.
    ///
    /// Panics if `resolution < 2`.
    pub fn new(resolution: u32, bounds: Aab, initial: NetworkOutput) -> Self {
        assert!(resolution >= 2, "voxel field resolution must be at least 2");
        let nodes = (resolution as usize).pow(3);
        let parameters = initial.to_array().repeat(nodes);
        Self {
            resolution,
            bounds,
            gradients: vec![0.0; parameters.len()],
            parameters,
        }
    }

    /// Nodes per axis.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// The raw outputs of all nodes, four per node, in `[x][y][z]` order.
    pub fn parameters(&self) -> &[f32] {
        &self.parameters
    }

    /// Sets the raw output at every node with `f(node position)`.
    pub fn fill(&mut self, mut f: impl FnMut(FreePoint) -> NetworkOutput) {
        let r = self.resolution;
        let step = self.bounds.size() / (r - 1) as f32;
        let lower = self.bounds.lower_bounds_p();
        for x in 0..r {
            for y in 0..r {
                for z in 0..r {
                    let position = lower
                        + FreeVector::new(x as f32 * step.x, y as f32 * step.y, z as f32 * step.z);
                    let node = self.node_index([x, y, z]);
                    self.parameters[node * CHANNELS..][..CHANNELS]
                        .copy_from_slice(&f(position).to_array());
                }
            }
        }
    }

    fn node_index(&self, [x, y, z]: [u32; 3]) -> usize {
        let r = self.resolution as usize;
        (x as usize * r + y as usize) * r + z as usize
    }

    fn stencil(&self, position: FreePoint) -> Stencil {
        let r = self.resolution;
        let size = self.bounds.size();
        let relative = position - self.bounds.lower_bounds_p();
        let scale = [
            (r - 1) as f32 / size.x,
            (r - 1) as f32 / size.y,
            (r - 1) as f32 / size.z,
        ];
        let mut base = [0u32; 3];
        let mut fraction = [0.0f32; 3];
        // Positions outside the bounds clamp to the boundary, with zero positional gradient.
        let mut inside = [true; 3];
        for axis in 0..3 {
            let q = relative.to_array()[axis] * scale[axis];
            let clamped = q.clamp(0.0, (r - 1) as f32);
            inside[axis] = q == clamped;
            base[axis] = (clamped.floor() as u32).min(r - 2);
            fraction[axis] = clamped - base[axis] as f32;
        }

        let mut stencil = Stencil {
            nodes: [0; 8],
            weights: [0.0; 8],
            weight_gradients: [FreeVector::zero(); 8],
        };
        for corner in 0..8 {
            let offset = [(corner >> 2) & 1, (corner >> 1) & 1, corner & 1].map(|o| o as u32);
            let mut axis_weights = [0.0; 3];
            let mut axis_slopes = [0.0; 3];
            for axis in 0..3 {
                if offset[axis] == 1 {
                    axis_weights[axis] = fraction[axis];
                    axis_slopes[axis] = scale[axis];
                } else {
                    axis_weights[axis] = 1.0 - fraction[axis];
                    axis_slopes[axis] = -scale[axis];
                }
                if !inside[axis] {
                    axis_slopes[axis] = 0.0;
                }
            }
            let [wx, wy, wz] = axis_weights;
            let [sx, sy, sz] = axis_slopes;
            stencil.nodes[corner] = self.node_index([
                base[0] + offset[0],
                base[1] + offset[1],
                base[2] + offset[2],
            ]);
            stencil.weights[corner] = wx * wy * wz;
            stencil.weight_gradients[corner] =
                FreeVector::new(sx * wy * wz, wx * sy * wz, wx * wy * sz);
        }
        stencil
    }

    fn interpolate(&self, stencil: &Stencil) -> [f32; CHANNELS] {
        let mut value = [0.0; CHANNELS];
        for (&node, &weight) in stencil.nodes.iter().zip(&stencil.weights) {
            for (v, p) in value.iter_mut().zip(&self.parameters[node * CHANNELS..][..CHANNELS]) {
                *v += weight * p;
            }
        }
        value
    }
}

impl RadianceField for VoxelField {
    fn evaluate(&self, inputs: &[NetworkInput], outputs: &mut [NetworkOutput]) {
        par::for_each_mut(outputs, |i, output| {
            let input = &inputs[i];
            if input.is_used() {
                *output = NetworkOutput::from_array(self.interpolate(&self.stencil(input.position)));
            }
        })
    }
}

impl TrainableField for VoxelField {
    fn backward(
        &mut self,
        inputs: &[NetworkInput],
        output_gradients: &[NetworkOutput],
        position_gradients: Option<&mut [FreeVector]>,
    ) {
        if let Some(position_gradients) = position_gradients {
            let this = &*self;
            par::for_each_mut(position_gradients, |i, gradient| {
                let input = &inputs[i];
                if !input.is_used() {
                    *gradient = FreeVector::zero();
                    return;
                }
                let stencil = this.stencil(input.position);
                let g = output_gradients[i].to_array();
                *gradient = stencil
                    .nodes
                    .iter()
                    .zip(&stencil.weight_gradients)
                    .map(|(&node, &dw)| {
                        let p = &this.parameters[node * CHANNELS..][..CHANNELS];
                        dw * p.iter().zip(&g).map(|(p, g)| p * g).sum::<f32>()
                    })
                    .fold(FreeVector::zero(), |a, b| a + b);
            });
        }

        // Scattered accumulation stays sequential so that results are reproducible.
        for (input, gradient) in inputs.iter().zip(output_gradients) {
            if !input.is_used() {
                continue;
            }
            let stencil = self.stencil(input.position);
            let g = gradient.to_array();
            for (&node, &weight) in stencil.nodes.iter().zip(&stencil.weights) {
                for (acc, g) in self.gradients[node * CHANNELS..][..CHANNELS].iter_mut().zip(&g) {
                    *acc += weight * g;
                }
            }
        }
    }

    fn parameters_and_gradients(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.parameters, &mut self.gradients)
    }
}
