use anyhow::{bail, Result};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::autodiff::Jet;
use crate::traits::{Prediction, Scalar, Surrogate};

/// Fully connected network with tanh hidden layers and a linear output
/// layer. Weights live in one flat vector so optimizers can treat the whole
/// network as a single parameter vector; layout is per layer, weight matrix
/// (row-major, out × in) followed by biases.
pub struct FeedForward {
    sizes: Vec<usize>,
    weights: Vec<f64>,
    deriv_order: usize,
}

impl FeedForward {
    /// Builds a network with the given layer sizes (input first, output
    /// last) tracking coordinate derivatives up to `deriv_order` when used
    /// as a surrogate. Weights are Xavier-uniform from a seeded generator,
    /// biases start at zero.
    pub fn new(sizes: &[usize], deriv_order: usize, seed: u64) -> Result<Self> {
        if sizes.len() < 2 {
            bail!("network needs at least an input and an output layer");
        }
        if sizes.iter().any(|&s| s == 0) {
            bail!("layer sizes must be nonzero");
        }
        if !(1..=3).contains(&deriv_order) {
            bail!("derivative order must be between 1 and 3, got {deriv_order}");
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut weights = Vec::new();
        for layer in 0..sizes.len() - 1 {
            let (nin, nout) = (sizes[layer], sizes[layer + 1]);
            let bound = (6.0 / (nin + nout) as f64).sqrt();
            for _ in 0..nin * nout {
                weights.push(rng.gen_range(-bound..bound));
            }
            weights.extend(std::iter::repeat(0.0).take(nout));
        }

        Ok(Self {
            sizes: sizes.to_vec(),
            weights,
            deriv_order,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.sizes[0]
    }

    pub fn output_dim(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    pub fn deriv_order(&self) -> usize {
        self.deriv_order
    }

    pub fn weight_count(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    /// Evaluates the network on one sample with an explicit weight slice, so
    /// callers can substitute AD-typed weights (for weight-space
    /// derivatives) or AD-typed inputs (for coordinate derivatives).
    pub fn eval_with<T: Scalar>(&self, weights: &[T], input: &[T]) -> Vec<T> {
        let mut activations = input.to_vec();
        let mut offset = 0;
        for layer in 0..self.sizes.len() - 1 {
            let (nin, nout) = (self.sizes[layer], self.sizes[layer + 1]);
            let last = layer == self.sizes.len() - 2;
            let mut next = Vec::with_capacity(nout);
            for o in 0..nout {
                let mut acc = weights[offset + nin * nout + o];
                for (i, &a) in activations.iter().enumerate() {
                    acc = acc + weights[offset + o * nin + i] * a;
                }
                next.push(if last { acc } else { acc.tanh() });
            }
            offset += nin * nout + nout;
            activations = next;
        }
        activations
    }

    /// Plain evaluation on one sample.
    pub fn eval(&self, input: &[f64]) -> Vec<f64> {
        self.eval_with(&self.weights, input)
    }
}

impl Surrogate for FeedForward {
    /// Predicts the field over a batch and extracts coordinate derivatives
    /// by seeding one jet per input coordinate per sample.
    fn forward(&self, input: &DMatrix<f64>) -> Result<Prediction> {
        if input.ncols() != self.input_dim() {
            bail!(
                "input has {} coordinates, network expects {}",
                input.ncols(),
                self.input_dim()
            );
        }

        let nsamples = input.nrows();
        let ncoords = input.ncols();
        let noutputs = self.output_dim();
        let mut values = DMatrix::zeros(nsamples, noutputs);
        let mut derivs =
            vec![vec![DMatrix::zeros(nsamples, noutputs); self.deriv_order]; ncoords];

        let jet_weights: Vec<Jet<f64>> =
            self.weights.iter().map(|&w| Jet::constant(w)).collect();
        let mut sample = vec![Jet::constant(0.0); ncoords];

        for i in 0..nsamples {
            for seeded in 0..ncoords {
                for k in 0..ncoords {
                    sample[k] = if k == seeded {
                        Jet::variable(input[(i, k)])
                    } else {
                        Jet::constant(input[(i, k)])
                    };
                }
                let outputs = self.eval_with(&jet_weights, &sample);
                for (o, jet) in outputs.iter().enumerate() {
                    if seeded == 0 {
                        values[(i, o)] = jet.val;
                    }
                    derivs[seeded][0][(i, o)] = jet.d1;
                    if self.deriv_order >= 2 {
                        derivs[seeded][1][(i, o)] = jet.d2;
                    }
                    if self.deriv_order >= 3 {
                        derivs[seeded][2][(i, o)] = jet.d3;
                    }
                }
            }
        }

        Ok(Prediction { values, derivs })
    }
}
