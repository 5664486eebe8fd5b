//! Components to build a neural network

use std::sync::atomic::{self, AtomicUsize};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

use crate::tensor::Tensor;
use crate::var::Var;

/// Errors for the neural network
#[derive(Debug, Error)]
pub enum NNError {
    #[error("input size mismatch: expected {expected} features, got {got}")]
    InputSizeMismatch { expected: usize, got: usize },
    #[error("expected a batch of rows, got shape {shape:?}")]
    NotABatch { shape: Vec<usize> },
}

/// Represents the torch.nn.Module. NNs should implement this trait.
/// <https://github.com/pytorch/pytorch/blob/v2.6.0/torch/nn/modules/module.py#L402>
pub trait Module {
    fn zero_grad(&mut self) {
        for p in self.parameters().iter_mut() {
            p.zero_grad();
        }
    }

    fn parameters(&self) -> Vec<Var>;
    fn forward(&self, input: &Var) -> Result<Var, NNError>;
}

/// A fully connected layer computing `input x weight + bias`
///
/// The weight has shape `[n_inputs, n_outputs]` and the bias `[n_outputs]`,
/// broadcast over the rows of the batch.
pub struct Linear {
    pub weight: Var,
    pub bias: Var,
    n_output_nans: AtomicUsize,
    n_parameters_nans: AtomicUsize,
}

impl Linear {
    /// Creates a new layer with the given number of inputs and outputs
    pub fn new(n_inputs: usize, n_outputs: usize, rng: &mut impl Rng) -> Self {
        // He initialization to ensure the variance of the output is the same as the input
        // and keep weights relatively small to avoid exploding or vanishing gradients (or even just
        // activation values for that matter, e.g. softmax)
        let std = (2.0 / n_inputs as f32).sqrt();
        let normal = Normal::new(0.0, std).unwrap();
        let weight = Tensor::new(
            (0..n_inputs * n_outputs)
                .map(|_| normal.sample(rng))
                .collect(),
            vec![n_inputs, n_outputs],
        );
        let bias = Tensor::new(
            (0..n_outputs).map(|_| normal.sample(rng)).collect(),
            vec![n_outputs],
        );
        Self::from_parts(weight, bias)
    }

    fn from_parts(weight: Tensor, bias: Tensor) -> Self {
        assert_eq!(weight.rank(), 2, "weight must be a matrix");
        assert_eq!(
            bias.shape(),
            &weight.shape()[1..],
            "bias must match the output dimension"
        );
        Self {
            weight: Var::new(weight),
            bias: Var::new(bias),
            n_output_nans: AtomicUsize::new(0),
            n_parameters_nans: AtomicUsize::new(0),
        }
    }

    // Testing utility for a deterministic and simple layer
    #[cfg(test)]
    fn new_ones(n_inputs: usize, n_outputs: usize) -> Self {
        Self::from_parts(
            Tensor::full(&[n_inputs, n_outputs], 1.0),
            Tensor::full(&[n_outputs], 1.0),
        )
    }

    fn n_inputs(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl Module for Linear {
    /// Returns all the parameters in the layer
    fn parameters(&self) -> Vec<Var> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    /// Computes forward pass for a layer
    fn forward(&self, input: &Var) -> Result<Var, NNError> {
        let shape = input.shape();
        if shape.len() != 2 {
            return Err(NNError::NotABatch { shape });
        }
        if shape[1] != self.n_inputs() {
            return Err(NNError::InputSizeMismatch {
                expected: self.n_inputs(),
                got: shape[1],
            });
        }
        let output = &input.matmul(&self.weight) + &self.bias;

        let n_output_nans = output.data().data().iter().filter(|v| v.is_nan()).count();
        self.n_output_nans
            .store(n_output_nans, atomic::Ordering::Relaxed);
        let mut n_parameters_nans = 0;
        for p in self.parameters() {
            n_parameters_nans += p.data().data().iter().filter(|v| v.is_nan()).count();
        }
        self.n_parameters_nans
            .store(n_parameters_nans, atomic::Ordering::Relaxed);
        log::debug!(
            "n_output_nans: {}, n_parameters_nans: {}",
            n_output_nans,
            n_parameters_nans
        );
        Ok(output)
    }
}

/// Applies ReLU element-wise, works for any input shape
#[derive(Default)]
pub struct ReLU {
    n_dead_activations: AtomicUsize,
}

impl ReLU {
    pub fn new() -> Self {
        Self {
            n_dead_activations: AtomicUsize::new(0),
        }
    }

    /// Returns the number of inactive entries in the last batch (used for debugging)
    pub fn n_dead_activations(&self) -> usize {
        self.n_dead_activations.load(atomic::Ordering::Relaxed)
    }
}

impl Module for ReLU {
    fn parameters(&self) -> Vec<Var> {
        vec![]
    }

    /// Takes the element-wise ReLU of the input
    fn forward(&self, input: &Var) -> Result<Var, NNError> {
        let n_dead_activations = input.data().data().iter().filter(|v| **v <= 0.0).count();
        self.n_dead_activations
            .store(n_dead_activations, atomic::Ordering::Relaxed);
        log::debug!("n_dead_activations: {}", n_dead_activations);
        Ok(input.relu())
    }
}

/// Applies log-softmax over the class dimension of a batch
///
/// Log probabilities compose directly with the negative log likelihood loss and
/// avoid the overflow a plain softmax invites with large logits.
#[derive(Default)]
pub struct LogSoftmax {}

impl LogSoftmax {
    pub fn new() -> Self {
        Self {}
    }
}

impl Module for LogSoftmax {
    fn parameters(&self) -> Vec<Var> {
        vec![]
    }

    fn forward(&self, input: &Var) -> Result<Var, NNError> {
        let shape = input.shape();
        if shape.len() != 2 {
            return Err(NNError::NotABatch { shape });
        }
        Ok(input.log_softmax())
    }
}

/// Runs modules in order, feeding each output into the next module
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Module>>) -> Self {
        Self { layers }
    }
}

impl Module for Sequential {
    fn parameters(&self) -> Vec<Var> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn forward(&self, input: &Var) -> Result<Var, NNError> {
        let mut output = input.clone();
        for layer in self.layers.iter() {
            output = layer.forward(&output)?;
        }
        Ok(output)
    }
}
