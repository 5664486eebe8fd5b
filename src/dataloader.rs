//! Data loader

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::tensor::Tensor;
use crate::var::Var;

/// Errors for the dataloader
#[derive(Debug, Error)]
pub enum DataLoaderError {
    #[error(
        "All input vectors must have the same dimension. Received different sizes: {input_dims:?}"
    )]
    InputDimensionMismatch { input_dims: HashSet<usize> },
    #[error("Labels must have the same length as the data")]
    LabelLengthMismatch { label_len: usize, data_len: usize },
    #[error("Batch size must be at least 1")]
    ZeroBatchSize,
}

/// Data loader, returns batches of data and labels, optionally shuffled
/// Takes inspiration from the PyTorch DataLoader
/// <https://pytorch.org/docs/stable/data.html#torch.utils.data.DataLoader>
pub struct DataLoader {
    data: Vec<Vec<f32>>,
    // class index per sample
    labels: Vec<u8>,
    batch_size: usize,
}

impl DataLoader {
    pub fn new(
        data: Vec<Vec<f32>>,
        labels: Vec<u8>,
        batch_size: usize,
    ) -> Result<Self, DataLoaderError> {
        if batch_size == 0 {
            return Err(DataLoaderError::ZeroBatchSize);
        }
        if data.len() != labels.len() {
            return Err(DataLoaderError::LabelLengthMismatch {
                label_len: labels.len(),
                data_len: data.len(),
            });
        }
        let input_dims = data.iter().map(|d| d.len()).collect::<HashSet<_>>();
        if input_dims.len() > 1 {
            return Err(DataLoaderError::InputDimensionMismatch { input_dims });
        }
        Ok(Self {
            data,
            labels,
            batch_size,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.data.len()
    }

    /// Batches in dataset order
    pub fn iter(&self) -> Batches<'_> {
        let indices = (0..self.data.len()).collect();
        self.batches(indices)
    }

    /// Batches in an order drawn from the given generator, so runs with the
    /// same seed revisit the samples identically
    pub fn shuffled_iter(&self, rng: &mut impl Rng) -> Batches<'_> {
        let mut indices = (0..self.data.len()).collect::<Vec<_>>();
        indices.shuffle(rng);
        self.batches(indices)
    }

    fn batches(&self, indices: Vec<usize>) -> Batches<'_> {
        Batches {
            data: &self.data,
            labels: &self.labels,
            batch_size: self.batch_size,
            indices,
            curr_iter: 0,
        }
    }
}

/// An iterator which returns mini batches of data and labels until the end of the dataset
///
/// Each item is a `[batch, features]` leaf node plus the target class per row.
/// The last batch is short when the dataset size is not a multiple of the
/// batch size.
pub struct Batches<'a> {
    data: &'a [Vec<f32>],
    labels: &'a [u8],
    batch_size: usize,
    // optionally shuffled indices
    indices: Vec<usize>,
    curr_iter: usize,
}

impl Iterator for Batches<'_> {
    type Item = (Var, Vec<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr_iter >= self.data.len() {
            return None;
        }
        let end = (self.curr_iter + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.curr_iter..end];
        let rows = batch_indices
            .iter()
            .map(|&i| self.data[i].clone())
            .collect::<Vec<_>>();
        let targets = batch_indices
            .iter()
            .map(|&i| self.labels[i] as usize)
            .collect::<Vec<_>>();
        self.curr_iter = end;
        Some((Var::new(Tensor::from_rows(rows)), targets))
    }
}
