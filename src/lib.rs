//! A minimal library for training small feed-forward neural networks
//! on digit images using a PyTorch-like API.

pub mod backprop_fns;
pub mod dataloader;
pub mod datasets;
pub mod loss;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod trainer;
pub mod var;
