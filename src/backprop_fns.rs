//! Incremental gradient update functions for backprop
//!
//! Applied depending on the operation which created outputs from inputs. Corresponds to
//! a node in the computation graph. Each rule accumulates into the operand gradients,
//! reducing over broadcast dimensions where the forward pass expanded them.

use crate::tensor::Tensor;
use crate::var::Var;

/// Represents the function in the computation graph
#[derive(Debug, Clone)]
pub enum BackpropFunc {
    Add,
    Sub,
    Mul,
    Neg,
    MatMul,
    ReLU,
    LogSoftmax,
    Sum,
    Mean,
    /// Negative log likelihood against one target class index per row
    NllLoss {
        targets: Vec<usize>,
    },
}

impl BackpropFunc {
    pub fn n_operands(&self) -> usize {
        match self {
            BackpropFunc::Add => 2,
            BackpropFunc::Sub => 2,
            BackpropFunc::Mul => 2,
            BackpropFunc::Neg => 1,
            BackpropFunc::MatMul => 2,
            BackpropFunc::ReLU => 1,
            BackpropFunc::LogSoftmax => 1,
            BackpropFunc::Sum => 1,
            BackpropFunc::Mean => 1,
            BackpropFunc::NllLoss { .. } => 1,
        }
    }
}

/// Takes two nodes and updates their gradients
/// Represents backprop for the operation `in1 + in2 = out`
pub fn add(in1: &Var, in2: &Var, out: &Var) {
    let grad = out.grad();
    let in1_shape = in1.shape();
    let in2_shape = in2.shape();
    in1.accumulate_grad(&grad.sum_to(&in1_shape));
    in2.accumulate_grad(&grad.sum_to(&in2_shape));
}

/// Represents backprop for the operation `in1 - in2 = out`
pub fn sub(in1: &Var, in2: &Var, out: &Var) {
    let grad = out.grad();
    let in1_shape = in1.shape();
    let in2_shape = in2.shape();
    in1.accumulate_grad(&grad.sum_to(&in1_shape));
    in2.accumulate_grad(&grad.neg().sum_to(&in2_shape));
}

/// Represents backprop for the operation `in1 * in2 = out`
pub fn mul(in1: &Var, in2: &Var, out: &Var) {
    let grad = out.grad();
    let in1_data = in1.data();
    let in2_data = in2.data();
    in1.accumulate_grad(&in2_data.mul(&grad).sum_to(in1_data.shape()));
    in2.accumulate_grad(&in1_data.mul(&grad).sum_to(in2_data.shape()));
}

/// Represents backprop for the operation `-in = out`
pub fn neg(in1: &Var, out: &Var) {
    in1.accumulate_grad(&out.grad().neg());
}

/// Represents backprop for the operation `in1 x in2 = out`
///
/// `d in1 = grad x in2^T` and `d in2 = in1^T x grad`
pub fn matmul(in1: &Var, in2: &Var, out: &Var) {
    let grad = out.grad();
    let in1_data = in1.data();
    let in2_data = in2.data();
    in1.accumulate_grad(&grad.matmul(&in2_data.transpose()));
    in2.accumulate_grad(&in1_data.transpose().matmul(&grad));
}

/// Represents backprop for the operation `relu(in) = out`
pub fn relu(in1: &Var, out: &Var) {
    let grad = out.grad();
    let in1_data = in1.data();
    in1.accumulate_grad(&in1_data.zip_map(&grad, |x, g| if x > 0.0 { g } else { 0.0 }));
}

/// Represents backprop for the operation `log_softmax(in) = out`, row-wise
///
/// With `p_i = exp(out_i)` the rule per row is `d in_i = g_i - p_i * sum(g)`.
pub fn log_softmax(in1: &Var, out: &Var) {
    let grad = out.grad();
    let log_probs = out.data();
    let shape = grad.shape().to_vec();
    let (n_rows, n_cols) = (shape[0], shape[1]);
    let mut delta = vec![0.0; n_rows * n_cols];
    for row in 0..n_rows {
        let g = &grad.data()[row * n_cols..(row + 1) * n_cols];
        let y = &log_probs.data()[row * n_cols..(row + 1) * n_cols];
        let g_sum: f32 = g.iter().sum();
        for col in 0..n_cols {
            delta[row * n_cols + col] = g[col] - y[col].exp() * g_sum;
        }
    }
    in1.accumulate_grad(&Tensor::new(delta, shape));
}

/// Represents backprop for the operation `sum(in) = out`
pub fn sum(in1: &Var, out: &Var) {
    let grad = out.grad().item();
    let in1_shape = in1.shape();
    in1.accumulate_grad(&Tensor::full(&in1_shape, grad));
}

/// Represents backprop for the operation `mean(in) = out`
pub fn mean(in1: &Var, out: &Var) {
    let grad = out.grad().item();
    let in1_shape = in1.shape();
    let n = in1_shape.iter().product::<usize>() as f32;
    in1.accumulate_grad(&Tensor::full(&in1_shape, grad / n));
}

/// Represents backprop for the operation `nll(in, targets) = out`
///
/// Only the target entry of each row receives gradient, `-grad / n_rows`.
pub fn nll_loss(in1: &Var, out: &Var, targets: &[usize]) {
    let grad = out.grad().item();
    let shape = in1.shape();
    let (n_rows, n_cols) = (shape[0], shape[1]);
    let mut delta = vec![0.0; n_rows * n_cols];
    for (row, &target) in targets.iter().enumerate() {
        delta[row * n_cols + target] = -grad / n_rows as f32;
    }
    in1.accumulate_grad(&Tensor::new(delta, shape));
}

/// Applies a backprop function for operators with two operands
pub fn update_gradients_two_operands(in1: &Var, in2: &Var, out: &Var) {
    let backprop_fn = { out.0.borrow().backprop_fn.clone() };
    match backprop_fn {
        Some(BackpropFunc::Add) => add(in1, in2, out),
        Some(BackpropFunc::Sub) => sub(in1, in2, out),
        Some(BackpropFunc::Mul) => mul(in1, in2, out),
        Some(BackpropFunc::MatMul) => matmul(in1, in2, out),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}

/// Applies a backprop function for operators with one operand
pub fn update_gradients_one_operand(in1: &Var, out: &Var) {
    let backprop_fn = { out.0.borrow().backprop_fn.clone() };
    match backprop_fn {
        Some(BackpropFunc::Neg) => neg(in1, out),
        Some(BackpropFunc::ReLU) => relu(in1, out),
        Some(BackpropFunc::LogSoftmax) => log_softmax(in1, out),
        Some(BackpropFunc::Sum) => sum(in1, out),
        Some(BackpropFunc::Mean) => mean(in1, out),
        Some(BackpropFunc::NllLoss { targets }) => nll_loss(in1, out, &targets),
        None => {}
        _ => panic!("Invalid backprop function: {:?}", backprop_fn),
    }
}
