//! Dense row-major `f32` tensors
//!
//! The raw numeric arrays flowing through the network: a flat buffer plus an
//! explicit shape, where an empty shape is a scalar. Nothing here records a
//! computation graph; autograd lives one level up in [`crate::var`].

use std::fmt::{self, Display};

/// A dense row-major array of `f32` with an explicit shape
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
}

impl Tensor {
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "data length {} does not match shape {:?}",
            data.len(),
            shape
        );
        Self { data, shape }
    }

    /// A tensor with no dimensions holding a single value
    pub fn scalar(value: f32) -> Self {
        Self {
            data: vec![value],
            shape: vec![],
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn full(shape: &[usize], value: f32) -> Self {
        Self {
            data: vec![value; shape.iter().product()],
            shape: shape.to_vec(),
        }
    }

    /// Builds a matrix from equally sized rows
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Self {
        let n_cols = rows.first().map_or(0, |r| r.len());
        assert!(
            rows.iter().all(|r| r.len() == n_cols),
            "rows differ in length"
        );
        let n_rows = rows.len();
        let data = rows.into_iter().flatten().collect();
        Self::new(data, vec![n_rows, n_cols])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// The value of a single-element tensor
    pub fn item(&self) -> f32 {
        assert_eq!(
            self.data.len(),
            1,
            "item() on tensor of shape {:?}",
            self.shape
        );
        self.data[0]
    }

    fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            data: self.data.iter().map(|v| f(*v)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// Combines two same-shaped tensors elementwise
    pub fn zip_map(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "zip_map on mismatched shapes {:?} and {:?}",
            self.shape, other.shape
        );
        Tensor {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
            shape: self.shape.clone(),
        }
    }

    pub fn add(&self, other: &Tensor) -> Tensor {
        self.broadcast_zip(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> Tensor {
        self.broadcast_zip(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor) -> Tensor {
        self.broadcast_zip(other, |a, b| a * b)
    }

    pub fn scale(&self, factor: f32) -> Tensor {
        self.map(|v| v * factor)
    }

    pub fn neg(&self) -> Tensor {
        self.map(|v| -v)
    }

    /// In-place elementwise `+=` of a same-shaped tensor
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(
            self.shape, other.shape,
            "add_assign on mismatched shapes {:?} and {:?}",
            self.shape, other.shape
        );
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    /// Applies `f` elementwise, broadcasting a scalar on either side or a row
    /// vector over the rows of a matrix
    fn broadcast_zip(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Tensor {
        if self.shape == other.shape {
            return self.zip_map(other, f);
        }
        if other.is_scalar() {
            let b = other.data[0];
            return self.map(|a| f(a, b));
        }
        if self.is_scalar() {
            let a = self.data[0];
            return other.map(|b| f(a, b));
        }
        if self.rank() == 2 && other.rank() == 1 && self.shape[1] == other.shape[0] {
            let n_cols = other.shape[0];
            let data = self
                .data
                .iter()
                .enumerate()
                .map(|(i, a)| f(*a, other.data[i % n_cols]))
                .collect();
            return Tensor {
                data,
                shape: self.shape.clone(),
            };
        }
        if self.rank() == 1 && other.rank() == 2 && other.shape[1] == self.shape[0] {
            let n_cols = self.shape[0];
            let data = other
                .data
                .iter()
                .enumerate()
                .map(|(i, b)| f(self.data[i % n_cols], *b))
                .collect();
            return Tensor {
                data,
                shape: other.shape.clone(),
            };
        }
        panic!(
            "incompatible shapes {:?} and {:?}",
            self.shape, other.shape
        );
    }

    /// Reduce-sums down to `shape`; the adjoint of the broadcasts above
    pub fn sum_to(&self, shape: &[usize]) -> Tensor {
        if self.shape == shape {
            return self.clone();
        }
        if shape.is_empty() {
            return Tensor::scalar(self.sum());
        }
        // [n, m] -> [m]: column sums, undoing a row vector broadcast over n rows
        if self.rank() == 2 && shape.len() == 1 && shape[0] == self.shape[1] {
            let (n_rows, n_cols) = (self.shape[0], self.shape[1]);
            let mut sums = vec![0.0; n_cols];
            for row in 0..n_rows {
                for col in 0..n_cols {
                    sums[col] += self.data[row * n_cols + col];
                }
            }
            return Tensor::new(sums, shape.to_vec());
        }
        panic!("cannot reduce shape {:?} to {:?}", self.shape, shape);
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f32 {
        self.sum() / self.numel() as f32
    }

    /// Matrix product of two rank-2 tensors
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.rank(), 2, "matmul lhs has shape {:?}", self.shape);
        assert_eq!(other.rank(), 2, "matmul rhs has shape {:?}", other.shape);
        let (n, k) = (self.shape[0], self.shape[1]);
        let (k2, m) = (other.shape[0], other.shape[1]);
        assert_eq!(
            k, k2,
            "matmul inner dimensions disagree: {:?} x {:?}",
            self.shape, other.shape
        );
        let mut data = vec![0.0; n * m];
        for i in 0..n {
            for l in 0..k {
                let a = self.data[i * k + l];
                for j in 0..m {
                    data[i * m + j] += a * other.data[l * m + j];
                }
            }
        }
        Tensor::new(data, vec![n, m])
    }

    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.rank(), 2, "transpose on shape {:?}", self.shape);
        let (n, m) = (self.shape[0], self.shape[1]);
        let mut data = vec![0.0; n * m];
        for i in 0..n {
            for j in 0..m {
                data[j * n + i] = self.data[i * m + j];
            }
        }
        Tensor::new(data, vec![m, n])
    }

    pub fn relu(&self) -> Tensor {
        self.map(|v| v.max(0.0))
    }

    /// Row-wise log-softmax of a rank-2 tensor
    ///
    /// Subtracts the row maximum before exponentiating so large logits do not
    /// overflow the exponential.
    pub fn log_softmax_rows(&self) -> Tensor {
        assert_eq!(self.rank(), 2, "log_softmax on shape {:?}", self.shape);
        let (n_rows, n_cols) = (self.shape[0], self.shape[1]);
        let mut data = vec![0.0; n_rows * n_cols];
        for row in 0..n_rows {
            let slice = &self.data[row * n_cols..(row + 1) * n_cols];
            let max = slice.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let log_sum = slice.iter().map(|v| (v - max).exp()).sum::<f32>().ln();
            for col in 0..n_cols {
                data[row * n_cols + col] = slice[col] - max - log_sum;
            }
        }
        Tensor::new(data, vec![n_rows, n_cols])
    }

    /// Index of the largest entry in each row
    pub fn argmax_rows(&self) -> Vec<usize> {
        assert_eq!(self.rank(), 2, "argmax on shape {:?}", self.shape);
        let (n_rows, n_cols) = (self.shape[0], self.shape[1]);
        (0..n_rows)
            .map(|row| {
                let slice = &self.data[row * n_cols..(row + 1) * n_cols];
                let mut best = 0;
                for (col, v) in slice.iter().enumerate() {
                    if *v > slice[best] {
                        best = col;
                    }
                }
                best
            })
            .collect()
    }
}

impl Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank() {
            0 => write!(f, "{}", self.data[0]),
            1 => write!(f, "{:?}", self.data),
            _ => {
                let n_cols = *self.shape.last().unwrap();
                writeln!(f, "[")?;
                for row in self.data.chunks(n_cols) {
                    writeln!(f, "  {:?}", row)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[macro_export]
    macro_rules! assert_eq_float {
        ($a:expr, $b:expr) => {
            assert!(
                (($a) - ($b)).abs() < 1e-5,
                "{} != {} beyond tolerance",
                $a,
                $b
            );
        };
    }

    #[test]
    fn test_scalar() {
        let t = Tensor::scalar(3.5);
        assert_eq!(t.shape(), &[] as &[usize]);
        assert_eq!(t.numel(), 1);
        assert_eq!(t.item(), 3.5);
    }

    #[test]
    fn test_matmul() {
        // [[1, 2], [3, 4]] x [[5, 6], [7, 8]] = [[19, 22], [43, 50]]
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = Tensor::new(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]);
        let c = a.matmul(&b);
        assert_eq!(c, Tensor::new(vec![19.0, 22.0, 43.0, 50.0], vec![2, 2]));
    }

    #[test]
    fn test_matmul_rectangular() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0], vec![1, 3]);
        let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
        let c = a.matmul(&b);
        assert_eq!(c, Tensor::new(vec![4.0, 5.0], vec![1, 2]));
    }

    #[test]
    fn test_transpose() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        let t = a.transpose();
        assert_eq!(
            t,
            Tensor::new(vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0], vec![3, 2])
        );
    }

    #[test]
    fn test_row_broadcast_add() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let bias = Tensor::new(vec![10.0, 20.0], vec![2]);
        let c = a.add(&bias);
        assert_eq!(c, Tensor::new(vec![11.0, 22.0, 13.0, 24.0], vec![2, 2]));
    }

    #[test]
    fn test_scalar_broadcast() {
        let a = Tensor::new(vec![1.0, 2.0], vec![2]);
        let c = a.mul(&Tensor::scalar(3.0));
        assert_eq!(c, Tensor::new(vec![3.0, 6.0], vec![2]));
        let d = Tensor::scalar(10.0).sub(&a);
        assert_eq!(d, Tensor::new(vec![9.0, 8.0], vec![2]));
    }

    #[test]
    fn test_sum_to() {
        let g = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        // column sums undo a bias-row broadcast
        assert_eq!(g.sum_to(&[2]), Tensor::new(vec![4.0, 6.0], vec![2]));
        assert_eq!(g.sum_to(&[]), Tensor::scalar(10.0));
        assert_eq!(g.sum_to(&[2, 2]), g);
    }

    #[test]
    fn test_relu() {
        let a = Tensor::new(vec![-1.0, 0.0, 2.5], vec![3]);
        assert_eq!(a.relu(), Tensor::new(vec![0.0, 0.0, 2.5], vec![3]));
    }

    #[test]
    fn test_log_softmax_rows_uniform() {
        // equal logits split the mass evenly: log(1/2) each
        let a = Tensor::new(vec![0.0, 0.0], vec![1, 2]);
        let out = a.log_softmax_rows();
        assert_eq_float!(out.data()[0], -(2.0f32.ln()));
        assert_eq_float!(out.data()[1], -(2.0f32.ln()));
    }

    #[test]
    fn test_log_softmax_rows_normalized() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, -5.0, 0.0, 5.0], vec![2, 3]);
        let out = a.log_softmax_rows();
        for row in out.data().chunks(3) {
            let total: f32 = row.iter().map(|v| v.exp()).sum();
            assert_eq_float!(total, 1.0);
        }
    }

    #[test]
    fn test_log_softmax_rows_large_logits() {
        // would overflow exp() without the max subtraction
        let a = Tensor::new(vec![1000.0, 999.0], vec![1, 2]);
        let out = a.log_softmax_rows();
        assert!(out.data().iter().all(|v| v.is_finite()));
        let total: f32 = out.data().iter().map(|v| v.exp()).sum();
        assert_eq_float!(total, 1.0);
    }

    #[test]
    fn test_argmax_rows() {
        let a = Tensor::new(vec![0.1, 0.9, 0.0, 0.7, 0.2, 0.1], vec![2, 3]);
        assert_eq!(a.argmax_rows(), vec![1, 0]);
    }

    #[test]
    fn test_from_rows() {
        let t = Tensor::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_display() {
        let t = Tensor::new(vec![1.0, 2.0], vec![1, 2]);
        assert_eq!(format!("{}", t), "[\n  [1.0, 2.0]\n]");
    }
}
