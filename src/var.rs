//! Tensor-valued nodes which form a computation graph
use std::{
    cell::RefCell,
    collections::HashSet,
    fmt::{self, Debug, Display},
    ops::{Add, Mul, Neg, Sub},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::backprop_fns::{
    BackpropFunc, update_gradients_one_operand, update_gradients_two_operands,
};
use crate::tensor::Tensor;

type SharedVar = Rc<RefCell<InnerVar>>;

/// Newtype representing a shared node in a computation graph
#[derive(Debug, Clone)]
pub struct Var(pub(crate) SharedVar);

impl Var {
    /// Create a new node, not derived from any other nodes
    pub fn new(data: Tensor) -> Self {
        Self(Rc::new(RefCell::new(InnerVar::new(data, None))))
    }

    /// Create a new leaf holding a single value
    pub fn scalar(data: f32) -> Self {
        Self::new(Tensor::scalar(data))
    }

    /// Create a new node derived from an operation on other nodes (i.e. not a leaf node)
    fn new_derived(data: Tensor, backprop_fn: BackpropFunc) -> Self {
        Self(Rc::new(RefCell::new(InnerVar::new(
            data,
            Some(backprop_fn),
        ))))
    }

    fn add_child(&self, child: Var) {
        self.0.borrow_mut().children.push(child.0);
    }

    pub fn data(&self) -> Tensor {
        self.0.borrow().data.clone()
    }

    pub fn grad(&self) -> Tensor {
        self.0.borrow().grad.clone()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.borrow().data.shape().to_vec()
    }

    /// The value of a single-element node
    pub fn item(&self) -> f32 {
        self.0.borrow().data.item()
    }

    // Strictly, &mut isn't needed since the node is behind a shared mutable type,
    // but it indicates that the node should be exclusively mutable
    pub fn set_data(&mut self, data: Tensor) {
        let mut inner = self.0.borrow_mut();
        assert_eq!(
            inner.data.shape(),
            data.shape(),
            "set_data would change the shape"
        );
        inner.data = data;
    }

    /// Unlike PyTorch which only zeros out the gradients of the leaf nodes, this zeros out
    /// all gradients in the computation graph which are children of this node
    pub fn zero_grad(&mut self) {
        // Zero out all gradients, recursively
        let shape = self.0.borrow().data.shape().to_vec();
        self.0.borrow_mut().grad = Tensor::zeros(&shape);

        // Traverse all nodes as if backpropagating, but zero out the gradients
        let mut backprop_order = vec![];
        let mut visited: HashSet<u64> = HashSet::new();
        self.backward_inner(&mut backprop_order, &mut visited);
        for var in backprop_order.into_iter().rev() {
            let shape = var.0.borrow().data.shape().to_vec();
            var.0.borrow_mut().grad = Tensor::zeros(&shape);
        }
    }

    pub fn backward(&self) {
        // d out / d out = 1
        let ones = Tensor::full(self.0.borrow().data.shape(), 1.0);
        self.0.borrow_mut().grad = ones;

        let mut backprop_order = vec![];
        let mut visited: HashSet<u64> = HashSet::new();

        // visit in post order
        self.backward_inner(&mut backprop_order, &mut visited);

        // apply backprop, reversed to start from root first
        for var in backprop_order.into_iter().rev() {
            let n_operands = var.0.borrow().children.len();
            if let Some(f) = var.0.borrow().backprop_fn.as_ref() {
                debug_assert!(f.n_operands() == n_operands);
            }
            match n_operands {
                0 => {}
                1 => {
                    let in1 = Var(var.0.borrow().children[0].clone());
                    update_gradients_one_operand(&in1, &var);
                }
                2 => {
                    let in1 = Var(var.0.borrow().children[0].clone());
                    let in2 = Var(var.0.borrow().children[1].clone());
                    update_gradients_two_operands(&in1, &in2, &var);
                }
                _ => {
                    panic!("Unsupported number of operands: {}", n_operands);
                }
            }
        }
    }

    fn backward_inner(&self, backprop_order: &mut Vec<Var>, visited: &mut HashSet<u64>) {
        for c in self.0.borrow().children.iter() {
            if visited.contains(&c.borrow().id) {
                continue;
            }
            visited.insert(c.borrow().id);
            let var = Var(c.clone());
            var.backward_inner(backprop_order, visited);
        }
        backprop_order.push(self.clone());
    }

    pub(crate) fn accumulate_grad(&self, delta: &Tensor) {
        self.0.borrow_mut().grad.add_assign(delta);
    }
}

// Various operations on nodes
impl Var {
    /// Matrix product of two rank-2 nodes
    pub fn matmul(&self, other: &Var) -> Var {
        let data = self.0.borrow().data.matmul(&other.0.borrow().data);
        let result = Var::new_derived(data, BackpropFunc::MatMul);
        result.add_child(self.clone());
        result.add_child(other.clone());

        result
    }

    pub fn relu(&self) -> Var {
        let result = Var::new_derived(self.0.borrow().data.relu(), BackpropFunc::ReLU);
        result.add_child(self.clone());

        result
    }

    /// Row-wise log-softmax over the class dimension
    pub fn log_softmax(&self) -> Var {
        let result = Var::new_derived(
            self.0.borrow().data.log_softmax_rows(),
            BackpropFunc::LogSoftmax,
        );
        result.add_child(self.clone());

        result
    }

    /// Sum of all elements, as a scalar node
    pub fn sum(&self) -> Var {
        let result = Var::new_derived(
            Tensor::scalar(self.0.borrow().data.sum()),
            BackpropFunc::Sum,
        );
        result.add_child(self.clone());

        result
    }

    /// Mean of all elements, as a scalar node
    pub fn mean(&self) -> Var {
        let result = Var::new_derived(
            Tensor::scalar(self.0.borrow().data.mean()),
            BackpropFunc::Mean,
        );
        result.add_child(self.clone());

        result
    }

    /// Negative log likelihood of the target class per row, averaged over rows
    ///
    /// Expects rows of log probabilities, one target class index per row.
    pub fn nll(&self, targets: &[usize]) -> Var {
        let inner = self.0.borrow();
        assert_eq!(inner.data.rank(), 2, "nll expects a batch of rows");
        let (n_rows, n_classes) = (inner.data.shape()[0], inner.data.shape()[1]);
        assert_eq!(
            targets.len(),
            n_rows,
            "{} targets for {} rows",
            targets.len(),
            n_rows
        );
        let mut total = 0.0;
        for (row, &target) in targets.iter().enumerate() {
            assert!(
                target < n_classes,
                "target {} out of range for {} classes",
                target,
                n_classes
            );
            total -= inner.data.data()[row * n_classes + target];
        }
        drop(inner);

        let result = Var::new_derived(
            Tensor::scalar(total / n_rows as f32),
            BackpropFunc::NllLoss {
                targets: targets.to_vec(),
            },
        );
        result.add_child(self.clone());

        result
    }
}

// pretty print a node and its children recursively in a JSON-like format
impl Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_var(var: &Var, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let inner = var.0.borrow();
            let indent_str = " ".repeat(indent);
            let indent_inner = " ".repeat(indent + 2);
            writeln!(f, "{}{{", indent_str)?;
            writeln!(f, "{}\"shape\": {:?},", indent_inner, inner.data.shape())?;
            writeln!(f, "{}\"id\": {},", indent_inner, inner.id)?;
            writeln!(
                f,
                "{}\"backprop_fn\": {:?},",
                indent_inner, inner.backprop_fn
            )?;
            writeln!(f, "{}\"children\": [", indent_inner)?;
            for (i, child) in inner.children.iter().enumerate() {
                let child_var = Var(child.clone());
                fmt_var(&child_var, indent + 4, f)?;
                if i < inner.children.len() - 1 {
                    writeln!(f, ",")?;
                } else {
                    writeln!(f)?;
                }
            }
            writeln!(f, "{}]", indent_inner)?;
            write!(f, "{}}}", indent_str)
        }
        fmt_var(self, 0, f)
    }
}

impl Add for &Var {
    type Output = Var;

    fn add(self, other: &Var) -> Var {
        let data = self.0.borrow().data.add(&other.0.borrow().data);

        let result = Var::new_derived(data, BackpropFunc::Add);
        result.add_child(self.clone());
        result.add_child(other.clone());

        result
    }
}

impl Sub for &Var {
    type Output = Var;

    fn sub(self, other: &Var) -> Var {
        let data = self.0.borrow().data.sub(&other.0.borrow().data);

        let result = Var::new_derived(data, BackpropFunc::Sub);
        result.add_child(self.clone());
        result.add_child(other.clone());

        result
    }
}

impl Mul for &Var {
    type Output = Var;

    fn mul(self, other: &Var) -> Var {
        let data = self.0.borrow().data.mul(&other.0.borrow().data);

        let result = Var::new_derived(data, BackpropFunc::Mul);
        result.add_child(self.clone());
        result.add_child(other.clone());

        result
    }
}

impl Neg for &Var {
    type Output = Var;

    fn neg(self) -> Var {
        let result = Var::new_derived(self.0.borrow().data.neg(), BackpropFunc::Neg);
        result.add_child(self.clone());

        result
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.0.borrow().data == other.0.borrow().data
    }
}

#[derive(Debug)]
pub(crate) struct InnerVar {
    // the network uses 32 bit precision floats (roughly 7 decimal digits of precision)
    pub(crate) data: Tensor,
    /// Gradient of the graph output with respect to this node, same shape as `data`
    pub(crate) grad: Tensor,
    /// List of the node inputs in the forward pass
    /// These nodes are "children" in the backwards pass
    children: Vec<SharedVar>,
    /// Unique identifier for the node
    id: u64,
    /// The function which created this node from its children
    /// `None` when the node is a leaf node
    pub(crate) backprop_fn: Option<BackpropFunc>,
}

impl InnerVar {
    pub fn new(data: Tensor, backprop_fn: Option<BackpropFunc>) -> Self {
        let grad = Tensor::zeros(data.shape());
        Self {
            data,
            grad,
            children: vec![],
            id: next_node_id(),
            backprop_fn,
        }
    }
}

// A process-wide counter keeps node ids unique without pulling entropy,
// so fixed-seed runs stay reproducible
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::assert_eq_float;

    #[test]
    fn test_add() {
        let a = Var::scalar(2.0);
        let b = Var::scalar(3.0);

        let c = &a + &b;
        assert_eq!(c.item(), 5.0);
        c.backward();

        // dc/da = 1
        // dc/db = 1
        assert_eq!(a.grad().item(), 1.0);
        assert_eq!(b.grad().item(), 1.0);
    }

    #[test]
    fn test_mul() {
        let a = Var::scalar(2.0);
        let b = Var::scalar(3.0);

        let c = &a * &b;
        assert_eq!(c.item(), 6.0);

        c.backward();

        // dc/da = b
        // dc/db = a
        assert_eq!(a.grad().item(), 3.0);
        assert_eq!(b.grad().item(), 2.0);
    }

    #[test]
    fn test_neg() {
        let a = Var::scalar(2.0);
        let b = -&a;
        assert_eq!(b.item(), -2.0);

        b.backward();

        assert_eq!(a.grad().item(), -1.0);
    }

    #[test]
    fn test_sub() {
        let a = Var::scalar(2.0);
        let b = Var::scalar(3.0);

        let c = &a - &b;
        assert_eq!(c.item(), -1.0);

        c.backward();

        // dc/da = 1
        // dc/db = -1
        assert_eq!(a.grad().item(), 1.0);
        assert_eq!(b.grad().item(), -1.0);
    }

    #[test]
    fn test_relu() {
        let a = Var::scalar(1.0);
        let b = Var::scalar(2.0);
        let c = &a * &b;
        let z = c.relu();
        assert_eq_float!(z.item(), 2.0);

        z.backward();

        // dz/dc = 1
        // dc/da = b
        // dc/db = a
        assert_eq_float!(a.grad().item(), 2.0);
        assert_eq_float!(b.grad().item(), 1.0);
        assert_eq_float!(c.grad().item(), 1.0);
    }

    #[test]
    fn test_relu_gates_negative() {
        let a = Var::scalar(-3.0);
        let z = a.relu();
        assert_eq!(z.item(), 0.0);

        z.backward();

        // inactive input gets no gradient
        assert_eq!(a.grad().item(), 0.0);
    }

    #[test]
    fn test_reused_node_accumulates() {
        let a = Var::scalar(4.0);
        let b = &a + &a;
        assert_eq!(b.item(), 8.0);

        b.backward();

        // both paths contribute
        assert_eq!(a.grad().item(), 2.0);
    }

    #[test]
    fn test_matmul_backward() {
        // c = a x b, da = G x b^T, db = a^T x G with G all ones
        let a = Var::new(Tensor::new(vec![1.0, 2.0], vec![1, 2]));
        let b = Var::new(Tensor::new(vec![3.0, 4.0], vec![2, 1]));
        let c = a.matmul(&b);
        assert_eq!(c.data(), Tensor::new(vec![11.0], vec![1, 1]));

        c.backward();

        assert_eq!(a.grad(), Tensor::new(vec![3.0, 4.0], vec![1, 2]));
        assert_eq!(b.grad(), Tensor::new(vec![1.0, 2.0], vec![2, 1]));
    }

    #[test]
    fn test_broadcast_add_backward() {
        // a bias row broadcast over two rows picks up one gradient per row
        let x = Var::new(Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]));
        let bias = Var::new(Tensor::new(vec![10.0, 20.0], vec![2]));
        let y = &x + &bias;
        assert_eq!(
            y.data(),
            Tensor::new(vec![11.0, 22.0, 13.0, 24.0], vec![2, 2])
        );

        let total = y.sum();
        total.backward();

        assert_eq!(x.grad(), Tensor::full(&[2, 2], 1.0));
        assert_eq!(bias.grad(), Tensor::new(vec![2.0, 2.0], vec![2]));
    }

    #[test]
    fn test_log_softmax_backward() {
        // summing all log probabilities of a uniform row gives zero gradient:
        // dx_i = g_i - softmax(x)_i * sum(g) = 1 - 0.5 * 2
        let x = Var::new(Tensor::new(vec![0.0, 0.0], vec![1, 2]));
        let y = x.log_softmax();
        let total = y.sum();
        total.backward();

        assert_eq_float!(x.grad().data()[0], 0.0);
        assert_eq_float!(x.grad().data()[1], 0.0);
    }

    #[test]
    fn test_mean_backward() {
        let x = Var::new(Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]));
        let m = x.mean();
        assert_eq_float!(m.item(), 2.5);

        m.backward();

        assert_eq!(x.grad(), Tensor::full(&[2, 2], 0.25));
    }

    #[test]
    fn test_nll() {
        // two rows of log probabilities, targets picking -0.5 and -0.1
        let log_probs = Var::new(Tensor::new(vec![-0.5, -2.0, -3.0, -0.1], vec![2, 2]));
        let loss = log_probs.nll(&[0, 1]);
        assert_eq_float!(loss.item(), (0.5 + 0.1) / 2.0);

        loss.backward();

        // only the target entries receive gradient, -1/N each
        assert_eq!(
            log_probs.grad(),
            Tensor::new(vec![-0.5, 0.0, 0.0, -0.5], vec![2, 2])
        );
    }

    #[test]
    fn test_zero_grad_clears_graph() {
        let a = Var::scalar(2.0);
        let b = Var::scalar(3.0);
        let c = &a * &b;
        let mut d = c.relu();
        d.backward();
        assert_eq!(a.grad().item(), 3.0);

        d.zero_grad();

        assert_eq!(a.grad().item(), 0.0);
        assert_eq!(b.grad().item(), 0.0);
        assert_eq!(c.grad().item(), 0.0);
        assert_eq!(d.grad().item(), 0.0);
    }

    #[test]
    fn test_set_data_keeps_shape() {
        let mut a = Var::new(Tensor::new(vec![1.0, 2.0], vec![2]));
        a.set_data(Tensor::new(vec![5.0, 6.0], vec![2]));
        assert_eq!(a.data(), Tensor::new(vec![5.0, 6.0], vec![2]));
    }

    #[test]
    fn test_display_shows_graph() {
        let a = Var::scalar(1.0);
        let b = Var::scalar(2.0);
        let c = &a + &b;
        let printed = format!("{}", c);
        assert!(printed.contains("\"backprop_fn\": Some(Add)"));
        assert!(printed.contains("\"shape\": []"));
    }
}
