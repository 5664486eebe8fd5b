//! Optimizer(s)

use crate::tensor::Tensor;
use crate::var::Var;

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients
    fn step(&mut self);
    /// Zeros gradients for all parameters
    fn zero_grad(&mut self);
}

/// SGD with momentum
pub struct SGD {
    params: Vec<Var>,
    // currently does not change the learning rate based on the iteration
    // ideally lr would decay over time
    lr: f32,
    momentum: f32,
    // velocity per parameter, same shape as the parameter
    velocity: Vec<Tensor>,
}

impl SGD {
    pub fn new(params: Vec<Var>, lr: f32, momentum: f32) -> Self {
        let velocity = params.iter().map(|p| Tensor::zeros(&p.shape())).collect();
        Self {
            params,
            lr,
            momentum,
            velocity,
        }
    }

    #[cfg(test)]
    fn velocities(&self) -> &[Tensor] {
        &self.velocity
    }
}

impl Optim for SGD {
    fn step(&mut self) {
        for (idx, param) in self.params.iter_mut().enumerate() {
            // SGD with momentum
            let velocity = self.velocity[idx]
                .scale(self.momentum)
                .sub(&param.grad().scale(self.lr));
            let new_val = param.data().add(&velocity);
            self.velocity[idx] = velocity;
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        for param in self.params.iter_mut() {
            param.zero_grad();
        }
    }
}

/// Adam with bias-corrected first and second moment estimates
pub struct Adam {
    params: Vec<Var>,
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    /// Completed steps, drives the bias correction
    step_count: i32,
    first_moment: Vec<Tensor>,
    second_moment: Vec<Tensor>,
}

impl Adam {
    pub fn new(params: Vec<Var>, lr: f32) -> Self {
        let first_moment: Vec<Tensor> =
            params.iter().map(|p| Tensor::zeros(&p.shape())).collect();
        let second_moment = first_moment.clone();
        Self {
            params,
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step_count: 0,
            first_moment,
            second_moment,
        }
    }
}

impl Optim for Adam {
    fn step(&mut self) {
        self.step_count += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step_count);
        let bias2 = 1.0 - self.beta2.powi(self.step_count);
        let (lr, eps) = (self.lr, self.eps);
        for (idx, param) in self.params.iter_mut().enumerate() {
            let grad = param.grad();
            let m = self.first_moment[idx]
                .scale(self.beta1)
                .add(&grad.scale(1.0 - self.beta1));
            let v = self.second_moment[idx]
                .scale(self.beta2)
                .add(&grad.mul(&grad).scale(1.0 - self.beta2));
            let update = m.zip_map(&v, |m_i, v_i| {
                let m_hat = m_i / bias1;
                let v_hat = v_i / bias2;
                lr * m_hat / (v_hat.sqrt() + eps)
            });
            let new_val = param.data().sub(&update);
            self.first_moment[idx] = m;
            self.second_moment[idx] = v;
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        for param in self.params.iter_mut() {
            param.zero_grad();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::assert_eq_float;

    use super::*;

    #[test]
    fn test_sgd_no_momentum() {
        let a = Var::scalar(1.0);
        let b = Var::scalar(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.0);
        optim.step();
        assert_eq!(a.grad().item(), 1.0);
        assert_eq!(b.grad().item(), 1.0);
        assert_eq!(c.grad().item(), 1.0);
        assert_eq!(a.item(), 0.9);
        assert_eq!(b.item(), 1.9);
        assert_eq!(c.item(), 2.9);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let a = Var::scalar(1.0);
        let b = Var::scalar(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.9);
        optim.step();
        assert_eq!(a.grad().item(), 1.0);
        assert_eq!(b.grad().item(), 1.0);
        assert_eq!(c.grad().item(), 1.0);
        assert_eq!(a.item(), 0.9);
        assert_eq!(b.item(), 1.9);
        assert_eq!(c.item(), 2.9);
        for v in optim.velocities() {
            assert_eq!(*v, Tensor::scalar(-0.1));
        }
        optim.step();
        assert_eq!(a.item(), 0.71);
        assert_eq!(b.item(), 1.71);
        assert_eq!(c.item(), 2.71);
        for v in optim.velocities() {
            assert_eq!(*v, Tensor::scalar(-0.19));
        }
    }

    #[test]
    fn test_sgd_tensor_param() {
        let x = Var::new(Tensor::new(vec![1.0, 2.0], vec![2]));
        let total = x.sum();
        total.backward();

        let mut optim = SGD::new(vec![x.clone()], 0.5, 0.0);
        optim.step();
        assert_eq!(x.data(), Tensor::new(vec![0.5, 1.5], vec![2]));
    }

    #[test]
    fn test_sgd_zero_gradients() {
        // a fresh leaf has a zero gradient, so a momentum-free step must not move it
        let x = Var::new(Tensor::new(vec![1.0, 2.0], vec![2]));
        let mut optim = SGD::new(vec![x.clone()], 0.1, 0.0);
        optim.step();
        assert_eq!(x.data(), Tensor::new(vec![1.0, 2.0], vec![2]));

        // clearing accumulated gradients restores the no-op
        x.sum().backward();
        optim.zero_grad();
        optim.step();
        assert_eq!(x.data(), Tensor::new(vec![1.0, 2.0], vec![2]));
    }

    #[test]
    fn test_adam_first_step_moves_by_lr() {
        // bias correction makes the very first update lr * g / (|g| + eps),
        // so any nonzero gradient moves the parameter by about lr
        let a = Var::scalar(1.0);
        let c = &a + &a;
        c.backward();
        assert_eq!(a.grad().item(), 2.0);

        let mut optim = Adam::new(vec![a.clone()], 0.1);
        optim.step();
        assert_eq_float!(a.item(), 0.9);
    }

    #[test]
    fn test_adam_descends_quadratic() {
        // minimize (a - 3)^2
        let a = Var::scalar(1.0);
        let target = Var::scalar(3.0);
        let mut optim = Adam::new(vec![a.clone()], 0.1);

        let initial = {
            let diff = &a - &target;
            (&diff * &diff).item()
        };
        let mut last = initial;
        for _ in 0..100 {
            optim.zero_grad();
            let diff = &a - &target;
            let loss = &diff * &diff;
            loss.backward();
            optim.step();
            last = loss.item();
        }

        assert!(last < initial);
        assert!((a.item() - 3.0).abs() < 0.5, "a = {}", a.item());
    }

    #[test]
    fn test_zero_grad_resets_params() {
        let x = Var::new(Tensor::new(vec![1.0, 2.0], vec![2]));
        x.sum().backward();
        assert!(x.grad().data().iter().all(|g| *g == 1.0));

        let mut optim = Adam::new(vec![x.clone()], 0.1);
        optim.zero_grad();
        assert!(x.grad().data().iter().all(|g| *g == 0.0));
    }
}
