use spectraclean_autodiff::{NodeId, Variable};
use spectraclean_core::{Tensor, TensorResult};
use std::collections::HashMap;

/// Trait for optimizers.
///
/// Optimizer state is kept per parameter position, so `params` must list the
/// same parameters in the same order on every step. Node ids change whenever
/// the tape is reset; positions do not.
pub trait Optimizer {
    /// Perform one optimization step in place using computed gradients.
    /// Parameters with no gradient entry are left untouched.
    fn step(
        &mut self,
        params: &mut [&mut Variable],
        grads: &HashMap<NodeId, Tensor<f64>>,
    ) -> TensorResult<()>;

    fn lr(&self) -> f64;

    fn set_lr(&mut self, lr: f64);
}

fn zeros_like(params: &[&mut Variable]) -> Vec<Tensor<f64>> {
    params.iter().map(|p| Tensor::zeros(p.shape_vec())).collect()
}

/// Stochastic Gradient Descent with optional momentum.
pub struct SGD {
    pub lr: f64,
    pub momentum: f64,
    velocities: Vec<Tensor<f64>>,
}

impl SGD {
    pub fn new(lr: f64, momentum: f64) -> Self {
        SGD {
            lr,
            momentum,
            velocities: Vec::new(),
        }
    }
}

impl Optimizer for SGD {
    fn step(
        &mut self,
        params: &mut [&mut Variable],
        grads: &HashMap<NodeId, Tensor<f64>>,
    ) -> TensorResult<()> {
        if self.velocities.len() != params.len() {
            self.velocities = zeros_like(params);
        }
        for (i, param) in params.iter_mut().enumerate() {
            if let Some(grad) = grads.get(&param.node_id) {
                // v = momentum * v - lr * grad
                self.velocities[i] = self.velocities[i]
                    .mul_scalar(self.momentum)
                    .sub(&grad.mul_scalar(self.lr))?;

                // param += v
                param.data = param.data.add(&self.velocities[i])?;
            }
        }
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }
}

/// Adam optimizer.
pub struct Adam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub t: usize,
    m: Vec<Tensor<f64>>, // first moment
    v: Vec<Tensor<f64>>, // second moment
}

impl Adam {
    pub fn new(lr: f64) -> Self {
        Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }
}

impl Optimizer for Adam {
    fn step(
        &mut self,
        params: &mut [&mut Variable],
        grads: &HashMap<NodeId, Tensor<f64>>,
    ) -> TensorResult<()> {
        if self.m.len() != params.len() {
            self.m = zeros_like(params);
            self.v = zeros_like(params);
            self.t = 0;
        }
        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);

        for (i, param) in params.iter_mut().enumerate() {
            if let Some(grad) = grads.get(&param.node_id) {
                self.m[i] = self.m[i]
                    .mul_scalar(self.beta1)
                    .add(&grad.mul_scalar(1.0 - self.beta1))?;

                let grad_sq = grad.mul(grad)?;
                self.v[i] = self.v[i]
                    .mul_scalar(self.beta2)
                    .add(&grad_sq.mul_scalar(1.0 - self.beta2))?;

                let m_hat = self.m[i].mul_scalar(1.0 / bias_correction1);
                let v_hat = self.v[i].mul_scalar(1.0 / bias_correction2);

                let denom = v_hat.sqrt().add_scalar(self.epsilon);
                let update = m_hat.div(&denom)?.mul_scalar(self.lr);
                param.data = param.data.sub(&update)?;
            }
        }
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }
}
