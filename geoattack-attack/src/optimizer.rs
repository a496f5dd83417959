//! First-order optimizers over a `[B, 3, N]` candidate batch

use crate::config::OptimizerKind;
use ndarray::{Array3, Zip};

/// Adam with bias correction
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    first_moment: Array3<f32>,
    second_moment: Array3<f32>,
}

impl Adam {
    pub fn new(learning_rate: f32, shape: (usize, usize, usize)) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            first_moment: Array3::zeros(shape),
            second_moment: Array3::zeros(shape),
        }
    }

    pub fn step(&mut self, params: &mut Array3<f32>, grad: &Array3<f32>) {
        self.step += 1;
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let correction1 = 1.0 - beta1.powi(self.step);
        let correction2 = 1.0 - beta2.powi(self.step);
        let step_size = self.learning_rate / correction1;

        Zip::from(params)
            .and(grad)
            .and(&mut self.first_moment)
            .and(&mut self.second_moment)
            .for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let denominator = (*v / correction2).sqrt() + epsilon;
                *p -= step_size * *m / denominator;
            });
    }
}

/// Plain gradient descent
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }

    pub fn step(&self, params: &mut Array3<f32>, grad: &Array3<f32>) {
        params.scaled_add(-self.learning_rate, grad);
    }
}

/// The optimizer attached to the candidate for one outer step
#[derive(Debug, Clone)]
pub enum Optimizer {
    Adam(Adam),
    Sgd(Sgd),
}

impl Optimizer {
    /// Fresh optimizer state for parameters of the given shape
    pub fn new(kind: OptimizerKind, learning_rate: f32, shape: (usize, usize, usize)) -> Self {
        match kind {
            OptimizerKind::Adam => Optimizer::Adam(Adam::new(learning_rate, shape)),
            OptimizerKind::Sgd => Optimizer::Sgd(Sgd::new(learning_rate)),
        }
    }

    pub fn step(&mut self, params: &mut Array3<f32>, grad: &Array3<f32>) {
        match self {
            Optimizer::Adam(adam) => adam.step(params, grad),
            Optimizer::Sgd(sgd) => sgd.step(params, grad),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sgd_step() {
        let mut params = Array3::from_elem((1, 3, 2), 1.0f32);
        let grad = Array3::from_elem((1, 3, 2), 2.0f32);
        Optimizer::new(OptimizerKind::Sgd, 0.1, (1, 3, 2)).step(&mut params, &grad);
        assert!(params.iter().all(|&p| (p - 0.8).abs() < 1e-6));
    }

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut params = Array3::zeros((1, 3, 2));
        let mut grad = Array3::zeros((1, 3, 2));
        grad[[0, 0, 0]] = 5.0;
        grad[[0, 1, 1]] = -0.01;

        let mut adam = Optimizer::new(OptimizerKind::Adam, 0.01, (1, 3, 2));
        adam.step(&mut params, &grad);

        assert_relative_eq!(params[[0, 0, 0]], -0.01, epsilon = 1e-6);
        assert_relative_eq!(params[[0, 1, 1]], 0.01, epsilon = 1e-5);
        assert_eq!(params[[0, 2, 0]], 0.0);
    }

    #[test]
    fn test_adam_minimizes_quadratic() {
        let mut params = Array3::from_elem((1, 3, 1), 1.0f32);
        let mut adam = Optimizer::new(OptimizerKind::Adam, 0.05, (1, 3, 1));
        for _ in 0..500 {
            let grad = params.mapv(|p| 2.0 * p);
            adam.step(&mut params, &grad);
        }
        assert!(params.iter().all(|p| p.abs() < 1e-2));
    }
}
