//! Loss functions for training.

use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

/// Supported loss functions. Targets are always dense `[batch, classes]`
/// tensors; class labels are one-hot encoded before reaching the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Mean Squared Error loss.
    Mse,
    /// Binary Cross Entropy loss.
    BinaryCrossEntropy,
    /// Categorical cross entropy on probability outputs (softmax classifiers).
    #[default]
    CategoricalCrossEntropy,
}

const EPSILON: f64 = 1e-7;

impl Loss {
    /// Computes the loss between predictions and targets.
    pub fn compute<B: Backend>(
        &self,
        predictions: Tensor<B, 2>,
        targets: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        match self {
            Loss::Mse => {
                let diff = predictions - targets;
                let squared = diff.clone() * diff;
                squared.mean()
            }
            Loss::BinaryCrossEntropy => {
                // BCE = -mean(y * log(p) + (1-y) * log(1-p))
                let ones = Tensor::ones_like(&predictions);
                let p_clipped = predictions.clamp(EPSILON, 1.0 - EPSILON);
                let log_p = p_clipped.clone().log();
                let log_1_minus_p = (ones.clone() - p_clipped).log();
                let bce = targets.clone() * log_p + (ones - targets) * log_1_minus_p;
                bce.neg().mean()
            }
            Loss::CategoricalCrossEntropy => {
                // CCE = -mean_over_batch(sum_over_classes(y * log(p)))
                let log_p = predictions.clamp(EPSILON, 1.0).log();
                let per_sample = (targets * log_p).sum_dim(1);
                per_sample.neg().mean()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_mse_loss_nonzero() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats([[1.0], [2.0]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[2.0], [2.0]], &device);

        let loss = Loss::Mse.compute(predictions, targets);
        let loss_value: f32 = loss.into_scalar();

        // MSE = mean((1-2)^2 + (2-2)^2) = mean(1 + 0) = 0.5
        assert!((loss_value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_bce_loss_perfect_prediction() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats([[0.99], [0.01]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0], [0.0]], &device);

        let loss = Loss::BinaryCrossEntropy.compute(predictions, targets);
        let loss_value: f32 = loss.into_scalar();

        assert!(loss_value < 0.1);
    }

    #[test]
    fn test_cce_matches_negative_log_likelihood() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions =
            Tensor::<TestBackend, 2>::from_floats([[0.7, 0.2, 0.1], [0.25, 0.5, 0.25]], &device);
        let targets =
            Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]], &device);

        let loss_value: f32 = Loss::CategoricalCrossEntropy
            .compute(predictions, targets)
            .into_scalar();

        let expected = -(0.7f32.ln() + 0.25f32.ln()) / 2.0;
        assert!((loss_value - expected).abs() < 1e-5);
    }

    #[test]
    fn test_cce_is_finite_for_zero_probability() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);

        let loss_value: f32 = Loss::CategoricalCrossEntropy
            .compute(predictions, targets)
            .into_scalar();
        assert!(loss_value.is_finite());
        assert!(loss_value > 10.0);
    }
}
