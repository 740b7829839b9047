//! Batch normalization over flat feature vectors.

use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::optim::GradientsParams;
use burn::tensor::Tensor;
use burn::tensor::backend::{AutodiffBackend, Backend};

use crate::errors::ModelError;

/// Initialized BatchNorm layer with Burn's BatchNorm module.
#[derive(Module, Debug)]
pub struct Normalization<B: Backend> {
    batch_norm: BatchNorm<B, 1>,
    op_id: usize,
    num_features: usize,
    epsilon: f32,
}

impl<B: Backend> Normalization<B> {
    pub fn new(op_id: usize, num_features: usize, epsilon: f32, device: &B::Device) -> Self {
        let batch_norm = BatchNormConfig::new(num_features)
            .with_epsilon(epsilon as f64)
            .init(device);
        Self {
            batch_norm,
            op_id,
            num_features,
            epsilon,
        }
    }

    /// Normalizes a `[batch, features]` tensor.
    ///
    /// Uses batch statistics while autodiff is enabled and the running
    /// statistics otherwise.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, features] = input.dims();
        let input_3d = input.reshape([batch, features, 1]);
        let output_3d = self.batch_norm.forward(input_3d);
        output_3d.reshape([batch, features])
    }

    /// Normalizes with the running statistics regardless of the backend,
    /// leaving them untouched. Used for frozen layers during training.
    pub fn forward_frozen(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mean = self.batch_norm.running_mean.value().unsqueeze::<2>();
        let var = self.batch_norm.running_var.value().unsqueeze::<2>();
        let gamma = self.batch_norm.gamma.val().unsqueeze::<2>();
        let beta = self.batch_norm.beta.val().unsqueeze::<2>();

        let std = var.add_scalar(self.epsilon).sqrt();
        input.sub(mean).div(std).mul(gamma).add(beta)
    }

    pub fn op_id(&self) -> usize {
        self.op_id
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Trainable scalars (gamma and beta).
    pub fn num_params(&self) -> usize {
        2 * self.num_features
    }

    /// Snapshot of gamma followed by beta.
    pub fn parameter_values(&self) -> Result<Vec<f32>, ModelError> {
        let mut values: Vec<f32> = self
            .batch_norm
            .gamma
            .val()
            .to_data()
            .to_vec()
            .map_err(ModelError::tensor_data)?;
        let beta: Vec<f32> = self
            .batch_norm
            .beta
            .val()
            .to_data()
            .to_vec()
            .map_err(ModelError::tensor_data)?;
        values.extend(beta);
        Ok(values)
    }
}

impl<B: AutodiffBackend> Normalization<B> {
    /// Drops the gamma and beta gradients. Pair with
    /// [`forward_frozen`](Self::forward_frozen) so the running statistics
    /// stay fixed too.
    pub fn freeze_grads(&self, grads: &mut GradientsParams) {
        grads.remove::<B::InnerBackend, 1>(self.batch_norm.gamma.id);
        grads.remove::<B::InnerBackend, 1>(self.batch_norm.beta.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_initial_parameters() {
        let device = <TestBackend as Backend>::Device::default();
        let layer = Normalization::<TestBackend>::new(3, 4, 1e-3, &device);

        // gamma=1, beta=0
        let values = layer.parameter_values().unwrap();
        assert_eq!(values.len(), layer.num_params());
        assert!(values[..4].iter().all(|g| (g - 1.0).abs() < 1e-6));
        assert!(values[4..].iter().all(|b| b.abs() < 1e-6));
        assert_eq!(layer.op_id(), 3);
    }

    #[test]
    fn test_forward_initial_state() {
        let device = <TestBackend as Backend>::Device::default();
        let epsilon = 1e-3f32;
        let layer = Normalization::<TestBackend>::new(0, 4, epsilon, &device);

        // Inference mode with mean=0, var=1: output ≈ x / sqrt(1 + eps)
        let input = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0, 4.0]], &device);
        let output: Vec<f32> = layer.forward(input).to_data().to_vec().unwrap();

        let scale = 1.0 / (1.0 + epsilon).sqrt();
        for (i, value) in output.iter().enumerate() {
            let expected = (i + 1) as f32 * scale;
            assert!(
                (value - expected).abs() < 1e-4,
                "output[{}] should be ~{}, got {}",
                i,
                expected,
                value
            );
        }
    }

    #[test]
    fn test_frozen_forward_keeps_running_statistics() {
        use burn::module::AutodiffModule;
        type TrainingBackend = burn::backend::Autodiff<NdArray>;

        let device = <TrainingBackend as Backend>::Device::default();
        let layer = Normalization::<TrainingBackend>::new(0, 2, 1e-3, &device);
        let input = Tensor::<TrainingBackend, 2>::from_floats(
            [[1.0, 8.0], [3.0, 2.0], [5.0, 6.0]],
            &device,
        );

        let frozen: Vec<f32> = layer
            .forward_frozen(input.clone())
            .to_data()
            .to_vec()
            .unwrap();
        let inference: Vec<f32> = layer
            .valid()
            .forward(input.clone().inner())
            .to_data()
            .to_vec()
            .unwrap();
        for (a, b) in frozen.iter().zip(&inference) {
            assert!((a - b).abs() < 1e-6);
        }

        // a training-mode pass moves the running mean away from zero
        let _ = layer.forward(input.clone());
        let moved: Vec<f32> = layer.valid().forward(input.inner()).to_data().to_vec().unwrap();
        assert_ne!(moved, inference);
    }

    #[test]
    fn test_preserves_batch_dimension() {
        let device = <TestBackend as Backend>::Device::default();
        let layer = Normalization::<TestBackend>::new(0, 2, 1e-3, &device);
        let input =
            Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]], &device);
        assert_eq!(layer.forward(input).dims(), [3, 2]);
    }
}
