//! Dense (fully connected) layer implementation.

use crate::errors::ModelError;
use crate::layers::Activation;
use burn::{
    module::Module,
    nn::{Linear, LinearConfig},
    optim::GradientsParams,
    tensor::{
        Tensor,
        backend::{AutodiffBackend, Backend},
    },
};

/// Configuration for a Dense layer.
#[derive(Debug, Clone)]
pub struct DenseConfig {
    /// Number of input features.
    pub input_size: usize,
    /// Number of output features.
    pub output_size: usize,
    /// Activation function to apply after the linear transformation.
    pub activation: Activation,
}

impl DenseConfig {
    /// Creates a new DenseConfig.
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            input_size,
            output_size,
            activation: Activation::None,
        }
    }

    /// Sets the activation function.
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Initializes a fresh Dense layer bound to the operation `op_id`.
    pub fn init<B: Backend>(&self, op_id: usize, device: &B::Device) -> Dense<B> {
        let linear = LinearConfig::new(self.input_size, self.output_size).init(device);

        Dense {
            linear,
            op_id,
            input_size: self.input_size,
            output_size: self.output_size,
            activation_id: self.activation.to_id(),
        }
    }
}

/// A dense (fully connected) layer with optional activation.
///
/// It performs: output = activation(input @ weights + bias)
#[derive(Module, Debug)]
pub struct Dense<B: Backend> {
    /// The underlying linear transformation.
    linear: Linear<B>,
    /// Graph operation owning these parameters (constant metadata).
    op_id: usize,
    /// Input size (constant metadata).
    input_size: usize,
    /// Output size (constant metadata).
    output_size: usize,
    /// Activation function ID, see [`Activation::to_id`].
    activation_id: u8,
}

impl<B: Backend> Dense<B> {
    /// Performs the forward pass.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = self.linear.forward(input);
        Activation::from_id(self.activation_id).apply(output)
    }

    /// Returns the graph operation these parameters belong to.
    pub fn op_id(&self) -> usize {
        self.op_id
    }

    /// Returns the input size of this layer.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Returns the output size of this layer.
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Returns the activation function.
    pub fn activation(&self) -> Activation {
        Activation::from_id(self.activation_id)
    }

    /// Number of trainable scalars.
    pub fn num_params(&self) -> usize {
        self.input_size * self.output_size + self.output_size
    }

    /// Snapshot of the weight matrix followed by the bias, row-major.
    pub fn parameter_values(&self) -> Result<Vec<f32>, ModelError> {
        let mut values: Vec<f32> = self
            .linear
            .weight
            .val()
            .to_data()
            .to_vec()
            .map_err(ModelError::tensor_data)?;
        if let Some(bias) = &self.linear.bias {
            let bias: Vec<f32> = bias
                .val()
                .to_data()
                .to_vec()
                .map_err(ModelError::tensor_data)?;
            values.extend(bias);
        }
        Ok(values)
    }
}

impl<B: AutodiffBackend> Dense<B> {
    /// Drops this layer's gradients so an optimizer step leaves it untouched.
    pub fn freeze_grads(&self, grads: &mut GradientsParams) {
        grads.remove::<B::InnerBackend, 2>(self.linear.weight.id);
        if let Some(bias) = &self.linear.bias {
            grads.remove::<B::InnerBackend, 1>(bias.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_dense_config_creation() {
        let config = DenseConfig::new(10, 5).with_activation(Activation::Relu);

        assert_eq!(config.input_size, 10);
        assert_eq!(config.output_size, 5);
        assert_eq!(config.activation, Activation::Relu);
    }

    #[test]
    fn test_dense_layer_creation() {
        let device = <TestBackend as Backend>::Device::default();
        let dense: Dense<TestBackend> = DenseConfig::new(4, 2)
            .with_activation(Activation::Sigmoid)
            .init(7, &device);

        assert_eq!(dense.op_id(), 7);
        assert_eq!(dense.input_size(), 4);
        assert_eq!(dense.output_size(), 2);
        assert_eq!(dense.activation(), Activation::Sigmoid);
        assert_eq!(dense.num_params(), 10);
    }

    #[test]
    fn test_dense_forward_shape() {
        let device = <TestBackend as Backend>::Device::default();
        let dense: Dense<TestBackend> = DenseConfig::new(4, 2).init(0, &device);

        let input = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        let output = dense.forward(input);

        assert_eq!(output.dims(), [3, 2]);
    }

    #[test]
    fn test_dense_parameter_snapshot() {
        let device = <TestBackend as Backend>::Device::default();
        let dense: Dense<TestBackend> = DenseConfig::new(3, 2).init(0, &device);

        let values = dense.parameter_values().unwrap();
        assert_eq!(values.len(), dense.num_params());
    }

    #[test]
    fn test_independent_initialization() {
        let device = <TestBackend as Backend>::Device::default();
        let config = DenseConfig::new(8, 8);
        let a: Dense<TestBackend> = config.init(0, &device);
        let b: Dense<TestBackend> = config.init(1, &device);

        assert_ne!(a.parameter_values().unwrap(), b.parameter_values().unwrap());
    }
}
