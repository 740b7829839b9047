//! Operations (layer instances) for the computation graph.
//!
//! An `Operation` is a named layer *instance*. Its `OpId` is what ties a
//! node in the graph to a parameter slot in the layer arena, so applying the
//! same operation (or a clone of it) to several buffers shares parameters.
//! Creating a new operation always yields fresh, independently initialized
//! parameters.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::layers::Activation;

use super::buffer::DataBuffer;

/// Unique identifier for an operation.
pub type OpId = usize;

/// Global counter for unique operation IDs.
static OP_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Generates a new unique operation ID.
fn next_op_id() -> OpId {
    OP_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Default epsilon for batch normalization, matching Keras.
pub const DEFAULT_EPSILON: f32 = 1e-3;

/// The kind of layer an operation applies.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    /// Reshape a per-sample tensor into a flat feature vector.
    Flatten,
    /// Dense (fully connected) layer.
    Dense { units: usize, activation: Activation },
    /// Batch normalization layer with trainable parameters.
    BatchNorm { epsilon: f32 },
}

impl LayerKind {
    /// Short kind name used for default layer names and summaries.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Flatten => "flatten",
            Self::Dense { .. } => "dense",
            Self::BatchNorm { .. } => "batch_norm",
        }
    }

    /// Returns true if the layer owns trainable parameters.
    pub fn has_params(&self) -> bool {
        !matches!(self, Self::Flatten)
    }
}

/// A layer instance in the graph.
#[derive(Debug, Clone)]
pub struct Operation {
    id: OpId,
    name: String,
    kind: LayerKind,
}

impl Operation {
    fn with_kind(kind: LayerKind) -> Self {
        let id = next_op_id();
        Self {
            id,
            name: format!("{}_{}", kind.kind_name(), id),
            kind,
        }
    }

    /// Creates a new Flatten operation.
    pub fn flatten() -> Self {
        Self::with_kind(LayerKind::Flatten)
    }

    /// Creates a new Dense operation.
    pub fn dense(units: usize, activation: Activation) -> Self {
        Self::with_kind(LayerKind::Dense { units, activation })
    }

    /// Creates a new BatchNorm operation with trainable parameters.
    pub fn batch_norm(epsilon: f32) -> Self {
        Self::with_kind(LayerKind::BatchNorm { epsilon })
    }

    /// Creates a new BatchNorm operation with default epsilon (1e-3).
    pub fn batch_norm_default() -> Self {
        Self::batch_norm(DEFAULT_EPSILON)
    }

    /// Renames the operation. The identity (and thus the parameters) is kept.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the unique ID of this operation.
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Returns the layer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the layer kind.
    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Returns the per-sample output shape for the given input shape.
    pub fn output_shape(&self, input_shape: &[usize]) -> Vec<usize> {
        match &self.kind {
            LayerKind::Flatten => vec![input_shape.iter().product()],
            LayerKind::Dense { units, .. } => vec![*units],
            LayerKind::BatchNorm { .. } => input_shape.to_vec(),
        }
    }

    /// Number of trainable scalars when applied to an input of `input_size` features.
    pub fn num_params(&self, input_size: usize) -> usize {
        match &self.kind {
            LayerKind::Flatten => 0,
            LayerKind::Dense { units, .. } => input_size * units + units,
            LayerKind::BatchNorm { .. } => 2 * input_size,
        }
    }

    /// Applies this operation to an input buffer, returning a new DataBuffer.
    pub fn apply(&self, input: DataBuffer) -> DataBuffer {
        if !matches!(self.kind, LayerKind::Flatten) {
            assert!(
                input.is_flat(),
                "{} requires a flat input; apply flatten first",
                self.name
            );
        }
        let shape = self.output_shape(input.shape());
        DataBuffer::new(shape, Some(self.clone()), vec![input])
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Operation {}

/// Convenience functions for creating operations and applying them in one step.
pub mod ops {
    use super::*;

    /// Flattens the input into a feature vector.
    ///
    /// # Example
    /// ```
    /// use branchnet::graph::{InputBuffer, ops};
    ///
    /// let input = InputBuffer::with_shape(&[28, 28]);
    /// let flat = ops::flatten(input.buffer());
    /// assert_eq!(flat.shape(), &[784]);
    /// ```
    pub fn flatten(input: DataBuffer) -> DataBuffer {
        Operation::flatten().apply(input)
    }

    /// Creates a Dense layer and applies it to the input.
    ///
    /// # Example
    /// ```
    /// use branchnet::graph::{InputBuffer, ops};
    /// use branchnet::layers::Activation;
    ///
    /// let input = InputBuffer::new(4);
    /// let output = ops::dense(8, Activation::Relu, input.buffer());
    /// assert_eq!(output.size(), 8);
    /// ```
    pub fn dense(units: usize, activation: Activation, input: DataBuffer) -> DataBuffer {
        Operation::dense(units, activation).apply(input)
    }

    /// Applies batch normalization to the input.
    pub fn batch_norm(input: DataBuffer) -> DataBuffer {
        Operation::batch_norm_default().apply(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::buffer::InputBuffer;

    #[test]
    fn test_dense_creation() {
        let dense = Operation::dense(8, Activation::Relu);
        assert!(matches!(dense.kind(), LayerKind::Dense { units: 8, .. }));
        assert!(dense.name().starts_with("dense_"));
    }

    #[test]
    fn test_unique_ids() {
        let op1 = Operation::dense(4, Activation::None);
        let op2 = Operation::flatten();
        let op3 = Operation::batch_norm_default();

        assert_ne!(op1.id(), op2.id());
        assert_ne!(op2.id(), op3.id());
    }

    #[test]
    fn test_named_keeps_identity() {
        let op = Operation::dense(4, Activation::Relu);
        let id = op.id();
        let renamed = op.named("branch_0/dense_0");
        assert_eq!(renamed.id(), id);
        assert_eq!(renamed.name(), "branch_0/dense_0");
    }

    #[test]
    fn test_output_shape() {
        let dense = Operation::dense(8, Activation::Relu);
        assert_eq!(dense.output_shape(&[4]), vec![8]);

        let flatten = Operation::flatten();
        assert_eq!(flatten.output_shape(&[28, 28]), vec![784]);

        let norm = Operation::batch_norm_default();
        assert_eq!(norm.output_shape(&[16]), vec![16]);
    }

    #[test]
    fn test_num_params() {
        assert_eq!(Operation::dense(10, Activation::Softmax).num_params(784), 7850);
        assert_eq!(Operation::batch_norm_default().num_params(16), 32);
        assert_eq!(Operation::flatten().num_params(784), 0);
    }

    #[test]
    fn test_reapplying_shares_identity() {
        let shared = Operation::dense(4, Activation::Relu);
        let a = shared.apply(InputBuffer::new(3).buffer());
        let b = shared.apply(InputBuffer::new(3).buffer());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.producer(), b.producer());
    }

    #[test]
    fn test_convenience_flatten_then_dense() {
        let input = InputBuffer::with_shape(&[2, 3]);
        let flat = ops::flatten(input.buffer());
        let output = ops::dense(5, Activation::Relu, flat);
        assert_eq!(output.shape(), &[5]);
        assert!(output.producer().is_some());
    }

    #[test]
    fn test_flatten_of_flat_is_noop_shape() {
        let input = InputBuffer::new(6);
        assert_eq!(ops::flatten(input.buffer()).shape(), &[6]);
    }

    #[test]
    #[should_panic(expected = "requires a flat input")]
    fn test_dense_requires_flat_input() {
        let input = InputBuffer::with_shape(&[2, 2]);
        ops::dense(4, Activation::Relu, input.buffer());
    }
}
