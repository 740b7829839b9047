//! Model-related error types.

use thiserror::Error;

/// Errors that can occur while building, compiling or training graphs.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model has no layers defined")]
    NoLayers,

    #[error("Model has no input buffer defined")]
    NoInputBuffer,

    #[error("Model has no outputs defined")]
    NoOutputs,

    #[error("Invalid layer configuration: {message}")]
    InvalidLayerConfig { message: String },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Expected {expected} label copies (one per output), got {actual}")]
    LabelCountMismatch { expected: usize, actual: usize },

    #[error("Expected {expected} loss weights (one per output), got {actual}")]
    LossWeightCountMismatch { expected: usize, actual: usize },

    #[error("Unknown layer: {name}")]
    UnknownLayer { name: String },

    #[error("Unknown branch: {tag}")]
    UnknownBranch { tag: String },

    #[error("Duplicate layer name in graph: {name}")]
    DuplicateLayerName { name: String },

    #[error("Index {index} is outside the layer registry (len {len})")]
    InvalidIndexPath { index: usize, len: usize },

    #[error("Invalid dataset: {message}")]
    InvalidDataset { message: String },

    #[error("Tensor data error: {message}")]
    TensorData { message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Training error: {message}")]
    TrainingError { message: String },

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),
}

impl ModelError {
    pub(crate) fn tensor_data(err: impl std::fmt::Debug) -> Self {
        Self::TensorData {
            message: format!("{err:?}"),
        }
    }
}
