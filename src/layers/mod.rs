//! Neural network layer implementations.
//!
//! These are the parameter-holding building blocks stored in a
//! [`LayerArena`](crate::arena::LayerArena): dense (fully connected) layers,
//! batch normalization and the activation functions applied after them.

pub mod activation;
pub mod dense;
pub mod norm;

pub use activation::Activation;
pub use dense::{Dense, DenseConfig};
pub use norm::Normalization;
