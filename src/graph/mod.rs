//! Functional graph API for wiring layers into multi-output networks.
//!
//! Graphs are pure structure: layer instances (`Operation`) applied to
//! symbolic buffers. Parameters are created when a graph is compiled
//! against a [`LayerArena`](crate::arena::LayerArena).
//!
//! # Example
//!
//! ```
//! use branchnet::arena::LayerArena;
//! use branchnet::graph::{InputBuffer, ModelGraph, ops};
//! use branchnet::layers::Activation;
//! use burn::backend::NdArray;
//! use burn::tensor::backend::Backend;
//!
//! type TestBackend = NdArray;
//! let device = <TestBackend as Backend>::Device::default();
//!
//! // Create input and build graph (no device needed)
//! let input = InputBuffer::with_shape(&[2, 2]);
//! let x = ops::flatten(input.buffer());
//! let hidden = ops::dense(8, Activation::Relu, x);
//! let output = ops::dense(3, Activation::Softmax, hidden);
//! let graph = ModelGraph::single(input, output);
//!
//! // Compile to create weights on device
//! let mut arena = LayerArena::<TestBackend>::new();
//! let model = arena.compile(&graph, &device).unwrap();
//! assert_eq!(model.num_outputs(), 1);
//! ```

mod buffer;
mod core;
mod operation;
mod plan;
mod summary;

pub use buffer::{BufferId, DataBuffer, InputBuffer};
pub use core::{GraphId, LayerEntry, ModelGraph};
pub use operation::{DEFAULT_EPSILON, LayerKind, OpId, Operation, ops};
pub use plan::{CompiledModel, LayerRequirement};
pub(crate) use plan::{ExecutionPlan, Step};
pub use summary::{GraphSummary, LayerSummary};
