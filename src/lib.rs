//! # branchnet
//!
//! Multi-branch aggregation training and layer reuse on top of Burn.
//!
//! Graphs are wired from layer instances ([`graph::Operation`]). The same
//! instance applied in several graphs shares one set of parameters, held by
//! a [`LayerArena`]. This makes it possible to:
//!
//! - **Aggregate**: share a stem between N independently initialized
//!   branches and train all outputs jointly ([`topology::build_multi_branch`],
//!   [`training::train`]).
//! - **Cut out**: rebuild the best branch as a standalone model from the
//!   trained instances ([`cutout::cutout_branch`]).
//! - **Grow**: reuse trained layers as a prefix and attach new heads
//!   ([`cutout::extend`]).
//! - **Tap**: attach a classifier at every depth of a chain
//!   ([`topology::build_auxiliary_chain`]).
//!
//! ## Example
//!
//! ```
//! use branchnet::prelude::*;
//! use burn::backend::NdArray;
//!
//! type Backend = NdArray;
//!
//! let device = <Backend as burn::tensor::backend::Backend>::Device::default();
//!
//! // A shared flatten stem feeding three branches
//! let topology = build_multi_branch(
//!     &[2, 2],
//!     &StemSpec::flatten(),
//!     &BranchSpec::new(3).hidden(8, Activation::Relu),
//!     3,
//! )
//! .unwrap();
//!
//! let mut arena = LayerArena::<Backend>::new();
//! let model = arena.compile(topology.graph(), &device).unwrap();
//! assert_eq!(model.num_outputs(), 3);
//!
//! // The cutout reuses the trained instances: no new parameters
//! let layers = arena.num_layers();
//! let cutout = cutout_branch(&topology, InputBuffer::with_shape(&[2, 2]), "branch_1").unwrap();
//! arena.compile(&cutout, &device).unwrap();
//! assert_eq!(arena.num_layers(), layers);
//! ```

pub mod arena;
pub mod cutout;
pub mod data;
pub mod errors;
pub mod experiment;
pub mod graph;
pub mod layers;
pub mod topology;
pub mod training;

// Re-exports for convenience
pub use arena::LayerArena;
pub use errors::ModelError;
pub use layers::activation::Activation;
pub use training::{Loss, TrainingConfig};

/// Backend type alias for WGPU with autodiff support.
pub type Backend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Backend type for inference (no autodiff).
pub type InferenceBackend = burn::backend::Wgpu;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::arena::LayerArena;
    pub use crate::cutout::{cutout_branch, cutout_by_names, cutout_by_path, extend};
    pub use crate::data::{Dataset, replicate_labels};
    pub use crate::errors::ModelError;
    pub use crate::experiment::{AggregationExperiment, AuxiliaryExperiment, DepthReport, Trend};
    pub use crate::graph::{CompiledModel, InputBuffer, ModelGraph, Operation, ops};
    pub use crate::layers::activation::Activation;
    pub use crate::topology::{
        BranchSpec, LayerSpec, StemSpec, Topology, build_auxiliary_chain, build_multi_branch,
    };
    pub use crate::training::{Evaluation, Loss, TrainingConfig, evaluate, train};
    pub use crate::{Backend, InferenceBackend};
}
