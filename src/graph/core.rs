//! ModelGraph - graph structure without weights.
//!
//! This module contains the non-generic ModelGraph that represents
//! the computation graph structure. Weights live in a
//! [`LayerArena`](crate::arena::LayerArena) and are only created when the
//! graph is compiled against one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::buffer::{DataBuffer, InputBuffer};
use super::operation::{LayerKind, Operation};
use super::summary::{GraphSummary, LayerSummary};
use crate::errors::ModelError;

/// Global counter for unique graph IDs.
static GRAPH_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique identifier for a ModelGraph.
pub type GraphId = usize;

fn next_graph_id() -> GraphId {
    GRAPH_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// One entry of the ordered layer registry.
#[derive(Debug, Clone)]
pub struct LayerEntry {
    /// The layer instance.
    pub op: Operation,
    /// Shape of the first buffer the layer was applied to.
    pub input_shape: Vec<usize>,
    /// Output shape of that first application.
    pub output_shape: Vec<usize>,
    /// Number of nodes in this graph produced by the layer.
    pub uses: usize,
}

/// ModelGraph represents the computation graph structure without weights.
///
/// A graph binds input buffers to an ordered list of output buffers and
/// keeps an ordered registry of the distinct layers reachable from the
/// outputs. Registry order is deterministic: outputs are visited in order
/// and every node's inputs are registered before the node itself.
///
/// # Example
///
/// ```
/// use branchnet::graph::{InputBuffer, ModelGraph, ops};
/// use branchnet::layers::Activation;
///
/// let input = InputBuffer::new(4);
/// let hidden = ops::dense(8, Activation::Relu, input.buffer());
/// let a = ops::dense(2, Activation::Softmax, hidden.clone());
/// let b = ops::dense(2, Activation::Softmax, hidden);
/// let graph = ModelGraph::new(vec![input], vec![a, b]);
///
/// assert_eq!(graph.num_outputs(), 2);
/// assert_eq!(graph.layers().len(), 3);
/// ```
#[derive(Clone, Debug)]
pub struct ModelGraph {
    id: GraphId,
    inputs: Vec<InputBuffer>,
    outputs: Vec<DataBuffer>,
    registry: Vec<LayerEntry>,
}

impl ModelGraph {
    /// Creates a new ModelGraph from input buffers and output buffers.
    ///
    /// This only captures the graph structure - no weights are created.
    pub fn new(inputs: Vec<InputBuffer>, outputs: Vec<DataBuffer>) -> Self {
        let mut registry: Vec<LayerEntry> = Vec::new();
        let mut visited = HashSet::new();
        for output in &outputs {
            register_layers(output, &mut visited, &mut registry);
        }

        Self {
            id: next_graph_id(),
            inputs,
            outputs,
            registry,
        }
    }

    /// Creates a single-output graph.
    pub fn single(input: InputBuffer, output: DataBuffer) -> Self {
        Self::new(vec![input], vec![output])
    }

    /// Returns the unique ID of this graph.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Returns the input buffers.
    pub fn inputs(&self) -> &[InputBuffer] {
        &self.inputs
    }

    /// Returns the output buffers in declaration order.
    pub fn outputs(&self) -> &[DataBuffer] {
        &self.outputs
    }

    /// Returns the number of outputs.
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Returns the number of input features.
    pub fn feature_size(&self) -> usize {
        self.inputs.iter().map(|i| i.size()).sum()
    }

    /// Returns the flat size of every output.
    pub fn output_sizes(&self) -> Vec<usize> {
        self.outputs.iter().map(|o| o.size()).collect()
    }

    /// Returns the ordered layer registry.
    pub fn layers(&self) -> &[LayerEntry] {
        &self.registry
    }

    /// Returns the layer at a registry position.
    pub fn layer_at(&self, index: usize) -> Result<&Operation, ModelError> {
        self.registry
            .get(index)
            .map(|entry| &entry.op)
            .ok_or(ModelError::InvalidIndexPath {
                index,
                len: self.registry.len(),
            })
    }

    /// Looks a layer up by its name.
    pub fn layer(&self, name: &str) -> Result<&Operation, ModelError> {
        self.registry
            .iter()
            .map(|entry| &entry.op)
            .find(|op| op.name() == name)
            .ok_or_else(|| ModelError::UnknownLayer {
                name: name.to_string(),
            })
    }

    /// Returns the registry position of a named layer.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.registry.iter().position(|entry| entry.op.name() == name)
    }

    /// Returns true if the graph contains the given layer instance.
    pub fn contains(&self, op: &Operation) -> bool {
        self.registry.iter().any(|entry| entry.op.id() == op.id())
    }

    /// Fails if two distinct layer instances share a name.
    pub fn validate_names(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        for entry in &self.registry {
            if !seen.insert(entry.op.name()) {
                return Err(ModelError::DuplicateLayerName {
                    name: entry.op.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Builds the layer table of this graph.
    pub fn summary(&self) -> GraphSummary {
        let layers: Vec<LayerSummary> = self
            .registry
            .iter()
            .enumerate()
            .map(|(index, entry)| LayerSummary {
                index,
                name: entry.op.name().to_string(),
                kind: entry.op.kind().kind_name().to_string(),
                activation: match entry.op.kind() {
                    LayerKind::Dense { activation, .. } => Some(activation.name().to_string()),
                    _ => None,
                },
                output_shape: entry.output_shape.clone(),
                params: entry.op.num_params(entry.input_shape.iter().product()),
                uses: entry.uses,
            })
            .collect();
        let total_params = layers.iter().map(|l| l.params).sum();

        GraphSummary {
            inputs: self.inputs.iter().map(|i| i.shape().to_vec()).collect(),
            outputs: self.outputs.iter().map(|o| o.shape().to_vec()).collect(),
            layers,
            total_params,
        }
    }
}

fn register_layers(
    buffer: &DataBuffer,
    visited: &mut HashSet<usize>,
    registry: &mut Vec<LayerEntry>,
) {
    if !visited.insert(buffer.id()) {
        return;
    }
    for input in buffer.inputs() {
        register_layers(input, visited, registry);
    }
    let Some(op) = buffer.producer() else {
        return;
    };
    match registry.iter_mut().find(|entry| entry.op.id() == op.id()) {
        Some(entry) => entry.uses += 1,
        None => registry.push(LayerEntry {
            op: op.clone(),
            input_shape: buffer.inputs()[0].shape().to_vec(),
            output_shape: buffer.shape().to_vec(),
            uses: 1,
        }),
    }
}
