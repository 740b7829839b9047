//! Execution plan: the topologically ordered steps of a compiled graph.

use std::collections::HashMap;

use super::buffer::{BufferId, DataBuffer};
use super::core::ModelGraph;
use super::operation::{LayerKind, OpId};
use crate::errors::ModelError;

/// Execution step in the forward pass. Buffers are addressed by slot.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Tensors are carried as `[batch, features]`, so flattening only
    /// forwards the slot.
    Flatten { input: usize, output: usize },
    Dense {
        op_id: OpId,
        input: usize,
        output: usize,
    },
    BatchNorm {
        op_id: OpId,
        input: usize,
        output: usize,
    },
}

/// Parameters a graph needs from the arena for one layer instance.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRequirement {
    pub op_id: OpId,
    pub name: String,
    pub kind: LayerKind,
    pub input_size: usize,
}

/// Builder for constructing the execution order of a graph.
#[derive(Debug, Clone)]
pub(crate) struct ExecutionPlan {
    pub(crate) steps: Vec<Step>,
    pub(crate) input_slots: Vec<usize>,
    pub(crate) input_sizes: Vec<usize>,
    pub(crate) output_slots: Vec<usize>,
    pub(crate) num_slots: usize,
    pub(crate) requirements: Vec<LayerRequirement>,
}

impl ExecutionPlan {
    pub(crate) fn build(graph: &ModelGraph) -> Result<Self, ModelError> {
        if graph.inputs().is_empty() {
            return Err(ModelError::NoInputBuffer);
        }
        if graph.outputs().is_empty() {
            return Err(ModelError::NoOutputs);
        }
        graph.validate_names()?;

        let mut builder = PlanBuilder::default();
        let mut input_slots = Vec::with_capacity(graph.inputs().len());
        for input in graph.inputs() {
            input_slots.push(builder.register_input(input.id()));
        }

        let mut output_slots = Vec::with_capacity(graph.outputs().len());
        for output in graph.outputs() {
            builder.traverse(output)?;
            output_slots.push(builder.slots[&output.id()]);
        }

        Ok(Self {
            steps: builder.steps,
            input_slots,
            input_sizes: graph.inputs().iter().map(|i| i.size()).collect(),
            output_slots,
            num_slots: builder.slots.len(),
            requirements: builder.requirements,
        })
    }
}

#[derive(Default)]
struct PlanBuilder {
    slots: HashMap<BufferId, usize>,
    steps: Vec<Step>,
    requirements: Vec<LayerRequirement>,
}

impl PlanBuilder {
    fn register_input(&mut self, id: BufferId) -> usize {
        let slot = self.slots.len();
        self.slots.insert(id, slot);
        slot
    }

    fn traverse(&mut self, buffer: &DataBuffer) -> Result<(), ModelError> {
        if self.slots.contains_key(&buffer.id()) {
            return Ok(());
        }

        let Some(producer) = buffer.producer() else {
            return Err(ModelError::InvalidGraph(
                "Buffer has no producer and is not a registered input".to_string(),
            ));
        };

        for input in buffer.inputs() {
            self.traverse(input)?;
        }

        let input = &buffer.inputs()[0];
        let input_slot = self.slots[&input.id()];
        let output_slot = self.slots.len();
        self.slots.insert(buffer.id(), output_slot);

        if producer.kind().has_params() {
            self.require(producer.id(), producer.name(), producer.kind(), input.size())?;
        }

        let step = match producer.kind() {
            LayerKind::Flatten => Step::Flatten {
                input: input_slot,
                output: output_slot,
            },
            LayerKind::Dense { .. } => Step::Dense {
                op_id: producer.id(),
                input: input_slot,
                output: output_slot,
            },
            LayerKind::BatchNorm { .. } => Step::BatchNorm {
                op_id: producer.id(),
                input: input_slot,
                output: output_slot,
            },
        };
        self.steps.push(step);
        Ok(())
    }

    fn require(
        &mut self,
        op_id: OpId,
        name: &str,
        kind: &LayerKind,
        input_size: usize,
    ) -> Result<(), ModelError> {
        match self.requirements.iter().find(|r| r.op_id == op_id) {
            Some(existing) if existing.input_size != input_size => Err(ModelError::ShapeMismatch {
                expected: existing.input_size,
                actual: input_size,
            }),
            Some(_) => Ok(()),
            None => {
                self.requirements.push(LayerRequirement {
                    op_id,
                    name: name.to_string(),
                    kind: kind.clone(),
                    input_size,
                });
                Ok(())
            }
        }
    }
}

/// A graph bound to the layer slots of an arena.
///
/// Created by [`LayerArena::compile`](crate::arena::LayerArena::compile). It
/// holds no tensors: evaluating or training it always goes through the arena
/// that owns the parameters, so every compiled model sharing a layer
/// instance sees the same weights.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    graph: ModelGraph,
    pub(crate) plan: ExecutionPlan,
}

impl CompiledModel {
    pub(crate) fn new(graph: ModelGraph, plan: ExecutionPlan) -> Self {
        Self { graph, plan }
    }

    /// Returns the underlying graph structure.
    pub fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    /// Returns the number of outputs.
    pub fn num_outputs(&self) -> usize {
        self.plan.output_slots.len()
    }

    /// Returns the flat size of every output.
    pub fn output_sizes(&self) -> Vec<usize> {
        self.graph.output_sizes()
    }

    /// Returns the number of input features of the first input.
    pub fn feature_size(&self) -> usize {
        self.plan.input_sizes.first().copied().unwrap_or(0)
    }

    /// Parameterized layers this model reads from the arena.
    pub fn requirements(&self) -> &[LayerRequirement] {
        &self.plan.requirements
    }

    /// Operation ids of every parameterized layer in the model.
    pub fn layer_ids(&self) -> Vec<OpId> {
        self.plan.requirements.iter().map(|r| r.op_id).collect()
    }

    /// Resolves layer names to operation ids.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<OpId>, ModelError> {
        names
            .iter()
            .map(|name| self.graph.layer(name).map(|op| op.id()))
            .collect()
    }
}
