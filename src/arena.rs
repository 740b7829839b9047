//! LayerArena - the single owner of every trained parameter.
//!
//! Layer instances are identified by their [`OpId`]. Compiling a graph
//! creates parameters only for operations the arena has not seen yet;
//! operations that already have a slot are reused as-is. Because every
//! compiled model reads its weights from the arena, training one model
//! updates the layers it shares with every other model compiled against the
//! same arena.

use burn::module::Module;
use burn::optim::GradientsParams;
use burn::tensor::Tensor;
use burn::tensor::backend::{AutodiffBackend, Backend};

use crate::errors::ModelError;
use crate::graph::{CompiledModel, ExecutionPlan, LayerKind, ModelGraph, OpId, Operation, Step};
use crate::layers::{Dense, DenseConfig, Normalization};

/// Parameter store shared by all graphs of an experiment.
#[derive(Module, Debug)]
pub struct LayerArena<B: Backend> {
    dense: Vec<Dense<B>>,
    norms: Vec<Normalization<B>>,
}

impl<B: Backend> Default for LayerArena<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> LayerArena<B> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            norms: Vec::new(),
        }
    }

    /// Binds a graph to the arena, initializing parameters for layer
    /// instances that have no slot yet.
    ///
    /// Reused layers must be applied to inputs of the size they were
    /// created for, otherwise [`ModelError::ShapeMismatch`] is returned.
    pub fn compile(
        &mut self,
        graph: &ModelGraph,
        device: &B::Device,
    ) -> Result<CompiledModel, ModelError> {
        let plan = ExecutionPlan::build(graph)?;
        let mut created = 0;
        let mut reused = 0;

        for req in &plan.requirements {
            match &req.kind {
                LayerKind::Flatten => {}
                LayerKind::Dense { units, activation } => {
                    if let Some(layer) = self.dense_layer(req.op_id) {
                        check_size(layer.input_size(), req.input_size)?;
                        check_size(layer.output_size(), *units)?;
                        reused += 1;
                    } else {
                        let layer = DenseConfig::new(req.input_size, *units)
                            .with_activation(*activation)
                            .init(req.op_id, device);
                        self.dense.push(layer);
                        created += 1;
                    }
                }
                LayerKind::BatchNorm { epsilon } => {
                    if let Some(layer) = self.norm_layer(req.op_id) {
                        check_size(layer.num_features(), req.input_size)?;
                        reused += 1;
                    } else {
                        self.norms.push(Normalization::new(
                            req.op_id,
                            req.input_size,
                            *epsilon,
                            device,
                        ));
                        created += 1;
                    }
                }
            }
        }

        log::debug!(
            "compiled graph {}: {} layers initialized, {} reused",
            graph.id(),
            created,
            reused
        );

        Ok(CompiledModel::new(graph.clone(), plan))
    }

    /// Runs a single-input model. The input may carry any per-sample shape
    /// (e.g. `[batch, 28, 28]`); it is flattened row-major.
    ///
    /// Returns one `[batch, size]` tensor per graph output, in order.
    pub fn forward<const D: usize>(
        &self,
        model: &CompiledModel,
        input: Tensor<B, D>,
    ) -> Vec<Tensor<B, 2>> {
        let dims = input.dims();
        let batch = dims[0];
        let features: usize = dims[1..].iter().product();
        assert_eq!(
            features,
            model.feature_size(),
            "Input has {} features per sample, graph expects {}",
            features,
            model.feature_size()
        );
        self.forward_many(model, vec![input.reshape([batch, features])])
    }

    /// Runs a model with one flat `[batch, features]` tensor per graph input.
    pub fn forward_many(
        &self,
        model: &CompiledModel,
        inputs: Vec<Tensor<B, 2>>,
    ) -> Vec<Tensor<B, 2>> {
        self.forward_with_frozen(model, inputs, &[])
    }

    /// Like [`forward_many`](Self::forward_many), but normalization layers
    /// listed in `frozen` use their running statistics and leave them as is.
    pub(crate) fn forward_with_frozen(
        &self,
        model: &CompiledModel,
        inputs: Vec<Tensor<B, 2>>,
        frozen: &[OpId],
    ) -> Vec<Tensor<B, 2>> {
        let plan = &model.plan;
        assert_eq!(
            inputs.len(),
            plan.input_slots.len(),
            "Number of inputs must match the graph's input count"
        );

        let mut slots: Vec<Option<Tensor<B, 2>>> = vec![None; plan.num_slots];
        for (&slot, tensor) in plan.input_slots.iter().zip(inputs) {
            slots[slot] = Some(tensor);
        }

        for step in &plan.steps {
            match step {
                Step::Flatten { input, output } => {
                    slots[*output] = Some(read(&slots, *input));
                }
                Step::Dense {
                    op_id,
                    input,
                    output,
                } => {
                    let layer = self
                        .dense_layer(*op_id)
                        .unwrap_or_else(|| panic!("{}", missing_layer(*op_id)));
                    slots[*output] = Some(layer.forward(read(&slots, *input)));
                }
                Step::BatchNorm {
                    op_id,
                    input,
                    output,
                } => {
                    let layer = self
                        .norm_layer(*op_id)
                        .unwrap_or_else(|| panic!("{}", missing_layer(*op_id)));
                    let x = read(&slots, *input);
                    slots[*output] = Some(if frozen.contains(op_id) {
                        layer.forward_frozen(x)
                    } else {
                        layer.forward(x)
                    });
                }
            }
        }

        plan.output_slots
            .iter()
            .map(|&slot| read(&slots, slot))
            .collect()
    }

    /// Returns the dense layer owned by an operation.
    pub fn dense_layer(&self, op_id: OpId) -> Option<&Dense<B>> {
        self.dense.iter().find(|layer| layer.op_id() == op_id)
    }

    /// Returns the normalization layer owned by an operation.
    pub fn norm_layer(&self, op_id: OpId) -> Option<&Normalization<B>> {
        self.norms.iter().find(|layer| layer.op_id() == op_id)
    }

    /// Returns true if the operation already has parameters in the arena.
    pub fn contains(&self, op_id: OpId) -> bool {
        self.dense_layer(op_id).is_some() || self.norm_layer(op_id).is_some()
    }

    /// Fails with the name of the first layer of `model` that was never
    /// compiled against this arena.
    pub fn ensure_compiled(&self, model: &CompiledModel) -> Result<(), ModelError> {
        match model
            .requirements()
            .iter()
            .find(|req| !self.contains(req.op_id))
        {
            Some(req) => Err(ModelError::UnknownLayer {
                name: req.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Number of parameterized layers in the arena.
    pub fn num_layers(&self) -> usize {
        self.dense.len() + self.norms.len()
    }

    /// Number of trainable scalars in the arena.
    pub fn num_params(&self) -> usize {
        self.dense.iter().map(|l| l.num_params()).sum::<usize>()
            + self.norms.iter().map(|l| l.num_params()).sum::<usize>()
    }

    /// Snapshot of a layer's trainable values.
    pub fn parameter_values(&self, op: &Operation) -> Result<Vec<f32>, ModelError> {
        if let Some(layer) = self.dense_layer(op.id()) {
            return layer.parameter_values();
        }
        if let Some(layer) = self.norm_layer(op.id()) {
            return layer.parameter_values();
        }
        Err(ModelError::UnknownLayer {
            name: op.name().to_string(),
        })
    }
}

impl<B: AutodiffBackend> LayerArena<B> {
    /// Removes the gradients of the given layers before an optimizer step.
    pub fn freeze_grads(&self, op_ids: &[OpId], grads: &mut GradientsParams) {
        for &id in op_ids {
            if let Some(layer) = self.dense_layer(id) {
                layer.freeze_grads(grads);
            }
            if let Some(layer) = self.norm_layer(id) {
                layer.freeze_grads(grads);
            }
        }
    }
}

fn check_size(expected: usize, actual: usize) -> Result<(), ModelError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ModelError::ShapeMismatch { expected, actual })
    }
}

fn missing_layer(op_id: OpId) -> String {
    format!("Layer {op_id} has no parameters in this arena; compile the graph against it first")
}

fn read<B: Backend>(slots: &[Option<Tensor<B, 2>>], slot: usize) -> Tensor<B, 2> {
    match &slots[slot] {
        Some(tensor) => tensor.clone(),
        None => panic!("Buffer slot {slot} read before it was computed"),
    }
}
