//! End-to-end experiment flows.
//!
//! [`AggregationExperiment`] trains a multi-branch topology jointly, picks
//! the branch with the best held-out accuracy, cuts it out and optionally
//! grows new heads on top of reused layers. [`AuxiliaryExperiment`] trains a
//! chain with a classifier at every depth and records accuracy per depth.

use std::fmt;

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::arena::LayerArena;
use crate::cutout::{cutout_branch, extend};
use crate::data::{Dataset, replicate_labels};
use crate::errors::ModelError;
use crate::graph::{CompiledModel, InputBuffer, Operation};
use crate::layers::Activation;
use crate::topology::{BranchSpec, StemSpec, Topology, build_auxiliary_chain, build_multi_branch};
use crate::training::{Evaluation, History, TrainingConfig, evaluate, train};

/// Direction of accuracy as taps get deeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Never drops and rises at least once.
    Increasing,
    /// Never rises and drops at least once.
    Decreasing,
    /// All depths equal, or a single depth.
    Flat,
    Mixed,
}

/// Accuracy per classifier tap, shallow to deep, exactly as observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthReport {
    accuracies: Vec<f32>,
}

impl DepthReport {
    pub fn new(accuracies: Vec<f32>) -> Self {
        Self { accuracies }
    }

    /// Reads the per-output accuracies of an auxiliary-chain evaluation.
    pub fn from_evaluation(evaluation: &Evaluation) -> Self {
        Self::new(evaluation.accuracies())
    }

    pub fn accuracies(&self) -> &[f32] {
        &self.accuracies
    }

    /// Depth with the highest accuracy, shallowest on ties.
    pub fn best_depth(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (depth, &accuracy) in self.accuracies.iter().enumerate() {
            if best.is_none_or(|b| accuracy > self.accuracies[b]) {
                best = Some(depth);
            }
        }
        best
    }

    pub fn trend(&self) -> Trend {
        let mut rises = false;
        let mut drops = false;
        for pair in self.accuracies.windows(2) {
            if pair[1] > pair[0] {
                rises = true;
            } else if pair[1] < pair[0] {
                drops = true;
            }
        }
        match (rises, drops) {
            (true, false) => Trend::Increasing,
            (false, true) => Trend::Decreasing,
            (false, false) => Trend::Flat,
            (true, true) => Trend::Mixed,
        }
    }
}

impl fmt::Display for DepthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, accuracy) in self.accuracies.iter().enumerate() {
            writeln!(f, "tap_{depth}: {accuracy:.4}")?;
        }
        write!(f, "trend: {:?}", self.trend())
    }
}

/// Growing new heads on top of the best branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionSpec {
    /// Number of leading layers of the best branch's path (stem included)
    /// to reuse.
    pub reuse: usize,
    /// New heads attached on top of the reused layers.
    pub heads: usize,
    pub branch: BranchSpec,
    /// Keep the reused layers fixed while training the heads.
    #[serde(default)]
    pub freeze_reused: bool,
    pub training: TrainingConfig,
}

/// Result of growing new heads.
#[derive(Debug, Clone)]
pub struct ExtensionOutcome {
    pub topology: Topology,
    pub model: CompiledModel,
    pub history: History,
    pub evaluation: Evaluation,
}

/// Multi-branch aggregation training followed by a cutout of the best branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationExperiment {
    pub input_shape: Vec<usize>,
    #[serde(default)]
    pub stem: StemSpec,
    pub branch: BranchSpec,
    pub branch_count: usize,
    pub training: TrainingConfig,
    #[serde(default)]
    pub extension: Option<ExtensionSpec>,
}

/// Everything an aggregation run produced.
#[derive(Debug)]
pub struct AggregationOutcome<B: AutodiffBackend> {
    /// Parameters of every graph built during the run.
    pub arena: LayerArena<B>,
    pub topology: Topology,
    pub model: CompiledModel,
    pub history: History,
    /// Held-out metrics per branch.
    pub evaluation: Evaluation,
    /// Output index of the branch with the best held-out accuracy.
    pub best: usize,
    /// The best branch as a standalone single-output model.
    pub cutout: CompiledModel,
    pub cutout_evaluation: Evaluation,
    pub extension: Option<ExtensionOutcome>,
}

impl AggregationExperiment {
    pub fn new(
        input_shape: &[usize],
        stem: StemSpec,
        branch: BranchSpec,
        branch_count: usize,
        training: TrainingConfig,
    ) -> Self {
        Self {
            input_shape: input_shape.to_vec(),
            stem,
            branch,
            branch_count,
            training,
            extension: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Adds a growing step after the cutout.
    pub fn with_extension(mut self, extension: ExtensionSpec) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Runs the whole flow on a train and a held-out split.
    pub fn run<B: AutodiffBackend>(
        &self,
        train_set: &Dataset,
        test_set: &Dataset,
        device: &B::Device,
    ) -> Result<AggregationOutcome<B>, ModelError> {
        let topology =
            build_multi_branch(&self.input_shape, &self.stem, &self.branch, self.branch_count)?;
        let mut arena = LayerArena::<B>::new();
        let model = arena.compile(topology.graph(), device)?;

        let copies = model.num_outputs();
        let trained = train(
            arena,
            &model,
            train_set,
            &replicate_labels(train_set.labels(), copies),
            &self.training,
            device,
        )?;
        let mut arena = trained.arena;

        let test_labels = replicate_labels(test_set.labels(), copies);
        let evaluation = evaluate(
            &arena.valid(),
            &model,
            test_set,
            &test_labels,
            self.training.loss,
            device,
        )?;
        let best = evaluation.best_output().ok_or(ModelError::NoOutputs)?;
        let best_branch = &topology.branches()[best];
        log::info!(
            "best branch: {} (accuracy {:.4})",
            best_branch.tag(),
            evaluation.outputs[best].accuracy
        );

        let cutout_graph = cutout_branch(
            &topology,
            InputBuffer::with_shape(&self.input_shape),
            best_branch.tag(),
        )?;
        let cutout = arena.compile(&cutout_graph, device)?;
        let cutout_evaluation = evaluate(
            &arena.valid(),
            &cutout,
            test_set,
            &replicate_labels(test_set.labels(), 1),
            self.training.loss,
            device,
        )?;

        let extension = match &self.extension {
            None => None,
            Some(spec) => {
                let path: Vec<Operation> = topology
                    .stem()
                    .iter()
                    .chain(best_branch.layers())
                    .cloned()
                    .collect();
                if spec.reuse > path.len() {
                    return Err(ModelError::InvalidLayerConfig {
                        message: format!(
                            "cannot reuse {} layers of a {}-layer branch",
                            spec.reuse,
                            path.len()
                        ),
                    });
                }
                let (outcome, updated) =
                    self.grow(arena, &path[..spec.reuse], spec, train_set, test_set, device)?;
                arena = updated;
                Some(outcome)
            }
        };

        Ok(AggregationOutcome {
            arena,
            topology,
            model,
            history: trained.history,
            evaluation,
            best,
            cutout,
            cutout_evaluation,
            extension,
        })
    }

    fn grow<B: AutodiffBackend>(
        &self,
        mut arena: LayerArena<B>,
        prefix: &[Operation],
        spec: &ExtensionSpec,
        train_set: &Dataset,
        test_set: &Dataset,
        device: &B::Device,
    ) -> Result<(ExtensionOutcome, LayerArena<B>), ModelError> {
        let topology = extend(
            prefix,
            InputBuffer::with_shape(&self.input_shape),
            &spec.branch,
            spec.heads,
        )?;
        let model = arena.compile(topology.graph(), device)?;

        let mut config = spec.training.clone();
        if spec.freeze_reused {
            config = config.freeze(
                prefix
                    .iter()
                    .filter(|op| op.kind().has_params())
                    .map(|op| op.name().to_string()),
            );
        }

        let copies = model.num_outputs();
        let trained = train(
            arena,
            &model,
            train_set,
            &replicate_labels(train_set.labels(), copies),
            &config,
            device,
        )?;
        let evaluation = evaluate(
            &trained.arena.valid(),
            &model,
            test_set,
            &replicate_labels(test_set.labels(), copies),
            config.loss,
            device,
        )?;

        Ok((
            ExtensionOutcome {
                topology,
                model,
                history: trained.history,
                evaluation,
            },
            trained.arena,
        ))
    }
}

/// A linear chain with a classifier tap at every depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryExperiment {
    pub input_shape: Vec<usize>,
    #[serde(default)]
    pub stem: StemSpec,
    pub chain: Vec<(usize, Activation)>,
    pub classes: usize,
    /// Put a normalization layer before every tap classifier.
    #[serde(default)]
    pub normalize: bool,
    pub training: TrainingConfig,
}

/// Everything an auxiliary-chain run produced.
#[derive(Debug)]
pub struct AuxiliaryOutcome<B: AutodiffBackend> {
    pub arena: LayerArena<B>,
    pub topology: Topology,
    pub model: CompiledModel,
    pub history: History,
    pub evaluation: Evaluation,
    pub report: DepthReport,
}

impl AuxiliaryExperiment {
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn run<B: AutodiffBackend>(
        &self,
        train_set: &Dataset,
        test_set: &Dataset,
        device: &B::Device,
    ) -> Result<AuxiliaryOutcome<B>, ModelError> {
        let topology = build_auxiliary_chain(
            &self.input_shape,
            &self.stem,
            &self.chain,
            self.classes,
            self.normalize,
        )?;
        let mut arena = LayerArena::<B>::new();
        let model = arena.compile(topology.graph(), device)?;

        let copies = model.num_outputs();
        let trained = train(
            arena,
            &model,
            train_set,
            &replicate_labels(train_set.labels(), copies),
            &self.training,
            device,
        )?;
        let evaluation = evaluate(
            &trained.arena.valid(),
            &model,
            test_set,
            &replicate_labels(test_set.labels(), copies),
            self.training.loss,
            device,
        )?;
        let report = DepthReport::from_evaluation(&evaluation);
        log::info!("auxiliary taps:\n{report}");

        Ok(AuxiliaryOutcome {
            arena: trained.arena,
            topology,
            model,
            history: trained.history,
            evaluation,
            report,
        })
    }
}
