//! Multi-branch and auxiliary-classifier topologies.
//!
//! A topology is a [`ModelGraph`] plus the bookkeeping needed to find its
//! parts again: the shared stem layers and, per output, the tagged list of
//! layers leading from the stem to that output. Layers are named
//! `<scope>/<role>_<j>` (`stem/flatten_0`, `branch_2/dense_1`,
//! `branch_2/classifier`), so every layer can be resolved by name as well.

use serde::{Deserialize, Serialize};

use crate::errors::ModelError;
use crate::graph::{DEFAULT_EPSILON, DataBuffer, InputBuffer, ModelGraph, Operation};
use crate::layers::Activation;

/// Name scope of the shared entry layers.
pub const STEM_SCOPE: &str = "stem";
/// Name scope of the linear chain in an auxiliary-classifier topology.
pub const CHAIN_SCOPE: &str = "chain";

fn default_epsilon() -> f32 {
    DEFAULT_EPSILON
}

/// Declarative description of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Flatten,
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
    },
    Normalization {
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
}

impl LayerSpec {
    fn role(&self) -> &'static str {
        match self {
            LayerSpec::Flatten => "flatten",
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Normalization { .. } => "norm",
        }
    }

    /// Creates a fresh layer instance named `name`.
    pub fn instantiate(&self, name: impl Into<String>) -> Result<Operation, ModelError> {
        let op = match self {
            LayerSpec::Flatten => Operation::flatten(),
            LayerSpec::Dense { units, activation } => {
                check_width(*units)?;
                Operation::dense(*units, *activation)
            }
            LayerSpec::Normalization { epsilon } => Operation::batch_norm(*epsilon),
        };
        Ok(op.named(name))
    }
}

/// The shared entry transform, identical for every branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StemSpec {
    pub layers: Vec<LayerSpec>,
}

impl Default for StemSpec {
    /// A parameter-free stem that only flattens the input.
    fn default() -> Self {
        Self {
            layers: vec![LayerSpec::Flatten],
        }
    }
}

impl StemSpec {
    /// Creates a stem with no layers.
    pub fn empty() -> Self {
        Self { layers: Vec::new() }
    }

    /// Creates a stem that flattens its input.
    pub fn flatten() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Appends a layer.
    pub fn layer(mut self, spec: LayerSpec) -> Self {
        self.layers.push(spec);
        self
    }

    /// Appends a dense layer.
    pub fn dense(self, units: usize, activation: Activation) -> Self {
        self.layer(LayerSpec::Dense { units, activation })
    }

    /// Appends a normalization layer with the default epsilon.
    pub fn normalization(self) -> Self {
        self.layer(LayerSpec::Normalization {
            epsilon: DEFAULT_EPSILON,
        })
    }

    /// Creates fresh stem layer instances.
    pub fn instantiate(&self) -> Result<Vec<Operation>, ModelError> {
        self.layers
            .iter()
            .enumerate()
            .map(|(j, spec)| spec.instantiate(format!("{STEM_SCOPE}/{}_{j}", spec.role())))
            .collect()
    }
}

/// Learner plus classifier attached downstream of the stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSpec {
    /// Hidden dense layers as `(width, activation)`, in order.
    #[serde(default)]
    pub hidden: Vec<(usize, Activation)>,
    /// Size of the softmax classifier that ends the branch.
    pub classes: usize,
}

impl BranchSpec {
    /// Creates a branch that is only a classifier.
    pub fn new(classes: usize) -> Self {
        Self {
            hidden: Vec::new(),
            classes,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Appends a hidden dense layer.
    pub fn hidden(mut self, width: usize, activation: Activation) -> Self {
        self.hidden.push((width, activation));
        self
    }

    /// Creates fresh layer instances for a branch in scope `tag`.
    pub fn instantiate(&self, tag: &str) -> Result<Vec<Operation>, ModelError> {
        check_width(self.classes)?;
        let mut layers = Vec::with_capacity(self.hidden.len() + 1);
        for (j, &(width, activation)) in self.hidden.iter().enumerate() {
            check_width(width)?;
            layers.push(Operation::dense(width, activation).named(format!("{tag}/dense_{j}")));
        }
        layers.push(classifier(tag, self.classes));
        Ok(layers)
    }
}

/// The tagged path of layers from the end of the stem to one output.
#[derive(Debug, Clone)]
pub struct Branch {
    tag: String,
    layers: Vec<Operation>,
    output: DataBuffer,
}

impl Branch {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Layers applied after the stem, in order.
    pub fn layers(&self) -> &[Operation] {
        &self.layers
    }

    /// The classifier output node.
    pub fn output(&self) -> &DataBuffer {
        &self.output
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers.iter().map(|op| op.name().to_string()).collect()
    }
}

/// A built graph with its stem and tagged branches.
#[derive(Debug, Clone)]
pub struct Topology {
    graph: ModelGraph,
    input: InputBuffer,
    stem: Vec<Operation>,
    branches: Vec<Branch>,
}

impl Topology {
    /// Assembles a topology whose outputs are the branch outputs in order.
    pub(crate) fn assemble(input: InputBuffer, stem: Vec<Operation>, branches: Vec<Branch>) -> Self {
        let outputs = branches.iter().map(|b| b.output.clone()).collect();
        let graph = ModelGraph::new(vec![input.clone()], outputs);
        Self {
            graph,
            input,
            stem,
            branches,
        }
    }

    pub fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    pub fn input(&self) -> &InputBuffer {
        &self.input
    }

    /// Shared stem layers, in order.
    pub fn stem(&self) -> &[Operation] {
        &self.stem
    }

    /// Branches in output order.
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn num_branches(&self) -> usize {
        self.branches.len()
    }

    /// Looks up a branch by its tag.
    pub fn branch(&self, tag: &str) -> Result<&Branch, ModelError> {
        self.branches
            .iter()
            .find(|b| b.tag == tag)
            .ok_or_else(|| ModelError::UnknownBranch {
                tag: tag.to_string(),
            })
    }

    /// Position of a branch among the outputs.
    pub fn output_index(&self, tag: &str) -> Option<usize> {
        self.branches.iter().position(|b| b.tag == tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        self.branches.iter().map(|b| b.tag.as_str()).collect()
    }

    /// Registry positions of the stem layers.
    pub fn stem_path(&self) -> Result<Vec<usize>, ModelError> {
        self.positions(&self.stem)
    }

    /// Registry positions of a branch's layers, as an index path.
    pub fn branch_path(&self, tag: &str) -> Result<Vec<usize>, ModelError> {
        self.positions(&self.branch(tag)?.layers)
    }

    fn positions(&self, layers: &[Operation]) -> Result<Vec<usize>, ModelError> {
        layers
            .iter()
            .map(|op| {
                self.graph
                    .index_of(op.name())
                    .ok_or_else(|| ModelError::UnknownLayer {
                        name: op.name().to_string(),
                    })
            })
            .collect()
    }
}

/// Builds a stem shared by `branch_count` independently initialized
/// branches. Branch `i` is tagged `branch_<i>` and its classifier is output
/// `i` of the graph.
pub fn build_multi_branch(
    input_shape: &[usize],
    stem: &StemSpec,
    branch: &BranchSpec,
    branch_count: usize,
) -> Result<Topology, ModelError> {
    if branch_count == 0 {
        return Err(ModelError::InvalidLayerConfig {
            message: "a multi-branch topology needs at least one branch".to_string(),
        });
    }

    let input = new_input(input_shape)?;
    let stem_layers = stem.instantiate()?;
    let trunk = thread(&stem_layers, input.buffer())?;
    require_flat(&trunk, "stem")?;

    let branches = (0..branch_count)
        .map(|i| grow_branch(&format!("branch_{i}"), branch, trunk.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "built multi-branch topology: {} stem layers, {} branches",
        stem_layers.len(),
        branch_count
    );
    Ok(Topology::assemble(input, stem_layers, branches))
}

/// Builds a linear chain of dense layers with a classifier tap after every
/// chain layer, optionally preceded by normalization.
///
/// Outputs are ordered shallow to deep and tagged `tap_<depth>` starting at
/// depth 0. The branch of a tap lists the chain layers up to its depth
/// followed by the tap's own layers.
pub fn build_auxiliary_chain(
    input_shape: &[usize],
    stem: &StemSpec,
    chain: &[(usize, Activation)],
    classes: usize,
    normalize: bool,
) -> Result<Topology, ModelError> {
    if chain.is_empty() {
        return Err(ModelError::NoLayers);
    }
    check_width(classes)?;

    let input = new_input(input_shape)?;
    let stem_layers = stem.instantiate()?;
    let mut current = thread(&stem_layers, input.buffer())?;
    require_flat(&current, "stem")?;

    let mut path: Vec<Operation> = Vec::with_capacity(chain.len());
    let mut branches = Vec::with_capacity(chain.len());
    for (depth, &(width, activation)) in chain.iter().enumerate() {
        check_width(width)?;
        let op =
            Operation::dense(width, activation).named(format!("{CHAIN_SCOPE}/dense_{depth}"));
        current = op.apply(current);
        path.push(op);

        let tag = format!("tap_{depth}");
        let mut tap = Vec::with_capacity(2);
        if normalize {
            tap.push(Operation::batch_norm_default().named(format!("{tag}/norm")));
        }
        tap.push(classifier(&tag, classes));
        let output = thread(&tap, current.clone())?;

        let mut layers = path.clone();
        layers.extend(tap);
        branches.push(Branch {
            tag,
            layers,
            output,
        });
    }

    log::debug!(
        "built auxiliary chain: depth {}, normalized taps: {}",
        chain.len(),
        normalize
    );
    Ok(Topology::assemble(input, stem_layers, branches))
}

/// Appends a freshly initialized branch in scope `tag` to `trunk`.
pub(crate) fn grow_branch(
    tag: &str,
    spec: &BranchSpec,
    trunk: DataBuffer,
) -> Result<Branch, ModelError> {
    let layers = spec.instantiate(tag)?;
    let output = thread(&layers, trunk)?;
    Ok(Branch {
        tag: tag.to_string(),
        layers,
        output,
    })
}

/// Applies layer instances in order, checking that every parameterized layer
/// receives a flat input.
pub(crate) fn thread(layers: &[Operation], input: DataBuffer) -> Result<DataBuffer, ModelError> {
    let mut current = input;
    for op in layers {
        if op.kind().has_params() {
            require_flat(&current, op.name())?;
        }
        current = op.apply(current);
    }
    Ok(current)
}

/// Scope of a layer name, e.g. `branch_1` for `branch_1/dense_0`.
pub fn scope_of(name: &str) -> Option<&str> {
    name.split_once('/').map(|(scope, _)| scope)
}

/// True for scopes shared by several outputs.
pub fn is_shared_scope(scope: &str) -> bool {
    scope == STEM_SCOPE || scope == CHAIN_SCOPE
}

fn classifier(tag: &str, classes: usize) -> Operation {
    Operation::dense(classes, Activation::Softmax).named(format!("{tag}/classifier"))
}

fn new_input(shape: &[usize]) -> Result<InputBuffer, ModelError> {
    if shape.is_empty() || shape.contains(&0) {
        return Err(ModelError::InvalidLayerConfig {
            message: format!("input shape {shape:?} must be non-empty with positive dimensions"),
        });
    }
    Ok(InputBuffer::with_shape(shape))
}

fn require_flat(buffer: &DataBuffer, what: &str) -> Result<(), ModelError> {
    if buffer.is_flat() {
        Ok(())
    } else {
        Err(ModelError::InvalidLayerConfig {
            message: format!(
                "{what} receives shape {:?}; add a flatten layer first",
                buffer.shape()
            ),
        })
    }
}

fn check_width(units: usize) -> Result<(), ModelError> {
    if units == 0 {
        Err(ModelError::InvalidLayerConfig {
            message: "dense layers need at least one unit".to_string(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::LayerArena;
    use burn::backend::NdArray;
    use burn::tensor::{Tensor, backend::Backend};

    type TestBackend = NdArray;

    fn branch_spec() -> BranchSpec {
        BranchSpec::new(10).hidden(16, Activation::Relu)
    }

    #[test]
    fn test_branch_counts() {
        for n in 1..=4 {
            let topology =
                build_multi_branch(&[28, 28], &StemSpec::flatten(), &branch_spec(), n).unwrap();
            let graph = topology.graph();
            assert_eq!(graph.inputs().len(), 1);
            assert_eq!(graph.num_outputs(), n);
            assert!(graph.output_sizes().iter().all(|&size| size == 10));
            assert_eq!(topology.num_branches(), n);
        }
    }

    #[test]
    fn test_zero_branches_rejected() {
        let result = build_multi_branch(&[4], &StemSpec::flatten(), &branch_spec(), 0);
        assert!(matches!(result, Err(ModelError::InvalidLayerConfig { .. })));
    }

    #[test]
    fn test_branches_are_independent_instances() {
        let topology = build_multi_branch(
            &[4],
            &StemSpec::flatten().dense(8, Activation::Relu),
            &branch_spec(),
            3,
        )
        .unwrap();

        assert_eq!(topology.tags(), vec!["branch_0", "branch_1", "branch_2"]);
        let a = &topology.branches()[0].layers()[0];
        let b = &topology.branches()[1].layers()[0];
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), "branch_0/dense_0");
        assert_eq!(topology.branches()[2].layers()[1].name(), "branch_2/classifier");
        assert_eq!(topology.stem()[1].name(), "stem/dense_1");

        // stem layers are registered once
        let stem_uses = topology.graph().layer("stem/dense_1").map(|op| op.id()).unwrap();
        let entry = topology
            .graph()
            .layers()
            .iter()
            .find(|e| e.op.id() == stem_uses)
            .unwrap();
        assert_eq!(entry.uses, 1);
        assert_eq!(topology.graph().layers().len(), 2 + 3 * 2);
    }

    #[test]
    fn test_branch_paths_match_registry() {
        let topology =
            build_multi_branch(&[4], &StemSpec::flatten(), &branch_spec(), 2).unwrap();
        let path = topology.branch_path("branch_1").unwrap();
        let names: Vec<&str> = path
            .iter()
            .map(|&i| topology.graph().layer_at(i).unwrap().name())
            .collect();
        assert_eq!(names, vec!["branch_1/dense_0", "branch_1/classifier"]);
        assert_eq!(topology.stem_path().unwrap(), vec![0]);
        assert!(matches!(
            topology.branch("branch_7"),
            Err(ModelError::UnknownBranch { tag }) if tag == "branch_7"
        ));
    }

    #[test]
    fn test_multi_dimensional_input_needs_flatten() {
        let result = build_multi_branch(&[2, 2], &StemSpec::empty(), &branch_spec(), 1);
        assert!(matches!(result, Err(ModelError::InvalidLayerConfig { .. })));
    }

    #[test]
    fn test_auxiliary_chain_taps() {
        let chain = [(8, Activation::Relu), (8, Activation::Relu), (8, Activation::Relu)];
        let topology =
            build_auxiliary_chain(&[2, 2], &StemSpec::flatten(), &chain, 3, true).unwrap();

        assert_eq!(topology.graph().num_outputs(), 3);
        assert_eq!(topology.tags(), vec!["tap_0", "tap_1", "tap_2"]);
        let deepest = topology.branch("tap_2").unwrap().layer_names();
        assert_eq!(
            deepest,
            vec![
                "chain/dense_0",
                "chain/dense_1",
                "chain/dense_2",
                "tap_2/norm",
                "tap_2/classifier"
            ]
        );
        // 3 chain + 3 norms + 3 classifiers + flatten
        assert_eq!(topology.graph().layers().len(), 10);
    }

    #[test]
    fn test_auxiliary_chain_without_normalization() {
        let topology = build_auxiliary_chain(
            &[4],
            &StemSpec::flatten(),
            &[(4, Activation::Tanh), (4, Activation::Tanh)],
            2,
            false,
        )
        .unwrap();
        assert_eq!(topology.branch("tap_0").unwrap().layer_names(), vec![
            "chain/dense_0",
            "tap_0/classifier"
        ]);
        assert!(build_auxiliary_chain(&[4], &StemSpec::flatten(), &[], 2, false).is_err());
    }

    #[test]
    fn test_multi_branch_forward() {
        let device = <TestBackend as Backend>::Device::default();
        let topology = build_multi_branch(
            &[2, 2],
            &StemSpec::flatten().dense(4, Activation::Relu).normalization(),
            &branch_spec(),
            2,
        )
        .unwrap();

        let mut arena = LayerArena::<TestBackend>::new();
        let model = arena.compile(topology.graph(), &device).unwrap();
        let outputs = arena.forward(&model, Tensor::<TestBackend, 3>::ones([5, 2, 2], &device));

        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|o| o.dims() == [5, 10]));
    }

    #[test]
    fn test_specs_from_json() {
        let stem = StemSpec::from_json(
            r#"{"layers": [{"type": "flatten"}, {"type": "dense", "units": 32, "activation": "relu"}, {"type": "normalization"}]}"#,
        )
        .unwrap();
        assert_eq!(stem, StemSpec::flatten().dense(32, Activation::Relu).normalization());

        let branch =
            BranchSpec::from_json(r#"{"hidden": [[64, "relu"]], "classes": 10}"#).unwrap();
        assert_eq!(branch, BranchSpec::new(10).hidden(64, Activation::Relu));
    }

    #[test]
    fn test_scope_of() {
        assert_eq!(scope_of("branch_3/dense_0"), Some("branch_3"));
        assert_eq!(scope_of("dense_12"), None);
        assert!(is_shared_scope("stem"));
        assert!(!is_shared_scope("tap_0"));
    }
}
