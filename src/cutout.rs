//! Branch cutout: rebuilding graphs from trained layer instances.
//!
//! Every function here re-applies existing [`Operation`]s to a new input,
//! so the resulting graph reads the same arena slots as the graph the layers
//! came from. Compiling a cutout creates no parameters and training it
//! updates the original graph's layers.

use std::collections::BTreeSet;

use crate::errors::ModelError;
use crate::graph::{InputBuffer, ModelGraph, Operation};
use crate::topology::{self, BranchSpec, Topology};

/// Rebuilds a single-output graph from registry positions: the layers at
/// `stem_path` followed by the layers at `branch_path`.
///
/// Nothing ties the positions to one branch. A path that picks layers from
/// several branches still yields a well-formed graph; such paths are
/// reported with a warning. Prefer [`cutout_branch`].
pub fn cutout_by_path(
    graph: &ModelGraph,
    input: InputBuffer,
    stem_path: &[usize],
    branch_path: &[usize],
) -> Result<ModelGraph, ModelError> {
    let layers = stem_path
        .iter()
        .chain(branch_path)
        .map(|&index| graph.layer_at(index).cloned())
        .collect::<Result<Vec<_>, _>>()?;

    let (stem, branch) = layers.split_at(stem_path.len());
    let scopes = branch_scopes(stem, branch);
    if scopes.len() > 1 {
        log::warn!(
            "index path {:?} + {:?} mixes layers from {:?}; the cutout is not a single branch",
            stem_path,
            branch_path,
            scopes
        );
    }

    single_output(input, &layers)
}

/// Rebuilds the stem and the branch tagged `tag` as a single-output graph.
pub fn cutout_branch(
    topology: &Topology,
    input: InputBuffer,
    tag: &str,
) -> Result<ModelGraph, ModelError> {
    let branch = topology.branch(tag)?;
    let layers: Vec<Operation> = topology
        .stem()
        .iter()
        .chain(branch.layers())
        .cloned()
        .collect();
    single_output(input, &layers)
}

/// Rebuilds a single-output graph by applying the named layers in order.
pub fn cutout_by_names<S: AsRef<str>>(
    graph: &ModelGraph,
    input: InputBuffer,
    names: &[S],
) -> Result<ModelGraph, ModelError> {
    let layers = names
        .iter()
        .map(|name| graph.layer(name.as_ref()).cloned())
        .collect::<Result<Vec<_>, _>>()?;
    single_output(input, &layers)
}

/// Grows trained layers: applies the `prefix` instances to `input` and
/// attaches `heads` freshly initialized branches on top.
///
/// All heads share the prefix instances, so training the result updates the
/// prefix with the gradients of every head. The returned topology has the
/// prefix as its stem and heads tagged `head_<i>`.
pub fn extend(
    prefix: &[Operation],
    input: InputBuffer,
    spec: &BranchSpec,
    heads: usize,
) -> Result<Topology, ModelError> {
    if heads == 0 {
        return Err(ModelError::InvalidLayerConfig {
            message: "extending a graph needs at least one new head".to_string(),
        });
    }

    let trunk = topology::thread(prefix, input.buffer())?;
    let branches = (0..heads)
        .map(|i| topology::grow_branch(&format!("head_{i}"), spec, trunk.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "extended {} reused layers with {} new heads",
        prefix.len(),
        heads
    );
    Ok(Topology::assemble(input, prefix.to_vec(), branches))
}

/// Scopes of the branch layers, excluding the scopes the stem layers come
/// from. A grown topology's stem carries its original branch scope.
fn branch_scopes<'a>(stem: &'a [Operation], branch: &'a [Operation]) -> BTreeSet<&'a str> {
    let shared: BTreeSet<&str> = stem
        .iter()
        .filter_map(|op| topology::scope_of(op.name()))
        .collect();
    branch
        .iter()
        .filter_map(|op| topology::scope_of(op.name()))
        .filter(|scope| !topology::is_shared_scope(scope) && !shared.contains(scope))
        .collect()
}

fn single_output(input: InputBuffer, layers: &[Operation]) -> Result<ModelGraph, ModelError> {
    if layers.is_empty() {
        return Err(ModelError::NoLayers);
    }
    let output = topology::thread(layers, input.buffer())?;
    Ok(ModelGraph::single(input, output))
}
