//! Layer table of a graph, the data needed to pick layers by position.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One row of a [`GraphSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    /// Position in the layer registry.
    pub index: usize,
    pub name: String,
    pub kind: String,
    /// Activation of dense layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<String>,
    pub output_shape: Vec<usize>,
    pub params: usize,
    /// How many nodes of the graph the layer produces.
    pub uses: usize,
}

/// Structural summary of a [`ModelGraph`](super::ModelGraph).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub inputs: Vec<Vec<usize>>,
    pub outputs: Vec<Vec<usize>>,
    pub layers: Vec<LayerSummary>,
    pub total_params: usize,
}

impl GraphSummary {
    /// Serializes the summary as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn shape_string(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("(None, {})", dims.join(", "))
}

impl fmt::Display for GraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>5}  {:<28} {:<12} {:<10} {:<16} {:>10}",
            "index", "layer", "kind", "activation", "output shape", "params"
        )?;
        for layer in &self.layers {
            let name = if layer.uses > 1 {
                format!("{} (x{})", layer.name, layer.uses)
            } else {
                layer.name.clone()
            };
            writeln!(
                f,
                "{:>5}  {:<28} {:<12} {:<10} {:<16} {:>10}",
                layer.index,
                name,
                layer.kind,
                layer.activation.as_deref().unwrap_or("-"),
                shape_string(&layer.output_shape),
                layer.params
            )?;
        }
        write!(f, "Total params: {}", self.total_params)
    }
}
