//! Prompt graph handling for the engine boundary.
//!
//! The external engine executes a node graph ("prompt").  Before streaming
//! can start, the graph's designated media input and output nodes are
//! rewritten into tensor ingress/egress designations so the engine reads
//! its input tensor from the bridge and writes its output tensor back,
//! instead of touching files or previews.
//!
//! The bridge validates nothing beyond this rewrite: graph semantics are
//! the engine's concern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LinkError, Result};

/// Class name the rewrite installs at the graph's tensor input.
pub const INGRESS_CLASS: &str = "TensorIngress";
/// Class name the rewrite installs at the graph's tensor output.
pub const EGRESS_CLASS: &str = "TensorEgress";

/// Node classes recognized as the primary media input of a source graph.
const INPUT_CLASSES: &[&str] = &["PrimaryInputLoadImage", "LoadImage"];
/// Node classes recognized as the media output of a source graph.
const OUTPUT_CLASSES: &[&str] = &["PreviewImage", "SaveImage"];

/// One node of a prompt graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl GraphNode {
    fn ingress() -> Self {
        Self {
            class_type: INGRESS_CLASS.to_string(),
            inputs: Map::new(),
            meta: Some(serde_json::json!({ "title": INGRESS_CLASS })),
        }
    }

    fn egress(inputs: Map<String, Value>) -> Self {
        Self {
            class_type: EGRESS_CLASS.to_string(),
            inputs,
            meta: Some(serde_json::json!({ "title": EGRESS_CLASS })),
        }
    }
}

/// A prompt graph: node id → node, in stable id order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptGraph {
    nodes: BTreeMap<String, GraphNode>,
}

impl PromptGraph {
    /// Parse a graph from its JSON representation.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| LinkError::Graph(format!("malformed prompt graph: {e}")))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("graph serialization is infallible")
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rewrite the graph for streaming: replace the single designated media
    /// input node with a tensor ingress and the single designated output
    /// node with a tensor egress (keeping the output node's wiring).
    ///
    /// Fails if the graph contains zero or more than one candidate on
    /// either side.
    pub fn rewrite_for_streaming(mut self) -> Result<Self> {
        let input_id = self.sole_node_of(INPUT_CLASSES, "primary input")?;
        let output_id = self.sole_node_of(OUTPUT_CLASSES, "output")?;

        self.nodes.insert(input_id, GraphNode::ingress());

        let preserved = self
            .nodes
            .get(&output_id)
            .map(|n| n.inputs.clone())
            .unwrap_or_default();
        self.nodes.insert(output_id, GraphNode::egress(preserved));

        Ok(self)
    }

    /// True once the graph carries exactly one ingress and one egress node.
    pub fn is_streamable(&self) -> bool {
        let ingress = self.count_class(INGRESS_CLASS);
        let egress = self.count_class(EGRESS_CLASS);
        ingress == 1 && egress == 1
    }

    /// Set one input field on one node.
    ///
    /// String values that parse as numbers are coerced, matching how
    /// control-surface updates arrive as text.
    pub fn update_node_input(&mut self, node_id: &str, field: &str, value: Value) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| LinkError::Graph(format!("no node with id {node_id:?}")))?;
        node.inputs.insert(field.to_string(), coerce_numeric(value));
        Ok(())
    }

    fn count_class(&self, class: &str) -> usize {
        self.nodes.values().filter(|n| n.class_type == class).count()
    }

    fn sole_node_of(&self, classes: &[&str], role: &str) -> Result<String> {
        let mut found: Option<String> = None;
        for (id, node) in &self.nodes {
            if classes.contains(&node.class_type.as_str()) {
                if found.is_some() {
                    return Err(LinkError::Graph(format!("multiple {role} nodes found")));
                }
                found = Some(id.clone());
            }
        }
        found.ok_or_else(|| LinkError::Graph(format!("no {role} node found")))
    }
}

fn coerce_numeric(value: Value) -> Value {
    if let Value::String(s) = &value {
        if let Ok(n) = s.parse::<f64>() {
            if let Some(num) = serde_json::Number::from_f64(n) {
                return Value::Number(num);
            }
        }
    }
    value
}
