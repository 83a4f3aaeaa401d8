//! Parse phase: declarative journey JSON → IR nodes.

pub mod factory;

pub use factory::NodeFactory;

use std::sync::Arc;

use serde_json::Value;

use crate::error::EngineError;
use crate::ir::node::{IdGenerator, Node, NodeKind, NodeRef};

/// Parse a journey JSON string into an IR tree rooted at a Journey node.
pub fn parse(json: &str) -> Result<(NodeRef, Arc<IdGenerator>), Vec<EngineError>> {
    let value: Value = serde_json::from_str(json).map_err(|e| {
        vec![EngineError::parse(
            "P001",
            format!("Failed to parse journey JSON: {e}"),
        )]
    })?;
    parse_value(&value)
}

/// Parse an already-deserialized journey definition.
pub fn parse_value(value: &Value) -> Result<(NodeRef, Arc<IdGenerator>), Vec<EngineError>> {
    let ids = Arc::new(IdGenerator::new());
    let factory = NodeFactory::compile_space(ids.clone());
    let root = factory.create_node(value).map_err(|e| vec![e])?;
    require_journey(&root)?;
    Ok((Arc::new(root), ids))
}

fn require_journey(root: &Node) -> Result<(), Vec<EngineError>> {
    match root.kind {
        NodeKind::Journey(_) => Ok(()),
        _ => Err(vec![EngineError::parse(
            "P001",
            format!(
                "Top-level declarative object must be a journey, got '{}'",
                root.node_kind()
            ),
        )]),
    }
}
