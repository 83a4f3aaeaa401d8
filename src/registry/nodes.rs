//! Node registry: id → node, with secondary indices by kind and pseudo key.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::ir::node::{NodeId, NodeRef, PseudoKind};

#[derive(Debug, Clone)]
pub struct RegisteredNode {
    pub node: NodeRef,
    /// Traversal path from the journey root, for diagnostics.
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    entries: HashMap<NodeId, RegisteredNode>,
    by_kind: HashMap<&'static str, Vec<NodeId>>,
    by_pseudo: HashMap<(PseudoKind, String), NodeId>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeRef, path: String) -> Result<(), EngineError> {
        let id = node.id.clone();
        if self.entries.contains_key(&id) {
            return Err(EngineError::register(
                "R001",
                format!("Duplicate node id '{id}'"),
                Some(id),
            ));
        }
        if let Some((kind, key)) = node.pseudo_kind() {
            let slot = (kind, key.to_string());
            if self.by_pseudo.contains_key(&slot) {
                return Err(EngineError::register(
                    "R002",
                    format!("Duplicate pseudo-node {kind:?} for key '{key}'"),
                    Some(id),
                ));
            }
            self.by_pseudo.insert(slot, id.clone());
        }
        self.by_kind
            .entry(node.node_kind())
            .or_default()
            .push(id.clone());
        self.entries.insert(id, RegisteredNode { node, path });
        Ok(())
    }

    pub fn get(&self, id: &NodeId) -> Option<&RegisteredNode> {
        self.entries.get(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeRef> {
        self.entries.get(id).map(|e| &e.node)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids of every node of the given kind, in insertion order.
    pub fn ids_of_kind(&self, kind: &str) -> &[NodeId] {
        self.by_kind.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// O(1) pseudo-node lookup by `(kind, key)`.
    pub fn pseudo(&self, kind: PseudoKind, key: &str) -> Option<&NodeRef> {
        self.by_pseudo
            .get(&(kind, key.to_string()))
            .and_then(|id| self.node(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &RegisteredNode)> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.keys()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ir::node::*;

    fn pseudo_query(id: &str, name: &str) -> NodeRef {
        Arc::new(Node::new(
            NodeId::from(id),
            NodeKind::Query(QueryDef {
                param_name: name.into(),
            }),
        ))
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = NodeRegistry::new();
        registry.insert(pseudo_query("c1", "a"), "".into()).unwrap();
        let err = registry
            .insert(pseudo_query("c1", "b"), "".into())
            .unwrap_err();
        assert_eq!(err.code, "R001");
    }

    #[test]
    fn pseudo_index_finds_by_kind_and_key() {
        let mut registry = NodeRegistry::new();
        registry
            .insert(pseudo_query("c1", "page"), "".into())
            .unwrap();
        assert!(registry.pseudo(PseudoKind::Query, "page").is_some());
        assert!(registry.pseudo(PseudoKind::Params, "page").is_none());
        assert_eq!(registry.ids_of_kind("query").len(), 1);
    }

    #[test]
    fn duplicate_pseudo_keys_are_rejected() {
        let mut registry = NodeRegistry::new();
        registry
            .insert(pseudo_query("c1", "page"), "".into())
            .unwrap();
        let err = registry
            .insert(pseudo_query("c2", "page"), "".into())
            .unwrap_err();
        assert_eq!(err.code, "R002");
    }
}
