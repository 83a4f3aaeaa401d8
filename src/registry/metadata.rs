//! Metadata registry: per-node flags set for each compiled step.

use std::collections::HashMap;

use serde_json::Value;

use crate::ir::node::NodeId;

/// The closed set of metadata keys the pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    IsCurrentStep,
    IsDescendantOfStep,
    IsAncestorOfStep,
    AttachedToParentNode,
    AttachedToParentProperty,
}

impl MetaKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaKey::IsCurrentStep => "isCurrentStep",
            MetaKey::IsDescendantOfStep => "isDescendantOfStep",
            MetaKey::IsAncestorOfStep => "isAncestorOfStep",
            MetaKey::AttachedToParentNode => "attachedToParentNode",
            MetaKey::AttachedToParentProperty => "attachedToParentProperty",
        }
    }
}

/// Mapping `(node id, key) → value`. Cloned per step compilation so each
/// artefact carries its own step-relative flags.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    entries: HashMap<(NodeId, MetaKey), Value>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: &NodeId, key: MetaKey, value: impl Into<Value>) {
        self.entries.insert((id.clone(), key), value.into());
    }

    pub fn get(&self, id: &NodeId, key: MetaKey) -> Option<&Value> {
        self.entries.get(&(id.clone(), key))
    }

    /// Boolean metadata; absent means false.
    pub fn flag(&self, id: &NodeId, key: MetaKey) -> bool {
        self.get(id, key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(NodeId, MetaKey), &Value)> {
        self.entries.iter()
    }

    /// Overlay another registry's entries onto this one.
    pub fn merge(&mut self, other: &MetadataRegistry) {
        for ((id, key), value) in other.iter() {
            self.entries.insert((id.clone(), *key), value.clone());
        }
    }

    /// Copy every entry for one node out of another registry.
    pub fn adopt_node(&mut self, other: &MetadataRegistry, id: &NodeId) {
        for ((other_id, key), value) in other.iter() {
            if other_id == id {
                self.entries.insert((id.clone(), *key), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_false() {
        let mut metadata = MetadataRegistry::new();
        let id = NodeId::from("c1");
        assert!(!metadata.flag(&id, MetaKey::IsCurrentStep));
        metadata.set(&id, MetaKey::IsCurrentStep, true);
        assert!(metadata.flag(&id, MetaKey::IsCurrentStep));
    }

    #[test]
    fn clone_isolates_compilations(){
        let mut base = MetadataRegistry::new();
        let id = NodeId::from("c1");
        base.set(&id, MetaKey::IsAncestorOfStep, true);
        let mut per_step = base.clone();
        per_step.set(&id, MetaKey::IsCurrentStep, true);
        assert!(!base.flag(&id, MetaKey::IsCurrentStep));
        assert!(per_step.flag(&id, MetaKey::IsAncestorOfStep));
    }
}
