//! Handler registry: node id → compiled thunk handler + its async flag.

use std::collections::HashMap;
use std::sync::Arc;

use crate::eval::handlers::NodeHandler;
use crate::ir::node::NodeId;

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<dyn NodeHandler>,
    /// Computed over the dependency graph in topological order: true when
    /// the handler or anything it reads suspends.
    pub is_async: bool,
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("handler", self.handler.node_id())
            .field("is_async", &self.is_async)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: HashMap<NodeId, HandlerEntry>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("entries", &self.entries)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId, handler: Arc<dyn NodeHandler>) {
        self.entries.insert(
            id,
            HandlerEntry {
                handler,
                is_async: false,
            },
        );
    }

    pub fn get(&self, id: &NodeId) -> Option<HandlerEntry> {
        self.entries.get(id).cloned()
    }

    pub fn set_is_async(&mut self, id: &NodeId, is_async: bool) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.is_async = is_async;
        }
    }

    pub fn is_async(&self, id: &NodeId) -> Option<bool> {
        self.entries.get(id).map(|e| e.is_async)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.keys()
    }
}
