//! Runtime overlay: nodes created by iterator expressions mid-evaluation.
//!
//! The overlay is a per-request layer over the immutable step artefact.
//! A batch registration stages the full compile pipeline (normalize →
//! register → metadata → pseudo-nodes → wiring → handlers → async flags)
//! against a combined view and only commits when every phase succeeds, so
//! a failing batch leaves no partial state behind.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::compile::graph::DependencyGraph;
use crate::compile::{StepArtifact, normalize, pseudo, wiring};
use crate::error::EngineError;
use crate::eval::handlers::{compile_handlers, create_handler};
use crate::ir::node::{IdSpace, Node, NodeId, NodeRef, PseudoKind};
use crate::ir::traverse::{Flow, Traverser, VisitContext, Visitor};
use crate::registry::functions::FunctionRegistry;
use crate::registry::handlers::{HandlerEntry, HandlerRegistry};
use crate::registry::metadata::{MetaKey, MetadataRegistry};
use crate::registry::nodes::NodeRegistry;

use super::context::RequestState;
use super::outcome::{EvalError, EvalErrorKind};

#[derive(Default)]
pub struct RuntimeLayer {
    nodes: RwLock<NodeRegistry>,
    handlers: RwLock<HandlerRegistry>,
    metadata: RwLock<MetadataRegistry>,
    graph: RwLock<DependencyGraph>,
}

impl RuntimeLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &NodeId) -> Option<NodeRef> {
        self.nodes.read().node(id).cloned()
    }

    pub fn handler(&self, id: &NodeId) -> Option<HandlerEntry> {
        self.handlers.read().get(id)
    }

    pub fn pseudo(&self, kind: PseudoKind, key: &str) -> Option<NodeRef> {
        self.nodes.read().pseudo(kind, key).cloned()
    }

    pub fn flag(&self, id: &NodeId, key: MetaKey) -> bool {
        self.metadata.read().flag(id, key)
    }

    pub fn ids_of_kind(&self, kind: &str) -> Vec<NodeId> {
        self.nodes.read().ids_of_kind(kind).to_vec()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    // =========================================================================
    // DETACHED REGISTRATION
    // =========================================================================

    /// Register a bare expression subtree with handlers but no wiring or
    /// pseudo-node synthesis. Used to resolve dynamic field codes before
    /// their host nodes exist.
    pub fn register_detached(
        &self,
        root: Node,
        functions: &FunctionRegistry,
    ) -> Result<NodeRef, EngineError> {
        let root = Arc::new(root);
        let mut nodes = self.nodes.write();
        let mut handlers = self.handlers.write();
        let mut register = RegisterVisitor {
            registry: &mut nodes,
            recorded: Vec::new(),
            error: None,
        };
        Traverser::new().walk(&root, &mut register);
        if let Some(error) = register.error {
            return Err(error);
        }
        for id in register.recorded {
            if let Some(entry) = nodes.node(&id) {
                handlers.insert(id.clone(), create_handler(entry, functions));
            }
        }
        Ok(root)
    }

    // =========================================================================
    // BATCH REGISTRATION
    // =========================================================================

    /// Run the compile pipeline over a batch of runtime nodes and commit
    /// the result into this layer. Returns the root ids in input order.
    pub fn register_batch(
        &self,
        roots: Vec<Node>,
        iterate_id: &NodeId,
        artifact: &StepArtifact,
        functions: &FunctionRegistry,
        state: &RequestState,
    ) -> Result<Vec<NodeId>, EvalError> {
        let fail = |message: String| {
            EvalError::new(EvalErrorKind::EvaluationFailed, iterate_id, message)
        };

        // Normalize each root in the runtime id space.
        let mut normalized: Vec<NodeRef> = Vec::with_capacity(roots.len());
        for root in roots {
            let mut node_ref = Arc::new(root);
            normalize::normalize(&mut node_ref, &artifact.ids, IdSpace::RuntimeAst)
                .map_err(|errors| fail(join_errors(&errors)))?;
            normalized.push(node_ref);
        }

        // Staging view: the static registry, anything already committed to
        // this layer, and the new subtrees.
        let mut staging = artifact.nodes.clone();
        let mut staging_metadata = artifact.metadata.clone();
        {
            let committed = self.nodes.read();
            for (_, entry) in committed.iter() {
                staging
                    .insert(entry.node.clone(), entry.path.clone())
                    .map_err(|e| fail(e.to_string()))?;
            }
            staging_metadata.merge(&self.metadata.read());
        }

        let mut new_ids: Vec<NodeId> = Vec::new();
        for root in &normalized {
            let mut register = RegisterVisitor {
                registry: &mut staging,
                recorded: Vec::new(),
                error: None,
            };
            Traverser::new().walk(root, &mut register);
            if let Some(error) = register.error {
                return Err(fail(error.to_string()));
            }
            for id in &register.recorded {
                // Runtime nodes belong to the current step's subtree.
                staging_metadata.set(id, MetaKey::IsDescendantOfStep, true);
            }
            new_ids.extend(register.recorded);
        }

        // Pseudo-nodes for anything the new subtrees reference, runtime
        // ids, deduplicated against both layers.
        let created =
            pseudo::synthesize(&mut staging, &staging_metadata, &artifact.ids, IdSpace::RuntimeAst)
                .map_err(|errors| fail(join_errors(&errors)))?;
        new_ids.extend(created.iter().map(|n| n.id.clone()));

        // Re-wire the combined view and check it is still a DAG.
        let mut graph = DependencyGraph::new();
        wiring::wire_static(&mut graph, &staging);
        wiring::wire_step_scope(&mut graph, &staging, &staging_metadata)
            .map_err(|errors| fail(join_errors(&errors)))?;
        let topo = graph.topological_sort();
        if topo.has_cycles() {
            let members = topo
                .cycles
                .iter()
                .flatten()
                .map(NodeId::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(EvalError::new(
                EvalErrorKind::CircularDependency,
                iterate_id,
                format!("Runtime node batch introduces a cycle: {members}"),
            ));
        }

        // Handlers with async flags for the combined view; only the new
        // entries are committed.
        let handlers = compile_handlers(
            &staging,
            &topo.sort,
            |id| graph.dependencies_of(id).into_iter().cloned().collect(),
            |id| artifact.handlers.is_async(id),
            functions,
        );

        // Flush. Nothing above touched the live layer, so an error path
        // never leaves a half-registered batch.
        {
            let mut nodes = self.nodes.write();
            let mut layer_handlers = self.handlers.write();
            let mut layer_metadata = self.metadata.write();
            for id in &new_ids {
                if let Some(entry) = staging.get(id) {
                    let _ = nodes.insert(entry.node.clone(), entry.path.clone());
                }
                if let Some(entry) = handlers.get(id) {
                    layer_handlers.insert(id.clone(), entry.handler);
                    layer_handlers.set_is_async(id, entry.is_async);
                }
                layer_metadata.adopt_node(&staging_metadata, id);
            }
            *self.graph.write() = graph;
        }

        // Results computed against the pre-batch world are stale.
        let mut invalidate = new_ids.clone();
        invalidate.push(iterate_id.clone());
        state.invalidate(&invalidate);
        trace!(count = new_ids.len(), "committed runtime node batch");

        Ok(normalized.iter().map(|n| n.id.clone()).collect())
    }
}

fn join_errors(errors: &[EngineError]) -> String {
    errors
        .iter()
        .map(EngineError::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

struct RegisterVisitor<'a> {
    registry: &'a mut NodeRegistry,
    recorded: Vec<NodeId>,
    error: Option<EngineError>,
}

impl Visitor for RegisterVisitor<'_> {
    fn enter_node(&mut self, node: &NodeRef, cx: &VisitContext<'_>) -> Flow {
        match self.registry.insert(node.clone(), cx.path_string()) {
            Ok(()) => {
                self.recorded.push(node.id.clone());
                Flow::Continue
            }
            Err(error) => {
                self.error = Some(error);
                Flow::Stop
            }
        }
    }
}
