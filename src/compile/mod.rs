//! Compile phase: journey definition → per-step artefacts.
//!
//! Orchestrates the pipeline leaves-first: parse, normalize, validate,
//! then per step: project, register, synthesize pseudo-nodes, wire the
//! dependency graph, detect cycles, compile handlers and compute their
//! async flags in topological order.

pub mod graph;
pub mod normalize;
pub mod pseudo;
pub mod relevant;
pub mod validate;
pub mod wiring;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::eval::handlers::compile_handlers;
use crate::ir::node::{IdGenerator, IdSpace, NodeId, NodeKind, NodeRef};
use crate::registry::functions::FunctionRegistry;
use crate::registry::handlers::HandlerRegistry;
use crate::registry::metadata::{MetaKey, MetadataRegistry};
use crate::registry::nodes::NodeRegistry;

use graph::DependencyGraph;

// =============================================================================
// ARTEFACTS
// =============================================================================

/// Everything a request against one step needs: the projected registries,
/// the dependency graph, the compiled handler table and the id source for
/// runtime node creation.
#[derive(Debug)]
pub struct StepArtifact {
    pub step_id: NodeId,
    pub step_path: String,
    pub journey_id: NodeId,
    pub nodes: NodeRegistry,
    pub metadata: MetadataRegistry,
    pub graph: DependencyGraph,
    pub handlers: HandlerRegistry,
    pub ids: Arc<IdGenerator>,
}

/// A fully compiled journey: one artefact per step, keyed by step path.
#[derive(Debug)]
pub struct CompiledJourney {
    pub journey: NodeRef,
    pub artifacts: BTreeMap<String, Arc<StepArtifact>>,
    pub ids: Arc<IdGenerator>,
}

impl CompiledJourney {
    pub fn artifact(&self, step_path: &str) -> Option<Arc<StepArtifact>> {
        self.artifacts.get(step_path).cloned()
    }

    /// The artefact of the journey's entry step, if one is marked.
    pub fn entry_artifact(&self) -> Option<Arc<StepArtifact>> {
        for step in relevant::steps_of(&self.journey) {
            let NodeKind::Step(def) = &step.kind else {
                continue;
            };
            if def.entry == Some(true) || def.is_entry_point == Some(true) {
                return self.artifact(&def.path);
            }
        }
        self.artifacts.values().next().cloned()
    }
}

// =============================================================================
// COMPILATION
// =============================================================================

/// Compile a declarative journey definition into per-step artefacts.
pub fn compile_journey(
    definition: &Value,
    functions: &FunctionRegistry,
) -> Result<CompiledJourney, Vec<EngineError>> {
    let (mut root, ids) = crate::parse::parse_value(definition)?;
    debug!(journey = %root.id, "parsed journey definition");

    normalize::normalize(&mut root, &ids, IdSpace::CompileAst)?;

    let validation_errors = validate::validate_structural(&root);
    if !validation_errors.is_empty() {
        return Err(validation_errors);
    }

    let mut artifacts = BTreeMap::new();
    for step in relevant::steps_of(&root) {
        let NodeKind::Step(def) = &step.kind else {
            continue;
        };
        let artifact = compile_step(&root, &step.id, &ids, functions)?;
        debug!(step = %def.path, nodes = artifact.nodes.len(), "compiled step artefact");
        artifacts.insert(def.path.clone(), Arc::new(artifact));
    }

    Ok(CompiledJourney {
        journey: root,
        artifacts,
        ids,
    })
}

/// Compile the artefact for one step of an already-normalized journey.
pub fn compile_step(
    journey: &NodeRef,
    step_id: &NodeId,
    ids: &Arc<IdGenerator>,
    functions: &FunctionRegistry,
) -> Result<StepArtifact, Vec<EngineError>> {
    // Relevant-node projection.
    let projection = relevant::project(journey, step_id)?;

    // Registration: the projected registry plus attachment metadata.
    let mut nodes = NodeRegistry::new();
    let mut metadata = MetadataRegistry::new();
    let mut errors = Vec::new();
    for projected in &projection.nodes {
        if let Err(e) = nodes.insert(projected.node.clone(), projected.path.clone()) {
            errors.push(e);
            continue;
        }
        if let Some(parent) = &projected.parent {
            metadata.set(
                &projected.node.id,
                MetaKey::AttachedToParentNode,
                Value::String(parent.to_string()),
            );
        }
        if let Some(property) = &projected.parent_property {
            metadata.set(
                &projected.node.id,
                MetaKey::AttachedToParentProperty,
                Value::String(property.clone()),
            );
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    // Step-relative flags.
    metadata.set(step_id, MetaKey::IsCurrentStep, true);
    for id in &projection.current_subtree {
        metadata.set(id, MetaKey::IsDescendantOfStep, true);
    }
    for id in &projection.ancestors {
        metadata.set(id, MetaKey::IsAncestorOfStep, true);
    }

    // Pseudo-nodes for the identifiers this projection references.
    pseudo::synthesize(&mut nodes, &metadata, ids, IdSpace::CompileAst)?;

    // Dependency wiring, both phases, then cycle detection.
    let mut graph = DependencyGraph::new();
    wiring::wire_static(&mut graph, &nodes);
    wiring::wire_step_scope(&mut graph, &nodes, &metadata)?;

    let topo = graph.topological_sort();
    if topo.has_cycles() {
        return Err(topo
            .cycles
            .iter()
            .map(|cycle| {
                let members = cycle
                    .iter()
                    .map(NodeId::to_string)
                    .collect::<Vec<_>>()
                    .join(" -> ");
                EngineError::compile(
                    "C001",
                    format!("Circular dependency: {members}"),
                    cycle.first().cloned(),
                )
            })
            .collect());
    }

    // Handler compilation: instantiate, then compute async flags in
    // topological order.
    let handlers: HandlerRegistry = compile_handlers(
        &nodes,
        &topo.sort,
        |id| graph.dependencies_of(id).into_iter().cloned().collect(),
        |_| None,
        functions,
    );

    let step_path = match nodes.node(step_id).map(|n| &n.kind) {
        Some(NodeKind::Step(def)) => def.path.clone(),
        _ => String::new(),
    };

    Ok(StepArtifact {
        step_id: step_id.clone(),
        step_path,
        journey_id: projection
            .ancestors
            .first()
            .cloned()
            .unwrap_or_else(|| journey.id.clone()),
        nodes,
        metadata,
        graph,
        handlers,
        ids: ids.clone(),
    })
}
