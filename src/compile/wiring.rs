//! Dependency wiring: one pass per node kind, adding typed edges.
//!
//! Every edge points from a dependency to the node that consumes it, so
//! the topological sort yields operands first. Wiring runs in two phases:
//! the static phase covers edges derivable from the tree alone; the
//! step-scope phase adds pseudo-node edges and the current step's action
//! transitions, which only exist relative to a compiled step.

use crate::error::EngineError;
use crate::ir::node::*;
use crate::registry::metadata::{MetaKey, MetadataRegistry};
use crate::registry::nodes::NodeRegistry;

use super::graph::{DependencyGraph, EdgeMeta};
use super::pseudo::answer_pseudo;

// =============================================================================
// STATIC PHASE
// =============================================================================

/// Wire every edge derivable from the node tree itself.
pub fn wire_static(graph: &mut DependencyGraph, registry: &NodeRegistry) {
    for (id, entry) in registry.iter() {
        graph.ensure_node(id);
        match &entry.node.kind {
            NodeKind::Journey(j) => wire_journey(graph, registry, id, j),
            NodeKind::Step(s) => wire_step(graph, registry, id, s),
            NodeKind::Block(b) => {
                for (key, value) in &b.properties {
                    wire_prop(graph, id, key, value);
                }
            }
            NodeKind::Field(f) => wire_field(graph, id, f),
            NodeKind::Reference(r) => {
                // Dynamic path segments are evaluated before the lookup.
                for (i, seg) in r.path.iter().enumerate() {
                    wire_prop_at(graph, id, "path", Some(i), seg);
                }
            }
            NodeKind::Format(f) => {
                for (i, arg) in f.args.iter().enumerate() {
                    wire_prop_at(graph, id, "args", Some(i), arg);
                }
            }
            NodeKind::Pipeline(p) => {
                if let Some(input) = &p.input {
                    graph.add_edge(&input.id, id, EdgeMeta::data("input"));
                }
                for (i, step) in p.steps.iter().enumerate() {
                    graph.add_edge(&step.id, id, EdgeMeta::data_at("steps", i));
                }
            }
            NodeKind::Iterate(it) => {
                graph.add_edge(&it.collection.id, id, EdgeMeta::data("collection"));
                if let Some(fallback) = &it.fallback {
                    wire_prop(graph, id, "fallback", fallback);
                }
            }
            NodeKind::Validation(v) => {
                graph.add_edge(&v.when.id, id, EdgeMeta::data("when"));
                wire_prop(graph, id, "message", &v.message);
            }
            NodeKind::Next(n) => {
                if let Some(when) = &n.when {
                    graph.add_edge(&when.id, id, EdgeMeta::data("when"));
                }
                wire_prop(graph, id, "goto", &n.goto);
            }
            NodeKind::Function(f) => {
                for (i, arg) in f.arguments.iter().enumerate() {
                    wire_prop_at(graph, id, "arguments", Some(i), arg);
                }
            }
            NodeKind::Test(t) => {
                wire_prop(graph, id, "subject", &t.subject);
                graph.add_edge(&t.condition.id, id, EdgeMeta::data("condition"));
            }
            NodeKind::And(o) | NodeKind::Or(o) | NodeKind::Xor(o) => {
                for (i, operand) in o.operands.iter().enumerate() {
                    graph.add_edge(&operand.id, id, EdgeMeta::data_at("operands", i));
                }
            }
            NodeKind::Not(n) => {
                graph.add_edge(&n.operand.id, id, EdgeMeta::data("operand"));
            }
            NodeKind::Load(t) => {
                for (i, effect) in t.effects.iter().enumerate() {
                    graph.add_edge(&effect.id, id, EdgeMeta::data_at("effects", i));
                }
            }
            NodeKind::Access(t) => {
                for (i, effect) in t.effects.iter().enumerate() {
                    graph.add_edge(&effect.id, id, EdgeMeta::data_at("effects", i));
                }
            }
            NodeKind::Action(t) => {
                if let Some(when) = &t.when {
                    graph.add_edge(&when.id, id, EdgeMeta::data("when"));
                }
                for (i, effect) in t.effects.iter().enumerate() {
                    graph.add_edge(&effect.id, id, EdgeMeta::data_at("effects", i));
                }
            }
            NodeKind::Submit(s) => wire_submit(graph, id, s),
            NodeKind::Redirect(r) => wire_prop(graph, id, "goto", &r.goto),
            NodeKind::ThrowError(e) => wire_prop(graph, id, "message", &e.message),
            NodeKind::SelfMarker
            | NodeKind::AnswerLocal(_)
            | NodeKind::AnswerRemote(_)
            | NodeKind::Post(_)
            | NodeKind::Query(_)
            | NodeKind::Params(_)
            | NodeKind::Data(_) => {}
        }
    }
}

/// Structural children outside the projection (another step's blocks,
/// transitions the step never sees) contribute no edges.
fn wire_journey(graph: &mut DependencyGraph, registry: &NodeRegistry, id: &NodeId, j: &JourneyDef) {
    for (i, child) in j.children.iter().enumerate() {
        if registry.contains(&child.id) {
            graph.add_edge(&child.id, id, EdgeMeta::structural("children", i));
        }
    }
    for (i, step) in j.steps.iter().enumerate() {
        if registry.contains(&step.id) {
            graph.add_edge(&step.id, id, EdgeMeta::structural("steps", i));
        }
    }
    for transition in j.on_load.iter() {
        if registry.contains(&transition.id) {
            graph.add_edge(&transition.id, id, EdgeMeta::control("onLoad"));
        }
    }
    for transition in j.on_access.iter() {
        if registry.contains(&transition.id) {
            graph.add_edge(&transition.id, id, EdgeMeta::control("onAccess"));
        }
    }
}

fn wire_step(graph: &mut DependencyGraph, registry: &NodeRegistry, id: &NodeId, s: &StepDef) {
    for (i, block) in s.blocks.iter().enumerate() {
        if registry.contains(&block.id) {
            graph.add_edge(&block.id, id, EdgeMeta::structural("blocks", i));
        }
    }
    for transition in s.on_load.iter().chain(s.on_access.iter()) {
        if registry.contains(&transition.id) {
            let label = if s.on_load.iter().any(|t| t.id == transition.id) {
                "onLoad"
            } else {
                "onAccess"
            };
            graph.add_edge(&transition.id, id, EdgeMeta::control(label));
        }
    }
    for transition in s.on_submission.iter() {
        if registry.contains(&transition.id) {
            graph.add_edge(&transition.id, id, EdgeMeta::control("onSubmission"));
        }
    }
    // onAction is wired in the step-scope phase, current step only.
}

fn wire_field(graph: &mut DependencyGraph, id: &NodeId, f: &FieldBlockDef) {
    if let Some(label) = &f.label {
        wire_prop(graph, id, "label", label);
    }
    for (i, validation) in f.validate.iter().enumerate() {
        graph.add_edge(&validation.id, id, EdgeMeta::data_at("validate", i));
    }
    if let Some(dependent) = &f.dependent {
        graph.add_edge(&dependent.id, id, EdgeMeta::data("dependent"));
    }
    for (key, value) in &f.properties {
        wire_prop(graph, id, key, value);
    }
    // formatPipeline and defaultValue feed the field's AnswerLocal, not its
    // rendering; they are wired in the step-scope phase.
}

fn wire_submit(graph: &mut DependencyGraph, id: &NodeId, s: &SubmitDef) {
    if let Some(when) = &s.when {
        graph.add_edge(&when.id, id, EdgeMeta::data("when"));
    }
    for (branch, name) in [(&s.on_valid, "onValid"), (&s.on_invalid, "onInvalid")] {
        let Some(branch) = branch else { continue };
        for (i, effect) in branch.effects.iter().enumerate() {
            graph.add_edge(
                &effect.id,
                id,
                EdgeMeta::data_at(&format!("{name}.effects"), i),
            );
        }
        for (i, next) in branch.next.iter().enumerate() {
            graph.add_edge(&next.id, id, EdgeMeta::data_at(&format!("{name}.next"), i));
        }
    }
}

/// Wire every node buried in a property value, labelled with the property
/// and, for list entries, the index.
fn wire_prop(graph: &mut DependencyGraph, consumer: &NodeId, property: &str, value: &PropValue) {
    wire_prop_at(graph, consumer, property, None, value);
}

fn wire_prop_at(
    graph: &mut DependencyGraph,
    consumer: &NodeId,
    property: &str,
    index: Option<usize>,
    value: &PropValue,
) {
    match value {
        PropValue::Node(node) => {
            let meta = match index {
                Some(i) => EdgeMeta::data_at(property, i),
                None => EdgeMeta::data(property),
            };
            graph.add_edge(&node.id, consumer, meta);
        }
        PropValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                wire_prop_at(graph, consumer, property, Some(i), item);
            }
        }
        PropValue::Object(entries) => {
            for item in entries.values() {
                wire_prop_at(graph, consumer, property, index, item);
            }
        }
        PropValue::Scalar(_) => {}
    }
}

// =============================================================================
// STEP-SCOPE PHASE
// =============================================================================

/// Wire pseudo-node edges and the current step's action transitions.
pub fn wire_step_scope(
    graph: &mut DependencyGraph,
    registry: &NodeRegistry,
    metadata: &MetadataRegistry,
) -> Result<(), Vec<EngineError>> {
    let mut errors = Vec::new();

    // References read through their namespace's pseudo-node.
    for id in registry.ids_of_kind("reference") {
        let Some(entry) = registry.get(id) else {
            continue;
        };
        let NodeKind::Reference(reference) = &entry.node.kind else {
            continue;
        };
        let (Some(namespace), Some(base)) = (reference.namespace(), reference.base.as_deref())
        else {
            continue;
        };
        let pseudo = match namespace {
            "answers" => answer_pseudo(registry, base),
            "query" => registry.pseudo(PseudoKind::Query, base),
            "params" => registry.pseudo(PseudoKind::Params, base),
            "data" => registry.pseudo(PseudoKind::Data, base),
            _ => None,
        };
        match pseudo {
            Some(pseudo) => graph.add_edge(&pseudo.id, id, EdgeMeta::data("path")),
            None if matches!(namespace, "answers" | "query" | "params" | "data") => {
                errors.push(EngineError::wire(
                    "W001",
                    format!("Reference '{namespace}.{base}' has no pseudo-node in this step"),
                    Some(id.clone()),
                ));
            }
            None => {}
        }
    }

    // AnswerLocal consumes the POST reader plus the owning field's
    // submission-time expressions.
    for id in registry.ids_of_kind("answerLocal") {
        let Some(entry) = registry.get(id) else {
            continue;
        };
        let NodeKind::AnswerLocal(local) = &entry.node.kind else {
            continue;
        };
        let Some(post) = registry.pseudo(PseudoKind::Post, &local.base_field_code) else {
            errors.push(EngineError::wire(
                "W002",
                format!("AnswerLocal '{}' has no Post reader", local.base_field_code),
                Some(id.clone()),
            ));
            continue;
        };
        graph.add_edge(&post.id, id, EdgeMeta::data("post"));

        let Some(field) = registry.node(&local.field_node_id) else {
            errors.push(EngineError::wire(
                "W003",
                format!(
                    "AnswerLocal '{}' points at unregistered field '{}'",
                    local.base_field_code, local.field_node_id
                ),
                Some(id.clone()),
            ));
            continue;
        };
        let NodeKind::Field(field_def) = &field.kind else {
            continue;
        };
        if let Some(pipeline) = &field_def.format_pipeline {
            graph.add_edge(&pipeline.id, id, EdgeMeta::data("formatPipeline"));
        }
        if let Some(dependent) = &field_def.dependent {
            graph.add_edge(&dependent.id, id, EdgeMeta::data("dependent"));
        }
        if let Some(default_value) = &field_def.default_value {
            wire_prop(graph, id, "defaultValue", default_value);
        }

        // The field renders the current answer value.
        graph.add_edge(id, &local.field_node_id, EdgeMeta::data("value"));
    }

    // Action transitions only fire on the step being compiled.
    for id in registry.ids_of_kind("step") {
        if !metadata.flag(id, MetaKey::IsCurrentStep) {
            continue;
        }
        let Some(entry) = registry.get(id) else {
            continue;
        };
        let NodeKind::Step(step) = &entry.node.kind else {
            continue;
        };
        for transition in step.on_action.iter() {
            graph.add_edge(&transition.id, id, EdgeMeta::control("onAction"));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use petgraph::visit::EdgeRef;
    use serde_json::json;

    use super::*;
    use crate::compile::graph::EdgeKind;
    use crate::parse::NodeFactory;

    fn wire_tree(value: &serde_json::Value) -> (DependencyGraph, NodeRegistry) {
        let ids = Arc::new(IdGenerator::new());
        let factory = NodeFactory::compile_space(ids.clone());
        let root = Arc::new(factory.create_node(value).unwrap());
        let mut registry = NodeRegistry::new();
        struct R<'a>(&'a mut NodeRegistry);
        impl crate::ir::traverse::Visitor for R<'_> {
            fn enter_node(
                &mut self,
                node: &NodeRef,
                cx: &crate::ir::traverse::VisitContext<'_>,
            ) -> crate::ir::traverse::Flow {
                self.0.insert(node.clone(), cx.path_string()).unwrap();
                crate::ir::traverse::Flow::Continue
            }
        }
        crate::ir::traverse::Traverser::new().walk(&root, &mut R(&mut registry));
        let mut graph = DependencyGraph::new();
        wire_static(&mut graph, &registry);
        (graph, registry)
    }

    #[test]
    fn operands_point_at_consumers() {
        let (graph, registry) = wire_tree(&json!({
            "type": "format",
            "template": "%1-%2",
            "args": [
                {"type": "reference", "path": ["answers", "a"]},
                {"type": "reference", "path": ["answers", "b"]}
            ]
        }));
        let format_id = registry.ids_of_kind("format")[0].clone();
        assert_eq!(graph.dependencies_of(&format_id).len(), 2);
        let topo = graph.topological_sort();
        assert!(!topo.has_cycles());
        assert_eq!(topo.sort.last(), Some(&format_id));
    }

    #[test]
    fn structural_edges_carry_slot_labels() {
        let (graph, registry) = wire_tree(&json!({
            "type": "step",
            "path": "/a",
            "blocks": [
                {"type": "block", "variant": "html", "content": "hi"},
                {"type": "field", "variant": "text", "code": "name"}
            ]
        }));
        let step_id = registry.ids_of_kind("step")[0].clone();
        assert_eq!(graph.dependencies_of(&step_id).len(), 2);
        let idx = graph.node_indices[&step_id];
        let structural: Vec<_> = graph
            .graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .filter(|e| e.weight().kind == EdgeKind::Structural)
            .collect();
        assert_eq!(structural.len(), 2);
    }

    #[test]
    fn nested_property_nodes_are_wired() {
        let (graph, registry) = wire_tree(&json!({
            "type": "block",
            "variant": "radios",
            "items": [
                {"label": "Yes", "reveal": {"type": "reference", "path": ["data", "extra"]}},
                {"label": "No"}
            ]
        }));
        let block_id = registry.ids_of_kind("block")[0].clone();
        let reference_id = registry.ids_of_kind("reference")[0].clone();
        assert_eq!(graph.dependencies_of(&block_id), vec![&reference_id]);
    }
}
