//! Normalization passes: rewrites applied to the IR before registration.
//!
//! Runs while the tree is still unshared, so `Arc::make_mut` rewrites in
//! place without cloning subtrees.

use std::sync::Arc;

use serde_json::Value;

use crate::error::EngineError;
use crate::ir::node::*;

/// Run every normalizer. Order matters: self-input injection first, so the
/// injected references are visible to later passes. `space` selects the id
/// space for injected nodes: compile ids during registration, runtime ids
/// inside the evaluation overlay.
pub fn normalize(
    root: &mut NodeRef,
    ids: &Arc<IdGenerator>,
    space: IdSpace,
) -> Result<(), Vec<EngineError>> {
    add_self_value_to_fields(root, ids, space);
    resolve_self_references(root, ids, space)
}

// =============================================================================
// PASS 1 — inject `@scope.@value` into input-less format pipelines
// =============================================================================

/// Every field `formatPipeline` without an explicit input reads the value
/// being processed: inject `Reference(['@scope', '@value'])`.
pub fn add_self_value_to_fields(root: &mut NodeRef, ids: &Arc<IdGenerator>, space: IdSpace) {
    walk_mut(root, &mut |node| {
        if let NodeKind::Field(field) = &mut node.kind
            && let Some(pipeline_ref) = &mut field.format_pipeline
        {
            let pipeline = Arc::make_mut(pipeline_ref);
            if let NodeKind::Pipeline(p) = &mut pipeline.kind
                && p.input.is_none()
            {
                p.input = Some(Arc::new(scope_value_reference(ids, space)));
            }
        }
    });
}

fn scope_value_reference(ids: &Arc<IdGenerator>, space: IdSpace) -> Node {
    Node::new(
        ids.next(space),
        NodeKind::Reference(ReferenceDef {
            path: vec![
                PropValue::Scalar(Value::String("@scope".into())),
                PropValue::Scalar(Value::String("@value".into())),
            ],
            base: None,
        }),
    )
}

// =============================================================================
// PASS 2 — resolve `Self()` markers
// =============================================================================

/// Replace `Self()` markers with `Reference(['answers', <owning field
/// code>])`. A marker outside any field block is a definition error.
pub fn resolve_self_references(
    root: &mut NodeRef,
    ids: &Arc<IdGenerator>,
    space: IdSpace,
) -> Result<(), Vec<EngineError>> {
    let mut errors = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    resolve_in(root, ids, space, &mut stack, &mut errors);
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn resolve_in(
    node_ref: &mut NodeRef,
    ids: &Arc<IdGenerator>,
    space: IdSpace,
    stack: &mut Vec<String>,
    errors: &mut Vec<EngineError>,
) {
    if matches!(node_ref.kind, NodeKind::SelfMarker) {
        match stack.last() {
            Some(code) => {
                *node_ref = Arc::new(answers_reference(ids, space, code));
            }
            None => errors.push(EngineError::normalize(
                "N001",
                "Self() marker outside any field block",
                Some(node_ref.id.clone()),
            )),
        }
        return;
    }

    let entered_field = match &node_ref.kind {
        NodeKind::Field(f) => {
            stack.push(f.code.clone());
            true
        }
        _ => false,
    };

    let node = Arc::make_mut(node_ref);
    visit_children_mut(node, &mut |child| resolve_in(child, ids, space, stack, errors));

    if entered_field {
        stack.pop();
    }
}

fn answers_reference(ids: &Arc<IdGenerator>, space: IdSpace, code: &str) -> Node {
    Node::new(
        ids.next(space),
        NodeKind::Reference(ReferenceDef {
            path: vec![
                PropValue::Scalar(Value::String("answers".into())),
                PropValue::Scalar(Value::String(code.into())),
            ],
            base: Some(code.to_string()),
        }),
    )
}

// =============================================================================
// MUTABLE WALK
// =============================================================================

fn walk_mut(node_ref: &mut NodeRef, f: &mut impl FnMut(&mut Node)) {
    let node = Arc::make_mut(node_ref);
    f(node);
    visit_children_mut(node, &mut |child| walk_mut(child, f));
}

/// Apply `f` to every direct child node link, including links buried in
/// freeform property values. Iterate templates stay raw JSON and are not
/// children until runtime instantiation.
fn visit_children_mut(node: &mut Node, f: &mut dyn FnMut(&mut NodeRef)) {
    fn list(items: &mut Vec<NodeRef>, f: &mut dyn FnMut(&mut NodeRef)) {
        for item in items {
            f(item);
        }
    }
    fn prop(value: &mut PropValue, f: &mut dyn FnMut(&mut NodeRef)) {
        match value {
            PropValue::Node(n) => f(n),
            PropValue::Array(items) => {
                for item in items {
                    prop(item, f);
                }
            }
            PropValue::Object(entries) => {
                for item in entries.values_mut() {
                    prop(item, f);
                }
            }
            PropValue::Scalar(_) => {}
        }
    }
    fn opt(value: &mut Option<NodeRef>, f: &mut dyn FnMut(&mut NodeRef)) {
        if let Some(n) = value {
            f(n);
        }
    }
    fn opt_prop(value: &mut Option<PropValue>, f: &mut dyn FnMut(&mut NodeRef)) {
        if let Some(v) = value {
            prop(v, f);
        }
    }

    match &mut node.kind {
        NodeKind::Journey(j) => {
            list(&mut j.children, f);
            list(&mut j.steps, f);
            list(&mut j.on_load, f);
            list(&mut j.on_access, f);
        }
        NodeKind::Step(s) => {
            list(&mut s.blocks, f);
            list(&mut s.on_load, f);
            list(&mut s.on_access, f);
            list(&mut s.on_action, f);
            list(&mut s.on_submission, f);
        }
        NodeKind::Block(b) => {
            for value in b.properties.values_mut() {
                prop(value, f);
            }
        }
        NodeKind::Field(field) => {
            opt_prop(&mut field.label, f);
            list(&mut field.validate, f);
            opt(&mut field.dependent, f);
            opt(&mut field.format_pipeline, f);
            opt_prop(&mut field.default_value, f);
            for value in field.properties.values_mut() {
                prop(value, f);
            }
        }
        NodeKind::Reference(r) => {
            for seg in &mut r.path {
                prop(seg, f);
            }
        }
        NodeKind::Format(fmt) => {
            for arg in &mut fmt.args {
                prop(arg, f);
            }
        }
        NodeKind::Pipeline(p) => {
            opt(&mut p.input, f);
            list(&mut p.steps, f);
        }
        NodeKind::Iterate(it) => {
            f(&mut it.collection);
            opt_prop(&mut it.fallback, f);
        }
        NodeKind::Validation(v) => {
            f(&mut v.when);
            prop(&mut v.message, f);
        }
        NodeKind::Next(n) => {
            opt(&mut n.when, f);
            prop(&mut n.goto, f);
        }
        NodeKind::Function(func) => {
            for arg in &mut func.arguments {
                prop(arg, f);
            }
        }
        NodeKind::Test(t) => {
            prop(&mut t.subject, f);
            f(&mut t.condition);
        }
        NodeKind::And(o) | NodeKind::Or(o) | NodeKind::Xor(o) => list(&mut o.operands, f),
        NodeKind::Not(n) => f(&mut n.operand),
        NodeKind::Load(t) => list(&mut t.effects, f),
        NodeKind::Access(t) => list(&mut t.effects, f),
        NodeKind::Action(t) => {
            opt(&mut t.when, f);
            list(&mut t.effects, f);
        }
        NodeKind::Submit(s) => {
            opt(&mut s.when, f);
            if let Some(branch) = &mut s.on_valid {
                list(&mut branch.effects, f);
                list(&mut branch.next, f);
            }
            if let Some(branch) = &mut s.on_invalid {
                list(&mut branch.effects, f);
                list(&mut branch.next, f);
            }
        }
        NodeKind::Redirect(r) => prop(&mut r.goto, f),
        NodeKind::ThrowError(e) => prop(&mut e.message, f),
        NodeKind::SelfMarker
        | NodeKind::AnswerLocal(_)
        | NodeKind::AnswerRemote(_)
        | NodeKind::Post(_)
        | NodeKind::Query(_)
        | NodeKind::Params(_)
        | NodeKind::Data(_) => {}
    }
}
