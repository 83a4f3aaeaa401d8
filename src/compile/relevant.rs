//! Relevant-node projection: the subset of a journey a compiled step needs.
//!
//! Per step the artefact sees: the step's full subtree, ancestor journeys
//! with their onLoad/onAccess transitions, every step's onSubmission
//! transitions, and — for non-current steps — field blocks reduced to their
//! validation-relevant properties. Everything else stays out.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::EngineError;
use crate::ir::node::*;
use crate::ir::traverse::{Flow, Traverser, VisitContext, Visitor};

/// One node admitted into a step's projection.
#[derive(Debug, Clone)]
pub struct ProjectedNode {
    pub node: NodeRef,
    pub path: String,
    pub parent: Option<NodeId>,
    pub parent_property: Option<String>,
}

#[derive(Debug, Default)]
pub struct Projection {
    pub nodes: Vec<ProjectedNode>,
    /// Ids inside the current step's subtree.
    pub current_subtree: Vec<NodeId>,
    /// Ancestor journey ids, outermost first.
    pub ancestors: Vec<NodeId>,
}

/// Build the projection for `step_id` within `journey`.
pub fn project(journey: &NodeRef, step_id: &NodeId) -> Result<Projection, Vec<EngineError>> {
    let Some(chain) = find_step_chain(journey, step_id) else {
        return Err(vec![EngineError::project(
            "J001",
            format!("Step '{step_id}' is not part of this journey"),
            Some(step_id.clone()),
        )]);
    };
    let (ancestors, step) = chain.split_at(chain.len() - 1);
    let step = &step[0];

    let mut projection = Projection::default();
    let mut seen: HashMap<NodeId, ()> = HashMap::new();

    // Ancestor journeys: the node itself plus onLoad/onAccess subtrees
    // (their effects can mutate request state the step observes).
    for ancestor in ancestors {
        projection.ancestors.push(ancestor.id.clone());
        admit_single(&mut projection, &mut seen, ancestor, "");
        if let NodeKind::Journey(j) = &ancestor.kind {
            for transition in j.on_load.iter() {
                admit_subtree(&mut projection, &mut seen, transition, Some(&ancestor.id), "onLoad");
            }
            for transition in j.on_access.iter() {
                admit_subtree(&mut projection, &mut seen, transition, Some(&ancestor.id), "onAccess");
            }
        }
    }

    // Current step: the full subtree, every block property.
    let before = projection.nodes.len();
    admit_subtree(
        &mut projection,
        &mut seen,
        step,
        ancestors.last().map(|a| &a.id),
        "steps",
    );
    projection.current_subtree = projection.nodes[before..]
        .iter()
        .map(|p| p.node.id.clone())
        .collect();

    // Every step contributes its onSubmission transitions; non-current
    // steps additionally contribute validation-stripped field blocks.
    let mut all_steps = Vec::new();
    collect_steps(journey, &mut all_steps);
    for other in &all_steps {
        if other.id == *step_id {
            continue;
        }
        admit_single(&mut projection, &mut seen, other, "");
        let NodeKind::Step(def) = &other.kind else {
            continue;
        };
        for transition in def.on_submission.iter() {
            admit_subtree(&mut projection, &mut seen, transition, Some(&other.id), "onSubmission");
        }
        for block in def.blocks.iter() {
            for field in find_fields(block) {
                let stripped = strip_field(&field);
                admit_single(&mut projection, &mut seen, &stripped, "");
                let NodeKind::Field(fdef) = &stripped.kind else {
                    continue;
                };
                for validation in fdef.validate.iter() {
                    admit_subtree(&mut projection, &mut seen, validation, Some(&stripped.id), "validate");
                }
                if let Some(dependent) = &fdef.dependent {
                    admit_subtree(&mut projection, &mut seen, dependent, Some(&stripped.id), "dependent");
                }
            }
        }
    }

    Ok(projection)
}

// =============================================================================
// STEP LOOKUP
// =============================================================================

/// The chain of enclosing journeys ending in the step itself.
fn find_step_chain(journey: &NodeRef, step_id: &NodeId) -> Option<Vec<NodeRef>> {
    let NodeKind::Journey(def) = &journey.kind else {
        return None;
    };
    for step in def.steps.iter() {
        if step.id == *step_id {
            return Some(vec![journey.clone(), step.clone()]);
        }
    }
    for child in def.children.iter() {
        if let Some(mut chain) = find_step_chain(child, step_id) {
            chain.insert(0, journey.clone());
            return Some(chain);
        }
    }
    None
}

fn collect_steps(journey: &NodeRef, out: &mut Vec<NodeRef>) {
    let NodeKind::Journey(def) = &journey.kind else {
        return;
    };
    out.extend(def.steps.iter().cloned());
    for child in def.children.iter() {
        collect_steps(child, out);
    }
}

/// Every step of the journey, for per-step compilation.
pub fn steps_of(journey: &NodeRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    collect_steps(journey, &mut out);
    out
}

// =============================================================================
// ADMISSION
// =============================================================================

fn admit_single(
    projection: &mut Projection,
    seen: &mut HashMap<NodeId, ()>,
    node: &NodeRef,
    path: &str,
) {
    if seen.insert(node.id.clone(), ()).is_some() {
        return;
    }
    projection.nodes.push(ProjectedNode {
        node: node.clone(),
        path: path.to_string(),
        parent: None,
        parent_property: None,
    });
}

fn admit_subtree(
    projection: &mut Projection,
    seen: &mut HashMap<NodeId, ()>,
    root: &NodeRef,
    parent: Option<&NodeId>,
    root_property: &str,
) {
    struct Admit<'a> {
        projection: &'a mut Projection,
        seen: &'a mut HashMap<NodeId, ()>,
        root_parent: Option<NodeId>,
        root_property: &'a str,
    }
    impl Visitor for Admit<'_> {
        fn enter_node(&mut self, node: &NodeRef, cx: &VisitContext<'_>) -> Flow {
            if self.seen.insert(node.id.clone(), ()).is_some() {
                return Flow::Skip;
            }
            let parent = cx
                .parent
                .map(|p| p.id.clone())
                .or_else(|| self.root_parent.clone());
            let parent_property = cx
                .path
                .iter()
                .rev()
                .find_map(|seg| match seg {
                    crate::ir::traverse::PathSeg::Key(k) => Some(k.clone()),
                    _ => None,
                })
                .or_else(|| Some(self.root_property.to_string()));
            self.projection.nodes.push(ProjectedNode {
                node: node.clone(),
                path: cx.path_string(),
                parent,
                parent_property,
            });
            Flow::Continue
        }
    }
    let mut admit = Admit {
        projection,
        seen,
        root_parent: parent.cloned(),
        root_property,
    };
    Traverser::new().walk(root, &mut admit);
}

// =============================================================================
// FIELD DISCOVERY & STRIPPING
// =============================================================================

/// Field blocks anywhere under a block, including ones buried in freeform
/// properties (a radio option's reveal, say).
fn find_fields(block: &NodeRef) -> Vec<NodeRef> {
    struct Fields(Vec<NodeRef>);
    impl Visitor for Fields {
        fn enter_node(&mut self, node: &NodeRef, _cx: &VisitContext<'_>) -> Flow {
            if matches!(node.kind, NodeKind::Field(_)) {
                self.0.push(node.clone());
            }
            Flow::Continue
        }
    }
    let mut fields = Fields(Vec::new());
    Traverser::new().walk(block, &mut fields);
    fields.0
}

/// A non-current field keeps only what validation needs: code, validate,
/// dependent. Rendering properties are dropped from the projection.
fn strip_field(field: &NodeRef) -> NodeRef {
    let NodeKind::Field(def) = &field.kind else {
        return field.clone();
    };
    Arc::new(Node {
        id: field.id.clone(),
        raw: None,
        kind: NodeKind::Field(FieldBlockDef {
            variant: def.variant.clone(),
            code: def.code.clone(),
            label: None,
            validate: def.validate.clone(),
            dependent: def.dependent.clone(),
            formatters: None,
            format_pipeline: None,
            default_value: None,
            sanitize: def.sanitize,
            properties: BTreeMap::new(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::parse;

    fn two_step_journey() -> NodeRef {
        let (root, _) = parse::parse_value(&json!({
            "type": "journey",
            "path": "/apply",
            "onLoad": {"type": "load", "effects": []},
            "steps": [
                {
                    "type": "step",
                    "path": "/name",
                    "blocks": [
                        {"type": "field", "variant": "text", "code": "name",
                         "label": "Your name",
                         "validate": [{"type": "validation",
                             "when": {"type": "function", "kind": "CONDITION",
                                      "name": "Missing", "arguments": []},
                             "message": "Enter your name"}]}
                    ],
                    "onSubmission": {"type": "submit"}
                },
                {
                    "type": "step",
                    "path": "/town",
                    "blocks": [
                        {"type": "block", "variant": "radios",
                         "items": [{"reveal": {"type": "field", "variant": "text",
                                               "code": "district",
                                               "label": "District",
                                               "hint": "rendered only"}}]}
                    ]
                }
            ]
        }))
        .unwrap();
        root
    }

    fn step_id(journey: &NodeRef, path: &str) -> NodeId {
        steps_of(journey)
            .iter()
            .find(|s| matches!(&s.kind, NodeKind::Step(d) if d.path == path))
            .map(|s| s.id.clone())
            .unwrap()
    }

    #[test]
    fn current_step_subtree_is_complete() {
        let journey = two_step_journey();
        let id = step_id(&journey, "/name");
        let projection = project(&journey, &id).unwrap();
        let kinds: Vec<&str> = projection
            .nodes
            .iter()
            .map(|p| p.node.node_kind())
            .collect();
        assert!(kinds.contains(&"journey"));
        assert!(kinds.contains(&"step"));
        assert!(kinds.contains(&"field"));
        assert!(kinds.contains(&"validation"));
        assert!(kinds.contains(&"submit"));
        assert!(!projection.current_subtree.is_empty());
    }

    #[test]
    fn non_current_fields_are_stripped_and_discovered_recursively() {
        let journey = two_step_journey();
        let id = step_id(&journey, "/name");
        let projection = project(&journey, &id).unwrap();

        // The /town radios host block is not admitted, but the field nested
        // in its reveal is, stripped to validation shape.
        let blocks: Vec<_> = projection
            .nodes
            .iter()
            .filter(|p| p.node.node_kind() == "block")
            .collect();
        assert!(blocks.is_empty());

        let district = projection
            .nodes
            .iter()
            .find(|p| matches!(&p.node.kind, NodeKind::Field(f) if f.code == "district"))
            .expect("district field projected");
        let NodeKind::Field(def) = &district.node.kind else {
            unreachable!()
        };
        assert!(def.label.is_none());
        assert!(def.properties.is_empty());
    }

    #[test]
    fn projection_is_duplicate_free() {
        let journey = two_step_journey();
        let id = step_id(&journey, "/town");
        let projection = project(&journey, &id).unwrap();
        let mut ids: Vec<_> = projection.nodes.iter().map(|p| p.node.id.clone()).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(before, ids.len());
    }

    #[test]
    fn unknown_step_is_a_projection_error() {
        let journey = two_step_journey();
        let errors = project(&journey, &NodeId::from("c999")).unwrap_err();
        assert_eq!(errors[0].code, "J001");
    }
}
