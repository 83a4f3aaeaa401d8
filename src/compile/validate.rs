//! Journey-level structural validation rules (V001–V005).

use std::collections::HashSet;

use crate::answers::is_safe_key;
use crate::error::EngineError;
use crate::ir::node::*;
use crate::ir::traverse::{Flow, Traverser, VisitContext, Visitor};

use super::relevant::steps_of;

/// Run all structural validation rules. Returns all errors found.
pub fn validate_structural(journey: &NodeRef) -> Vec<EngineError> {
    let mut errors = Vec::new();

    v001_journey_has_steps(journey, &mut errors);
    v002_step_paths_are_unique(journey, &mut errors);
    v003_field_codes_are_safe(journey, &mut errors);
    v004_field_codes_unique_within_step(journey, &mut errors);
    v005_formatters_exclusive_with_pipeline(journey, &mut errors);

    errors
}

fn v001_journey_has_steps(journey: &NodeRef, errors: &mut Vec<EngineError>) {
    if steps_of(journey).is_empty() {
        errors.push(EngineError::validate(
            "V001",
            "Journey declares no steps",
            Some(journey.id.clone()),
        ));
    }
}

fn v002_step_paths_are_unique(journey: &NodeRef, errors: &mut Vec<EngineError>) {
    let mut seen = HashSet::new();
    for step in steps_of(journey) {
        let NodeKind::Step(def) = &step.kind else {
            continue;
        };
        if def.path.is_empty() {
            errors.push(EngineError::validate(
                "V002",
                "Step has an empty path",
                Some(step.id.clone()),
            ));
            continue;
        }
        if !seen.insert(def.path.clone()) {
            errors.push(EngineError::validate(
                "V002",
                format!("Duplicate step path '{}'", def.path),
                Some(step.id.clone()),
            ));
        }
    }
}

fn for_each_field(journey: &NodeRef, mut f: impl FnMut(&NodeRef, &FieldBlockDef)) {
    struct Fields<'a>(&'a mut dyn FnMut(&NodeRef, &FieldBlockDef));
    impl Visitor for Fields<'_> {
        fn enter_node(&mut self, node: &NodeRef, _cx: &VisitContext<'_>) -> Flow {
            if let NodeKind::Field(def) = &node.kind {
                (self.0)(node, def);
            }
            Flow::Continue
        }
    }
    Traverser::new().walk(journey, &mut Fields(&mut f));
}

fn v003_field_codes_are_safe(journey: &NodeRef, errors: &mut Vec<EngineError>) {
    for_each_field(journey, |node, def| {
        if !is_safe_key(&def.code) {
            errors.push(EngineError::validate(
                "V003",
                format!("Field code '{}' is not a safe property key", def.code),
                Some(node.id.clone()),
            ));
        }
    });
}

fn v004_field_codes_unique_within_step(journey: &NodeRef, errors: &mut Vec<EngineError>) {
    for step in steps_of(journey) {
        let mut seen = HashSet::new();
        for_each_field(&step, |node, def| {
            if !seen.insert(def.code.clone()) {
                errors.push(EngineError::validate(
                    "V004",
                    format!("Duplicate field code '{}' within one step", def.code),
                    Some(node.id.clone()),
                ));
            }
        });
    }
}

/// `formatters` is a render-time passthrough, `formatPipeline` the
/// submission-time transform. Declaring both on one field is rejected.
fn v005_formatters_exclusive_with_pipeline(journey: &NodeRef, errors: &mut Vec<EngineError>) {
    for_each_field(journey, |node, def| {
        if def.formatters.is_some() && def.format_pipeline.is_some() {
            errors.push(EngineError::validate(
                "V005",
                format!(
                    "Field '{}' declares both 'formatters' and 'formatPipeline'",
                    def.code
                ),
                Some(node.id.clone()),
            ));
        }
    });
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::parse;

    fn journey(value: serde_json::Value) -> NodeRef {
        parse::parse_value(&value).unwrap().0
    }

    #[test]
    fn empty_journey_fails_v001() {
        let root = journey(json!({"type": "journey", "path": "/j", "steps": []}));
        let errors = validate_structural(&root);
        assert!(errors.iter().any(|e| e.code == "V001"));
    }

    #[test]
    fn duplicate_step_paths_fail_v002() {
        let root = journey(json!({
            "type": "journey", "path": "/j",
            "steps": [
                {"type": "step", "path": "/a", "blocks": []},
                {"type": "step", "path": "/a", "blocks": []}
            ]
        }));
        let errors = validate_structural(&root);
        assert!(errors.iter().any(|e| e.code == "V002"));
    }

    #[test]
    fn unsafe_field_code_fails_v003() {
        let root = journey(json!({
            "type": "journey", "path": "/j",
            "steps": [{"type": "step", "path": "/a", "blocks": [
                {"type": "field", "variant": "text", "code": "__proto__"}
            ]}]
        }));
        let errors = validate_structural(&root);
        assert!(errors.iter().any(|e| e.code == "V003"));
    }

    #[test]
    fn both_formatting_surfaces_fail_v005() {
        let root = journey(json!({
            "type": "journey", "path": "/j",
            "steps": [{"type": "step", "path": "/a", "blocks": [
                {"type": "field", "variant": "text", "code": "email",
                 "formatters": ["upper"],
                 "formatPipeline": {"type": "pipeline", "steps": []}}
            ]}]
        }));
        let errors = validate_structural(&root);
        assert!(errors.iter().any(|e| e.code == "V005"));
    }

    #[test]
    fn clean_journey_passes() {
        let root = journey(json!({
            "type": "journey", "path": "/j",
            "steps": [{"type": "step", "path": "/a", "blocks": [
                {"type": "field", "variant": "text", "code": "email"}
            ]}]
        }));
        assert!(validate_structural(&root).is_empty());
    }
}
