//! Transition handlers: Load, Access, Action and Submit.

use async_trait::async_trait;
use serde_json::Value;

use crate::answers::MutationSource;
use crate::error::EngineError;
use crate::eval::Evaluator;
use crate::eval::context::{EvalContext, ValidationFinding};
use crate::eval::outcome::{EvalError, Evaluated};
use crate::ir::node::{NodeId, NodeKind, NodeRef, SubmitBranch};
use crate::registry::metadata::MetaKey;

use super::validation::nav_outcome_from;
use super::{NodeHandler, wrong_kind};

// =============================================================================
// LOAD / ACCESS / ACTION
// =============================================================================

/// Effect-running transitions. Effects run sequentially; the first error
/// stops the transition and becomes its result.
pub struct EffectTransitionHandler {
    node: NodeRef,
}

impl EffectTransitionHandler {
    pub fn new(node: NodeRef) -> Self {
        EffectTransitionHandler { node }
    }
}

#[async_trait]
impl NodeHandler for EffectTransitionHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn intrinsically_async(&self) -> bool {
        true
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let (when, effects, source) = match &self.node.kind {
            NodeKind::Load(def) => (None, &def.effects, MutationSource::Load),
            NodeKind::Access(def) => (None, &def.effects, MutationSource::Action),
            NodeKind::Action(def) => (def.when.as_ref(), &def.effects, MutationSource::Action),
            _ => return Err(wrong_kind(&self.node, "transition")),
        };

        if let Some(when) = when {
            let result = ev.invoke(&when.id, ctx).await?;
            if result.is_error() {
                return Ok(result);
            }
            if !result.truthy() {
                return Ok(Evaluated::undefined());
            }
        }

        let effect_ctx = ctx.with_answer_source(source);
        if let Some(failed) = run_effects(&effect_ctx, ev, &self.node.id, effects).await? {
            return Ok(failed);
        }
        Ok(Evaluated::value(Value::Null))
    }
}

/// Shared effect loop: sequential, stop on first error.
async fn run_effects(
    ctx: &EvalContext,
    ev: &Evaluator,
    transition_id: &NodeId,
    effects: &[NodeRef],
) -> Result<Option<Evaluated>, EngineError> {
    for effect in effects {
        let result = ev.invoke(&effect.id, ctx).await?;
        if let Some(cause) = result.error {
            return Ok(Some(Evaluated::error(
                EvalError::evaluation_failed(transition_id, "Transition effect failed")
                    .with_cause(cause),
            )));
        }
    }
    Ok(None)
}

// =============================================================================
// SUBMIT
// =============================================================================

/// Submission: optionally validates the current step's visible fields,
/// routes to the matching branch, and resolves a navigation outcome.
pub struct SubmitHandler {
    node: NodeRef,
}

impl SubmitHandler {
    pub fn new(node: NodeRef) -> Self {
        SubmitHandler { node }
    }
}

#[async_trait]
impl NodeHandler for SubmitHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn intrinsically_async(&self) -> bool {
        true
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let NodeKind::Submit(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "submit"));
        };

        if let Some(when) = &def.when {
            let result = ev.invoke(&when.id, ctx).await?;
            if result.is_error() {
                return Ok(result);
            }
            if !result.truthy() {
                return Ok(Evaluated::undefined());
            }
        }

        let findings = if def.validate {
            validate_visible_fields(ctx, ev).await?
        } else {
            vec![]
        };
        let valid = findings.is_empty();
        ctx.state().record_findings(findings);

        let branch = if valid { &def.on_valid } else { &def.on_invalid };
        let Some(branch) = branch else {
            return Ok(Evaluated::value(Value::Null));
        };
        self.run_branch(ctx, ev, branch).await
    }
}

impl SubmitHandler {
    async fn run_branch(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
        branch: &SubmitBranch,
    ) -> Result<Evaluated, EngineError> {
        if let Some(failed) = run_effects(ctx, ev, &self.node.id, &branch.effects).await? {
            return Ok(failed);
        }

        // First navigation candidate that resolves wins.
        for next in &branch.next {
            let result = ev.invoke(&next.id, ctx).await?;
            if result.is_error() {
                return Ok(result);
            }
            let Some(value) = &result.value else {
                continue;
            };
            if let Some(outcome) = nav_outcome_from(value) {
                ctx.state().set_outcome(outcome);
                return Ok(result);
            }
        }
        Ok(Evaluated::value(Value::Null))
    }
}

// =============================================================================
// VALIDATION SWEEP
// =============================================================================

/// Evaluate every validation of the current step's visible fields.
async fn validate_visible_fields(
    ctx: &EvalContext,
    ev: &Evaluator,
) -> Result<Vec<ValidationFinding>, EngineError> {
    let mut findings = Vec::new();

    for field_id in ctx.field_ids() {
        if !ctx.metadata_flag(&field_id, MetaKey::IsDescendantOfStep) {
            continue;
        }
        let Some(node) = ctx.node(&field_id) else {
            continue;
        };
        let NodeKind::Field(def) = &node.kind else {
            continue;
        };

        let visible = match &def.dependent {
            Some(dependent) => {
                let result = ev.invoke(&dependent.id, ctx).await?;
                result.is_error() || result.truthy()
            }
            None => true,
        };
        if !visible {
            continue;
        }

        for validation in &def.validate {
            let result = ev.invoke(&validation.id, ctx).await?;
            if result.is_error() {
                continue;
            }
            let Some(value) = &result.value else {
                continue;
            };
            let passed = value
                .get("passed")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if !passed {
                findings.push(ValidationFinding {
                    field_code: def.code.clone(),
                    message: value.get("message").cloned().unwrap_or(Value::Null),
                });
            }
        }
    }

    Ok(findings)
}
