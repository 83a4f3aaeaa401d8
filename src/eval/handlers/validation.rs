//! Validation, Next and outcome handlers.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::EngineError;
use crate::eval::Evaluator;
use crate::eval::context::EvalContext;
use crate::eval::outcome::Evaluated;
use crate::ir::node::{NodeId, NodeKind, NodeRef};

use super::{NodeHandler, eval_prop, wrong_kind};

// =============================================================================
// VALIDATION
// =============================================================================

/// `when` is the failure condition: truthy means the validation did not
/// pass. Yields `{passed, message}`.
pub struct ValidationHandler {
    node: NodeRef,
}

impl ValidationHandler {
    pub fn new(node: NodeRef) -> Self {
        ValidationHandler { node }
    }
}

#[async_trait]
impl NodeHandler for ValidationHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let NodeKind::Validation(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "validation"));
        };

        let when = ev.invoke(&def.when.id, ctx).await?;
        if when.is_error() {
            return Ok(when);
        }
        let message = eval_prop(ctx, ev, &def.message).await?;
        if message.is_error() {
            return Ok(message);
        }

        Ok(Evaluated::value(json!({
            "passed": !when.truthy(),
            "message": message.value_or_null(),
        })))
    }
}

// =============================================================================
// NEXT
// =============================================================================

/// A navigation candidate: undefined when its condition does not hold,
/// `{goto}` when it does.
pub struct NextHandler {
    node: NodeRef,
}

impl NextHandler {
    pub fn new(node: NodeRef) -> Self {
        NextHandler { node }
    }
}

#[async_trait]
impl NodeHandler for NextHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let NodeKind::Next(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "next"));
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

        let goto = eval_prop(ctx, ev, &def.goto).await?;
        if goto.is_error() {
            return Ok(goto);
        }
        Ok(Evaluated::value(json!({ "goto": goto.value_or_null() })))
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Redirect and ThrowError resolve unconditionally to their outcome shape.
pub struct OutcomeHandler {
    node: NodeRef,
}

impl OutcomeHandler {
    pub fn new(node: NodeRef) -> Self {
        OutcomeHandler { node }
    }
}

#[async_trait]
impl NodeHandler for OutcomeHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        match &self.node.kind {
            NodeKind::Redirect(def) => {
                let goto = eval_prop(ctx, ev, &def.goto).await?;
                if goto.is_error() {
                    return Ok(goto);
                }
                Ok(Evaluated::value(json!({ "goto": goto.value_or_null() })))
            }
            NodeKind::ThrowError(def) => {
                let message = eval_prop(ctx, ev, &def.message).await?;
                if message.is_error() {
                    return Ok(message);
                }
                Ok(Evaluated::value(json!({
                    "code": def.code,
                    "message": message.value_or_null(),
                })))
            }
            _ => Err(wrong_kind(&self.node, "outcome")),
        }
    }
}

/// Interpret a resolved navigation value: `{goto}` is a redirect,
/// `{code, message}` a thrown error.
pub fn nav_outcome_from(value: &Value) -> Option<crate::eval::context::NavOutcome> {
    let obj = value.as_object()?;
    if let Some(goto) = obj.get("goto").and_then(Value::as_str) {
        return Some(crate::eval::context::NavOutcome::Redirect {
            goto: goto.to_string(),
        });
    }
    if let Some(code) = obj.get("code").and_then(Value::as_str) {
        return Some(crate::eval::context::NavOutcome::ThrowError {
            code: code.to_string(),
            message: obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    None
}
