//! Predicate handlers: Test, And, Or, Xor, Not.
//!
//! Standard short-circuit semantics. Test pushes its subject as `@value`
//! while evaluating the condition, and collapses condition errors to
//! false; the combinators propagate operand errors.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineError;
use crate::eval::Evaluator;
use crate::eval::context::{EvalContext, value_frame};
use crate::eval::outcome::Evaluated;
use crate::ir::node::{NodeId, NodeKind, NodeRef};

use super::{NodeHandler, eval_prop, wrong_kind};

/// One handler covers all five predicate kinds; they share the operand
/// plumbing and differ only in combination logic.
pub struct PredicateHandler {
    node: NodeRef,
}

impl PredicateHandler {
    pub fn new(node: NodeRef) -> Self {
        PredicateHandler { node }
    }
}

#[async_trait]
impl NodeHandler for PredicateHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        match &self.node.kind {
            NodeKind::Test(def) => {
                // Subject errors resolve the test to false rather than
                // propagating; a broken lookup is a non-match.
                let subject = eval_prop(ctx, ev, &def.subject).await?;
                if subject.is_error() {
                    return Ok(Evaluated::value(Value::Bool(false)));
                }
                let scoped = ctx.with_frame(value_frame(subject.value_or_null()));
                let condition = ev.invoke(&def.condition.id, &scoped).await?;
                let holds = if condition.is_error() {
                    false
                } else {
                    condition.truthy()
                };
                Ok(Evaluated::value(Value::Bool(holds != def.negate)))
            }
            NodeKind::And(def) => {
                for operand in &def.operands {
                    let result = ev.invoke(&operand.id, ctx).await?;
                    if result.is_error() {
                        return Ok(result);
                    }
                    if !result.truthy() {
                        return Ok(Evaluated::value(Value::Bool(false)));
                    }
                }
                Ok(Evaluated::value(Value::Bool(true)))
            }
            NodeKind::Or(def) => {
                for operand in &def.operands {
                    let result = ev.invoke(&operand.id, ctx).await?;
                    if result.is_error() {
                        return Ok(result);
                    }
                    if result.truthy() {
                        return Ok(Evaluated::value(Value::Bool(true)));
                    }
                }
                Ok(Evaluated::value(Value::Bool(false)))
            }
            NodeKind::Xor(def) => {
                let mut truthy_count = 0usize;
                for operand in &def.operands {
                    let result = ev.invoke(&operand.id, ctx).await?;
                    if result.is_error() {
                        return Ok(result);
                    }
                    if result.truthy() {
                        truthy_count += 1;
                    }
                }
                Ok(Evaluated::value(Value::Bool(truthy_count == 1)))
            }
            NodeKind::Not(def) => {
                let result = ev.invoke(&def.operand.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
                Ok(Evaluated::value(Value::Bool(!result.truthy())))
            }
            _ => Err(wrong_kind(&self.node, "predicate")),
        }
    }
}
