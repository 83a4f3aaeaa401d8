//! Pseudo-node handlers: the readers for request, session and answer state.
//!
//! AnswerLocal is the intricate one: it owns the per-field mutation
//! sequence on POST (action precedence, sanitization, format pipeline,
//! dependent clearing) and the default path on GET.

use async_trait::async_trait;
use serde_json::Value;

use crate::answers::{MutationSource, contains_unescaped, is_safe_key, sanitize};
use crate::error::EngineError;
use crate::eval::Evaluator;
use crate::eval::context::{EvalContext, Method, value_frame};
use crate::eval::outcome::{EvalError, Evaluated};
use crate::ir::node::{FieldBlockDef, NodeId, NodeKind, NodeRef, PseudoKind};

use super::{NodeHandler, eval_prop, wrong_kind};

pub struct PseudoHandler {
    node: NodeRef,
}

impl PseudoHandler {
    pub fn new(node: NodeRef) -> Self {
        PseudoHandler { node }
    }

    fn guard_key(&self, key: &str) -> Option<Evaluated> {
        if is_safe_key(key) {
            None
        } else {
            Some(Evaluated::error(EvalError::security_violation(
                &self.node.id,
                format!("Unsafe property key '{key}'"),
            )))
        }
    }
}

#[async_trait]
impl NodeHandler for PseudoHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        match &self.node.kind {
            NodeKind::Post(def) => {
                if let Some(err) = self.guard_key(&def.base_field_code) {
                    return Ok(err);
                }
                Ok(match ctx.request().post.get(&def.base_field_code) {
                    Some(value) => Evaluated::value(value.clone()),
                    None => Evaluated::undefined(),
                })
            }
            NodeKind::Query(def) => {
                if let Some(err) = self.guard_key(&def.param_name) {
                    return Ok(err);
                }
                Ok(match ctx.request().query.get(&def.param_name) {
                    Some(value) => Evaluated::value(value.clone()),
                    None => Evaluated::undefined(),
                })
            }
            NodeKind::Params(def) => {
                if let Some(err) = self.guard_key(&def.param_name) {
                    return Ok(err);
                }
                Ok(match ctx.request().params.get(&def.param_name) {
                    Some(value) => Evaluated::value(value.clone()),
                    None => Evaluated::undefined(),
                })
            }
            NodeKind::Data(def) => {
                if let Some(err) = self.guard_key(&def.base_property) {
                    return Ok(err);
                }
                Ok(match ctx.state().data.lock().get(&def.base_property) {
                    Some(value) => Evaluated::value(value.clone()),
                    None => Evaluated::undefined(),
                })
            }
            NodeKind::AnswerRemote(def) => {
                if let Some(err) = self.guard_key(&def.base_field_code) {
                    return Ok(err);
                }
                Ok(match ctx.state().answer(&def.base_field_code) {
                    Some(history) => Evaluated::value(history.current),
                    None => Evaluated::undefined(),
                })
            }
            NodeKind::AnswerLocal(def) => {
                if let Some(err) = self.guard_key(&def.base_field_code) {
                    return Ok(err);
                }
                let Some(field) = ctx.node(&def.field_node_id) else {
                    return Ok(Evaluated::error(EvalError::lookup_failed(
                        &self.node.id,
                        format!(
                            "No field node '{}' for answer '{}'",
                            def.field_node_id, def.base_field_code
                        ),
                    )));
                };
                let NodeKind::Field(field_def) = &field.kind else {
                    return Ok(Evaluated::error(EvalError::lookup_failed(
                        &self.node.id,
                        format!("Node '{}' is not a field block", def.field_node_id),
                    )));
                };
                match ctx.request().method {
                    Method::Post => {
                        self.answer_on_post(ctx, ev, &def.base_field_code, field_def)
                            .await
                    }
                    Method::Get => {
                        self.answer_on_get(ctx, ev, &def.base_field_code, field_def)
                            .await
                    }
                }
            }
            _ => Err(wrong_kind(&self.node, "pseudo")),
        }
    }
}

impl PseudoHandler {
    /// POST path of the AnswerLocal state machine.
    async fn answer_on_post(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
        code: &str,
        field: &FieldBlockDef,
    ) -> Result<Evaluated, EngineError> {
        let state = ctx.state();

        // 1. An action effect already wrote this answer: it wins over the
        //    POST body, and the Post reader is never consulted.
        if let Some(history) = state.answer(code)
            && history.latest_source() == Some(MutationSource::Action)
        {
            return Ok(Evaluated::value(history.current));
        }

        // 2. Read the submitted value.
        let posted = match ctx.pseudo(PseudoKind::Post, code) {
            Some(post) => {
                let result = ev.invoke(&post.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
                result.value_or_null()
            }
            None => Value::Null,
        };
        state.push_answer(code, posted.clone(), MutationSource::Post);
        let mut current = posted;

        // 3. Sanitize markup-sensitive strings unless the field opted out.
        if let Value::String(s) = &current
            && field.sanitize_enabled()
            && contains_unescaped(s)
        {
            current = Value::String(sanitize(s));
            state.push_answer(code, current.clone(), MutationSource::Sanitized);
        }

        // 4. Run the submission-time format pipeline over the value.
        if let Some(pipeline) = &field.format_pipeline {
            let scoped = ctx.with_frame(value_frame(current.clone()));
            let result = ev.invoke(&pipeline.id, &scoped).await?;
            if !result.is_error()
                && let Some(processed) = result.value
            {
                current = processed;
                state.push_answer(code, current.clone(), MutationSource::Processed);
            }
            // Errors and undefined results keep the previous value.
        }

        // 5. A failing dependent clears the answer; evaluation errors fail
        //    open and keep it.
        if let Some(dependent) = &field.dependent {
            let result = ev.invoke(&dependent.id, ctx).await?;
            if !result.is_error() && !result.truthy() {
                current = Value::Null;
                state.push_answer(code, Value::Null, MutationSource::Dependent);
            }
        }

        Ok(Evaluated::value(current))
    }

    /// GET path: preloaded answers are left alone, otherwise the default
    /// applies.
    async fn answer_on_get(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
        code: &str,
        field: &FieldBlockDef,
    ) -> Result<Evaluated, EngineError> {
        let state = ctx.state();

        if let Some(history) = state.answer(code)
            && !history.is_empty()
        {
            return Ok(Evaluated::value(history.current));
        }

        match &field.default_value {
            Some(default) => {
                let result = eval_prop(ctx, ev, default).await?;
                let value = match (&result.error, result.value) {
                    (None, Some(v)) => v,
                    _ => Value::Null,
                };
                state.push_answer(code, value.clone(), MutationSource::Default);
                Ok(Evaluated::value(value))
            }
            None => {
                state.push_answer(code, Value::Null, MutationSource::Default);
                Ok(Evaluated::value(Value::Null))
            }
        }
    }
}
