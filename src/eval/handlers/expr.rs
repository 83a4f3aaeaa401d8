//! Expression handlers: Reference, Format, Pipeline.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;

use crate::answers::is_safe_key;
use crate::error::EngineError;
use crate::eval::Evaluator;
use crate::eval::context::{EvalContext, value_frame};
use crate::eval::outcome::{EvalError, Evaluated};
use crate::ir::node::{NodeId, NodeKind, NodeRef, PropValue};

use super::{NodeHandler, eval_prop, wrong_kind};

// =============================================================================
// REFERENCE
// =============================================================================

/// Splits on the first path segment: each namespace has its own resolution
/// path. `answers` consults the local pseudo-node first and falls back to
/// the global answer map.
pub struct ReferenceHandler {
    node: NodeRef,
}

impl ReferenceHandler {
    pub fn new(node: NodeRef) -> Self {
        ReferenceHandler { node }
    }
}

#[async_trait]
impl NodeHandler for ReferenceHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let NodeKind::Reference(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "reference"));
        };

        // Resolve dynamic segments first; a failing segment resolves the
        // whole reference to undefined.
        let mut segments: Vec<Value> = Vec::with_capacity(def.path.len());
        for seg in &def.path {
            match seg {
                PropValue::Scalar(v) => segments.push(v.clone()),
                other => {
                    let result = eval_prop(ctx, ev, other).await?;
                    match (&result.error, &result.value) {
                        (None, Some(v)) => segments.push(v.clone()),
                        _ => return Ok(Evaluated::undefined()),
                    }
                }
            }
        }

        let Some(namespace) = segments.first().and_then(Value::as_str).map(str::to_string)
        else {
            return Ok(Evaluated::undefined());
        };

        match namespace.as_str() {
            "@scope" => {
                let Some(key) = segments.get(1).and_then(Value::as_str) else {
                    return Ok(Evaluated::undefined());
                };
                let start = match ctx.scope_value(key) {
                    Some(v) => v.clone(),
                    None => return Ok(Evaluated::undefined()),
                };
                Ok(drill(start, &segments[2..]))
            }
            "answers" => self.resolve_keyed(ctx, ev, &segments, |ctx, base| {
                ctx.answer_pseudo(base)
            })
            .await,
            "data" => self.resolve_keyed(ctx, ev, &segments, |ctx, base| {
                ctx.pseudo(crate::ir::node::PseudoKind::Data, base)
            })
            .await,
            "query" => self.resolve_keyed(ctx, ev, &segments, |ctx, base| {
                ctx.pseudo(crate::ir::node::PseudoKind::Query, base)
            })
            .await,
            "params" => self.resolve_keyed(ctx, ev, &segments, |ctx, base| {
                ctx.pseudo(crate::ir::node::PseudoKind::Params, base)
            })
            .await,
            "post" => self.resolve_keyed(ctx, ev, &segments, |ctx, base| {
                ctx.pseudo(crate::ir::node::PseudoKind::Post, base)
            })
            .await,
            _ => Ok(Evaluated::undefined()),
        }
    }
}

impl ReferenceHandler {
    /// Shared resolution for keyed namespaces: pseudo-node when the step
    /// compiled one, direct request/state lookup otherwise.
    async fn resolve_keyed(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
        segments: &[Value],
        lookup: impl Fn(&EvalContext, &str) -> Option<NodeRef>,
    ) -> Result<Evaluated, EngineError> {
        let Some(base) = segments.get(1).and_then(Value::as_str) else {
            return Ok(Evaluated::undefined());
        };
        if !is_safe_key(base) {
            return Ok(Evaluated::error(EvalError::security_violation(
                &self.node.id,
                format!("Unsafe base key '{base}'"),
            )));
        }

        let namespace = segments[0].as_str().unwrap_or_default();
        let start = match lookup(ctx, base) {
            Some(pseudo) => {
                let result = ev.invoke(&pseudo.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
                match result.value {
                    Some(v) => v,
                    None => return Ok(Evaluated::undefined()),
                }
            }
            None => {
                let direct = match namespace {
                    "answers" => ctx.state().answer(base).map(|h| h.current),
                    "data" => ctx.state().data.lock().get(base).cloned(),
                    "query" => ctx.request().query.get(base).cloned(),
                    "params" => ctx.request().params.get(base).cloned(),
                    "post" => ctx.request().post.get(base).cloned(),
                    _ => None,
                };
                match direct {
                    Some(v) => v,
                    None => return Ok(Evaluated::undefined()),
                }
            }
        };
        Ok(drill(start, &segments[2..]))
    }
}

/// Walk the remaining segments into the value: object keys and array
/// indices. Anything missing resolves to undefined.
fn drill(start: Value, rest: &[Value]) -> Evaluated {
    let mut current = start;
    for seg in rest {
        let next = match (&current, seg) {
            (Value::Object(map), Value::String(key)) => match map.get(key) {
                Some(v) => v.clone(),
                None => return Evaluated::undefined(),
            },
            (Value::Array(items), seg) => {
                let index = seg
                    .as_u64()
                    .or_else(|| seg.as_str().and_then(|s| s.parse().ok()));
                match index.and_then(|i| items.get(i as usize)) {
                    Some(v) => v.clone(),
                    None => return Evaluated::undefined(),
                }
            }
            _ => return Evaluated::undefined(),
        };
        current = next;
    }
    Evaluated::value(current)
}

// =============================================================================
// FORMAT
// =============================================================================

/// Substitutes positional markers `%1..%n` into the template.
pub struct FormatHandler {
    node: NodeRef,
}

impl FormatHandler {
    pub fn new(node: NodeRef) -> Self {
        FormatHandler { node }
    }
}

#[async_trait]
impl NodeHandler for FormatHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let NodeKind::Format(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "format"));
        };

        let results = try_join_all(def.args.iter().map(|arg| eval_prop(ctx, ev, arg))).await?;
        if let Some(err) = results.iter().find_map(|r| r.error.clone()) {
            return Ok(Evaluated::error(err));
        }

        let mut rendered = def.template.clone();
        for (i, result) in results.iter().enumerate().rev() {
            let marker = format!("%{}", i + 1);
            rendered = rendered.replace(&marker, &display(result));
        }
        Ok(Evaluated::value(Value::String(rendered)))
    }
}

fn display(result: &Evaluated) -> String {
    match &result.value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Evaluates the input, then threads the value through each step under a
/// `@value` scope frame. Stops at the first step error.
pub struct PipelineHandler {
    node: NodeRef,
}

impl PipelineHandler {
    pub fn new(node: NodeRef) -> Self {
        PipelineHandler { node }
    }
}

#[async_trait]
impl NodeHandler for PipelineHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let NodeKind::Pipeline(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "pipeline"));
        };

        let mut current: Option<Value> = match &def.input {
            Some(input) => {
                let result = ev.invoke(&input.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
                result.value
            }
            None => None,
        };

        for step in &def.steps {
            let frame = value_frame(current.clone().unwrap_or(Value::Null));
            let scoped = ctx.with_frame(frame);
            let result = ev.invoke(&step.id, &scoped).await?;
            if result.is_error() {
                return Ok(result);
            }
            current = result.value;
        }

        Ok(match current {
            Some(value) => Evaluated::value(value),
            None => Evaluated::undefined(),
        })
    }
}
