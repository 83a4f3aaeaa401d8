//! Function handler: bridges IR function expressions to registry entries.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;

use crate::error::EngineError;
use crate::eval::Evaluator;
use crate::eval::context::EvalContext;
use crate::eval::outcome::{EvalError, Evaluated};
use crate::ir::node::{NodeId, NodeKind, NodeRef};
use crate::registry::functions::FunctionBody;

use super::{NodeHandler, eval_prop, wrong_kind};

pub struct FunctionHandler {
    node: NodeRef,
    /// Whether the registered function suspends; fixed at compile time.
    entry_is_async: bool,
}

impl FunctionHandler {
    pub fn new(node: NodeRef, entry_is_async: bool) -> Self {
        FunctionHandler {
            node,
            entry_is_async,
        }
    }
}

#[async_trait]
impl NodeHandler for FunctionHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    fn intrinsically_async(&self) -> bool {
        self.entry_is_async
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let NodeKind::Function(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "function"));
        };

        let Some(entry) = ctx.shared.functions.get(&def.name).cloned() else {
            return Ok(Evaluated::error(EvalError::lookup_failed(
                &self.node.id,
                format!("Unknown function '{}'", def.name),
            )));
        };

        // Arguments evaluate in parallel; the current scope's `@value` is
        // always the first argument.
        let results =
            try_join_all(def.arguments.iter().map(|arg| eval_prop(ctx, ev, arg))).await?;
        if let Some(err) = results.iter().find_map(|r| r.error.clone()) {
            return Ok(Evaluated::error(err));
        }

        let first = ctx
            .scope_value("@value")
            .cloned()
            .unwrap_or(Value::Null);
        let mut call_args = Vec::with_capacity(results.len() + 1);
        call_args.push(first);
        call_args.extend(results.into_iter().map(|r| r.value_or_null()));

        let outcome = match &entry.body {
            FunctionBody::Sync(f) => f(&call_args),
            FunctionBody::Async(f) => f(call_args).await,
            FunctionBody::Effect(f) => f(ctx.effect_context(), call_args).await,
        };

        match outcome {
            Ok(value) => Ok(Evaluated::value(value)),
            Err(message) => Ok(Evaluated::error(EvalError::evaluation_failed(
                &self.node.id,
                format!("Function '{}' failed: {message}", def.name),
            ))),
        }
    }
}
