//! Iterate handler: instantiates runtime nodes per collection item.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::EngineError;
use crate::eval::Evaluator;
use crate::eval::context::{EvalContext, item_frame};
use crate::eval::outcome::{EvalError, Evaluated};
use crate::ir::node::{Node, NodeId, NodeKind, NodeRef};
use crate::parse::NodeFactory;

use super::{NodeHandler, eval_prop, wrong_kind};

/// Evaluates the collection, instantiates the declarative templates once
/// per non-null item through the runtime node-creation hooks, and
/// evaluates each instance under `{@value: item, @index: i}`.
pub struct IterateHandler {
    node: NodeRef,
}

impl IterateHandler {
    pub fn new(node: NodeRef) -> Self {
        IterateHandler { node }
    }
}

#[async_trait]
impl NodeHandler for IterateHandler {
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
        let NodeKind::Iterate(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "iterate"));
        };

        let collection = ev.invoke(&def.collection.id, ctx).await?;
        if collection.is_error() {
            return Ok(collection);
        }
        let items = match collection.value {
            Some(Value::Array(items)) => items,
            other => {
                return Ok(Evaluated::error(EvalError::type_mismatch(
                    &self.node.id,
                    format!(
                        "Iterate needs an array collection, got {}",
                        match &other {
                            None => "undefined".to_string(),
                            Some(v) => value_kind(v).to_string(),
                        }
                    ),
                )));
            }
        };

        if items.is_empty() {
            return match &def.fallback {
                Some(fallback) => eval_prop(ctx, ev, fallback).await,
                None => Ok(Evaluated::value(Value::Array(vec![]))),
            };
        }

        // Instantiate every template for every non-null item, resolving
        // dynamic field codes under the item scope first.
        let factory = NodeFactory::runtime_space(ctx.shared.artifact.ids.clone());
        let mut roots: Vec<Node> = Vec::new();
        let mut item_indices: Vec<usize> = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if item.is_null() {
                continue;
            }
            let scoped = ctx.with_frame(item_frame(item.clone(), index));
            for template in &def.template {
                let patched =
                    match patch_codes(template, &scoped, ev, &factory, &self.node.id).await? {
                        Ok(v) => v,
                        Err(failed) => return Ok(failed),
                    };
                match factory.create_node(&patched) {
                    Ok(node) => {
                        roots.push(node);
                        item_indices.push(index);
                    }
                    Err(e) => {
                        return Ok(Evaluated::error(EvalError::evaluation_failed(
                            &self.node.id,
                            format!("Template instantiation failed: {e}"),
                        )));
                    }
                }
            }
        }

        // One batch registration runs the compile pipeline over the new
        // subtrees and invalidates stale caches.
        let root_ids = match ctx.shared.runtime.register_batch(
            roots,
            &self.node.id,
            &ctx.shared.artifact,
            &ctx.shared.functions,
            ctx.state(),
        ) {
            Ok(ids) => ids,
            Err(error) => return Ok(Evaluated::error(error)),
        };

        // Items evaluate sequentially: each needs its own scope frame.
        let mut rendered = Vec::with_capacity(root_ids.len());
        for (root_id, &index) in root_ids.iter().zip(&item_indices) {
            let scoped = ctx.with_frame(item_frame(items[index].clone(), index));
            let result = ev.invoke(root_id, &scoped).await?;
            if result.is_error() {
                return Ok(result);
            }
            rendered.push(result.value_or_null());
        }

        Ok(Evaluated::value(Value::Array(rendered)))
    }
}

/// Replace dynamic field `code` expressions in a template with their
/// evaluated strings. The expression subtree is registered detached so the
/// normal invoke path can evaluate it.
fn patch_codes<'a>(
    template: &'a Value,
    scoped: &'a EvalContext,
    ev: &'a Evaluator,
    factory: &'a NodeFactory,
    iterate_id: &'a NodeId,
) -> BoxFuture<'a, Result<Result<Value, Evaluated>, EngineError>> {
    async move {
        match template {
            Value::Object(map) => {
                let is_field = map.get("type").and_then(Value::as_str) == Some("field");
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    if is_field && key == "code" && value.is_object() {
                        let code_node = match factory.create_node(value) {
                            Ok(node) => node,
                            Err(e) => {
                                return Ok(Err(Evaluated::error(EvalError::evaluation_failed(
                                    iterate_id,
                                    format!("Dynamic field code failed to parse: {e}"),
                                ))));
                            }
                        };
                        let registered = scoped
                            .shared
                            .runtime
                            .register_detached(code_node, &scoped.shared.functions)?;
                        let result = ev.invoke(&registered.id, scoped).await?;
                        match (&result.error, &result.value) {
                            (None, Some(Value::String(code))) => {
                                out.insert(key.clone(), Value::String(code.clone()));
                            }
                            (Some(err), _) => return Ok(Err(Evaluated::error(err.clone()))),
                            _ => {
                                return Ok(Err(Evaluated::error(EvalError::type_mismatch(
                                    iterate_id,
                                    "Dynamic field code must evaluate to a string",
                                ))));
                            }
                        }
                        continue;
                    }
                    match patch_codes(value, scoped, ev, factory, iterate_id).await? {
                        Ok(patched) => {
                            out.insert(key.clone(), patched);
                        }
                        Err(failed) => return Ok(Err(failed)),
                    }
                }
                Ok(Ok(Value::Object(out)))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match patch_codes(item, scoped, ev, factory, iterate_id).await? {
                        Ok(patched) => out.push(patched),
                        Err(failed) => return Ok(Err(failed)),
                    }
                }
                Ok(Ok(Value::Array(out)))
            }
            scalar => Ok(Ok(scalar.clone())),
        }
    }
    .boxed()
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
