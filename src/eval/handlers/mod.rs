//! Thunk handlers: one executor per IR node.
//!
//! Handlers use the single-async model: every handler exposes one
//! `async fn evaluate`. The per-handler `is_async` flag is still computed
//! over the dependency graph (intrinsic suspension or any async
//! dependency) and exposed on the artefact, so hosts can reason about
//! which subtrees are synchronously evaluable.

pub mod expr;
pub mod function;
pub mod iterate;
pub mod predicate;
pub mod pseudo;
pub mod structural;
pub mod transition;
pub mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::EngineError;
use crate::ir::node::{Node, NodeId, NodeKind, NodeRef, PropValue};
use crate::registry::functions::FunctionRegistry;
use crate::registry::handlers::HandlerRegistry;
use crate::registry::nodes::NodeRegistry;

use super::Evaluator;
use super::context::EvalContext;
use super::outcome::Evaluated;

// =============================================================================
// HANDLER TRAIT
// =============================================================================

#[async_trait]
pub trait NodeHandler: Send + Sync {
    fn node_id(&self) -> &NodeId;

    /// True when the handler suspends regardless of its dependencies
    /// (effects, registry calls, runtime node creation).
    fn intrinsically_async(&self) -> bool {
        false
    }

    /// `is_async` from the flags of this handler's dependencies, called in
    /// topological order so every flag is already final.
    fn compute_is_async(&self, dep_flags: &[bool]) -> bool {
        self.intrinsically_async() || dep_flags.iter().any(|flag| *flag)
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError>;
}

// =============================================================================
// HANDLER FACTORY
// =============================================================================

/// Instantiate the handler for one node. The function registry is consulted
/// at compile time so function handlers know whether they suspend.
pub fn create_handler(node: &NodeRef, functions: &FunctionRegistry) -> Arc<dyn NodeHandler> {
    match &node.kind {
        NodeKind::Journey(_) => Arc::new(structural::JourneyHandler::new(node.clone())),
        NodeKind::Step(_) => Arc::new(structural::StepHandler::new(node.clone())),
        NodeKind::Block(_) => Arc::new(structural::BlockHandler::new(node.clone())),
        NodeKind::Field(_) => Arc::new(structural::FieldHandler::new(node.clone())),
        NodeKind::Reference(_) => Arc::new(expr::ReferenceHandler::new(node.clone())),
        NodeKind::Format(_) => Arc::new(expr::FormatHandler::new(node.clone())),
        NodeKind::Pipeline(_) => Arc::new(expr::PipelineHandler::new(node.clone())),
        NodeKind::Iterate(_) => Arc::new(iterate::IterateHandler::new(node.clone())),
        NodeKind::Validation(_) => Arc::new(validation::ValidationHandler::new(node.clone())),
        NodeKind::Next(_) => Arc::new(validation::NextHandler::new(node.clone())),
        NodeKind::Function(def) => {
            let entry_is_async = functions
                .get(&def.name)
                .map(|entry| entry.is_async)
                .unwrap_or(false);
            Arc::new(function::FunctionHandler::new(node.clone(), entry_is_async))
        }
        NodeKind::Test(_)
        | NodeKind::And(_)
        | NodeKind::Or(_)
        | NodeKind::Xor(_)
        | NodeKind::Not(_) => Arc::new(predicate::PredicateHandler::new(node.clone())),
        NodeKind::Load(_) | NodeKind::Access(_) | NodeKind::Action(_) => {
            Arc::new(transition::EffectTransitionHandler::new(node.clone()))
        }
        NodeKind::Submit(_) => Arc::new(transition::SubmitHandler::new(node.clone())),
        NodeKind::Redirect(_) | NodeKind::ThrowError(_) => {
            Arc::new(validation::OutcomeHandler::new(node.clone()))
        }
        NodeKind::SelfMarker => Arc::new(validation::OutcomeHandler::new(node.clone())),
        NodeKind::AnswerLocal(_)
        | NodeKind::AnswerRemote(_)
        | NodeKind::Post(_)
        | NodeKind::Query(_)
        | NodeKind::Params(_)
        | NodeKind::Data(_) => Arc::new(pseudo::PseudoHandler::new(node.clone())),
    }
}

/// Two-pass handler compilation: instantiate a handler per registered node,
/// then compute each handler's `is_async` in topological order.
pub fn compile_handlers(
    registry: &NodeRegistry,
    topo_order: &[NodeId],
    dependencies: impl Fn(&NodeId) -> Vec<NodeId>,
    base_flags: impl Fn(&NodeId) -> Option<bool>,
    functions: &FunctionRegistry,
) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    for (id, entry) in registry.iter() {
        handlers.insert(id.clone(), create_handler(&entry.node, functions));
    }

    for id in topo_order {
        let Some(entry) = handlers.get(id) else {
            continue;
        };
        let dep_flags: Vec<bool> = dependencies(id)
            .iter()
            .map(|dep| {
                handlers
                    .is_async(dep)
                    .or_else(|| base_flags(dep))
                    .unwrap_or(false)
            })
            .collect();
        let flag = entry.handler.compute_is_async(&dep_flags);
        handlers.set_is_async(id, flag);
    }

    handlers
}

// =============================================================================
// PROPERTY EVALUATION
// =============================================================================

/// Evaluate a property value: nodes are invoked, arrays and records are
/// evaluated element-wise, scalars pass through. The first in-band error
/// wins.
pub fn eval_prop<'a>(
    ctx: &'a EvalContext,
    ev: &'a Evaluator,
    value: &'a PropValue,
) -> BoxFuture<'a, Result<Evaluated, EngineError>> {
    async move {
        match value {
            PropValue::Node(node) => ev.invoke(&node.id, ctx).await,
            PropValue::Scalar(scalar) => Ok(Evaluated::value(scalar.clone())),
            PropValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let result = eval_prop(ctx, ev, item).await?;
                    if result.is_error() {
                        return Ok(result);
                    }
                    out.push(result.value_or_null());
                }
                Ok(Evaluated::value(serde_json::Value::Array(out)))
            }
            PropValue::Object(entries) => {
                let mut out = serde_json::Map::new();
                for (key, item) in entries {
                    let result = eval_prop(ctx, ev, item).await?;
                    if result.is_error() {
                        return Ok(result);
                    }
                    out.insert(key.clone(), result.value_or_null());
                }
                Ok(Evaluated::value(serde_json::Value::Object(out)))
            }
        }
    }
    .boxed()
}

/// The fatal error for a handler asked to evaluate a node kind it does not
/// own — a compile-pipeline bug, not a journey mistake.
pub fn wrong_kind(node: &Node, expected: &str) -> EngineError {
    EngineError::compile(
        "E002",
        format!(
            "Handler expected a {expected} node, found '{}'",
            node.node_kind()
        ),
        Some(node.id.clone()),
    )
}
