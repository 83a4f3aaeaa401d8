//! Structural handlers: Journey, Step, Block and Field rendering.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{Map, Value, json};

use crate::error::EngineError;
use crate::eval::Evaluator;
use crate::eval::context::{EvalContext, Method};
use crate::eval::outcome::Evaluated;
use crate::ir::node::{NodeId, NodeKind, NodeRef, PropValue};
use crate::registry::metadata::MetaKey;

use super::{NodeHandler, eval_prop, wrong_kind};

// =============================================================================
// JOURNEY
// =============================================================================

/// The evaluation entry point. Runs its own onLoad/onAccess transitions,
/// then descends towards the current step through the ancestor chain.
pub struct JourneyHandler {
    node: NodeRef,
}

impl JourneyHandler {
    pub fn new(node: NodeRef) -> Self {
        JourneyHandler { node }
    }
}

#[async_trait]
impl NodeHandler for JourneyHandler {
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
        let NodeKind::Journey(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "journey"));
        };

        for transition in def.on_load.iter().chain(def.on_access.iter()) {
            let result = ev.invoke(&transition.id, ctx).await?;
            if result.is_error() {
                return Ok(result);
            }
        }

        // Descend into whichever child leads to the step being evaluated:
        // a nested journey on the ancestor chain, or the step itself.
        let mut inner = Value::Null;
        for child in def.children.iter() {
            if ctx.metadata_flag(&child.id, MetaKey::IsAncestorOfStep) {
                let result = ev.invoke(&child.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
                inner = result.value_or_null();
            }
        }
        for step in def.steps.iter() {
            if ctx.metadata_flag(&step.id, MetaKey::IsCurrentStep) {
                let result = ev.invoke(&step.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
                inner = result.value_or_null();
            }
        }

        Ok(Evaluated::value(json!({
            "id": self.node.id,
            "type": "journey",
            "path": def.path,
            "title": def.title,
            "view": def.view,
            "step": inner,
        })))
    }
}

// =============================================================================
// STEP
// =============================================================================

/// Renders the current step: transitions in request order, then the block
/// view models, then (on POST) the submission transitions.
pub struct StepHandler {
    node: NodeRef,
}

impl StepHandler {
    pub fn new(node: NodeRef) -> Self {
        StepHandler { node }
    }
}

#[async_trait]
impl NodeHandler for StepHandler {
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
        let NodeKind::Step(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "step"));
        };

        for transition in def.on_load.iter().chain(def.on_access.iter()) {
            let result = ev.invoke(&transition.id, ctx).await?;
            if result.is_error() {
                return Ok(result);
            }
        }

        // Action effects run before any block evaluation so their answer
        // writes precede POST processing.
        if ctx.request().method == Method::Post {
            for transition in def.on_action.iter() {
                let result = ev.invoke(&transition.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
            }
        }

        let results =
            try_join_all(def.blocks.iter().map(|block| ev.invoke(&block.id, ctx))).await?;
        if let Some(err) = results.iter().find_map(|r| r.error.clone()) {
            return Ok(Evaluated::error(err));
        }
        let blocks: Vec<Value> = results.into_iter().map(|r| r.value_or_null()).collect();

        if ctx.request().method == Method::Post {
            for transition in def.on_submission.iter() {
                let result = ev.invoke(&transition.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
            }
        }

        Ok(Evaluated::value(json!({
            "id": self.node.id,
            "type": "step",
            "path": def.path,
            "title": def.title,
            "view": def.view,
            "blocks": blocks,
        })))
    }
}

// =============================================================================
// BASIC BLOCK
// =============================================================================

/// Produces `{id, type, variant, blockType, properties}` with every
/// property evaluated; properties fan out in parallel.
pub struct BlockHandler {
    node: NodeRef,
}

impl BlockHandler {
    pub fn new(node: NodeRef) -> Self {
        BlockHandler { node }
    }
}

#[async_trait]
impl NodeHandler for BlockHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let NodeKind::Block(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "block"));
        };

        let keys: Vec<&String> = def.properties.keys().collect();
        let results = try_join_all(
            def.properties
                .values()
                .map(|value| eval_prop(ctx, ev, value)),
        )
        .await?;
        if let Some(err) = results.iter().find_map(|r| r.error.clone()) {
            return Ok(Evaluated::error(err));
        }

        let mut properties = Map::new();
        for (key, result) in keys.into_iter().zip(results) {
            properties.insert(key.clone(), result.value_or_null());
        }

        Ok(Evaluated::value(json!({
            "id": self.node.id,
            "type": "block",
            "variant": def.variant,
            "blockType": "basic",
            "properties": Value::Object(properties),
        })))
    }
}

// =============================================================================
// FIELD BLOCK
// =============================================================================

/// Field rendering: resolves the answer value through the AnswerLocal
/// pseudo-node (which owns POST processing), honours `dependent`, and
/// passes `formatters` through untouched.
pub struct FieldHandler {
    node: NodeRef,
}

impl FieldHandler {
    pub fn new(node: NodeRef) -> Self {
        FieldHandler { node }
    }
}

#[async_trait]
impl NodeHandler for FieldHandler {
    fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    async fn evaluate(
        &self,
        ctx: &EvalContext,
        ev: &Evaluator,
    ) -> Result<Evaluated, EngineError> {
        let NodeKind::Field(def) = &self.node.kind else {
            return Err(wrong_kind(&self.node, "field"));
        };

        // The answer value first: rendering a field drives its POST state
        // machine even when nothing else reads it.
        let value = match ctx.answer_pseudo(&def.code) {
            Some(pseudo) => {
                let result = ev.invoke(&pseudo.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
                result.value_or_null()
            }
            None => ctx
                .state()
                .answer(&def.code)
                .map(|h| h.current)
                .unwrap_or(Value::Null),
        };

        let visible = match &def.dependent {
            Some(dependent) => {
                let result = ev.invoke(&dependent.id, ctx).await?;
                // Evaluation errors fail open.
                result.is_error() || result.truthy()
            }
            None => true,
        };

        let mut properties = Map::new();
        properties.insert("code".into(), Value::String(def.code.clone()));
        properties.insert("value".into(), value);

        if let Some(label) = &def.label {
            let result = eval_prop(ctx, ev, label).await?;
            if result.is_error() {
                return Ok(result);
            }
            properties.insert("label".into(), result.value_or_null());
        }

        // A hidden field keeps its other properties but loses validation.
        let mut validations = Vec::new();
        if visible {
            for validation in &def.validate {
                let result = ev.invoke(&validation.id, ctx).await?;
                if result.is_error() {
                    return Ok(result);
                }
                validations.push(result.value_or_null());
            }
        }
        properties.insert("validate".into(), Value::Array(validations));
        if def.dependent.is_some() {
            properties.insert("dependent".into(), Value::Bool(visible));
        }
        if let Some(formatters) = &def.formatters {
            properties.insert("formatters".into(), formatters.clone());
        }

        for (key, prop) in &def.properties {
            let result = eval_prop(ctx, ev, prop).await?;
            if result.is_error() {
                return Ok(result);
            }
            properties.insert(key.clone(), result.value_or_null());
        }

        Ok(Evaluated::value(json!({
            "id": self.node.id,
            "type": "field",
            "variant": def.variant,
            "blockType": "field",
            "properties": Value::Object(properties),
        })))
    }
}
