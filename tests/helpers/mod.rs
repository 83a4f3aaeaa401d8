#![allow(dead_code)]

//! Shared journey builders and a canonical function registry for the
//! integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Value, json};

use formflow::compile::{CompiledJourney, compile_journey};
use formflow::eval::context::{EvalContext, RequestInput};
use formflow::eval::{Evaluation, Evaluator, create_context};
use formflow::registry::functions::{self, FunctionRegistry};

// =============================================================================
// DECLARATIVE BUILDERS
// =============================================================================

pub fn journey(path: &str, steps: Vec<Value>) -> Value {
    json!({"type": "journey", "path": path, "steps": steps})
}

pub fn step(path: &str, blocks: Vec<Value>) -> Value {
    json!({"type": "step", "path": path, "blocks": blocks})
}

pub fn text_field(code: &str) -> Value {
    json!({"type": "field", "variant": "text", "code": code})
}

pub fn reference(path: &[&str]) -> Value {
    json!({"type": "reference", "path": path})
}

pub fn format(template: &str, args: Vec<Value>) -> Value {
    json!({"type": "format", "template": template, "args": args})
}

pub fn pipeline(steps: Vec<Value>) -> Value {
    json!({"type": "pipeline", "steps": steps})
}

pub fn test_predicate(subject: Value, condition: Value) -> Value {
    json!({"type": "test", "subject": subject, "condition": condition})
}

pub fn negated_test(subject: Value, condition: Value) -> Value {
    json!({"type": "test", "subject": subject, "condition": condition, "negate": true})
}

pub fn validation(when: Value, message: &str) -> Value {
    json!({"type": "validation", "when": when, "message": message})
}

pub fn condition_fn(name: &str, args: Vec<Value>) -> Value {
    json!({"type": "function", "kind": "CONDITION", "name": name, "arguments": args})
}

pub fn transformer_fn(name: &str) -> Value {
    json!({"type": "function", "kind": "TRANSFORMER", "name": name, "arguments": []})
}

pub fn effect_fn(name: &str, args: Vec<Value>) -> Value {
    json!({"type": "function", "kind": "EFFECT", "name": name, "arguments": args})
}

// =============================================================================
// CANONICAL FUNCTION REGISTRY
// =============================================================================

/// Registers the small catalogue the tests use: string transformers,
/// comparison conditions and state-writing effects.
pub fn standard_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();

    let (_, trim) = functions::transformer("Trim", |args| {
        Ok(match args.first() {
            Some(Value::String(s)) => Value::String(s.trim().to_string()),
            other => other.cloned().unwrap_or(Value::Null),
        })
    });
    registry.register(trim);

    let (_, to_lower) = functions::transformer("ToLower", |args| {
        Ok(match args.first() {
            Some(Value::String(s)) => Value::String(s.to_lowercase()),
            other => other.cloned().unwrap_or(Value::Null),
        })
    });
    registry.register(to_lower);

    let (_, equals) = functions::condition("Equals", |args| {
        Ok(Value::Bool(args.first() == args.get(1)))
    });
    registry.register(equals);

    let (_, present) = functions::condition("Present", |args| {
        Ok(Value::Bool(match args.first() {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }))
    });
    registry.register(present);

    let (_, set_answer) = functions::effect("SetAnswer", |ctx, args| {
        async move {
            let code = args
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| "SetAnswer needs a field code".to_string())?;
            ctx.set_answer(code, args.get(2).cloned().unwrap_or(Value::Null));
            Ok(Value::Null)
        }
        .boxed()
    });
    registry.register(set_answer);

    let (_, set_data) = functions::effect("SetData", |ctx, args| {
        async move {
            let key = args
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| "SetData needs a key".to_string())?;
            ctx.set_data(key, args.get(2).cloned().unwrap_or(Value::Null));
            Ok(Value::Null)
        }
        .boxed()
    });
    registry.register(set_data);

    let (_, explode) = functions::effect("Explode", |_ctx, _args| {
        async move { Err("deliberate failure".to_string()) }.boxed()
    });
    registry.register(explode);

    registry
}

// =============================================================================
// PIPELINE SHORTCUTS
// =============================================================================

pub fn compile(definition: &Value) -> CompiledJourney {
    compile_journey(definition, &standard_registry()).expect("journey compiles")
}

pub fn context_for(
    compiled: &CompiledJourney,
    step_path: &str,
    request: RequestInput,
) -> EvalContext {
    let artifact = compiled
        .artifact(step_path)
        .unwrap_or_else(|| panic!("no artefact for step '{step_path}'"));
    create_context(
        artifact,
        Arc::new(standard_registry()),
        request,
        Value::Null,
        BTreeMap::new(),
    )
}

/// Compile and evaluate one request against one step.
pub async fn run(definition: &Value, step_path: &str, request: RequestInput) -> Evaluation {
    let compiled = compile(definition);
    let ctx = context_for(&compiled, step_path, request);
    Evaluator::new()
        .evaluate(&ctx)
        .await
        .expect("evaluation completes")
}

pub fn post_body(pairs: &[(&str, Value)]) -> RequestInput {
    RequestInput::post(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

/// Dig into a JSON value by keys and indices, panicking with the path on a
/// miss.
pub fn dig<'a>(value: &'a Value, path: &[&str]) -> &'a Value {
    let mut current = value;
    for seg in path {
        current = match seg.parse::<usize>() {
            Ok(index) => current
                .get(index)
                .unwrap_or_else(|| panic!("no index {index} in {current}")),
            Err(_) => current
                .get(seg)
                .unwrap_or_else(|| panic!("no key '{seg}' in {current}")),
        };
    }
    current
}
