//! Function registry: the contract between the engine and the host's
//! catalogue of conditions, transformers, generators and effects.
//!
//! Each helper returns a pair: a *builder* that emits the declarative
//! `function` expression, and the *runtime entry* the function handler
//! invokes. The `*_with_deps` variants split entry construction so hosts
//! can inject collaborators at application wiring time.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::eval::context::EffectContext;
use crate::ir::node::FunctionKind;

/// Plain functions receive the current scope's `@value` as their first
/// argument, then the evaluated declarative arguments.
pub type PlainFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

pub type AsyncPlainFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Effects additionally receive the per-transition context.
pub type EffectFn =
    Arc<dyn Fn(EffectContext, Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

#[derive(Clone)]
pub enum FunctionBody {
    Sync(PlainFn),
    Async(AsyncPlainFn),
    Effect(EffectFn),
}

#[derive(Clone)]
pub struct FunctionEntry {
    pub name: String,
    pub kind: FunctionKind,
    pub is_async: bool,
    pub body: FunctionBody,
}

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: FunctionEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

/// Emits the declarative `function` expression for a registered function.
#[derive(Debug, Clone)]
pub struct FunctionBuilder {
    pub name: String,
    pub kind: FunctionKind,
}

impl FunctionBuilder {
    pub fn call(&self, arguments: Vec<Value>) -> Value {
        json!({
            "type": "function",
            "kind": kind_tag(self.kind),
            "name": self.name,
            "arguments": arguments,
        })
    }
}

fn kind_tag(kind: FunctionKind) -> &'static str {
    match kind {
        FunctionKind::Condition => "CONDITION",
        FunctionKind::Transformer => "TRANSFORMER",
        FunctionKind::Generator => "GENERATOR",
        FunctionKind::Effect => "EFFECT",
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn plain(
    name: &str,
    kind: FunctionKind,
    f: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
) -> (FunctionBuilder, FunctionEntry) {
    let builder = FunctionBuilder {
        name: name.to_string(),
        kind,
    };
    let entry = FunctionEntry {
        name: name.to_string(),
        kind,
        is_async: false,
        body: FunctionBody::Sync(Arc::new(f)),
    };
    (builder, entry)
}

pub fn condition(
    name: &str,
    f: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
) -> (FunctionBuilder, FunctionEntry) {
    plain(name, FunctionKind::Condition, f)
}

pub fn transformer(
    name: &str,
    f: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
) -> (FunctionBuilder, FunctionEntry) {
    plain(name, FunctionKind::Transformer, f)
}

pub fn generator(
    name: &str,
    f: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
) -> (FunctionBuilder, FunctionEntry) {
    plain(name, FunctionKind::Generator, f)
}

/// Async variant for functions that suspend (remote lookups and the like).
pub fn async_transformer(
    name: &str,
    f: impl Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
) -> (FunctionBuilder, FunctionEntry) {
    let builder = FunctionBuilder {
        name: name.to_string(),
        kind: FunctionKind::Transformer,
    };
    let entry = FunctionEntry {
        name: name.to_string(),
        kind: FunctionKind::Transformer,
        is_async: true,
        body: FunctionBody::Async(Arc::new(f)),
    };
    (builder, entry)
}

pub fn effect(
    name: &str,
    f: impl Fn(EffectContext, Vec<Value>) -> BoxFuture<'static, Result<Value, String>>
    + Send
    + Sync
    + 'static,
) -> (FunctionBuilder, FunctionEntry) {
    let builder = FunctionBuilder {
        name: name.to_string(),
        kind: FunctionKind::Effect,
    };
    let entry = FunctionEntry {
        name: name.to_string(),
        kind: FunctionKind::Effect,
        is_async: true,
        body: FunctionBody::Effect(Arc::new(f)),
    };
    (builder, entry)
}

/// Dependency-injected variant: the builder is usable immediately (journey
/// definitions reference functions by name); the entry is produced later,
/// once the host has its collaborators.
pub fn condition_with_deps<D>(
    name: &str,
    make: impl FnOnce(D) -> PlainFn,
) -> (FunctionBuilder, impl FnOnce(D) -> FunctionEntry) {
    let builder = FunctionBuilder {
        name: name.to_string(),
        kind: FunctionKind::Condition,
    };
    let name = name.to_string();
    let into_entry = move |deps: D| FunctionEntry {
        name: name.clone(),
        kind: FunctionKind::Condition,
        is_async: false,
        body: FunctionBody::Sync(make(deps)),
    };
    (builder, into_entry)
}

pub fn transformer_with_deps<D>(
    name: &str,
    make: impl FnOnce(D) -> PlainFn,
) -> (FunctionBuilder, impl FnOnce(D) -> FunctionEntry) {
    let builder = FunctionBuilder {
        name: name.to_string(),
        kind: FunctionKind::Transformer,
    };
    let name = name.to_string();
    let into_entry = move |deps: D| FunctionEntry {
        name: name.clone(),
        kind: FunctionKind::Transformer,
        is_async: false,
        body: FunctionBody::Sync(make(deps)),
    };
    (builder, into_entry)
}

pub fn effect_with_deps<D>(
    name: &str,
    make: impl FnOnce(D) -> EffectFn,
) -> (FunctionBuilder, impl FnOnce(D) -> FunctionEntry) {
    let builder = FunctionBuilder {
        name: name.to_string(),
        kind: FunctionKind::Effect,
    };
    let name = name.to_string();
    let into_entry = move |deps: D| FunctionEntry {
        name: name.clone(),
        kind: FunctionKind::Effect,
        is_async: true,
        body: FunctionBody::Effect(make(deps)),
    };
    (builder, into_entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_emits_function_expression() {
        let (builder, entry) = condition("Equals", |args| {
            Ok(Value::Bool(args.first() == args.get(1)))
        });
        let expr = builder.call(vec![json!("retail")]);
        assert_eq!(expr["type"], "function");
        assert_eq!(expr["kind"], "CONDITION");
        assert_eq!(expr["name"], "Equals");
        assert!(!entry.is_async);
    }

    #[test]
    fn registry_lookup_by_name() {
        let mut registry = FunctionRegistry::new();
        let (_, entry) = transformer("Trim", |args| {
            Ok(match args.first() {
                Some(Value::String(s)) => Value::String(s.trim().to_string()),
                other => other.cloned().unwrap_or(Value::Null),
            })
        });
        registry.register(entry);
        assert!(registry.get("Trim").is_some());
        assert!(registry.get("Missing").is_none());
    }

    #[test]
    fn with_deps_defers_entry_construction() {
        struct Deps {
            suffix: String,
        }
        let (builder, into_entry) = transformer_with_deps("AppendSuffix", |deps: Deps| {
            Arc::new(move |args: &[Value]| {
                let base = args.first().and_then(Value::as_str).unwrap_or("");
                Ok(Value::String(format!("{base}{}", deps.suffix)))
            }) as PlainFn
        });
        assert_eq!(builder.name, "AppendSuffix");
        let entry = into_entry(Deps {
            suffix: "!".into(),
        });
        match &entry.body {
            FunctionBody::Sync(f) => {
                assert_eq!(f(&[json!("hi")]).unwrap(), json!("hi!"));
            }
            _ => panic!("expected sync body"),
        }
    }
}
