//! Evaluator memoization: in-flight deduplication and the pseudo-node
//! cache.

mod helpers;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use helpers::*;
use serde_json::{Value, json};

use formflow::eval::context::RequestInput;
use formflow::eval::{Evaluator, create_context};
use formflow::registry::functions;

#[tokio::test]
async fn concurrent_invocations_share_one_handler_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut registry = standard_registry();
    let (_, slow) = functions::async_transformer("SlowEcho", move |args| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(args.get(1).cloned().unwrap_or(Value::Null))
        })
    });
    registry.register(slow);

    let definition = journey(
        "/apply",
        vec![step(
            "/a",
            vec![json!({"type": "field", "variant": "text", "code": "a",
                        "defaultValue": {"type": "function", "kind": "TRANSFORMER",
                                         "name": "SlowEcho", "arguments": ["hello"]}})],
        )],
    );
    let compiled = formflow::compile::compile_journey(&definition, &registry).unwrap();
    let artifact = compiled.artifact("/a").unwrap();
    let function_id = artifact.nodes.ids_of_kind("function")[0].clone();

    let ctx = create_context(
        artifact,
        Arc::new(registry),
        RequestInput::get(),
        Value::Null,
        BTreeMap::new(),
    );
    let ev = Evaluator::new();

    let (a, b, c) = tokio::join!(
        ev.invoke(&function_id, &ctx),
        ev.invoke(&function_id, &ctx),
        ev.invoke(&function_id, &ctx),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 1, "handler body ran once");
    assert_eq!(a.value, Some(json!("hello")));
    assert_eq!(b.value, a.value);
    assert_eq!(c.value, a.value);
}

#[tokio::test]
async fn sequential_invocations_rerun_expressions() {
    // Expression handlers do not cache: a second invoke runs the handler
    // again once the first has finished.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut registry = standard_registry();
    let (_, counting) = functions::async_transformer("Counting", move |_args| {
        let counter = counter.clone();
        Box::pin(async move {
            Ok(Value::from(counter.fetch_add(1, Ordering::SeqCst) as u64))
        })
    });
    registry.register(counting);

    let definition = journey(
        "/apply",
        vec![step(
            "/a",
            vec![json!({"type": "field", "variant": "text", "code": "a",
                        "defaultValue": {"type": "function", "kind": "TRANSFORMER",
                                         "name": "Counting", "arguments": []}})],
        )],
    );
    let compiled = formflow::compile::compile_journey(&definition, &registry).unwrap();
    let artifact = compiled.artifact("/a").unwrap();
    let function_id = artifact.nodes.ids_of_kind("function")[0].clone();

    let ctx = create_context(
        artifact,
        Arc::new(registry),
        RequestInput::get(),
        Value::Null,
        BTreeMap::new(),
    );
    let ev = Evaluator::new();

    let first = ev.invoke(&function_id, &ctx).await.unwrap();
    let second = ev.invoke(&function_id, &ctx).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_ne!(first.value, second.value);
}

#[tokio::test]
async fn pseudo_node_results_are_cached_per_request() {
    let definition = journey(
        "/apply",
        vec![json!({
            "type": "step", "path": "/a",
            "blocks": [{"type": "block", "variant": "html",
                        "content": reference(&["query", "page"])}],
        })],
    );
    let compiled = compile(&definition);
    let artifact = compiled.artifact("/a").unwrap();
    let query_id = artifact.nodes.ids_of_kind("query")[0].clone();

    let mut request = RequestInput::get();
    request
        .query
        .insert("page".to_string(), json!("2"));
    let ctx = create_context(
        artifact,
        Arc::new(standard_registry()),
        request,
        Value::Null,
        BTreeMap::new(),
    );
    let ev = Evaluator::new();

    let first = ev.invoke(&query_id, &ctx).await.unwrap();
    assert!(!first.meta.cached);
    assert_eq!(first.value, Some(json!("2")));

    let second = ev.invoke(&query_id, &ctx).await.unwrap();
    assert!(second.meta.cached, "second read served from the cache");
    assert_eq!(second.value, first.value);

    // A fresh request context starts cold.
    let mut request = RequestInput::get();
    request
        .query
        .insert("page".to_string(), json!("3"));
    let ctx2 = create_context(
        compiled.artifact("/a").unwrap(),
        Arc::new(standard_registry()),
        request,
        Value::Null,
        BTreeMap::new(),
    );
    let fresh = ev.invoke(&query_id, &ctx2).await.unwrap();
    assert!(!fresh.meta.cached);
    assert_eq!(fresh.value, Some(json!("3")));
}

#[tokio::test]
async fn missing_handler_is_fatal() {
    let definition = journey("/apply", vec![step("/a", vec![text_field("a")])]);
    let compiled = compile(&definition);
    let ctx = context_for(&compiled, "/a", RequestInput::get());
    let ev = Evaluator::new();

    let err = ev
        .invoke(&formflow::ir::NodeId::from("c9999"), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, "E001");
}
