//! Expression semantics: references, formats, pipelines, predicates.

mod helpers;

use helpers::*;
use serde_json::json;

use formflow::eval::context::RequestInput;
use formflow::eval::outcome::EvalErrorKind;

fn single_block_journey(block: serde_json::Value) -> serde_json::Value {
    journey("/apply", vec![step("/a", vec![block])])
}

fn content_of(evaluation: &formflow::eval::Evaluation) -> &serde_json::Value {
    dig(&evaluation.view, &["step", "blocks", "0", "properties", "content"])
}

#[tokio::test]
async fn references_drill_into_structures() {
    let definition = single_block_journey(json!({
        "type": "block", "variant": "html",
        "content": reference(&["data", "lookup", "towns", "1", "name"]),
    }));
    let compiled = compile(&definition);
    let ctx = context_for(&compiled, "/a", RequestInput::get());
    ctx.state().data.lock().insert(
        "lookup".into(),
        json!({"towns": [{"name": "Leeds"}, {"name": "York"}]}),
    );
    let evaluation = formflow::eval::Evaluator::new()
        .evaluate(&ctx)
        .await
        .unwrap();
    assert_eq!(content_of(&evaluation), &json!("York"));
}

#[tokio::test]
async fn missing_reference_targets_resolve_to_null() {
    let definition = single_block_journey(json!({
        "type": "block", "variant": "html",
        "content": reference(&["data", "lookup", "missing", "deeper"]),
    }));
    let evaluation = run(&definition, "/a", RequestInput::get()).await;
    assert!(evaluation.error.is_none());
    assert_eq!(content_of(&evaluation), &json!(null));
}

#[tokio::test]
async fn dynamic_path_segments_are_evaluated_first() {
    let definition = single_block_journey(json!({
        "type": "block", "variant": "html",
        "content": {"type": "reference",
                    "path": ["data", "lookup", reference(&["query", "pick"])]},
    }));
    let compiled = compile(&definition);
    let mut request = RequestInput::get();
    request.query.insert("pick".into(), json!("b"));
    let ctx = context_for(&compiled, "/a", request);
    ctx.state()
        .data
        .lock()
        .insert("lookup".into(), json!({"a": 1, "b": 2}));
    let evaluation = formflow::eval::Evaluator::new()
        .evaluate(&ctx)
        .await
        .unwrap();
    assert_eq!(content_of(&evaluation), &json!(2));
}

#[tokio::test]
async fn unsafe_base_keys_are_security_violations() {
    let definition = single_block_journey(json!({
        "type": "block", "variant": "html",
        "content": reference(&["answers", "__proto__"]),
    }));
    let evaluation = run(&definition, "/a", RequestInput::get()).await;
    let error = evaluation.error.expect("security violation surfaces");
    assert_eq!(error.kind, EvalErrorKind::SecurityViolation);
}

#[tokio::test]
async fn format_substitutes_positional_markers() {
    let definition = single_block_journey(json!({
        "type": "block", "variant": "html",
        "content": format(
            "%1, %2 and %1 again",
            vec![json!("a"), reference(&["query", "n"])],
        ),
    }));
    let compiled = compile(&definition);
    let mut request = RequestInput::get();
    request.query.insert("n".into(), json!(7));
    let ctx = context_for(&compiled, "/a", request);
    let evaluation = formflow::eval::Evaluator::new()
        .evaluate(&ctx)
        .await
        .unwrap();
    assert_eq!(content_of(&evaluation), &json!("a, 7 and a again"));
}

#[tokio::test]
async fn pipelines_thread_value_through_steps() {
    let definition = single_block_journey(json!({
        "type": "block", "variant": "html",
        "content": {
            "type": "pipeline",
            "input": reference(&["query", "raw"]),
            "steps": [transformer_fn("Trim"), transformer_fn("ToLower")],
        },
    }));
    let compiled = compile(&definition);
    let mut request = RequestInput::get();
    request.query.insert("raw".into(), json!("  MiXeD  "));
    let ctx = context_for(&compiled, "/a", request);
    let evaluation = formflow::eval::Evaluator::new()
        .evaluate(&ctx)
        .await
        .unwrap();
    assert_eq!(content_of(&evaluation), &json!("mixed"));
}

#[tokio::test]
async fn predicates_combine_with_short_circuits() {
    let definition = single_block_journey(json!({
        "type": "block", "variant": "html",
        "content": {"type": "and", "operands": [
            test_predicate(reference(&["query", "a"]),
                           condition_fn("Equals", vec![json!("yes")])),
            {"type": "or", "operands": [
                test_predicate(reference(&["query", "b"]),
                               condition_fn("Equals", vec![json!("yes")])),
                {"type": "not", "operand":
                    test_predicate(reference(&["query", "c"]),
                                   condition_fn("Present", vec![]))},
            ]},
        ]},
    }));
    let compiled = compile(&definition);
    // a=yes, b=no, c absent: and(true, or(false, not(false))) == true.
    let mut request = RequestInput::get();
    request.query.insert("a".into(), json!("yes"));
    request.query.insert("b".into(), json!("no"));
    let ctx = context_for(&compiled, "/a", request);
    let evaluation = formflow::eval::Evaluator::new()
        .evaluate(&ctx)
        .await
        .unwrap();
    assert_eq!(content_of(&evaluation), &json!(true));
}

#[tokio::test]
async fn xor_requires_exactly_one() {
    let definition = single_block_journey(json!({
        "type": "block", "variant": "html",
        "content": {"type": "xor", "operands": [
            test_predicate(reference(&["query", "a"]), condition_fn("Present", vec![])),
            test_predicate(reference(&["query", "b"]), condition_fn("Present", vec![])),
        ]},
    }));
    let compiled = compile(&definition);

    let mut request = RequestInput::get();
    request.query.insert("a".into(), json!("x"));
    let ctx = context_for(&compiled, "/a", request);
    let one = formflow::eval::Evaluator::new()
        .evaluate(&ctx)
        .await
        .unwrap();
    assert_eq!(content_of(&one), &json!(true));

    let mut request = RequestInput::get();
    request.query.insert("a".into(), json!("x"));
    request.query.insert("b".into(), json!("y"));
    let ctx = context_for(&compiled, "/a", request);
    let both = formflow::eval::Evaluator::new()
        .evaluate(&ctx)
        .await
        .unwrap();
    assert_eq!(content_of(&both), &json!(false));
}

#[tokio::test]
async fn test_errors_resolve_to_false() {
    // The condition function is unknown: the lookup failure collapses the
    // test to false instead of failing the page.
    let definition = single_block_journey(json!({
        "type": "block", "variant": "html",
        "content": test_predicate(json!("anything"),
                                  condition_fn("NoSuchFunction", vec![])),
    }));
    let evaluation = run(&definition, "/a", RequestInput::get()).await;
    assert!(evaluation.error.is_none());
    assert_eq!(content_of(&evaluation), &json!(false));
}

#[tokio::test]
async fn self_reference_resolves_to_owning_field() {
    let definition = journey(
        "/apply",
        vec![step(
            "/a",
            vec![json!({
                "type": "field", "variant": "text", "code": "nickname",
                "validate": [validation(
                    negated_test(json!({"type": "self"}), condition_fn("Present", vec![])),
                    "Enter a nickname",
                )],
            })],
        )],
    );
    let evaluation = run(&definition, "/a", post_body(&[("nickname", json!("Ada"))])).await;
    assert!(evaluation.validation.is_empty());

    let evaluation = run(&definition, "/a", post_body(&[("nickname", json!(""))])).await;
    assert_eq!(evaluation.validation.len(), 1);
    assert_eq!(evaluation.validation[0].field_code, "nickname");
}
