//! Iterator expressions: runtime node creation, scoping, fallbacks.

mod helpers;

use helpers::*;
use serde_json::{Value, json};

use formflow::eval::Evaluator;
use formflow::eval::context::RequestInput;
use formflow::eval::outcome::EvalErrorKind;

fn rows_journey(template: Value, fallback: Option<Value>) -> Value {
    let mut iterate = json!({
        "type": "iterate",
        "collection": reference(&["data", "rows"]),
        "template": [template],
    });
    if let Some(fb) = fallback {
        iterate["fallback"] = fb;
    }
    journey(
        "/apply",
        vec![json!({
            "type": "step", "path": "/rows",
            "blocks": [{"type": "block", "variant": "group", "items": iterate}],
            "onLoad": {"type": "load", "effects": [
                effect_fn("SetData", vec![json!("rows"), json!([{"id": 1}, {"id": 2}, {"id": 3}])])
            ]},
        })],
    )
}

fn item_field_template() -> Value {
    json!({
        "type": "field", "variant": "text",
        "code": format("item_%1", vec![reference(&["@scope", "@value", "id"])]),
        "label": format("Row %1", vec![reference(&["@scope", "@index"])]),
    })
}

#[tokio::test]
async fn iterate_instantiates_one_field_per_item() {
    let definition = rows_journey(item_field_template(), None);
    let compiled = compile(&definition);
    let ctx = context_for(&compiled, "/rows", RequestInput::get());
    let evaluation = Evaluator::new().evaluate(&ctx).await.unwrap();

    assert!(evaluation.error.is_none(), "{:?}", evaluation.error);
    let items = dig(&evaluation.view, &["step", "blocks", "0", "properties", "items"]);
    let fields = items.as_array().expect("rendered array");
    assert_eq!(fields.len(), 3);

    // Dynamic codes resolved under each item's scope: no leakage between
    // iterations.
    let codes: Vec<&str> = fields
        .iter()
        .map(|f| f["properties"]["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["item_1", "item_2", "item_3"]);
    let labels: Vec<&str> = fields
        .iter()
        .map(|f| f["properties"]["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["Row 0", "Row 1", "Row 2"]);

    // The runtime layer holds the new field nodes with runtime-space ids.
    let runtime_fields = ctx.shared.runtime.ids_of_kind("field");
    assert_eq!(runtime_fields.len(), 3);
    assert!(runtime_fields.iter().all(|id| id.is_runtime()));

    // Each runtime field produced an answer through its own AnswerLocal.
    for code in ["item_1", "item_2", "item_3"] {
        assert!(evaluation.answers.contains_key(code), "no answer for {code}");
    }
}

#[tokio::test]
async fn null_items_are_skipped() {
    let definition = journey(
        "/apply",
        vec![json!({
            "type": "step", "path": "/rows",
            "blocks": [{"type": "block", "variant": "group", "items": {
                "type": "iterate",
                "collection": reference(&["data", "rows"]),
                "template": [item_field_template()],
            }}],
            "onLoad": {"type": "load", "effects": [
                effect_fn("SetData", vec![json!("rows"), json!([{"id": 1}, null, {"id": 3}])])
            ]},
        })],
    );
    let evaluation = run(&definition, "/rows", RequestInput::get()).await;
    let items = dig(&evaluation.view, &["step", "blocks", "0", "properties", "items"]);
    assert_eq!(items.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn empty_collection_uses_fallback() {
    let definition = journey(
        "/apply",
        vec![json!({
            "type": "step", "path": "/rows",
            "blocks": [{"type": "block", "variant": "group", "items": {
                "type": "iterate",
                "collection": reference(&["data", "rows"]),
                "template": [item_field_template()],
                "fallback": "No rows yet",
            }}],
            "onLoad": {"type": "load", "effects": [
                effect_fn("SetData", vec![json!("rows"), json!([])])
            ]},
        })],
    );
    let evaluation = run(&definition, "/rows", RequestInput::get()).await;
    let items = dig(&evaluation.view, &["step", "blocks", "0", "properties", "items"]);
    assert_eq!(items, &json!("No rows yet"));
}

#[tokio::test]
async fn non_array_collection_is_a_type_mismatch() {
    let definition = journey(
        "/apply",
        vec![json!({
            "type": "step", "path": "/rows",
            "blocks": [{"type": "block", "variant": "group", "items": {
                "type": "iterate",
                "collection": reference(&["data", "rows"]),
                "template": [item_field_template()],
            }}],
            "onLoad": {"type": "load", "effects": [
                effect_fn("SetData", vec![json!("rows"), json!("not-an-array")])
            ]},
        })],
    );
    let evaluation = run(&definition, "/rows", RequestInput::get()).await;
    let error = evaluation.error.expect("type mismatch surfaces");
    assert_eq!(error.kind, EvalErrorKind::TypeMismatch);
}

#[tokio::test]
async fn runtime_graph_stays_acyclic_and_posts_process() {
    // POST against iterator-created fields: the runtime AnswerLocal
    // machines process the submitted values like static ones.
    let definition = rows_journey(item_field_template(), None);
    let compiled = compile(&definition);
    let ctx = context_for(
        &compiled,
        "/rows",
        post_body(&[("item_2", json!(" hi <b>there</b> "))]),
    );
    let evaluation = Evaluator::new().evaluate(&ctx).await.unwrap();
    assert!(evaluation.error.is_none(), "{:?}", evaluation.error);

    let history = &evaluation.answers["item_2"];
    assert_eq!(history.current, json!(" hi &lt;b&gt;there&lt;/b&gt; "));
}
