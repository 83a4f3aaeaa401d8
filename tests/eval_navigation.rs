//! Submission flow: validation sweep, branch routing, navigation outcomes.

mod helpers;

use helpers::*;
use serde_json::{Value, json};

use formflow::eval::context::NavOutcome;

fn name_step(on_submission: Value) -> Value {
    json!({
        "type": "step", "path": "/name",
        "blocks": [{
            "type": "field", "variant": "text", "code": "name",
            "validate": [validation(
                negated_test(reference(&["answers", "name"]), condition_fn("Present", vec![])),
                "Enter your name",
            )],
        }],
        "onSubmission": on_submission,
    })
}

fn submit_to(goto: &str) -> Value {
    json!({
        "type": "submit",
        "onValid": {"next": [{"type": "next", "goto": goto}]},
        "onInvalid": {"next": []},
    })
}

#[tokio::test]
async fn valid_submission_redirects() {
    let definition = journey("/apply", vec![name_step(submit_to("/done"))]);
    let evaluation = run(&definition, "/name", post_body(&[("name", json!("Ada"))])).await;

    assert!(evaluation.validation.is_empty());
    assert_eq!(
        evaluation.outcome,
        Some(NavOutcome::Redirect {
            goto: "/done".into()
        })
    );
}

#[tokio::test]
async fn invalid_submission_collects_findings_and_stays() {
    let definition = journey("/apply", vec![name_step(submit_to("/done"))]);
    let evaluation = run(&definition, "/name", post_body(&[("name", json!(""))])).await;

    assert_eq!(evaluation.validation.len(), 1);
    assert_eq!(evaluation.validation[0].field_code, "name");
    assert_eq!(evaluation.validation[0].message, json!("Enter your name"));
    assert_eq!(evaluation.outcome, None);
}

#[tokio::test]
async fn validation_skips_hidden_fields() {
    let definition = journey(
        "/apply",
        vec![json!({
            "type": "step", "path": "/business",
            "blocks": [
                text_field("businessType"),
                {
                    "type": "field", "variant": "text", "code": "tradingHours",
                    "dependent": test_predicate(
                        reference(&["answers", "businessType"]),
                        condition_fn("Equals", vec![json!("retail")]),
                    ),
                    "validate": [validation(
                        negated_test(reference(&["answers", "tradingHours"]),
                                     condition_fn("Present", vec![])),
                        "Enter trading hours",
                    )],
                },
            ],
            "onSubmission": submit_to("/done"),
        })],
    );

    // Wholesale hides tradingHours: its empty answer must not fail the
    // submission.
    let evaluation = run(
        &definition,
        "/business",
        post_body(&[("businessType", json!("wholesale"))]),
    )
    .await;
    assert!(evaluation.validation.is_empty());
    assert_eq!(
        evaluation.outcome,
        Some(NavOutcome::Redirect {
            goto: "/done".into()
        })
    );

    // Retail shows it, and the missing answer now fails.
    let evaluation = run(
        &definition,
        "/business",
        post_body(&[("businessType", json!("retail"))]),
    )
    .await;
    assert_eq!(evaluation.validation.len(), 1);
    assert_eq!(evaluation.validation[0].field_code, "tradingHours");
}

#[tokio::test]
async fn conditional_next_picks_first_match() {
    let definition = journey(
        "/apply",
        vec![json!({
            "type": "step", "path": "/name",
            "blocks": [text_field("name")],
            "onSubmission": {
                "type": "submit",
                "onValid": {"next": [
                    {"type": "next",
                     "when": test_predicate(reference(&["answers", "name"]),
                                            condition_fn("Equals", vec![json!("skip")])),
                     "goto": "/end"},
                    {"type": "next", "goto": "/middle"},
                ]},
            },
        })],
    );

    let evaluation = run(&definition, "/name", post_body(&[("name", json!("skip"))])).await;
    assert_eq!(
        evaluation.outcome,
        Some(NavOutcome::Redirect { goto: "/end".into() })
    );

    let evaluation = run(&definition, "/name", post_body(&[("name", json!("Ada"))])).await;
    assert_eq!(
        evaluation.outcome,
        Some(NavOutcome::Redirect {
            goto: "/middle".into()
        })
    );
}

#[tokio::test]
async fn throw_error_outcome_resolves() {
    let definition = journey(
        "/apply",
        vec![json!({
            "type": "step", "path": "/name",
            "blocks": [text_field("name")],
            "onSubmission": {
                "type": "submit",
                "validate": false,
                "onValid": {"next": [
                    {"type": "throwError", "code": "E_CLOSED", "message": "Applications closed"}
                ]},
            },
        })],
    );
    let evaluation = run(&definition, "/name", post_body(&[("name", json!("x"))])).await;
    assert_eq!(
        evaluation.outcome,
        Some(NavOutcome::ThrowError {
            code: "E_CLOSED".into(),
            message: "Applications closed".into(),
        })
    );
}

#[tokio::test]
async fn submissions_do_not_run_on_get() {
    let definition = journey("/apply", vec![name_step(submit_to("/done"))]);
    let evaluation = run(
        &definition,
        "/name",
        formflow::eval::context::RequestInput::get(),
    )
    .await;
    assert_eq!(evaluation.outcome, None);
    assert!(evaluation.validation.is_empty());
}

#[tokio::test]
async fn dynamic_goto_is_evaluated() {
    let definition = journey(
        "/apply",
        vec![json!({
            "type": "step", "path": "/name",
            "blocks": [text_field("name")],
            "onSubmission": {
                "type": "submit",
                "validate": false,
                "onValid": {"next": [{
                    "type": "next",
                    "goto": format("/confirm/%1", vec![reference(&["answers", "name"])]),
                }]},
            },
        })],
    );
    let evaluation = run(&definition, "/name", post_body(&[("name", json!("ada"))])).await;
    assert_eq!(
        evaluation.outcome,
        Some(NavOutcome::Redirect {
            goto: "/confirm/ada".into()
        })
    );
}
