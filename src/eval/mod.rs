//! Thunk evaluator: lazy, memoizing, demand-driven.
//!
//! `invoke` is the recursive driver: it looks up the node's handler,
//! serves pseudo-node results from the per-request cache, coalesces
//! concurrent invocations of the same id, and otherwise delegates to the
//! handler. Only pseudo-nodes are cached; expression handlers are cheap
//! and may observe mutable scope.

pub mod context;
pub mod handlers;
pub mod outcome;
pub mod overlay;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::answers::AnswerHistory;
use crate::compile::StepArtifact;
use crate::error::EngineError;
use crate::ir::node::NodeId;
use crate::registry::functions::FunctionRegistry;

use context::{
    EvalContext, NavOutcome, RequestInput, RequestState, SharedContext, ValidationFinding,
};
use outcome::{EvalError, Evaluated};
use overlay::RuntimeLayer;

// =============================================================================
// EVALUATION OUTPUT
// =============================================================================

/// Everything one request produces: the rendered view model, validation
/// findings, the resolved navigation outcome and the mutated request
/// state.
#[derive(Debug)]
pub struct Evaluation {
    pub view: Value,
    pub error: Option<EvalError>,
    pub validation: Vec<ValidationFinding>,
    pub outcome: Option<NavOutcome>,
    pub answers: BTreeMap<String, AnswerHistory>,
    pub data: BTreeMap<String, Value>,
}

// =============================================================================
// CONTEXT CONSTRUCTION
// =============================================================================

/// Build the per-request context for a compiled step.
pub fn create_context(
    artifact: Arc<StepArtifact>,
    functions: Arc<FunctionRegistry>,
    request: RequestInput,
    session: Value,
    host_state: BTreeMap<String, Value>,
) -> EvalContext {
    EvalContext::new(Arc::new(SharedContext {
        artifact,
        functions,
        request,
        state: RequestState::new(session, host_state),
        runtime: RuntimeLayer::new(),
    }))
}

// =============================================================================
// EVALUATOR
// =============================================================================

enum Claim {
    /// This caller computes; completion is published through the sender.
    Run(watch::Sender<Option<Evaluated>>),
    /// Another invocation of the same id is in flight; wait for it.
    Wait(watch::Receiver<Option<Evaluated>>),
}

#[derive(Default)]
pub struct Evaluator {
    in_flight: Mutex<HashMap<NodeId, watch::Receiver<Option<Evaluated>>>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the journey for this context and collect the output.
    pub async fn evaluate(&self, ctx: &EvalContext) -> Result<Evaluation, EngineError> {
        let journey_id = ctx.shared.artifact.journey_id.clone();
        debug!(journey = %journey_id, step = %ctx.shared.artifact.step_path, "evaluating journey");

        let result = self.invoke(&journey_id, ctx).await?;
        let state = ctx.state();
        Ok(Evaluation {
            view: result.value_or_null(),
            error: result.error,
            validation: state.take_findings(),
            outcome: state.take_outcome(),
            answers: state.answers.lock().clone(),
            data: state.data.lock().clone(),
        })
    }

    /// The recursive driver. Fatal errors (missing handler) surface as
    /// `Err`; everything else travels in-band.
    pub async fn invoke(
        &self,
        id: &NodeId,
        ctx: &EvalContext,
    ) -> Result<Evaluated, EngineError> {
        let Some(entry) = ctx.handler(id) else {
            return Err(EngineError::compile(
                "E001",
                format!("No handler for node '{id}'"),
                Some(id.clone()),
            ));
        };

        let is_pseudo = ctx.node(id).map(|n| n.is_pseudo()).unwrap_or(false);
        if is_pseudo
            && let Some(hit) = ctx.state().cache_get(id)
        {
            trace!(node = %id, "pseudo-node cache hit");
            return Ok(hit.mark_cached());
        }

        // Concurrent invocations of the same id coalesce onto one handler
        // run; late callers wait on the watch channel.
        let claim = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(id) {
                Some(rx) => Claim::Wait(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(id.clone(), rx);
                    Claim::Run(tx)
                }
            }
        };

        let tx = match claim {
            Claim::Wait(mut rx) => {
                let dropped = || {
                    EngineError::compile(
                        "E003",
                        format!("In-flight evaluation of '{id}' was dropped"),
                        Some(id.clone()),
                    )
                };
                let guard = rx.wait_for(Option::is_some).await.map_err(|_| dropped())?;
                return guard.clone().ok_or_else(dropped);
            }
            Claim::Run(tx) => tx,
        };

        trace!(node = %id, "invoking handler");
        let outcome = entry.handler.evaluate(ctx, self).await;
        self.in_flight.lock().remove(id);

        match outcome {
            Ok(result) => {
                if is_pseudo {
                    ctx.state().cache_put(id, result.clone());
                }
                let _ = tx.send(Some(result.clone()));
                Ok(result)
            }
            Err(fatal) => {
                // Waiters cannot receive the fatal error itself; give them
                // an in-band marker and propagate the real error here.
                let _ = tx.send(Some(Evaluated::error(EvalError::evaluation_failed(
                    id,
                    "Evaluation aborted by a fatal error",
                ))));
                Err(fatal)
            }
        }
    }
}
