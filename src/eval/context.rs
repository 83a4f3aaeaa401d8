//! Per-request evaluation context.
//!
//! The context value is cheap to clone: shared state sits behind an `Arc`,
//! while the scope stack is owned. Pushing a frame returns a derived
//! context, so parallel branches are isolated by construction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::answers::{AnswerHistory, MutationSource};
use crate::compile::StepArtifact;
use crate::ir::node::{NodeId, NodeRef};
use crate::registry::functions::FunctionRegistry;
use crate::registry::handlers::HandlerEntry;

use super::outcome::Evaluated;
use super::overlay::RuntimeLayer;

// =============================================================================
// REQUEST INPUT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// The request as the host adapter hands it over.
#[derive(Debug, Clone)]
pub struct RequestInput {
    pub method: Method,
    pub post: BTreeMap<String, Value>,
    pub query: BTreeMap<String, Value>,
    pub params: BTreeMap<String, Value>,
}

impl RequestInput {
    pub fn get() -> Self {
        RequestInput {
            method: Method::Get,
            post: BTreeMap::new(),
            query: BTreeMap::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn post(body: BTreeMap<String, Value>) -> Self {
        RequestInput {
            method: Method::Post,
            post: body,
            query: BTreeMap::new(),
            params: BTreeMap::new(),
        }
    }
}

// =============================================================================
// NAVIGATION OUTCOME & VALIDATION FINDINGS
// =============================================================================

/// Resolved navigation decision out of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NavOutcome {
    Redirect { goto: String },
    ThrowError { code: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationFinding {
    pub field_code: String,
    pub message: Value,
}

// =============================================================================
// MUTABLE REQUEST STATE
// =============================================================================

/// The only mutable state of an evaluation. Everything else is shared,
/// immutable artefact data.
#[derive(Default)]
pub struct RequestState {
    pub answers: Mutex<BTreeMap<String, AnswerHistory>>,
    pub data: Mutex<BTreeMap<String, Value>>,
    /// Per-request pseudo-node result cache.
    cache: Mutex<HashMap<NodeId, Evaluated>>,
    session: Mutex<Value>,
    host_state: Mutex<BTreeMap<String, Value>>,
    outcome: Mutex<Option<NavOutcome>>,
    validation: Mutex<Vec<ValidationFinding>>,
}

impl RequestState {
    pub fn new(session: Value, host_state: BTreeMap<String, Value>) -> Self {
        RequestState {
            session: Mutex::new(session),
            host_state: Mutex::new(host_state),
            ..Default::default()
        }
    }

    pub fn cache_get(&self, id: &NodeId) -> Option<Evaluated> {
        self.cache.lock().get(id).cloned()
    }

    pub fn cache_put(&self, id: &NodeId, result: Evaluated) {
        self.cache.lock().insert(id.clone(), result);
    }

    /// Drop cached results for the given ids (runtime overlay commits).
    pub fn invalidate(&self, ids: &[NodeId]) {
        let mut cache = self.cache.lock();
        for id in ids {
            cache.remove(id);
        }
    }

    pub fn answer(&self, code: &str) -> Option<AnswerHistory> {
        self.answers.lock().get(code).cloned()
    }

    pub fn push_answer(&self, code: &str, value: Value, source: MutationSource) {
        self.answers
            .lock()
            .entry(code.to_string())
            .or_default()
            .push(value, source);
    }

    pub fn set_outcome(&self, outcome: NavOutcome) {
        let mut slot = self.outcome.lock();
        // First resolved outcome wins; transitions run in order.
        if slot.is_none() {
            *slot = Some(outcome);
        }
    }

    pub fn take_outcome(&self) -> Option<NavOutcome> {
        self.outcome.lock().take()
    }

    pub fn peek_outcome(&self) -> Option<NavOutcome> {
        self.outcome.lock().clone()
    }

    pub fn record_findings(&self, findings: Vec<ValidationFinding>) {
        self.validation.lock().extend(findings);
    }

    pub fn take_findings(&self) -> Vec<ValidationFinding> {
        std::mem::take(&mut self.validation.lock())
    }
}

// =============================================================================
// SHARED CONTEXT
// =============================================================================

/// Everything an evaluation shares across handler invocations.
pub struct SharedContext {
    pub artifact: Arc<StepArtifact>,
    pub functions: Arc<FunctionRegistry>,
    pub request: RequestInput,
    pub state: RequestState,
    /// Runtime overlay for iterator-created nodes.
    pub runtime: RuntimeLayer,
}

// =============================================================================
// SCOPE
// =============================================================================

pub type ScopeFrame = BTreeMap<String, Value>;

/// Frame exposing `@value` to a pipeline step or test condition.
pub fn value_frame(value: Value) -> ScopeFrame {
    let mut frame = BTreeMap::new();
    frame.insert("@value".to_string(), value);
    frame
}

/// Frame exposing `@value` and `@index` to an iterator template instance.
pub fn item_frame(value: Value, index: usize) -> ScopeFrame {
    let mut frame = value_frame(value);
    frame.insert("@index".to_string(), Value::from(index as u64));
    frame
}

// =============================================================================
// EVALUATION CONTEXT
// =============================================================================

#[derive(Clone)]
pub struct EvalContext {
    pub shared: Arc<SharedContext>,
    /// LIFO scope stack; innermost frame last.
    pub scope: Vec<ScopeFrame>,
    /// Source tag for answer writes made by effects reached from here:
    /// `Load` inside onLoad transitions, `Action` everywhere else.
    pub answer_source: MutationSource,
}

impl EvalContext {
    pub fn new(shared: Arc<SharedContext>) -> Self {
        EvalContext {
            shared,
            scope: Vec::new(),
            answer_source: MutationSource::Action,
        }
    }

    /// Derived context whose effects record answers under `source`.
    pub fn with_answer_source(&self, source: MutationSource) -> Self {
        let mut ctx = self.clone();
        ctx.answer_source = source;
        ctx
    }

    /// Derived context with one more scope frame. The original context is
    /// untouched, which is what keeps parallel fan-out branches isolated.
    pub fn with_frame(&self, frame: ScopeFrame) -> Self {
        let mut scope = self.scope.clone();
        scope.push(frame);
        EvalContext {
            shared: self.shared.clone(),
            scope,
            answer_source: self.answer_source,
        }
    }

    /// Innermost binding for a scope key (`@value`, `@index`).
    pub fn scope_value(&self, key: &str) -> Option<&Value> {
        self.scope.iter().rev().find_map(|frame| frame.get(key))
    }

    /// Node lookup: runtime overlay first, then the step's registry.
    pub fn node(&self, id: &NodeId) -> Option<NodeRef> {
        self.shared
            .runtime
            .node(id)
            .or_else(|| self.shared.artifact.nodes.node(id).cloned())
    }

    /// Handler lookup across the overlay and the compiled artefact.
    pub fn handler(&self, id: &NodeId) -> Option<HandlerEntry> {
        self.shared
            .runtime
            .handler(id)
            .or_else(|| self.shared.artifact.handlers.get(id))
    }

    /// Pseudo-node lookup across the overlay and the compiled artefact.
    pub fn pseudo(&self, kind: crate::ir::node::PseudoKind, key: &str) -> Option<NodeRef> {
        self.shared
            .runtime
            .pseudo(kind, key)
            .or_else(|| self.shared.artifact.nodes.pseudo(kind, key).cloned())
    }

    /// `answers` references resolve local-first across both layers.
    pub fn answer_pseudo(&self, code: &str) -> Option<NodeRef> {
        use crate::ir::node::PseudoKind;
        self.pseudo(PseudoKind::AnswerLocal, code)
            .or_else(|| self.pseudo(PseudoKind::AnswerRemote, code))
    }

    /// Metadata flag across the overlay and the compiled artefact.
    pub fn metadata_flag(&self, id: &NodeId, key: crate::registry::metadata::MetaKey) -> bool {
        self.shared.runtime.flag(id, key) || self.shared.artifact.metadata.flag(id, key)
    }

    /// Ids of every field block visible to this evaluation, static and
    /// runtime-created alike.
    pub fn field_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .shared
            .artifact
            .nodes
            .ids_of_kind("field")
            .to_vec();
        ids.extend(self.shared.runtime.ids_of_kind("field"));
        ids
    }

    pub fn request(&self) -> &RequestInput {
        &self.shared.request
    }

    pub fn state(&self) -> &RequestState {
        &self.shared.state
    }

    pub fn effect_context(&self) -> EffectContext {
        EffectContext {
            shared: self.shared.clone(),
            answer_source: self.answer_source,
        }
    }
}

// =============================================================================
// EFFECT CONTEXT
// =============================================================================

/// The surface handed to every effect function.
#[derive(Clone)]
pub struct EffectContext {
    shared: Arc<SharedContext>,
    answer_source: MutationSource,
}

impl EffectContext {
    pub fn get_session(&self) -> Value {
        self.shared.state.session.lock().clone()
    }

    pub fn update_session(&self, f: impl FnOnce(&mut Value)) {
        f(&mut self.shared.state.session.lock());
    }

    pub fn set_data(&self, key: &str, value: Value) {
        self.shared.state.data.lock().insert(key.to_string(), value);
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.shared.state.data.lock().get(key).cloned()
    }

    /// Append an answer mutation tagged with the enclosing transition's
    /// source. Action values take precedence over the same request's POST
    /// body; load values do not.
    pub fn set_answer(&self, code: &str, value: Value) {
        self.shared
            .state
            .push_answer(code, value, self.answer_source);
    }

    pub fn get_answer(&self, code: &str) -> Option<Value> {
        self.shared.state.answer(code).map(|h| h.current)
    }

    pub fn get_request_param(&self, name: &str) -> Option<Value> {
        self.shared.request.params.get(name).cloned()
    }

    pub fn get_query_param(&self, name: &str) -> Option<Value> {
        self.shared.request.query.get(name).cloned()
    }

    /// Opaque host state (CSRF tokens and the like).
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.shared.state.host_state.lock().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn scope_frames_shadow_outer_values() {
        let outer = value_frame(json!("outer"));
        let inner = item_frame(json!("inner"), 2);
        let scope = [outer, inner];
        let found = scope.iter().rev().find_map(|f| f.get("@value"));
        assert_eq!(found, Some(&json!("inner")));
        let index = scope.iter().rev().find_map(|f| f.get("@index"));
        assert_eq!(index, Some(&json!(2)));
    }

    #[test]
    fn answer_precedence_is_recorded_in_order() {
        let state = RequestState::default();
        state.push_answer("town", json!("Birmingham"), MutationSource::Action);
        let history = state.answer("town").unwrap();
        assert_eq!(history.latest_source(), Some(MutationSource::Action));
        assert_eq!(history.current, json!("Birmingham"));
    }

    #[test]
    fn first_outcome_wins() {
        let state = RequestState::default();
        state.set_outcome(NavOutcome::Redirect {
            goto: "/next".into(),
        });
        state.set_outcome(NavOutcome::ThrowError {
            code: "E".into(),
            message: "later".into(),
        });
        assert_eq!(
            state.peek_outcome(),
            Some(NavOutcome::Redirect {
                goto: "/next".into()
            })
        );
    }
}
