//! In-band evaluation results and the error taxonomy.
//!
//! Handlers return `Evaluated` values; errors travel inside them rather
//! than through `Result`, which is reserved for fatal programming errors
//! (missing handlers, corrupt artefacts).

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::ir::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvalErrorKind {
    TypeMismatch,
    LookupFailed,
    SecurityViolation,
    EvaluationFailed,
    CircularDependency,
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind:?} at node '{node_id}': {message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub node_id: NodeId,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<EvalError>>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, node_id: &NodeId, message: impl Into<String>) -> Self {
        EvalError {
            kind,
            node_id: node_id.clone(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn type_mismatch(node_id: &NodeId, message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::TypeMismatch, node_id, message)
    }

    pub fn lookup_failed(node_id: &NodeId, message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::LookupFailed, node_id, message)
    }

    pub fn security_violation(node_id: &NodeId, message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::SecurityViolation, node_id, message)
    }

    pub fn evaluation_failed(node_id: &NodeId, message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::EvaluationFailed, node_id, message)
    }

    pub fn with_cause(mut self, cause: EvalError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Evaluation metadata attached to every result.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EvalMeta {
    /// True when this result came out of the per-request pseudo-node cache.
    pub cached: bool,
}

/// A handler's result: a value (possibly undefined), or an in-band error.
#[derive(Debug, Clone)]
pub struct Evaluated {
    pub value: Option<Value>,
    pub error: Option<EvalError>,
    pub meta: EvalMeta,
}

impl Evaluated {
    pub fn value(value: Value) -> Self {
        Evaluated {
            value: Some(value),
            error: None,
            meta: EvalMeta::default(),
        }
    }

    /// The absent value: a reference that resolved to nothing.
    pub fn undefined() -> Self {
        Evaluated {
            value: None,
            error: None,
            meta: EvalMeta::default(),
        }
    }

    pub fn error(error: EvalError) -> Self {
        Evaluated {
            value: None,
            error: Some(error),
            meta: EvalMeta::default(),
        }
    }

    pub fn mark_cached(mut self) -> Self {
        self.meta.cached = true;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The value, with undefined collapsed to JSON null.
    pub fn value_or_null(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }

    pub fn truthy(&self) -> bool {
        !self.is_error() && self.value.as_ref().is_some_and(truthy)
    }
}

/// Loose truthiness over JSON values: null, false, 0, "" and absent are
/// falsy, everything else truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn truthiness_matches_loose_semantics() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("no")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!({})));
        assert!(truthy(&json!(0.5)));
    }

    #[test]
    fn undefined_is_not_truthy() {
        assert!(!Evaluated::undefined().truthy());
        assert!(Evaluated::value(json!(1)).truthy());
        let err = Evaluated::error(EvalError::type_mismatch(&NodeId::from("c1"), "boom"));
        assert!(!err.truthy());
        assert!(err.is_error());
    }

    #[test]
    fn causes_chain() {
        let inner = EvalError::lookup_failed(&NodeId::from("c2"), "missing function");
        let outer =
            EvalError::evaluation_failed(&NodeId::from("c1"), "transition failed").with_cause(inner);
        assert_eq!(outer.cause.as_ref().unwrap().kind, EvalErrorKind::LookupFailed);
    }
}
