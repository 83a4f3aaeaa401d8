//! Unified engine error type used across all compile phases.

use crate::ir::node::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Normalize,
    Validate,
    Register,
    Wire,
    Project,
    Compile,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Parse => write!(f, "Parse"),
            Phase::Normalize => write!(f, "Normalize"),
            Phase::Validate => write!(f, "Validate"),
            Phase::Register => write!(f, "Register"),
            Phase::Wire => write!(f, "Wire"),
            Phase::Project => write!(f, "Project"),
            Phase::Compile => write!(f, "Compile"),
        }
    }
}

/// A fatal compile-time error. Evaluation-time errors travel in-band as
/// `eval::EvalError`; this type is for programming mistakes in the journey
/// definition or the engine itself.
#[derive(Debug, Clone)]
pub struct EngineError {
    pub code: String,
    pub phase: Phase,
    pub message: String,
    pub node_id: Option<NodeId>,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(id) => write!(
                f,
                "[{}:{}] {} (node '{}')",
                self.phase, self.code, self.message, id
            ),
            None => write!(f, "[{}:{}] {}", self.phase, self.code, self.message),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    fn new(phase: Phase, code: &str, message: impl Into<String>, node_id: Option<NodeId>) -> Self {
        EngineError {
            code: code.into(),
            phase,
            message: message.into(),
            node_id,
        }
    }

    pub fn parse(code: &str, message: impl Into<String>) -> Self {
        Self::new(Phase::Parse, code, message, None)
    }

    pub fn normalize(code: &str, message: impl Into<String>, node_id: Option<NodeId>) -> Self {
        Self::new(Phase::Normalize, code, message, node_id)
    }

    pub fn validate(code: &str, message: impl Into<String>, node_id: Option<NodeId>) -> Self {
        Self::new(Phase::Validate, code, message, node_id)
    }

    pub fn register(code: &str, message: impl Into<String>, node_id: Option<NodeId>) -> Self {
        Self::new(Phase::Register, code, message, node_id)
    }

    pub fn wire(code: &str, message: impl Into<String>, node_id: Option<NodeId>) -> Self {
        Self::new(Phase::Wire, code, message, node_id)
    }

    pub fn project(code: &str, message: impl Into<String>, node_id: Option<NodeId>) -> Self {
        Self::new(Phase::Project, code, message, node_id)
    }

    pub fn compile(code: &str, message: impl Into<String>, node_id: Option<NodeId>) -> Self {
        Self::new(Phase::Compile, code, message, node_id)
    }
}
