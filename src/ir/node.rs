//! IR node definitions for the form engine.
//!
//! The IR bridges the declarative journey JSON (input) and the per-step
//! thunk handlers (execution). A journey tree of structural nodes, blocks,
//! expressions, predicates and transitions is compiled into per-step
//! artefacts; the node kinds here are the closed union every later phase
//! dispatches on.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;

/// Shared handle to an IR node. The registry stores clones of these, so a
/// registered node and its position in the tree are the same allocation.
pub type NodeRef = Arc<Node>;

// =============================================================================
// NODE IDS
// =============================================================================

/// Unique node identifier. Compile-space ids (`c{n}`) are stable across
/// requests; runtime-space ids (`r{n}`) belong to nodes created by iterator
/// expressions during a single evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_runtime(&self) -> bool {
        self.0.starts_with('r')
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// Which id space a factory allocates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    /// Stable ids assigned at journey registration.
    CompileAst,
    /// Per-evaluation ids for nodes instantiated by iterator expressions.
    RuntimeAst,
}

/// Monotonic id source shared by the compile pipeline and, via the step
/// artefact, by runtime node creation.
#[derive(Debug, Default)]
pub struct IdGenerator {
    compile: AtomicU64,
    runtime: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, space: IdSpace) -> NodeId {
        match space {
            IdSpace::CompileAst => {
                let n = self.compile.fetch_add(1, Ordering::Relaxed) + 1;
                NodeId(format!("c{n}"))
            }
            IdSpace::RuntimeAst => {
                let n = self.runtime.fetch_add(1, Ordering::Relaxed) + 1;
                NodeId(format!("r{n}"))
            }
        }
    }
}

// =============================================================================
// PROPERTY VALUES
// =============================================================================

/// A transformed property value: nested declarative nodes become IR, while
/// primitives, arrays and plain records are preserved as-is.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PropValue {
    Node(NodeRef),
    Array(Vec<PropValue>),
    Object(BTreeMap<String, PropValue>),
    Scalar(Value),
}

impl PropValue {
    pub fn scalar(v: impl Into<Value>) -> Self {
        PropValue::Scalar(v.into())
    }

    pub fn node(n: Node) -> Self {
        PropValue::Node(Arc::new(n))
    }

    /// The node inside, if this property is a single IR node.
    pub fn as_node(&self) -> Option<&NodeRef> {
        match self {
            PropValue::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Scalar(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

// =============================================================================
// NODE — id + raw + kind
// =============================================================================

/// An IR node: unique id, the original declarative value it was built from,
/// and the kind payload all later phases dispatch on.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Node {
            id,
            raw: None,
            kind,
        }
    }

    pub fn with_raw(id: NodeId, raw: Value, kind: NodeKind) -> Self {
        Node {
            id,
            raw: Some(raw),
            kind,
        }
    }

    pub fn node_kind(&self) -> &'static str {
        self.kind.kind_name()
    }

    pub fn is_structural(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Journey(_) | NodeKind::Step(_) | NodeKind::Block(_) | NodeKind::Field(_)
        )
    }

    pub fn is_transition(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Load(_) | NodeKind::Access(_) | NodeKind::Action(_) | NodeKind::Submit(_)
        )
    }

    pub fn is_pseudo(&self) -> bool {
        self.pseudo_kind().is_some()
    }

    /// Pseudo-kind and lookup key, for the registry's secondary index.
    pub fn pseudo_kind(&self) -> Option<(PseudoKind, &str)> {
        match &self.kind {
            NodeKind::AnswerLocal(p) => Some((PseudoKind::AnswerLocal, &p.base_field_code)),
            NodeKind::AnswerRemote(p) => Some((PseudoKind::AnswerRemote, &p.base_field_code)),
            NodeKind::Post(p) => Some((PseudoKind::Post, &p.base_field_code)),
            NodeKind::Query(p) => Some((PseudoKind::Query, &p.param_name)),
            NodeKind::Params(p) => Some((PseudoKind::Params, &p.param_name)),
            NodeKind::Data(p) => Some((PseudoKind::Data, &p.base_property)),
            _ => None,
        }
    }
}

/// The six engine-synthesized node kinds that read request/session values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PseudoKind {
    AnswerLocal,
    AnswerRemote,
    Post,
    Query,
    Params,
    Data,
}

// =============================================================================
// NODE KIND — tagged union over every node type
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    // Structural
    #[serde(rename = "journey")]
    Journey(JourneyDef),
    #[serde(rename = "step")]
    Step(StepDef),
    #[serde(rename = "block")]
    Block(BasicBlockDef),
    #[serde(rename = "field")]
    Field(FieldBlockDef),

    // Expressions
    #[serde(rename = "reference")]
    Reference(ReferenceDef),
    #[serde(rename = "format")]
    Format(FormatDef),
    #[serde(rename = "pipeline")]
    Pipeline(PipelineDef),
    #[serde(rename = "iterate")]
    Iterate(IterateDef),
    #[serde(rename = "validation")]
    Validation(ValidationDef),
    #[serde(rename = "next")]
    Next(NextDef),
    #[serde(rename = "function")]
    Function(FunctionDef),

    // Predicates
    #[serde(rename = "test")]
    Test(TestDef),
    #[serde(rename = "and")]
    And(OperandsDef),
    #[serde(rename = "or")]
    Or(OperandsDef),
    #[serde(rename = "xor")]
    Xor(OperandsDef),
    #[serde(rename = "not")]
    Not(NotDef),

    // Transitions
    #[serde(rename = "load")]
    Load(LoadDef),
    #[serde(rename = "access")]
    Access(AccessDef),
    #[serde(rename = "action")]
    Action(ActionDef),
    #[serde(rename = "submit")]
    Submit(SubmitDef),

    // Outcomes
    #[serde(rename = "redirect")]
    Redirect(RedirectDef),
    #[serde(rename = "throwError")]
    ThrowError(ThrowErrorDef),

    // Pre-normalization marker: `Self()` inside a field block.
    #[serde(rename = "self")]
    SelfMarker,

    // Pseudo-nodes (synthesized, never authored)
    #[serde(rename = "answerLocal")]
    AnswerLocal(AnswerLocalDef),
    #[serde(rename = "answerRemote")]
    AnswerRemote(AnswerRemoteDef),
    #[serde(rename = "post")]
    Post(PostDef),
    #[serde(rename = "query")]
    Query(QueryDef),
    #[serde(rename = "params")]
    Params(ParamsDef),
    #[serde(rename = "data")]
    Data(DataDef),
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Journey(_) => "journey",
            NodeKind::Step(_) => "step",
            NodeKind::Block(_) => "block",
            NodeKind::Field(_) => "field",
            NodeKind::Reference(_) => "reference",
            NodeKind::Format(_) => "format",
            NodeKind::Pipeline(_) => "pipeline",
            NodeKind::Iterate(_) => "iterate",
            NodeKind::Validation(_) => "validation",
            NodeKind::Next(_) => "next",
            NodeKind::Function(_) => "function",
            NodeKind::Test(_) => "test",
            NodeKind::And(_) => "and",
            NodeKind::Or(_) => "or",
            NodeKind::Xor(_) => "xor",
            NodeKind::Not(_) => "not",
            NodeKind::Load(_) => "load",
            NodeKind::Access(_) => "access",
            NodeKind::Action(_) => "action",
            NodeKind::Submit(_) => "submit",
            NodeKind::Redirect(_) => "redirect",
            NodeKind::ThrowError(_) => "throwError",
            NodeKind::SelfMarker => "self",
            NodeKind::AnswerLocal(_) => "answerLocal",
            NodeKind::AnswerRemote(_) => "answerRemote",
            NodeKind::Post(_) => "post",
            NodeKind::Query(_) => "query",
            NodeKind::Params(_) => "params",
            NodeKind::Data(_) => "data",
        }
    }
}

// =============================================================================
// STRUCTURAL DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyDef {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Nested sub-journeys.
    pub children: Vec<NodeRef>,
    pub steps: Vec<NodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    pub on_load: Vec<NodeRef>,
    pub on_access: Vec<NodeRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub blocks: Vec<NodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    pub on_load: Vec<NodeRef>,
    pub on_access: Vec<NodeRef>,
    pub on_action: Vec<NodeRef>,
    pub on_submission: Vec<NodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_entry_point: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicBlockDef {
    pub variant: String,
    /// Freeform rendering properties.
    pub properties: BTreeMap<String, PropValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldBlockDef {
    pub variant: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<PropValue>,
    /// Validation nodes.
    pub validate: Vec<NodeRef>,
    /// Predicate; a falsy result clears the answer and suppresses validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependent: Option<NodeRef>,
    /// Render-time passthrough. Applied by the host at submission display,
    /// never evaluated here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatters: Option<Value>,
    /// Submission-time transform over the posted value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_pipeline: Option<NodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<PropValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitize: Option<bool>,
    /// Freeform rendering properties (hint, items, ...).
    pub properties: BTreeMap<String, PropValue>,
}

impl FieldBlockDef {
    /// `sanitize: false` is an explicit opt-out; absent means sanitize.
    pub fn sanitize_enabled(&self) -> bool {
        self.sanitize != Some(false)
    }
}

// =============================================================================
// EXPRESSION DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDef {
    /// Path segments; each is a string or a nested expression evaluated at
    /// runtime (dynamic segments).
    pub path: Vec<PropValue>,
    /// Base identifier (`answers.x` → `x`) when statically known. Drives
    /// pseudo-node synthesis and wiring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}

impl ReferenceDef {
    /// First path segment when static: the namespace this reference reads.
    pub fn namespace(&self) -> Option<&str> {
        self.path.first().and_then(|p| p.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDef {
    /// Template with positional markers `%1..%n`.
    pub template: String,
    pub args: Vec<PropValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDef {
    /// Missing inputs on field `formatPipeline`s are injected by the
    /// normalizer as a `@scope.@value` reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<NodeRef>,
    pub steps: Vec<NodeRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IterateDef {
    pub collection: NodeRef,
    /// Declarative JSON templates, instantiated per item at runtime via the
    /// evaluator's node-creation hooks.
    pub template: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<PropValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDef {
    /// The failure condition: truthy means the validation did NOT pass.
    pub when: NodeRef,
    pub message: PropValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<NodeRef>,
    pub goto: PropValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionKind {
    Condition,
    Transformer,
    Generator,
    Effect,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDef {
    pub kind: FunctionKind,
    pub name: String,
    pub arguments: Vec<PropValue>,
}

// =============================================================================
// PREDICATE DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDef {
    pub subject: PropValue,
    pub condition: NodeRef,
    pub negate: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperandsDef {
    pub operands: Vec<NodeRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotDef {
    pub operand: NodeRef,
}

// =============================================================================
// TRANSITION DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadDef {
    pub effects: Vec<NodeRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDef {
    pub effects: Vec<NodeRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<NodeRef>,
    pub effects: Vec<NodeRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<NodeRef>,
    pub validate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_valid: Option<SubmitBranch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_invalid: Option<SubmitBranch>,
}

/// One arm of a submission: side effects, then navigation targets. `next`
/// holds Next nodes and/or unconditional Redirect/ThrowError outcomes; the
/// first entry whose condition passes decides navigation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBranch {
    pub effects: Vec<NodeRef>,
    pub next: Vec<NodeRef>,
}

// =============================================================================
// OUTCOME DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectDef {
    pub goto: PropValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrowErrorDef {
    pub code: String,
    pub message: PropValue,
}

// =============================================================================
// PSEUDO-NODE DEFINITIONS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerLocalDef {
    pub base_field_code: String,
    /// Back-reference to the owning field block, by id (never a pointer).
    pub field_node_id: NodeId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRemoteDef {
    pub base_field_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDef {
    pub base_field_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDef {
    pub param_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsDef {
    pub param_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDef {
    pub base_property: String,
}

// =============================================================================
// CHILD PROPERTY VIEW — uniform tree shape for the traverser
// =============================================================================

impl Node {
    /// The node's properties as `(name, value)` pairs in declaration order.
    /// Child links are cheap `Arc` clones; this is the uniform shape the
    /// structural traverser walks.
    pub fn properties(&self) -> Vec<(String, PropValue)> {
        fn nodes(list: &[NodeRef]) -> PropValue {
            PropValue::Array(list.iter().map(|n| PropValue::Node(n.clone())).collect())
        }
        fn node(n: &NodeRef) -> PropValue {
            PropValue::Node(n.clone())
        }
        fn text(s: &str) -> PropValue {
            PropValue::Scalar(Value::String(s.to_string()))
        }

        match &self.kind {
            NodeKind::Journey(j) => {
                let mut props = vec![
                    ("path".to_string(), text(&j.path)),
                    ("children".to_string(), nodes(&j.children)),
                    ("steps".to_string(), nodes(&j.steps)),
                    ("onLoad".to_string(), nodes(&j.on_load)),
                    ("onAccess".to_string(), nodes(&j.on_access)),
                ];
                if let Some(view) = &j.view {
                    props.push(("view".to_string(), text(view)));
                }
                props
            }
            NodeKind::Step(s) => {
                let mut props = vec![
                    ("path".to_string(), text(&s.path)),
                    ("blocks".to_string(), nodes(&s.blocks)),
                    ("onLoad".to_string(), nodes(&s.on_load)),
                    ("onAccess".to_string(), nodes(&s.on_access)),
                    ("onAction".to_string(), nodes(&s.on_action)),
                    ("onSubmission".to_string(), nodes(&s.on_submission)),
                ];
                if let Some(view) = &s.view {
                    props.push(("view".to_string(), text(view)));
                }
                props
            }
            NodeKind::Block(b) => {
                let mut props = vec![("variant".to_string(), text(&b.variant))];
                for (k, v) in &b.properties {
                    props.push((k.clone(), v.clone()));
                }
                props
            }
            NodeKind::Field(f) => {
                let mut props = vec![
                    ("variant".to_string(), text(&f.variant)),
                    ("code".to_string(), text(&f.code)),
                    ("validate".to_string(), nodes(&f.validate)),
                ];
                if let Some(label) = &f.label {
                    props.push(("label".to_string(), label.clone()));
                }
                if let Some(dep) = &f.dependent {
                    props.push(("dependent".to_string(), node(dep)));
                }
                if let Some(fp) = &f.format_pipeline {
                    props.push(("formatPipeline".to_string(), node(fp)));
                }
                if let Some(dv) = &f.default_value {
                    props.push(("defaultValue".to_string(), dv.clone()));
                }
                for (k, v) in &f.properties {
                    props.push((k.clone(), v.clone()));
                }
                props
            }
            NodeKind::Reference(r) => vec![("path".to_string(), PropValue::Array(r.path.clone()))],
            NodeKind::Format(f) => vec![
                ("template".to_string(), text(&f.template)),
                ("args".to_string(), PropValue::Array(f.args.clone())),
            ],
            NodeKind::Pipeline(p) => {
                let mut props = Vec::new();
                if let Some(input) = &p.input {
                    props.push(("input".to_string(), node(input)));
                }
                props.push(("steps".to_string(), nodes(&p.steps)));
                props
            }
            NodeKind::Iterate(it) => {
                let mut props = vec![("collection".to_string(), node(&it.collection))];
                if let Some(fb) = &it.fallback {
                    props.push(("fallback".to_string(), fb.clone()));
                }
                props
            }
            NodeKind::Validation(v) => {
                vec![("when".to_string(), node(&v.when)), ("message".to_string(), v.message.clone())]
            }
            NodeKind::Next(n) => {
                let mut props = Vec::new();
                if let Some(when) = &n.when {
                    props.push(("when".to_string(), node(when)));
                }
                props.push(("goto".to_string(), n.goto.clone()));
                props
            }
            NodeKind::Function(f) => vec![
                ("name".to_string(), text(&f.name)),
                ("arguments".to_string(), PropValue::Array(f.arguments.clone())),
            ],
            NodeKind::Test(t) => vec![
                ("subject".to_string(), t.subject.clone()),
                ("condition".to_string(), node(&t.condition)),
            ],
            NodeKind::And(o) | NodeKind::Or(o) | NodeKind::Xor(o) => {
                vec![("operands".to_string(), nodes(&o.operands))]
            }
            NodeKind::Not(n) => vec![("operand".to_string(), node(&n.operand))],
            NodeKind::Load(t) => vec![("effects".to_string(), nodes(&t.effects))],
            NodeKind::Access(t) => vec![("effects".to_string(), nodes(&t.effects))],
            NodeKind::Action(t) => {
                let mut props = Vec::new();
                if let Some(when) = &t.when {
                    props.push(("when".to_string(), node(when)));
                }
                props.push(("effects".to_string(), nodes(&t.effects)));
                props
            }
            NodeKind::Submit(s) => {
                let mut props = Vec::new();
                if let Some(when) = &s.when {
                    props.push(("when".to_string(), node(when)));
                }
                if let Some(valid) = &s.on_valid {
                    props.push(("onValidEffects".to_string(), nodes(&valid.effects)));
                    props.push(("onValidNext".to_string(), nodes(&valid.next)));
                }
                if let Some(invalid) = &s.on_invalid {
                    props.push(("onInvalidEffects".to_string(), nodes(&invalid.effects)));
                    props.push(("onInvalidNext".to_string(), nodes(&invalid.next)));
                }
                props
            }
            NodeKind::Redirect(r) => vec![("goto".to_string(), r.goto.clone())],
            NodeKind::ThrowError(e) => {
                vec![("code".to_string(), text(&e.code)), ("message".to_string(), e.message.clone())]
            }
            NodeKind::SelfMarker => vec![],
            NodeKind::AnswerLocal(_)
            | NodeKind::AnswerRemote(_)
            | NodeKind::Post(_)
            | NodeKind::Query(_)
            | NodeKind::Params(_)
            | NodeKind::Data(_) => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generator_spaces_are_disjoint() {
        let generator = IdGenerator::new();
        let a = generator.next(IdSpace::CompileAst);
        let b = generator.next(IdSpace::CompileAst);
        let r = generator.next(IdSpace::RuntimeAst);
        assert_eq!(a.as_str(), "c1");
        assert_eq!(b.as_str(), "c2");
        assert_eq!(r.as_str(), "r1");
        assert!(r.is_runtime());
        assert!(!a.is_runtime());
    }

    #[test]
    fn sanitize_defaults_on() {
        let field = FieldBlockDef {
            variant: "text".into(),
            code: "email".into(),
            label: None,
            validate: vec![],
            dependent: None,
            formatters: None,
            format_pipeline: None,
            default_value: None,
            sanitize: None,
            properties: BTreeMap::new(),
        };
        assert!(field.sanitize_enabled());
    }

    #[test]
    fn pseudo_kind_keys() {
        let node = Node::new(
            NodeId::from("c9"),
            NodeKind::Query(QueryDef {
                param_name: "page".into(),
            }),
        );
        assert_eq!(node.pseudo_kind(), Some((PseudoKind::Query, "page")));
        assert!(node.is_pseudo());
    }
}
