//! Node factory: declarative JSON → IR nodes.
//!
//! Input objects are discriminated on their `type` string and shape. The
//! factory assigns ids from the generator it was built with, so the same
//! code serves both journey registration (compile space) and iterator
//! template instantiation at runtime (runtime space).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::EngineError;
use crate::ir::node::*;

pub struct NodeFactory {
    ids: Arc<IdGenerator>,
    space: IdSpace,
}

impl NodeFactory {
    pub fn new(ids: Arc<IdGenerator>, space: IdSpace) -> Self {
        NodeFactory { ids, space }
    }

    /// Factory for journey registration: stable compile-space ids.
    pub fn compile_space(ids: Arc<IdGenerator>) -> Self {
        Self::new(ids, IdSpace::CompileAst)
    }

    /// Factory for iterator templates: per-evaluation runtime ids.
    pub fn runtime_space(ids: Arc<IdGenerator>) -> Self {
        Self::new(ids, IdSpace::RuntimeAst)
    }

    fn next_id(&self) -> NodeId {
        self.ids.next(self.space)
    }

    // =========================================================================
    // ENTRY POINTS
    // =========================================================================

    /// Convert one declarative object into an IR node.
    pub fn create_node(&self, input: &Value) -> Result<Node, EngineError> {
        let Some(obj) = input.as_object() else {
            return Err(EngineError::parse(
                "P001",
                format!("Expected a declarative object, got {}", kind_of(input)),
            ));
        };
        let Some(tag) = obj.get("type").and_then(Value::as_str) else {
            return Err(EngineError::parse(
                "P001",
                "Declarative object is missing its 'type' discriminator",
            ));
        };

        let kind = match tag {
            "journey" => self.journey(obj)?,
            "step" => self.step(obj)?,
            "block" => self.block(obj)?,
            "field" => self.field(obj)?,
            "reference" => self.reference(obj)?,
            "format" => self.format(obj)?,
            "pipeline" => self.pipeline(obj)?,
            "iterate" => self.iterate(obj)?,
            "validation" => self.validation(obj)?,
            "next" => self.next(obj)?,
            "function" => self.function(obj)?,
            "test" => self.test(obj)?,
            "and" => NodeKind::And(self.operands(obj)?),
            "or" => NodeKind::Or(self.operands(obj)?),
            "xor" => NodeKind::Xor(self.operands(obj)?),
            "not" => self.not(obj)?,
            "load" => NodeKind::Load(LoadDef {
                effects: self.node_list(obj.get("effects"))?,
            }),
            "access" => NodeKind::Access(AccessDef {
                effects: self.node_list(obj.get("effects"))?,
            }),
            "action" => self.action(obj)?,
            "submit" => self.submit(obj)?,
            "redirect" => NodeKind::Redirect(RedirectDef {
                goto: self.required_value(obj, "goto", "redirect")?,
            }),
            "throwError" => self.throw_error(obj)?,
            "self" => NodeKind::SelfMarker,
            other => {
                return Err(EngineError::parse(
                    "P002",
                    format!("Unknown node type '{other}'"),
                ));
            }
        };

        Ok(Node::with_raw(self.next_id(), input.clone(), kind))
    }

    pub fn create_ref(&self, input: &Value) -> Result<NodeRef, EngineError> {
        self.create_node(input).map(Arc::new)
    }

    /// Recursively transform a value: nested declarative nodes become IR
    /// while primitives, arrays and plain records are preserved.
    pub fn transform_value(&self, input: &Value) -> Result<PropValue, EngineError> {
        match input {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.transform_value(item)?);
                }
                Ok(PropValue::Array(out))
            }
            Value::Object(map) => {
                if map.get("type").and_then(Value::as_str).is_some() {
                    return Ok(PropValue::Node(self.create_ref(input)?));
                }
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.transform_value(v)?);
                }
                Ok(PropValue::Object(out))
            }
            scalar => Ok(PropValue::Scalar(scalar.clone())),
        }
    }

    // =========================================================================
    // STRUCTURAL NODES
    // =========================================================================

    fn journey(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        Ok(NodeKind::Journey(JourneyDef {
            path: self.required_str(obj, "path", "journey")?,
            title: str_prop(obj, "title"),
            children: self.node_list(obj.get("children"))?,
            steps: self.node_list(obj.get("steps"))?,
            view: str_prop(obj, "view"),
            on_load: self.node_list(obj.get("onLoad"))?,
            on_access: self.node_list(obj.get("onAccess"))?,
        }))
    }

    fn step(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        Ok(NodeKind::Step(StepDef {
            path: self.required_str(obj, "path", "step")?,
            title: str_prop(obj, "title"),
            blocks: self.node_list(obj.get("blocks"))?,
            view: str_prop(obj, "view"),
            on_load: self.node_list(obj.get("onLoad"))?,
            on_access: self.node_list(obj.get("onAccess"))?,
            on_action: self.node_list(obj.get("onAction"))?,
            on_submission: self.node_list(obj.get("onSubmission"))?,
            entry: obj.get("entry").and_then(Value::as_bool),
            is_entry_point: obj.get("isEntryPoint").and_then(Value::as_bool),
        }))
    }

    fn block(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        let variant = self.required_str(obj, "variant", "block")?;
        let mut properties = BTreeMap::new();
        for (k, v) in obj {
            if matches!(k.as_str(), "type" | "variant") {
                continue;
            }
            properties.insert(k.clone(), self.transform_value(v)?);
        }
        Ok(NodeKind::Block(BasicBlockDef {
            variant,
            properties,
        }))
    }

    fn field(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        let variant = self.required_str(obj, "variant", "field")?;
        let Some(code) = obj.get("code").and_then(Value::as_str) else {
            return Err(EngineError::parse(
                "P003",
                "Field block is missing its 'code'",
            ));
        };

        let mut properties = BTreeMap::new();
        for (k, v) in obj {
            if matches!(
                k.as_str(),
                "type"
                    | "variant"
                    | "code"
                    | "label"
                    | "validate"
                    | "dependent"
                    | "formatters"
                    | "formatPipeline"
                    | "defaultValue"
                    | "sanitize"
            ) {
                continue;
            }
            properties.insert(k.clone(), self.transform_value(v)?);
        }

        Ok(NodeKind::Field(FieldBlockDef {
            variant,
            code: code.to_string(),
            label: obj
                .get("label")
                .map(|v| self.transform_value(v))
                .transpose()?,
            validate: self.node_list(obj.get("validate"))?,
            dependent: obj.get("dependent").map(|v| self.create_ref(v)).transpose()?,
            formatters: obj.get("formatters").cloned(),
            format_pipeline: obj
                .get("formatPipeline")
                .map(|v| self.create_ref(v))
                .transpose()?,
            default_value: obj
                .get("defaultValue")
                .map(|v| self.transform_value(v))
                .transpose()?,
            sanitize: obj.get("sanitize").and_then(Value::as_bool),
            properties,
        }))
    }

    // =========================================================================
    // EXPRESSIONS
    // =========================================================================

    fn reference(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        let Some(raw_path) = obj.get("path").and_then(Value::as_array) else {
            return Err(EngineError::parse(
                "P004",
                "Reference is missing its 'path' array",
            ));
        };
        let mut path = Vec::with_capacity(raw_path.len());
        for seg in raw_path {
            path.push(self.transform_value(seg)?);
        }
        let base = match (path.first().and_then(PropValue::as_str), path.get(1)) {
            (Some(ns), Some(seg)) if ns != "@scope" => seg.as_str().map(str::to_string),
            _ => None,
        };
        Ok(NodeKind::Reference(ReferenceDef { path, base }))
    }

    fn format(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        let template = self.required_str(obj, "template", "format")?;
        let mut args = Vec::new();
        if let Some(list) = obj.get("args").and_then(Value::as_array) {
            for arg in list {
                args.push(self.transform_value(arg)?);
            }
        }
        Ok(NodeKind::Format(FormatDef { template, args }))
    }

    fn pipeline(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        Ok(NodeKind::Pipeline(PipelineDef {
            input: obj.get("input").map(|v| self.create_ref(v)).transpose()?,
            steps: self.node_list(obj.get("steps"))?,
        }))
    }

    fn iterate(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        let Some(collection) = obj.get("collection") else {
            return Err(EngineError::parse(
                "P005",
                "Iterate is missing its 'collection'",
            ));
        };
        let template = match obj.get("template") {
            Some(Value::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => vec![],
        };
        Ok(NodeKind::Iterate(IterateDef {
            collection: self.create_ref(collection)?,
            template,
            fallback: obj
                .get("fallback")
                .map(|v| self.transform_value(v))
                .transpose()?,
        }))
    }

    fn validation(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        let Some(when) = obj.get("when") else {
            return Err(EngineError::parse(
                "P006",
                "Validation is missing its 'when' condition",
            ));
        };
        Ok(NodeKind::Validation(ValidationDef {
            when: self.create_ref(when)?,
            message: self.required_value(obj, "message", "validation")?,
        }))
    }

    fn next(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        Ok(NodeKind::Next(NextDef {
            when: obj.get("when").map(|v| self.create_ref(v)).transpose()?,
            goto: self.required_value(obj, "goto", "next")?,
        }))
    }

    fn function(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        let kind = match obj.get("kind").and_then(Value::as_str) {
            Some("CONDITION") => FunctionKind::Condition,
            Some("TRANSFORMER") => FunctionKind::Transformer,
            Some("GENERATOR") => FunctionKind::Generator,
            Some("EFFECT") => FunctionKind::Effect,
            other => {
                return Err(EngineError::parse(
                    "P007",
                    format!("Function has unknown kind {other:?}"),
                ));
            }
        };
        let name = self.required_str(obj, "name", "function")?;
        let mut arguments = Vec::new();
        if let Some(list) = obj.get("arguments").and_then(Value::as_array) {
            for arg in list {
                arguments.push(self.transform_value(arg)?);
            }
        }
        Ok(NodeKind::Function(FunctionDef {
            kind,
            name,
            arguments,
        }))
    }

    // =========================================================================
    // PREDICATES
    // =========================================================================

    fn test(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        let Some(condition) = obj.get("condition") else {
            return Err(EngineError::parse(
                "P008",
                "Test is missing its 'condition'",
            ));
        };
        Ok(NodeKind::Test(TestDef {
            subject: self.required_value(obj, "subject", "test")?,
            condition: self.create_ref(condition)?,
            negate: obj
                .get("negate")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }))
    }

    fn operands(&self, obj: &serde_json::Map<String, Value>) -> Result<OperandsDef, EngineError> {
        Ok(OperandsDef {
            operands: self.node_list(obj.get("operands"))?,
        })
    }

    fn not(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        let Some(operand) = obj.get("operand") else {
            return Err(EngineError::parse("P009", "Not is missing its 'operand'"));
        };
        Ok(NodeKind::Not(NotDef {
            operand: self.create_ref(operand)?,
        }))
    }

    // =========================================================================
    // TRANSITIONS & OUTCOMES
    // =========================================================================

    fn action(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        Ok(NodeKind::Action(ActionDef {
            when: obj.get("when").map(|v| self.create_ref(v)).transpose()?,
            effects: self.node_list(obj.get("effects"))?,
        }))
    }

    fn submit(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        Ok(NodeKind::Submit(SubmitDef {
            when: obj.get("when").map(|v| self.create_ref(v)).transpose()?,
            validate: obj.get("validate").and_then(Value::as_bool).unwrap_or(true),
            on_valid: obj
                .get("onValid")
                .map(|v| self.submit_branch(v))
                .transpose()?,
            on_invalid: obj
                .get("onInvalid")
                .map(|v| self.submit_branch(v))
                .transpose()?,
        }))
    }

    fn submit_branch(&self, input: &Value) -> Result<SubmitBranch, EngineError> {
        let Some(obj) = input.as_object() else {
            return Err(EngineError::parse(
                "P010",
                "Submission branch must be an object with 'effects'/'next'",
            ));
        };
        Ok(SubmitBranch {
            effects: self.node_list(obj.get("effects"))?,
            next: self.node_list(obj.get("next"))?,
        })
    }

    fn throw_error(&self, obj: &serde_json::Map<String, Value>) -> Result<NodeKind, EngineError> {
        Ok(NodeKind::ThrowError(ThrowErrorDef {
            code: self.required_str(obj, "code", "throwError")?,
            message: self.required_value(obj, "message", "throwError")?,
        }))
    }

    // =========================================================================
    // SHARED HELPERS
    // =========================================================================

    /// Transition and child lists accept a single object or an array.
    fn node_list(&self, input: Option<&Value>) -> Result<Vec<NodeRef>, EngineError> {
        match input {
            None | Some(Value::Null) => Ok(vec![]),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.create_ref(item)?);
                }
                Ok(out)
            }
            Some(single) => Ok(vec![self.create_ref(single)?]),
        }
    }

    fn required_str(
        &self,
        obj: &serde_json::Map<String, Value>,
        key: &str,
        ctx: &str,
    ) -> Result<String, EngineError> {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::parse("P003", format!("{ctx} is missing its '{key}' string"))
            })
    }

    fn required_value(
        &self,
        obj: &serde_json::Map<String, Value>,
        key: &str,
        ctx: &str,
    ) -> Result<PropValue, EngineError> {
        let Some(v) = obj.get(key) else {
            return Err(EngineError::parse(
                "P003",
                format!("{ctx} is missing its '{key}'"),
            ));
        };
        self.transform_value(v)
    }
}

fn str_prop(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
