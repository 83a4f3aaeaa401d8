//! Pseudo-node synthesis.
//!
//! Pseudo-nodes are never user-authored: they are the handlers that read a
//! value out of the request, the session answers, or the in-flight data
//! map. The scan runs per compiled step over the projected registry, so
//! only identifiers the step actually references produce nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::ir::node::*;
use crate::registry::metadata::{MetaKey, MetadataRegistry};
use crate::registry::nodes::NodeRegistry;

/// Synthesize the step's pseudo-nodes into `registry`. Returns the created
/// nodes so the caller can wire and compile handlers for them.
pub fn synthesize(
    registry: &mut NodeRegistry,
    metadata: &MetadataRegistry,
    ids: &Arc<IdGenerator>,
    space: IdSpace,
) -> Result<Vec<NodeRef>, Vec<EngineError>> {
    let mut errors = Vec::new();
    let mut created: Vec<NodeRef> = Vec::new();

    // Field blocks inside the current step read their value through an
    // AnswerLocal backed by a Post reader.
    let mut local_codes: Vec<String> = Vec::new();
    let mut planned: Vec<(NodeKind, String)> = Vec::new();
    for id in registry.ids_of_kind("field") {
        let Some(entry) = registry.get(id) else {
            continue;
        };
        let NodeKind::Field(field) = &entry.node.kind else {
            continue;
        };
        if !metadata.flag(id, MetaKey::IsDescendantOfStep) {
            continue;
        }
        local_codes.push(field.code.clone());
        if registry.pseudo(PseudoKind::Post, &field.code).is_some() {
            continue;
        }
        planned.push((
            NodeKind::Post(PostDef {
                base_field_code: field.code.clone(),
            }),
            format!("$post.{}", field.code),
        ));
        planned.push((
            NodeKind::AnswerLocal(AnswerLocalDef {
                base_field_code: field.code.clone(),
                field_node_id: id.clone(),
            }),
            format!("$answers.{}", field.code),
        ));
    }

    // References contribute readers for the namespaces they open. Keyed
    // maps deduplicate repeated identifiers.
    let mut remote: BTreeMap<String, ()> = BTreeMap::new();
    let mut query: BTreeMap<String, ()> = BTreeMap::new();
    let mut params: BTreeMap<String, ()> = BTreeMap::new();
    let mut data: BTreeMap<String, ()> = BTreeMap::new();

    for id in registry.ids_of_kind("reference") {
        let Some(entry) = registry.get(id) else {
            continue;
        };
        let NodeKind::Reference(reference) = &entry.node.kind else {
            continue;
        };
        let (Some(namespace), Some(base)) = (reference.namespace(), reference.base.as_deref())
        else {
            continue;
        };
        match namespace {
            "answers"
                if !local_codes.iter().any(|c| c == base)
                    && answer_pseudo(registry, base).is_none() =>
            {
                remote.insert(base.to_string(), ());
            }
            "query" if registry.pseudo(PseudoKind::Query, base).is_none() => {
                query.insert(base.to_string(), ());
            }
            "params" if registry.pseudo(PseudoKind::Params, base).is_none() => {
                params.insert(base.to_string(), ());
            }
            "data" if registry.pseudo(PseudoKind::Data, base).is_none() => {
                data.insert(base.to_string(), ());
            }
            _ => {}
        }
    }

    for code in remote.keys() {
        planned.push((
            NodeKind::AnswerRemote(AnswerRemoteDef {
                base_field_code: code.clone(),
            }),
            format!("$answersRemote.{code}"),
        ));
    }
    for name in query.keys() {
        planned.push((
            NodeKind::Query(QueryDef {
                param_name: name.clone(),
            }),
            format!("$query.{name}"),
        ));
    }
    for name in params.keys() {
        planned.push((
            NodeKind::Params(ParamsDef {
                param_name: name.clone(),
            }),
            format!("$params.{name}"),
        ));
    }
    for name in data.keys() {
        planned.push((
            NodeKind::Data(DataDef {
                base_property: name.clone(),
            }),
            format!("$data.{name}"),
        ));
    }

    for (kind, path) in planned {
        let node = Arc::new(Node::new(ids.next(space), kind));
        match registry.insert(node.clone(), path) {
            Ok(()) => created.push(node),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(created)
    } else {
        Err(errors)
    }
}

/// Resolve an `answers` reference to its pseudo-node, local preferred.
pub fn answer_pseudo<'r>(registry: &'r NodeRegistry, code: &str) -> Option<&'r NodeRef> {
    registry
        .pseudo(PseudoKind::AnswerLocal, code)
        .or_else(|| registry.pseudo(PseudoKind::AnswerRemote, code))
}
