//! Depth-first structural traverser over IR trees.
//!
//! Walks any value shape the IR contains: nodes, arrays, plain records and
//! primitives. Registration, pseudo-node scanning and the projection passes
//! are all visitors over this walk.

use std::collections::BTreeMap;

use serde_json::Value;

use super::node::{Node, NodeRef, PropValue};

// =============================================================================
// FLOW CONTROL
// =============================================================================

/// What a visitor method tells the traverser to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Descend into children.
    Continue,
    /// Do not descend into this construct's children; keep walking siblings.
    Skip,
    /// Abort the entire traversal.
    Stop,
}

// =============================================================================
// VISIT CONTEXT
// =============================================================================

/// One segment of the path from the root to the current visit site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathSeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSeg::Key(k) => write!(f, "{k}"),
            PathSeg::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Position information handed to every visitor method.
#[derive(Debug)]
pub struct VisitContext<'a> {
    /// Property keys and indices from the root to here.
    pub path: &'a [PathSeg],
    pub depth: usize,
    /// Kind of the node being visited, for node visits.
    pub kind: Option<&'static str>,
    /// Property key this value sits under, if any.
    pub key: Option<&'a str>,
    /// Element index this value sits at, if any.
    pub index: Option<usize>,
    pub siblings: usize,
    pub sibling_index: usize,
    /// Keys of the enclosing node's properties, for property visits.
    pub property_keys: Option<&'a [String]>,
    pub property_index: Option<usize>,
    /// Nearest enclosing node.
    pub parent: Option<&'a NodeRef>,
    /// All enclosing nodes, outermost first.
    pub ancestors: &'a [NodeRef],
    /// For each ancestor, whether it was the last of its siblings.
    pub ancestor_last_states: &'a [bool],
}

impl<'a> VisitContext<'a> {
    pub fn is_first(&self) -> bool {
        self.sibling_index == 0
    }

    pub fn is_last(&self) -> bool {
        self.siblings == 0 || self.sibling_index + 1 == self.siblings
    }

    pub fn is_first_property(&self) -> bool {
        self.property_index == Some(0)
    }

    pub fn is_last_property(&self) -> bool {
        match (self.property_index, self.property_keys) {
            (Some(i), Some(keys)) => i + 1 == keys.len(),
            _ => false,
        }
    }

    pub fn parent_kind(&self) -> Option<&'static str> {
        self.parent.map(|p| p.node_kind())
    }

    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }
}

// =============================================================================
// VISITOR
// =============================================================================

/// Depth-first visitor. Every method defaults to `Continue`; implement only
/// the hooks a pass needs.
#[allow(unused_variables)]
pub trait Visitor {
    fn enter_node(&mut self, node: &NodeRef, cx: &VisitContext<'_>) -> Flow {
        Flow::Continue
    }
    fn exit_node(&mut self, node: &NodeRef, cx: &VisitContext<'_>) {}

    fn enter_property(&mut self, key: &str, value: &PropValue, cx: &VisitContext<'_>) -> Flow {
        Flow::Continue
    }
    fn exit_property(&mut self, key: &str, cx: &VisitContext<'_>) {}

    fn enter_array(&mut self, items: &[PropValue], cx: &VisitContext<'_>) -> Flow {
        Flow::Continue
    }
    fn exit_array(&mut self, items: &[PropValue], cx: &VisitContext<'_>) {}

    fn enter_element(&mut self, item: &PropValue, cx: &VisitContext<'_>) -> Flow {
        Flow::Continue
    }
    fn exit_element(&mut self, item: &PropValue, cx: &VisitContext<'_>) {}

    fn visit_primitive(&mut self, value: &Value, cx: &VisitContext<'_>) -> Flow {
        Flow::Continue
    }

    fn visit_object(&mut self, entries: &BTreeMap<String, PropValue>, cx: &VisitContext<'_>) -> Flow {
        Flow::Continue
    }
}

/// Reorders a node's property list before the walk descends into it.
pub type PropertyOrder = fn(&Node, &mut Vec<(String, PropValue)>);

// =============================================================================
// TRAVERSER
// =============================================================================

pub struct Traverser {
    /// Call `visit_object` on plain records.
    pub visit_objects: bool,
    /// Descend into plain-record values (a record may hold nested nodes).
    pub visit_maps: bool,
    pub property_order: Option<PropertyOrder>,
}

impl Default for Traverser {
    fn default() -> Self {
        Traverser {
            visit_objects: true,
            visit_maps: true,
            property_order: None,
        }
    }
}

impl Traverser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk a node tree. Returns `Flow::Stop` if a visitor aborted.
    pub fn walk(&self, root: &NodeRef, visitor: &mut dyn Visitor) -> Flow {
        let mut walk = Walk {
            options: self,
            visitor,
            path: Vec::new(),
            ancestors: Vec::new(),
            ancestor_last: Vec::new(),
        };
        walk.node(root, Site::root())
    }

    /// Walk an arbitrary property value (used for freeform subtrees).
    pub fn walk_value(&self, value: &PropValue, visitor: &mut dyn Visitor) -> Flow {
        let mut walk = Walk {
            options: self,
            visitor,
            path: Vec::new(),
            ancestors: Vec::new(),
            ancestor_last: Vec::new(),
        };
        walk.value(value, Site::root())
    }
}

/// Where the current value sits relative to its parent.
#[derive(Clone, Copy, Default)]
struct Site<'a> {
    key: Option<&'a str>,
    index: Option<usize>,
    siblings: usize,
    sibling_index: usize,
    property_keys: Option<&'a [String]>,
    property_index: Option<usize>,
}

impl<'a> Site<'a> {
    fn root() -> Self {
        Site::default()
    }
}

struct Walk<'t, 'v> {
    options: &'t Traverser,
    visitor: &'v mut dyn Visitor,
    path: Vec<PathSeg>,
    ancestors: Vec<NodeRef>,
    ancestor_last: Vec<bool>,
}

/// Built from disjoint `Walk` fields so visitor calls can borrow the
/// visitor mutably while the context is alive.
fn make_cx<'a>(
    path: &'a [PathSeg],
    ancestors: &'a [NodeRef],
    ancestor_last: &'a [bool],
    kind: Option<&'static str>,
    site: &Site<'a>,
) -> VisitContext<'a> {
    VisitContext {
        path,
        depth: ancestors.len(),
        kind,
        key: site.key,
        index: site.index,
        siblings: site.siblings,
        sibling_index: site.sibling_index,
        property_keys: site.property_keys,
        property_index: site.property_index,
        parent: ancestors.last(),
        ancestors,
        ancestor_last_states: ancestor_last,
    }
}

impl Walk<'_, '_> {
    fn node(&mut self, node: &NodeRef, site: Site<'_>) -> Flow {
        let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, Some(node.node_kind()), &site);
        match self.visitor.enter_node(node, &cx) {
            Flow::Continue => {}
            Flow::Skip => {
                let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, Some(node.node_kind()), &site);
                self.visitor.exit_node(node, &cx);
                return Flow::Continue;
            }
            Flow::Stop => return Flow::Stop,
        }

        let mut props = node.properties();
        if let Some(order) = self.options.property_order {
            order(node, &mut props);
        }
        let keys: Vec<String> = props.iter().map(|(k, _)| k.clone()).collect();

        self.ancestors.push(node.clone());
        self.ancestor_last.push(site.siblings == 0 || site.sibling_index + 1 == site.siblings);

        let mut flow = Flow::Continue;
        for (prop_index, (key, value)) in props.iter().enumerate() {
            let prop_site = Site {
                key: Some(key),
                index: None,
                siblings: props.len(),
                sibling_index: prop_index,
                property_keys: Some(&keys),
                property_index: Some(prop_index),
            };
            let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &prop_site);
            match self.visitor.enter_property(key, value, &cx) {
                Flow::Continue => {}
                Flow::Skip => {
                    let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &prop_site);
                    self.visitor.exit_property(key, &cx);
                    continue;
                }
                Flow::Stop => {
                    flow = Flow::Stop;
                    break;
                }
            }

            self.path.push(PathSeg::Key(key.clone()));
            let inner = self.value(value, prop_site);
            self.path.pop();

            let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &prop_site);
            self.visitor.exit_property(key, &cx);

            if inner == Flow::Stop {
                flow = Flow::Stop;
                break;
            }
        }

        self.ancestors.pop();
        self.ancestor_last.pop();

        if flow == Flow::Stop {
            return Flow::Stop;
        }
        let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, Some(node.node_kind()), &site);
        self.visitor.exit_node(node, &cx);
        Flow::Continue
    }

    fn value(&mut self, value: &PropValue, site: Site<'_>) -> Flow {
        match value {
            PropValue::Node(node) => self.node(node, site),
            PropValue::Array(items) => self.array(items, site),
            PropValue::Object(entries) => self.object(entries, site),
            PropValue::Scalar(scalar) => {
                let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &site);
                match self.visitor.visit_primitive(scalar, &cx) {
                    Flow::Stop => Flow::Stop,
                    _ => Flow::Continue,
                }
            }
        }
    }

    fn array(&mut self, items: &[PropValue], site: Site<'_>) -> Flow {
        let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &site);
        match self.visitor.enter_array(items, &cx) {
            Flow::Continue => {}
            Flow::Skip => {
                let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &site);
                self.visitor.exit_array(items, &cx);
                return Flow::Continue;
            }
            Flow::Stop => return Flow::Stop,
        }

        let mut flow = Flow::Continue;
        for (index, item) in items.iter().enumerate() {
            let elem_site = Site {
                key: None,
                index: Some(index),
                siblings: items.len(),
                sibling_index: index,
                property_keys: None,
                property_index: None,
            };
            let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &elem_site);
            match self.visitor.enter_element(item, &cx) {
                Flow::Continue => {}
                Flow::Skip => {
                    let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &elem_site);
                    self.visitor.exit_element(item, &cx);
                    continue;
                }
                Flow::Stop => {
                    flow = Flow::Stop;
                    break;
                }
            }

            self.path.push(PathSeg::Index(index));
            let inner = self.value(item, elem_site);
            self.path.pop();

            let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &elem_site);
            self.visitor.exit_element(item, &cx);

            if inner == Flow::Stop {
                flow = Flow::Stop;
                break;
            }
        }

        if flow == Flow::Stop {
            return Flow::Stop;
        }
        let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &site);
        self.visitor.exit_array(items, &cx);
        Flow::Continue
    }

    fn object(&mut self, entries: &BTreeMap<String, PropValue>, site: Site<'_>) -> Flow {
        if self.options.visit_objects {
            let cx = make_cx(&self.path, &self.ancestors, &self.ancestor_last, None, &site);
            match self.visitor.visit_object(entries, &cx) {
                Flow::Continue => {}
                Flow::Skip => return Flow::Continue,
                Flow::Stop => return Flow::Stop,
            }
        }
        if !self.options.visit_maps {
            return Flow::Continue;
        }

        for (index, (key, value)) in entries.iter().enumerate() {
            let entry_site = Site {
                key: Some(key),
                index: None,
                siblings: entries.len(),
                sibling_index: index,
                property_keys: None,
                property_index: None,
            };
            self.path.push(PathSeg::Key(key.clone()));
            let inner = self.value(value, entry_site);
            self.path.pop();
            if inner == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ir::node::*;

    fn reference(id: &str, segments: &[&str]) -> Node {
        Node::new(
            NodeId::from(id),
            NodeKind::Reference(ReferenceDef {
                path: segments
                    .iter()
                    .map(|s| PropValue::scalar(Value::String(s.to_string())))
                    .collect(),
                base: segments.get(1).map(|s| s.to_string()),
            }),
        )
    }

    struct Collector {
        kinds: Vec<&'static str>,
        primitives: usize,
    }

    impl Visitor for Collector {
        fn enter_node(&mut self, node: &NodeRef, _cx: &VisitContext<'_>) -> Flow {
            self.kinds.push(node.node_kind());
            Flow::Continue
        }
        fn visit_primitive(&mut self, _value: &Value, _cx: &VisitContext<'_>) -> Flow {
            self.primitives += 1;
            Flow::Continue
        }
    }

    #[test]
    fn walks_nested_nodes_and_primitives() {
        let inner = reference("c2", &["answers", "town"]);
        let format = Node::new(
            NodeId::from("c1"),
            NodeKind::Format(FormatDef {
                template: "hello %1".into(),
                args: vec![PropValue::node(inner)],
            }),
        );
        let root: NodeRef = Arc::new(format);

        let mut collector = Collector {
            kinds: vec![],
            primitives: 0,
        };
        let flow = Traverser::new().walk(&root, &mut collector);
        assert_eq!(flow, Flow::Continue);
        assert_eq!(collector.kinds, vec!["format", "reference"]);
        // template scalar + two path segments
        assert_eq!(collector.primitives, 3);
    }

    struct Stopper {
        seen: usize,
    }

    impl Visitor for Stopper {
        fn enter_node(&mut self, _node: &NodeRef, _cx: &VisitContext<'_>) -> Flow {
            self.seen += 1;
            if self.seen == 1 { Flow::Continue } else { Flow::Stop }
        }
    }

    #[test]
    fn stop_aborts_traversal() {
        let a = reference("c2", &["answers", "a"]);
        let b = reference("c3", &["answers", "b"]);
        let format = Node::new(
            NodeId::from("c1"),
            NodeKind::Format(FormatDef {
                template: "%1 %2".into(),
                args: vec![PropValue::node(a), PropValue::node(b)],
            }),
        );
        let root: NodeRef = Arc::new(format);

        let mut stopper = Stopper { seen: 0 };
        assert_eq!(Traverser::new().walk(&root, &mut stopper), Flow::Stop);
        assert_eq!(stopper.seen, 2);
    }

    struct PathProbe {
        paths: Vec<String>,
    }

    impl Visitor for PathProbe {
        fn enter_node(&mut self, _node: &NodeRef, cx: &VisitContext<'_>) -> Flow {
            self.paths.push(cx.path_string());
            Flow::Continue
        }
    }

    #[test]
    fn paths_carry_keys_and_indices() {
        let inner = reference("c2", &["data", "x"]);
        let format = Node::new(
            NodeId::from("c1"),
            NodeKind::Format(FormatDef {
                template: "%1".into(),
                args: vec![PropValue::node(inner)],
            }),
        );
        let root: NodeRef = Arc::new(format);

        let mut probe = PathProbe { paths: vec![] };
        Traverser::new().walk(&root, &mut probe);
        assert_eq!(probe.paths, vec!["".to_string(), "args.[0]".to_string()]);
    }
}
