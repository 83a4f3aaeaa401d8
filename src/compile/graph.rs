//! petgraph-based dependency multigraph over registered nodes.
//!
//! Edges point from a dependency to its consumer, so a topological sort
//! yields operands before the nodes that read them. That order drives
//! `is_async` computation; runtime evaluation stays lazy and demand-driven.

use std::collections::HashMap;

use petgraph::algo::{is_cyclic_directed, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::ir::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    DataFlow,
    ControlFlow,
    Structural,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMeta {
    pub kind: EdgeKind,
    /// Property of the consumer this dependency feeds.
    pub property: String,
    /// Position within that property, for list operands.
    pub index: Option<usize>,
}

impl EdgeMeta {
    pub fn data(property: &str) -> Self {
        EdgeMeta {
            kind: EdgeKind::DataFlow,
            property: property.to_string(),
            index: None,
        }
    }

    pub fn data_at(property: &str, index: usize) -> Self {
        EdgeMeta {
            kind: EdgeKind::DataFlow,
            property: property.to_string(),
            index: Some(index),
        }
    }

    pub fn control(property: &str) -> Self {
        EdgeMeta {
            kind: EdgeKind::ControlFlow,
            property: property.to_string(),
            index: None,
        }
    }

    pub fn structural(property: &str, index: usize) -> Self {
        EdgeMeta {
            kind: EdgeKind::Structural,
            property: property.to_string(),
            index: Some(index),
        }
    }
}

/// Result of a topological sort over the graph.
#[derive(Debug, Clone)]
pub struct TopoSort {
    pub sort: Vec<NodeId>,
    pub cycles: Vec<Vec<NodeId>>,
}

impl TopoSort {
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub graph: DiGraph<NodeId, EdgeMeta>,
    pub node_indices: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_node(&mut self, id: &NodeId) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.node_indices.insert(id.clone(), idx);
        idx
    }

    /// Add an edge from a dependency to the node that consumes it.
    pub fn add_edge(&mut self, dependency: &NodeId, consumer: &NodeId, meta: EdgeMeta) {
        let from = self.ensure_node(dependency);
        let to = self.ensure_node(consumer);
        self.graph.add_edge(from, to, meta);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_indices.contains_key(id)
    }

    /// Nodes this node reads (incoming edges).
    pub fn dependencies_of(&self, id: &NodeId) -> Vec<&NodeId> {
        let Some(&idx) = self.node_indices.get(id) else {
            return vec![];
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Nodes that read this node (outgoing edges).
    pub fn dependents_of(&self, id: &NodeId) -> Vec<&NodeId> {
        let Some(&idx) = self.node_indices.get(id) else {
            return vec![];
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Outgoing)
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Every node reachable downstream of `id`, excluding `id` itself.
    pub fn descendants_of(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(&start) = self.node_indices.get(id) else {
            return vec![];
        };
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![start];
        let mut out = Vec::new();
        while let Some(idx) = stack.pop() {
            for next in self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Outgoing)
            {
                if seen.insert(next) {
                    out.push(self.graph[next].clone());
                    stack.push(next);
                }
            }
        }
        out
    }

    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Topological order plus the cycle list when the graph is not a DAG.
    pub fn topological_sort(&self) -> TopoSort {
        match toposort(&self.graph, None) {
            Ok(indices) => TopoSort {
                sort: indices.into_iter().map(|i| self.graph[i].clone()).collect(),
                cycles: vec![],
            },
            Err(_) => {
                let mut cycles = Vec::new();
                for component in tarjan_scc(&self.graph) {
                    let in_cycle = component.len() > 1
                        || component
                            .first()
                            .is_some_and(|&n| self.graph.find_edge(n, n).is_some());
                    if in_cycle {
                        cycles.push(component.iter().map(|&i| self.graph[i].clone()).collect());
                    }
                }
                TopoSort {
                    sort: vec![],
                    cycles,
                }
            }
        }
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topo_orders_dependencies_first() {
        let mut graph = DependencyGraph::new();
        let a = NodeId::from("c1");
        let b = NodeId::from("c2");
        let c = NodeId::from("c3");
        graph.add_edge(&a, &b, EdgeMeta::data("input"));
        graph.add_edge(&b, &c, EdgeMeta::data("input"));
        let topo = graph.topological_sort();
        assert!(!topo.has_cycles());
        let pos = |id: &NodeId| topo.sort.iter().position(|x| x == id).unwrap();
        assert!(pos(&a) < pos(&b));
        assert!(pos(&b) < pos(&c));
    }

    #[test]
    fn cycles_are_reported_with_members() {
        let mut graph = DependencyGraph::new();
        let a = NodeId::from("c1");
        let b = NodeId::from("c2");
        graph.add_edge(&a, &b, EdgeMeta::data("x"));
        graph.add_edge(&b, &a, EdgeMeta::data("y"));
        let topo = graph.topological_sort();
        assert!(topo.has_cycles());
        assert_eq!(topo.cycles.len(), 1);
        assert_eq!(topo.cycles[0].len(), 2);
        assert!(graph.is_cyclic());
    }

    #[test]
    fn descendants_are_transitive() {
        let mut graph = DependencyGraph::new();
        let a = NodeId::from("c1");
        let b = NodeId::from("c2");
        let c = NodeId::from("c3");
        graph.add_edge(&a, &b, EdgeMeta::data("x"));
        graph.add_edge(&b, &c, EdgeMeta::data("x"));
        let mut down = graph.descendants_of(&a);
        down.sort();
        assert_eq!(down, vec![b, c]);
    }
}
