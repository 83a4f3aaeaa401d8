//! IR: node types and the structural traverser.

pub mod node;
pub mod traverse;

pub use node::*;
pub use traverse::{Flow, PathSeg, Traverser, VisitContext, Visitor};
