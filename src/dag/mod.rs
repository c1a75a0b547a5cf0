//! Directed-acyclic-graph storage and traversal.
//!
//! The graph is generic over its node type so the controller can store
//! its tagged node variant while tests use lightweight stand-ins. Edges
//! are kept bidirectionally for O(1) dependency and dependant lookup.

mod graph;
mod node_id;
mod reduce;
mod scc;
mod walk;

pub use graph::*;
pub use node_id::*;
pub use reduce::*;
pub use scc::*;
pub use walk::*;

#[cfg(test)]
mod graph_test;

/// The minimal contract a graph vertex satisfies: a stable identity.
pub trait Node: Clone {
    fn node_id(&self) -> &NodeId;

    /// Whether `self` and `other` are the same underlying node instance,
    /// not merely two nodes sharing an ID.
    fn same_node(
        &self,
        other: &Self,
    ) -> bool;
}
