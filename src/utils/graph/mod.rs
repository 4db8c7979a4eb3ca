//! Graph primitives shared by the control-flow, flattened statement and
//! variable version graphs.
//!
//! The analysis graphs own their nodes in arenas keyed by domain ids and never
//! hold pointers to each other. When an algorithm needs a dense view, the
//! owner builds an [`IndexedGraph`] snapshot and runs the algorithm over
//! [`NodeId`]s.
//!
//! # Key Components
//!
//! - [`NodeId`] - Dense node identifier
//! - [`Successors`] - Minimal adjacency trait consumed by the algorithms
//! - [`IndexedGraph`] - Domain-key to `NodeId` mapping with adjacency lists
//! - [`algorithms`] - Traversals and dominator computation

pub mod algorithms;
mod indexed;

use std::fmt;

pub use indexed::IndexedGraph;

/// Position of a node in a dense renumbering, usable to index per-node vectors.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Wraps a raw position.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// The raw position.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Read access to the forward edges of a graph with dense node ids.
///
/// Implementors guarantee that every id returned by [`Successors::successors`]
/// is below [`Successors::node_count`].
pub trait Successors {
    /// Number of nodes; valid ids are `0..node_count()`.
    fn node_count(&self) -> usize;

    /// Successors of `node` in insertion order.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;
}
