//! Walks and dominance over any [`Successors`](super::Successors) graph.
//!
//! The CFG uses these to order blocks and to find which blocks a subroutine
//! owns. The variable version graph uses dominance to decide whether a merged
//! version may replace its sources. Both walks keep an explicit stack so deep
//! nesting never grows the host call stack.

mod dominators;
mod traversal;

pub use dominators::{compute_dominators, DominatorTree};
pub use traversal::{postorder, reverse_postorder};
