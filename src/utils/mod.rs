//! Shared data structures used across the analysis passes.
//!
//! - [`BitSet`] - growable dense bit vector
//! - [`graph`] - dense graph ids, traversal and dominators

mod bitset;
pub mod graph;

pub use bitset::{BitSet, BitSetIter};
