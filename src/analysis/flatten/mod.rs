//! Flattening of structured statements into an analyzable graph.
//!
//! The SSA and liveness passes do not walk the nested statement tree. They run
//! over a [`DirectGraph`] in which every expression list of the tree becomes
//! one node: basic statements, the head expressions of `if`/`switch`/
//! `synchronized` (as `_tail` nodes), loop conditions, `for` initializers and
//! increments. Try statements get a `_try` entry node fanning out to the body
//! and every handler.
//!
//! # Finally Handlers
//!
//! A `finally` handler is entered from every edge that leaves its protected
//! body. The flattener routes each such edge through the handler and records,
//! for the node where the handler completes, which source the path came from
//! and where it continues:
//!
//! - **short range**: the innermost handler only
//! - **long range**: through all nested handlers up to the outermost source
//!
//! The SSA constructors use these records to keep the versions of different
//! exits from mixing at the handler's exit node.
//!
//! # Examples
//!
//! ```rust,ignore
//! use classflow::analysis::flatten::flatten;
//!
//! let graph = flatten(&tree)?;
//! for node in graph.nodes() {
//!     println!("{} -> {:?}", node.id, node.succs());
//! }
//! ```

mod flattener;
mod graph;

pub use flattener::flatten;
pub use graph::{DirectGraph, DirectNode, DirectNodeKind, ExprAction, FinallyPathWrapper, NodeIdx};
