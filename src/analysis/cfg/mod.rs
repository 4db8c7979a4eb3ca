//! Control Flow Graph (CFG) construction and subroutine inlining.
//!
//! This module turns an [`InstructionSequence`](crate::assembly::InstructionSequence)
//! into basic blocks connected by regular and exception edges, and rewrites
//! legacy `jsr`/`ret` subroutines into ordinary control flow.
//!
//! # Key Components
//!
//! - [`ControlFlowGraph`] - Block arena, exception ranges and subroutine map
//! - [`BasicBlock`] - Straight-line instruction run with its adjacency lists
//! - [`ExceptionRange`] - Protected blocks plus handler and caught types
//!
//! # Edge Types
//!
//! - **Regular**: jumps, switch targets, fall-through and `ret` returns
//! - **Exception**: from each protected block to its handler
//!
//! # Examples
//!
//! ```rust,ignore
//! use classflow::analysis::ControlFlowGraph;
//!
//! let mut cfg = ControlFlowGraph::build(&sequence)?;
//! cfg.inline_jsr(&ctx, &pool, &method)?;
//!
//! for block in cfg.blocks() {
//!     println!("block {} -> {:?}", block.id, block.succs());
//! }
//! ```

mod block;
mod dead;
mod graph;
mod range;
mod subroutine;

pub use block::{BasicBlock, BlockId};
pub use graph::ControlFlowGraph;
pub use range::ExceptionRange;
