//! Data-flow analysis of a single JVM method.
//!
//! The passes build on each other and on the generic graph infrastructure in
//! [`crate::utils::graph`]:
//!
//! - [`cfg`] - basic blocks, exception ranges and `jsr`/`ret` inlining
//! - [`flatten`] - lowering of a statement tree into a [`flatten::DirectGraph`]
//! - [`ssa`] - variable versioning, phi tracking and the version graph
//! - [`vars`] - type inference, version merging and declaration placement
//!
//! # Usage
//!
//! ```rust,ignore
//! use classflow::analysis::{cfg::ControlFlowGraph, flatten::flatten, ssa::SsaConstructor};
//!
//! let mut cfg = ControlFlowGraph::build(&sequence)?;
//! cfg.inline_jsr(&ctx, &pool, &method)?;
//!
//! let mut tree = structurer.structure(&mut ctx, &cfg, &method)?;
//! let graph = flatten(&tree)?;
//! let ssa = SsaConstructor::split_variables(&mut tree, &method)?;
//! ```

pub mod cfg;
pub mod flatten;
pub mod ssa;
pub mod vars;

pub use cfg::{BasicBlock, BlockId, ControlFlowGraph, ExceptionRange};
pub use flatten::{flatten, DirectGraph, ExprAction, NodeIdx};
pub use ssa::{SsaConstructor, SsauConstructor, VarVersionsGraph};
pub use vars::{VarDefinitionHelper, VarProcessor, VarVersionsProcessor};
