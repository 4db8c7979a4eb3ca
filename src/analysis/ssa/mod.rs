//! SSA versioning of local variables over the flattened statement graph.
//!
//! Two constructors share the same dataflow skeleton: a map from variable to
//! the set of versions reaching a point flows over the [`DirectGraph`] in
//! reverse post order until no node's out-map changes.
//!
//! - [`SsaConstructor`] is the read-only variant. Each plain assignment gets a
//!   version, each read takes the version reaching it or a phi version. Its
//!   output feeds type inference and version merging.
//! - [`SsauConstructor`] is the live variant. Every use gets a version of its
//!   own and the relation between versions is kept in a [`VarVersionsGraph`].
//!
//! # Architecture
//!
//! - [`fastset`] - bit sets over a shared element registry
//! - [`sfmap`] - variable to version-set maps with locals, stack and field keyspaces
//! - [`construct`] - read-only SSA
//! - [`live`] - live SSA
//! - [`vargraph`] - version graph and its dominance queries
//!
//! # Finally Handlers
//!
//! Where a finally handler completes, versions that entered the handler on
//! one path must not leak into a different continuation. Both constructors
//! filter a predecessor's out-map through the path records of the
//! [`DirectGraph`]; the live variant additionally replaces such exit versions
//! by phantom versions.
//!
//! # Usage
//!
//! ```rust,ignore
//! use classflow::analysis::ssa::SsaConstructor;
//!
//! let ssa = SsaConstructor::split_variables(&mut tree, &method)?;
//! for (phi, sources) in &ssa.phi {
//!     println!("{phi} <- {sources:?}");
//! }
//! ```
//!
//! [`DirectGraph`]: crate::analysis::flatten::DirectGraph

pub mod construct;
pub mod fastset;
pub mod live;
pub mod sfmap;
pub mod vargraph;

pub use construct::{SsaConstructor, SsaResult};
pub use fastset::{FastSparseSet, FastSparseSetFactory};
pub use live::{SsauConstructor, SsauResult};
pub use sfmap::{SFormsFastMapDirect, VersionSet};
pub use vargraph::{VarVersionEdge, VarVersionNode, VarVersionsGraph, VersionEdgeKind, VersionFlags};
