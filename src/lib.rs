// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0


#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # classflow
//!
//! The data-flow core of a JVM class-file decompiler. Given the bytecode of
//! one method, `classflow` builds its control-flow graph, inlines `jsr`/`ret`
//! subroutines, flattens an already structured statement tree into a flat
//! graph, puts local variables into SSA form, infers a type interval for every
//! variable version and finally merges and renumbers versions into the
//! variables a Java source printer would declare.
//!
//! Class-file parsing, control structuring and source printing are outside
//! the crate. Callers hand in decoded instructions and plug their structurer
//! into [`decompiler::MethodDecompiler`].
//!
//! ## Pipeline
//!
//! 1. [`analysis::cfg::ControlFlowGraph::build`] splits the instruction
//!    sequence into basic blocks and attaches exception ranges.
//! 2. [`analysis::cfg::ControlFlowGraph::inline_jsr`] duplicates every
//!    subroutine per call site and removes dead blocks.
//! 3. A [`decompiler::Structurer`] turns the graph into a
//!    [`structure::StatementTree`].
//! 4. [`analysis::flatten::flatten`] lowers the tree into a
//!    [`analysis::flatten::DirectGraph`] with one node per expression list.
//! 5. [`analysis::ssa::SsaConstructor`] versions every variable; the live
//!    variant [`analysis::ssa::SsauConstructor`] additionally tracks which
//!    versions may hold the same value.
//! 6. [`analysis::vars::VarVersionsProcessor`] infers types, merges versions
//!    and compacts indices; [`analysis::vars::VarDefinitionHelper`] places
//!    declarations.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use classflow::{
//!     assembly::{MethodInfo, ResolvedPool},
//!     decompiler::{DecompilerOptions, MethodDecompiler, MethodJob},
//! };
//!
//! let job = MethodJob {
//!     method: MethodInfo::new("a/B", "f", "(Z)I", false)?,
//!     code: sequence,
//!     pool: Arc::new(ResolvedPool::new()),
//! };
//! let decompiler = MethodDecompiler::new(DecompilerOptions::default(), Arc::new(structurer));
//! let output = decompiler.run(job)?;
//! for var in output.vars.vars() {
//!     println!("{}: {} {}", var.index, var.var_type, var.name);
//! }
//! # Ok::<(), classflow::Error>(())
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade. Per-method progress is emitted
//! at `debug`, pass internals at `trace` and abandoned methods at `warn`;
//! install any logger implementation to see them.
//!
//! ## Concurrency
//!
//! Methods are independent units of work. All per-method state lives in a
//! [`decompiler::DecompileContext`], and batches are processed on the rayon
//! thread pool by [`decompiler::MethodDecompiler::decompile_all`].

#[macro_use]
pub(crate) mod error;

/// Instruction model, value types and the constant-pool interface.
pub mod assembly;

/// Statement tree and expression model the analysis passes operate on.
pub mod structure;

/// Control-flow graph, flattening, SSA and variable analysis.
pub mod analysis;

/// Per-method driver with deadlines and parallel batches.
pub mod decompiler;

/// Shared data structures: bit sets and graph utilities.
pub mod utils;

pub use error::Error;

/// `classflow` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
