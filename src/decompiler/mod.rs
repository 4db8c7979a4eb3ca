//! Per-method driver.
//!
//! A [`MethodDecompiler`] takes [`MethodJob`]s through the whole data-flow
//! pipeline: CFG construction, subroutine inlining, structuring (delegated to
//! a caller supplied [`Structurer`]), versioning, type inference, variable
//! compaction and definition placement.
//!
//! Each method owns its [`DecompileContext`], so independent methods run in
//! parallel on the rayon pool. With [`DecompilerOptions::method_timeout`] set,
//! every method runs on its own worker thread and is abandoned once the
//! deadline passes; the batch records it as [`MethodOutcome::TimedOut`] and
//! moves on.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::{sync::Arc, time::Duration};
//! use classflow::decompiler::{DecompilerOptions, MethodDecompiler};
//!
//! let options = DecompilerOptions::new().with_method_timeout(Some(Duration::from_secs(5)));
//! let outcomes = MethodDecompiler::new(options, Arc::new(structurer)).decompile_all(jobs);
//! let done = outcomes.iter().filter(|o| o.is_success()).count();
//! ```

pub mod config;
pub mod context;
pub mod driver;

pub use config::DecompilerOptions;
pub use context::DecompileContext;
pub use driver::{MethodDecompiler, MethodJob, MethodOutcome, MethodOutput, Structurer};
