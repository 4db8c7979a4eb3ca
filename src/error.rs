use std::time::Duration;

use thiserror::Error;

/// Builds an [`Error::Malformed`] tagged with the location that detected it.
macro_rules! malformed_error {
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Failure of one method's analysis.
///
/// No variant affects other methods: the batch driver in [`crate::decompiler`]
/// turns each into a failed or timed-out outcome and moves on.
///
/// | Variant | Raised by |
/// |---------|-----------|
/// | [`Error::Malformed`] | CFG building, jsr inlining, tree validation |
/// | [`Error::GraphError`] | CFG edge edits, flattening, statement tree lookups |
/// | [`Error::TypeError`] | descriptor parsing |
/// | [`Error::Timeout`] | [`crate::decompiler::MethodDecompiler::run`] with a deadline |
/// | [`Error::WorkerFailed`] | a worker thread that panicked |
///
/// ```rust,ignore
/// use classflow::{analysis::ControlFlowGraph, Error};
///
/// if let Err(Error::Malformed { message, file, line }) = ControlFlowGraph::build(&sequence) {
///     eprintln!("rejected: {message} ({file}:{line})");
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Structurally inconsistent bytecode or statement tree: an unresolvable
    /// jump target, a `ret` with no open subroutine call, a missing
    /// continuation block after a `jsr`.
    #[error("Malformed method - {file}:{line}: {message}")]
    Malformed {
        /// What was inconsistent
        message: String,
        /// Source file of the check that failed
        file: &'static str,
        /// Source line of the check that failed
        line: u32,
    },

    /// A block or statement id that the graph does not know.
    #[error("Graph - {0}")]
    GraphError(String),

    /// An unparsable type or method descriptor.
    #[error("Type - {0}")]
    TypeError(String),

    /// The per-method deadline expired before analysis finished.
    #[error("Method analysis timed out after {0:?}")]
    Timeout(Duration),

    /// The worker running a method terminated without producing a result.
    #[error("Method worker failed - {0}")]
    WorkerFailed(String),
}
