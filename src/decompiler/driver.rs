//! Per-method pipeline, deadline handling and batch processing.

use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use log::{debug, warn};
use rayon::prelude::*;

use crate::{
    analysis::{
        cfg::ControlFlowGraph,
        ssa::{SsauConstructor, VarVersionsGraph},
        vars::{DefinitionSite, VarDefinitionHelper, VarProcessor, VarVersionsProcessor},
    },
    assembly::{ConstantPool, InstructionSequence, MethodInfo},
    decompiler::{config::DecompilerOptions, context::DecompileContext},
    structure::StatementTree,
    Error, Result,
};

/// Turns an inlined CFG into a structured statement tree.
///
/// Control structuring lives outside this crate; callers plug their
/// structurer in here. Expression ids may be drawn from
/// [`DecompileContext::next_expr_id`] so they stay unique within the method.
pub trait Structurer: Send + Sync {
    /// Builds the statement tree of `method` from `cfg`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be structured.
    fn structure(&self, ctx: &mut DecompileContext, cfg: &ControlFlowGraph, method: &MethodInfo) -> Result<StatementTree>;
}

/// Everything needed to process one method.
#[derive(Clone)]
pub struct MethodJob {
    /// Identity and signature
    pub method: MethodInfo,
    /// Bytecode with its exception table
    pub code: InstructionSequence,
    /// Resolver for constant-pool operands
    pub pool: Arc<dyn ConstantPool + Send + Sync>,
}

/// Result of a successfully processed method.
#[derive(Debug)]
pub struct MethodOutput {
    /// `Class.name` of the method
    pub method: String,
    /// CFG after subroutine inlining and dead-block removal
    pub cfg: ControlFlowGraph,
    /// Tree with final variable indices
    pub tree: StatementTree,
    /// Variable table
    pub vars: VarProcessor,
    /// Declaration point of every local variable
    pub definitions: Vec<DefinitionSite>,
    /// Version graph of the live variant, when enabled
    pub live_versions: Option<VarVersionsGraph>,
}

/// Per-method result of a batch run.
#[derive(Debug)]
pub enum MethodOutcome {
    /// The pipeline completed
    Decompiled(Box<MethodOutput>),
    /// The pipeline reported an error
    Failed {
        /// Method the error belongs to
        method: String,
        /// Error text
        message: String,
    },
    /// The deadline expired; the worker was abandoned
    TimedOut {
        /// Method that ran out of time
        method: String,
        /// The deadline
        after: Duration,
    },
}

impl MethodOutcome {
    /// The output, if the method completed.
    #[must_use]
    pub fn output(&self) -> Option<&MethodOutput> {
        match self {
            MethodOutcome::Decompiled(output) => Some(output),
            _ => None,
        }
    }

    /// Returns `true` if the method completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, MethodOutcome::Decompiled(_))
    }
}

/// Runs the per-method pipeline: CFG, subroutine inlining, structuring,
/// versioning, typing and definition placement.
///
/// # Examples
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use classflow::decompiler::{DecompilerOptions, MethodDecompiler};
///
/// let decompiler = MethodDecompiler::new(DecompilerOptions::default(), Arc::new(MyStructurer));
/// for outcome in decompiler.decompile_all(jobs) {
///     if let Some(output) = outcome.output() {
///         println!("{}: {} variables", output.method, output.vars.len());
///     }
/// }
/// ```
#[derive(Clone)]
pub struct MethodDecompiler {
    options: DecompilerOptions,
    structurer: Arc<dyn Structurer>,
}

impl MethodDecompiler {
    /// Creates a driver using `structurer` for every method.
    #[must_use]
    pub fn new(options: DecompilerOptions, structurer: Arc<dyn Structurer>) -> Self {
        MethodDecompiler { options, structurer }
    }

    /// Options of the driver.
    #[must_use]
    pub fn options(&self) -> &DecompilerOptions {
        &self.options
    }

    /// Processes one method, on a worker thread when a timeout is set.
    ///
    /// A timed-out worker is abandoned, not stopped: it keeps running until
    /// its method finishes and its result is dropped. Large batches of slow
    /// methods can therefore accumulate live worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the deadline expires,
    /// [`Error::WorkerFailed`] when the worker dies without a result, and any
    /// error of the pipeline itself.
    pub fn run(&self, job: MethodJob) -> Result<MethodOutput> {
        let Some(timeout) = self.options.method_timeout else {
            return process(&self.options, self.structurer.as_ref(), &job);
        };

        let name = job.method.display_name();
        let options = self.options.clone();
        let structurer = Arc::clone(&self.structurer);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("classflow-{}", job.method.name))
            .spawn(move || {
                let result = process(&options, structurer.as_ref(), &job);
                let _ = tx.send(result);
            })
            .map_err(|e| Error::WorkerFailed(e.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(Error::WorkerFailed(format!("{name}: worker exited without a result")))
            }
        }
    }

    /// Processes independent methods in parallel. Failures are reported per
    /// method and never stop the batch.
    pub fn decompile_all(&self, jobs: Vec<MethodJob>) -> Vec<MethodOutcome> {
        jobs.into_par_iter()
            .map(|job| {
                let method = job.method.display_name();
                match self.run(job) {
                    Ok(output) => MethodOutcome::Decompiled(Box::new(output)),
                    Err(Error::Timeout(after)) => {
                        warn!("{method}: timed out after {after:?}");
                        MethodOutcome::TimedOut { method, after }
                    }
                    Err(e) => {
                        warn!("{method}: {e}");
                        MethodOutcome::Failed {
                            method,
                            message: e.to_string(),
                        }
                    }
                }
            })
            .collect()
    }
}

fn process(options: &DecompilerOptions, structurer: &dyn Structurer, job: &MethodJob) -> Result<MethodOutput> {
    let method = &job.method;
    let mut ctx = DecompileContext::new(options.clone()).with_method(method.display_name());

    let mut cfg = ControlFlowGraph::build(&job.code)?;
    cfg.remove_dead_blocks();
    cfg.inline_jsr(&ctx, job.pool.as_ref(), method)?;
    debug!("{}: {} blocks after inlining", ctx.method_name(), cfg.block_count());

    let mut tree = structurer.structure(&mut ctx, &cfg, method)?;

    let live_versions = if options.track_live_versions {
        let mut copy = tree.clone();
        Some(SsauConstructor::split_variables(&mut copy, method)?.versions)
    } else {
        None
    };

    let vars = VarVersionsProcessor::set_var_versions(&mut ctx, &mut tree, method)?;
    let definitions = VarDefinitionHelper::place_definitions(&mut tree, &vars, method);

    Ok(MethodOutput {
        method: ctx.method_name().to_string(),
        cfg,
        tree,
        vars,
        definitions,
        live_versions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{opcodes::*, Instruction, ResolvedPool, VarType},
        structure::{Expr, StatementTreeBuilder},
    };

    /// Ignores the graph and returns `x = 1; return x;`.
    struct Fixed;

    impl Structurer for Fixed {
        fn structure(&self, _: &mut DecompileContext, cfg: &ControlFlowGraph, _: &MethodInfo) -> Result<StatementTree> {
            assert!(cfg.block_count() > 0);
            let mut b = StatementTreeBuilder::new();
            let x = Expr::var(b.ids(), 2);
            let one = Expr::int_const(b.ids(), 1, false);
            let set = Expr::assign(b.ids(), x, one);
            let x_read = Expr::var(b.ids(), 2);
            let ret = Expr::ret(b.ids(), Some(x_read), VarType::INT);
            let block = b.basic(vec![set, ret]);
            let exit = b.exit();
            b.break_to(block, exit);
            b.build(block)
        }
    }

    struct Slow;

    impl Structurer for Slow {
        fn structure(&self, ctx: &mut DecompileContext, cfg: &ControlFlowGraph, method: &MethodInfo) -> Result<StatementTree> {
            thread::sleep(Duration::from_millis(500));
            Fixed.structure(ctx, cfg, method)
        }
    }

    struct Broken;

    impl Structurer for Broken {
        fn structure(&self, _: &mut DecompileContext, _: &ControlFlowGraph, _: &MethodInfo) -> Result<StatementTree> {
            Err(malformed_error!("irreducible region"))
        }
    }

    fn job() -> MethodJob {
        MethodJob {
            method: MethodInfo::new("a/B", "f", "(Z)I", false).unwrap(),
            code: InstructionSequence::new(vec![
                Instruction::simple(ICONST_1, 0),
                Instruction::create(ISTORE, vec![2], 1),
                Instruction::create(ILOAD, vec![2], 2),
                Instruction::simple(IRETURN, 3),
            ])
            .unwrap(),
            pool: Arc::new(ResolvedPool::new()),
        }
    }

    #[test]
    fn test_run_without_timeout() {
        let options = DecompilerOptions::default().with_method_timeout(None);
        let output = MethodDecompiler::new(options, Arc::new(Fixed)).run(job()).unwrap();
        assert_eq!(output.method, "a/B.f");
        assert_eq!(output.vars.name(0), Some("this"));
        assert_eq!(output.definitions.len(), 1);
        assert!(output.live_versions.is_some());
    }

    #[test]
    fn test_run_on_worker() {
        let options = DecompilerOptions::default().with_live_versions(false);
        let output = MethodDecompiler::new(options, Arc::new(Fixed)).run(job()).unwrap();
        assert!(output.live_versions.is_none());
        assert_eq!(output.vars.var_type(2), Some(&VarType::INT));
    }

    #[test]
    fn test_deadline_expires() {
        let options = DecompilerOptions::default().with_method_timeout(Some(Duration::from_millis(20)));
        let result = MethodDecompiler::new(options, Arc::new(Slow)).run(job());
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_batch_reports_failures() {
        let decompiler = MethodDecompiler::new(DecompilerOptions::default(), Arc::new(Broken));
        let outcomes = decompiler.decompile_all(vec![job(), job()]);
        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            match outcome {
                MethodOutcome::Failed { method, message } => {
                    assert_eq!(method, "a/B.f");
                    assert!(message.contains("irreducible region"));
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }
}
