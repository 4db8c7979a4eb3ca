//! Per-method state threaded through the pipeline.

use crate::decompiler::config::DecompilerOptions;

/// Options, counters and method identity of one unit of work.
///
/// Every method gets its own context, so methods can be processed on
/// different threads without sharing anything mutable.
#[derive(Debug, Clone)]
pub struct DecompileContext {
    options: DecompilerOptions,
    method_name: String,
    next_expr_id: u32,
    next_var_index: i32,
}

impl DecompileContext {
    /// Creates a context that is not yet bound to a method.
    #[must_use]
    pub fn new(options: DecompilerOptions) -> Self {
        DecompileContext {
            options,
            method_name: String::from("<unknown>"),
            next_expr_id: 0,
            next_var_index: 0,
        }
    }

    /// Binds the context to `name`, as used in log records.
    #[must_use]
    pub fn with_method(mut self, name: impl Into<String>) -> Self {
        self.method_name = name.into();
        self
    }

    /// Options of the run.
    #[must_use]
    pub fn options(&self) -> &DecompilerOptions {
        &self.options
    }

    /// Method the context belongs to.
    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Hands out the next expression id.
    pub fn next_expr_id(&mut self) -> u32 {
        let id = self.next_expr_id;
        self.next_expr_id += 1;
        id
    }

    /// Makes sure no expression id below `floor` is handed out again.
    pub fn reserve_expr_ids(&mut self, floor: u32) {
        self.next_expr_id = self.next_expr_id.max(floor);
    }

    /// Restarts variable numbering at `first`.
    pub fn reset_var_counter(&mut self, first: i32) {
        self.next_var_index = first;
    }

    /// Hands out the next variable index.
    pub fn next_var_index(&mut self) -> i32 {
        let index = self.next_var_index;
        self.next_var_index += 1;
        index
    }
}
