//! Options for the per-method pipeline.

use std::time::Duration;

/// Options shared by every method of a decompilation run.
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
/// use classflow::decompiler::DecompilerOptions;
///
/// let options = DecompilerOptions::new()
///     .with_method_timeout(Some(Duration::from_secs(2)))
///     .with_debug_var_names(false);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompilerOptions {
    /// Wall-clock limit per method (default: 15 s). `None` runs the pipeline
    /// on the calling thread without a deadline.
    pub method_timeout: Option<Duration>,

    /// Drop exception ranges left without protected blocks after dead-block
    /// removal (default: true).
    pub remove_empty_ranges: bool,

    /// Also run the live SSA variant and keep its version graph in the
    /// outcome (default: true).
    pub track_live_versions: bool,

    /// Name variables from the local variable table where one is known
    /// (default: true).
    pub use_debug_var_names: bool,
}

impl Default for DecompilerOptions {
    fn default() -> Self {
        Self {
            method_timeout: Some(Duration::from_secs(15)),
            remove_empty_ranges: true,
            track_live_versions: true,
            use_debug_var_names: true,
        }
    }
}

impl DecompilerOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-method timeout.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Deadline per method, `None` to run without one
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_method_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.method_timeout = timeout;
        self
    }

    /// Sets whether empty exception ranges are dropped.
    #[must_use]
    pub fn with_remove_empty_ranges(mut self, enabled: bool) -> Self {
        self.remove_empty_ranges = enabled;
        self
    }

    /// Sets whether the live SSA variant runs.
    #[must_use]
    pub fn with_live_versions(mut self, enabled: bool) -> Self {
        self.track_live_versions = enabled;
        self
    }

    /// Sets whether local variable table names are used.
    #[must_use]
    pub fn with_debug_var_names(mut self, enabled: bool) -> Self {
        self.use_debug_var_names = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = DecompilerOptions::default();
        assert_eq!(options.method_timeout, Some(Duration::from_secs(15)));
        assert!(options.remove_empty_ranges);
        assert!(options.track_live_versions);
        assert!(options.use_debug_var_names);
    }

    #[test]
    fn test_setters_chain() {
        let options = DecompilerOptions::new()
            .with_method_timeout(None)
            .with_remove_empty_ranges(false)
            .with_live_versions(false)
            .with_debug_var_names(false);
        assert_eq!(options.method_timeout, None);
        assert!(!options.remove_empty_ranges);
        assert!(!options.track_live_versions);
        assert!(!options.use_debug_var_names);
    }
}
