//! Exception ranges expressed over blocks.

use std::fmt;

use crate::analysis::cfg::BlockId;

/// A protected block range together with its handler.
///
/// `exception_types == None` marks a catch-all (`finally`) range. Adding a
/// catch-all type to a typed range turns it into a catch-all; typed entries
/// added to a catch-all are absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRange {
    /// Protected blocks, in the order they were added
    pub protected_range: Vec<BlockId>,
    /// Handler entry block
    pub handler: BlockId,
    /// Caught classes, `None` for catch-all
    pub exception_types: Option<Vec<String>>,
}

impl ExceptionRange {
    /// Creates a range for one exception-table row.
    #[must_use]
    pub fn new(protected_range: Vec<BlockId>, handler: BlockId, exception_type: Option<&str>) -> Self {
        ExceptionRange {
            protected_range,
            handler,
            exception_types: exception_type.map(|t| vec![t.to_string()]),
        }
    }

    /// Merges another caught type into this range.
    pub fn add_exception_type(&mut self, exception_type: Option<&str>) {
        match (&mut self.exception_types, exception_type) {
            (None, _) => {}
            (types, None) => *types = None,
            (Some(list), Some(t)) => {
                if !list.iter().any(|e| e == t) {
                    list.push(t.to_string());
                }
            }
        }
    }

    /// Returns `true` for catch-all ranges.
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        self.exception_types.is_none()
    }

    /// Returns `true` if `block` is protected by this range.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.protected_range.contains(&block)
    }

    /// Returns `true` if the handler protects itself.
    #[must_use]
    pub fn is_circular(&self) -> bool {
        self.contains(self.handler)
    }

    /// `|`-joined caught types, `None` for catch-all.
    #[must_use]
    pub fn unique_exceptions_string(&self) -> Option<String> {
        self.exception_types.as_ref().map(|types| {
            let mut sorted = types.clone();
            sorted.sort();
            sorted.dedup();
            sorted.join("|")
        })
    }
}

impl fmt::Display for ExceptionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exception range: [")?;
        for (i, id) in self.protected_range.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, "] -> {} (", self.handler)?;
        match self.unique_exceptions_string() {
            Some(types) => write!(f, "{types}")?,
            None => write!(f, "<any>")?,
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_all_absorbs_types() {
        let mut range = ExceptionRange::new(vec![1, 2], 3, Some("java/io/IOException"));
        range.add_exception_type(Some("java/lang/Error"));
        range.add_exception_type(Some("java/lang/Error"));
        assert_eq!(range.exception_types.as_ref().map(Vec::len), Some(2));

        range.add_exception_type(None);
        assert!(range.is_catch_all());
        range.add_exception_type(Some("java/lang/Error"));
        assert!(range.is_catch_all());
    }

    #[test]
    fn test_display() {
        let range = ExceptionRange::new(vec![1, 2], 3, None);
        assert_eq!(range.to_string(), "exception range: [1, 2] -> 3 (<any>)");
        assert!(!range.is_circular());
    }
}
