//! Constant-pool resolution interface.
//!
//! Binary class-file parsing is done elsewhere; the analysis only needs the
//! types that constant-pool operands resolve to. Callers hand in any
//! [`ConstantPool`] implementation. [`ResolvedPool`] is a ready-made map-backed
//! implementation for callers (and tests) that already resolved their entries.

use std::collections::HashMap;

use crate::{
    assembly::{MethodDescriptor, VarType},
    Result,
};

/// Resolves constant-pool operands to types.
///
/// Every method reports an unresolvable index as [`crate::Error::Malformed`].
pub trait ConstantPool {
    /// Type pushed by `ldc`/`ldc_w`/`ldc2_w` for the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not loadable.
    fn constant_type(&self, index: u16) -> Result<VarType>;

    /// Declared type of the field referenced at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a field reference.
    fn field_type(&self, index: u16) -> Result<VarType>;

    /// Descriptor of the method referenced at `index` (including `invokedynamic` call sites).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a method reference.
    fn method_descriptor(&self, index: u16) -> Result<MethodDescriptor>;

    /// Class (or array class) referenced at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a class reference.
    fn class_type(&self, index: u16) -> Result<VarType>;
}

/// A constant pool whose entries are already resolved to types.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPool {
    constants: HashMap<u16, VarType>,
    fields: HashMap<u16, VarType>,
    methods: HashMap<u16, MethodDescriptor>,
    classes: HashMap<u16, VarType>,
}

impl ResolvedPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a loadable constant.
    #[must_use]
    pub fn with_constant(mut self, index: u16, ty: VarType) -> Self {
        self.constants.insert(index, ty);
        self
    }

    /// Registers a field reference.
    #[must_use]
    pub fn with_field(mut self, index: u16, ty: VarType) -> Self {
        self.fields.insert(index, ty);
        self
    }

    /// Registers a method reference.
    #[must_use]
    pub fn with_method(mut self, index: u16, descriptor: MethodDescriptor) -> Self {
        self.methods.insert(index, descriptor);
        self
    }

    /// Registers a class reference.
    #[must_use]
    pub fn with_class(mut self, index: u16, ty: VarType) -> Self {
        self.classes.insert(index, ty);
        self
    }
}

impl ConstantPool for ResolvedPool {
    fn constant_type(&self, index: u16) -> Result<VarType> {
        self.constants
            .get(&index)
            .cloned()
            .ok_or_else(|| malformed_error!("No loadable constant at pool index {}", index))
    }

    fn field_type(&self, index: u16) -> Result<VarType> {
        self.fields
            .get(&index)
            .cloned()
            .ok_or_else(|| malformed_error!("No field reference at pool index {}", index))
    }

    fn method_descriptor(&self, index: u16) -> Result<MethodDescriptor> {
        self.methods
            .get(&index)
            .cloned()
            .ok_or_else(|| malformed_error!("No method reference at pool index {}", index))
    }

    fn class_type(&self, index: u16) -> Result<VarType> {
        self.classes
            .get(&index)
            .cloned()
            .ok_or_else(|| malformed_error!("No class reference at pool index {}", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_resolved_entries_by_kind() -> Result<()> {
        let pool = ResolvedPool::new()
            .with_constant(1, VarType::LONG)
            .with_field(2, VarType::object("java/lang/String"))
            .with_method(3, MethodDescriptor::parse("(I)V")?)
            .with_class(4, VarType::object("a/B"));

        assert_eq!(pool.constant_type(1)?, VarType::LONG);
        assert_eq!(pool.field_type(2)?, VarType::object("java/lang/String"));
        assert_eq!(pool.method_descriptor(3)?.params, vec![VarType::INT]);
        assert_eq!(pool.class_type(4)?, VarType::object("a/B"));
        Ok(())
    }

    #[test]
    fn test_entry_of_wrong_kind_is_malformed() {
        let pool = ResolvedPool::new().with_constant(1, VarType::INT);
        assert!(matches!(pool.field_type(1), Err(Error::Malformed { .. })));
        assert!(matches!(pool.class_type(9), Err(Error::Malformed { .. })));
    }
}
