//! Identity and signature of the method under analysis.

use std::collections::HashMap;

use crate::{
    assembly::{DataPoint, MethodDescriptor, VarType},
    Result,
};

/// Everything the analysis needs to know about the enclosing method.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Internal name of the declaring class, e.g. `com/example/Foo`
    pub class_name: String,
    /// Method name
    pub name: String,
    /// Parsed descriptor
    pub descriptor: MethodDescriptor,
    /// `ACC_STATIC`
    pub is_static: bool,
    /// Local variable table names keyed by original slot
    pub local_names: HashMap<u16, String>,
}

impl MethodInfo {
    /// Creates the method identity from its raw descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TypeError`] if the descriptor is invalid.
    pub fn new(class_name: &str, name: &str, descriptor: &str, is_static: bool) -> Result<Self> {
        Ok(MethodInfo {
            class_name: class_name.to_string(),
            name: name.to_string(),
            descriptor: MethodDescriptor::parse(descriptor)?,
            is_static,
            local_names: HashMap::new(),
        })
    }

    /// Adds a local variable table name for `slot`.
    #[must_use]
    pub fn with_local_name(mut self, slot: u16, name: &str) -> Self {
        self.local_names.insert(slot, name.to_string());
        self
    }

    /// `this` (for instance methods) and every parameter with its starting slot.
    #[must_use]
    pub fn parameter_slots(&self) -> Vec<(u16, VarType)> {
        let mut slots = Vec::with_capacity(self.descriptor.params.len() + 1);
        let mut slot = 0u16;
        if !self.is_static {
            slots.push((0, VarType::object(&self.class_name)));
            slot = 1;
        }
        for param in &self.descriptor.params {
            slots.push((slot, param.clone()));
            slot += param.stack_size();
        }
        slots
    }

    /// Number of local slots occupied on entry (`this` plus parameters).
    #[must_use]
    pub fn parameter_slot_count(&self) -> u16 {
        self.descriptor.params_stack_size() + u16::from(!self.is_static)
    }

    /// Abstract state at method entry.
    #[must_use]
    pub fn initial_data_point(&self) -> DataPoint {
        DataPoint::initial(&self.descriptor, self.is_static, &self.class_name)
    }

    /// `Class.name descriptor`, used in log records.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }
}
