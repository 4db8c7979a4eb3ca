//! The final variable table of a method.

use std::collections::{BTreeMap, HashSet};

use strum::Display;

use crate::assembly::VarType;

/// Whether a variable may be declared `final`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FinalType {
    /// Written more than once, or merged from several versions
    NonFinal,
    /// Written at most once
    Final,
    /// Marked `final` by the caller
    ExplicitFinal,
}

/// One variable after versioning and compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct VarInfo {
    /// Index every reference carries after compaction
    pub index: i32,
    /// Inferred type
    pub var_type: VarType,
    /// Upper bound from the uses, if any use bounded it
    pub max_type: Option<VarType>,
    /// Finality
    pub finality: FinalType,
    /// Local variable slot the variable was split off
    pub original_index: i32,
    /// Source name
    pub name: String,
}

/// Variable table keyed by final index.
///
/// # Examples
///
/// ```rust,ignore
/// let vars = VarVersionsProcessor::set_var_versions(&mut ctx, &mut tree, &method)?;
/// for var in vars.vars() {
///     println!("{} {}: {}", var.finality, var.name, var.var_type);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct VarProcessor {
    vars: BTreeMap<i32, VarInfo>,
}

impl VarProcessor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a variable and names it.
    ///
    /// `this` wins for slot 0 of an instance method; otherwise the debug name
    /// of the original slot is used once, and `var{index}` after that.
    pub(crate) fn insert(&mut self, mut info: VarInfo, this_slot: bool, debug_name: Option<&str>) {
        let taken: HashSet<&str> = self.vars.values().map(|v| v.name.as_str()).collect();
        info.name = match debug_name {
            _ if this_slot => "this".to_string(),
            Some(name) if !taken.contains(name) => name.to_string(),
            _ => format!("var{}", info.index),
        };
        self.vars.insert(info.index, info);
    }

    /// Type of variable `index`.
    #[must_use]
    pub fn var_type(&self, index: i32) -> Option<&VarType> {
        self.vars.get(&index).map(|v| &v.var_type)
    }

    /// Upper bound of variable `index`.
    #[must_use]
    pub fn max_type(&self, index: i32) -> Option<&VarType> {
        self.vars.get(&index).and_then(|v| v.max_type.as_ref())
    }

    /// Finality of variable `index`.
    #[must_use]
    pub fn finality(&self, index: i32) -> Option<FinalType> {
        self.vars.get(&index).map(|v| v.finality)
    }

    /// Marks variable `index` as explicitly `final`. Returns `false` if the
    /// index is unknown.
    pub fn set_explicit_final(&mut self, index: i32) -> bool {
        match self.vars.get_mut(&index) {
            Some(var) => {
                var.finality = FinalType::ExplicitFinal;
                true
            }
            None => false,
        }
    }

    /// Slot variable `index` was split off.
    #[must_use]
    pub fn original_index(&self, index: i32) -> Option<i32> {
        self.vars.get(&index).map(|v| v.original_index)
    }

    /// Name of variable `index`.
    #[must_use]
    pub fn name(&self, index: i32) -> Option<&str> {
        self.vars.get(&index).map(|v| v.name.as_str())
    }

    /// Renames variable `index`.
    pub fn set_name(&mut self, index: i32, name: &str) {
        if let Some(var) = self.vars.get_mut(&index) {
            var.name = name.to_string();
        }
    }

    /// Entry of variable `index`.
    #[must_use]
    pub fn get(&self, index: i32) -> Option<&VarInfo> {
        self.vars.get(&index)
    }

    /// Final indices, ascending.
    pub fn indices(&self) -> impl Iterator<Item = i32> + '_ {
        self.vars.keys().copied()
    }

    /// All entries, by index.
    pub fn vars(&self) -> impl Iterator<Item = &VarInfo> {
        self.vars.values()
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` if the method has no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
