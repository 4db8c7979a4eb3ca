//! Ordered instruction list with offset resolution and the exception table.

use std::collections::HashMap;

use crate::{assembly::Instruction, Error, Result};

/// One row of a method's exception table, in byte offsets.
///
/// `to` is exclusive and may equal the code length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// First protected offset
    pub from: u32,
    /// Offset after the last protected instruction
    pub to: u32,
    /// Handler entry offset
    pub handler: u32,
    /// Caught class in internal form, `None` for catch-all (`finally`)
    pub exception_class: Option<String>,
}

/// The decoded body of one method.
///
/// Instructions are kept in offset order; the sequence rejects unordered or
/// duplicate offsets so that every later offset lookup is unambiguous.
#[derive(Debug, Clone, Default)]
pub struct InstructionSequence {
    instructions: Vec<Instruction>,
    exception_table: Vec<ExceptionEntry>,
    offset_index: HashMap<u32, usize>,
}

impl InstructionSequence {
    /// Creates a sequence from decoded instructions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if offsets are not strictly increasing.
    pub fn new(instructions: Vec<Instruction>) -> Result<Self> {
        let mut offset_index = HashMap::with_capacity(instructions.len());
        let mut last: Option<u32> = None;
        for (idx, instr) in instructions.iter().enumerate() {
            if last.is_some_and(|l| l >= instr.offset) {
                return Err(malformed_error!(
                    "Instruction offsets not increasing at index {} (offset {})",
                    idx,
                    instr.offset
                ));
            }
            last = Some(instr.offset);
            offset_index.insert(instr.offset, idx);
        }
        Ok(InstructionSequence {
            instructions,
            exception_table: Vec::new(),
            offset_index,
        })
    }

    /// Appends an exception-table row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `from >= to` or an offset cannot be resolved.
    pub fn add_exception(
        &mut self,
        from: u32,
        to: u32,
        handler: u32,
        exception_class: Option<&str>,
    ) -> Result<()> {
        if from >= to {
            return Err(malformed_error!("Empty protected range {}..{}", from, to));
        }
        for offset in [from, handler] {
            if self.index_of(offset).is_none() {
                return Err(malformed_error!(
                    "Exception table offset {} is not an instruction start",
                    offset
                ));
            }
        }
        if self.index_of_or_end(to).is_none() {
            return Err(malformed_error!(
                "Exception table end {} is not an instruction boundary",
                to
            ));
        }
        self.exception_table.push(ExceptionEntry {
            from,
            to,
            handler,
            exception_class: exception_class.map(str::to_string),
        });
        Ok(())
    }

    /// Builder-style variant of [`InstructionSequence::add_exception`].
    ///
    /// # Errors
    ///
    /// Same as [`InstructionSequence::add_exception`].
    pub fn with_exception(
        mut self,
        from: u32,
        to: u32,
        handler: u32,
        exception_class: Option<&str>,
    ) -> Result<Self> {
        self.add_exception(from, to, handler, exception_class)?;
        Ok(self)
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` for an empty body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Instruction at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// All instructions in offset order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Exception table rows in declaration order.
    #[must_use]
    pub fn exception_table(&self) -> &[ExceptionEntry] {
        &self.exception_table
    }

    /// Index of the instruction starting at `offset`.
    #[must_use]
    pub fn index_of(&self, offset: u32) -> Option<usize> {
        self.offset_index.get(&offset).copied()
    }

    /// Like [`InstructionSequence::index_of`], but an offset past the last
    /// instruction resolves to `len()`.
    #[must_use]
    pub fn index_of_or_end(&self, offset: u32) -> Option<usize> {
        if let Some(idx) = self.index_of(offset) {
            return Some(idx);
        }
        match self.instructions.last() {
            Some(last) if offset > last.offset => Some(self.instructions.len()),
            _ => None,
        }
    }

    /// Resolves a branch target, failing with [`Error::Malformed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `offset` is not an instruction start.
    pub fn resolve_target(&self, offset: u32) -> Result<usize> {
        self.index_of(offset).ok_or_else(|| -> Error {
            malformed_error!("Branch target {} is not an instruction start", offset)
        })
    }
}
