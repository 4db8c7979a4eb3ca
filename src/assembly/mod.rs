//! JVM instruction model, value types and the instruction effect simulator.
//!
//! This module holds everything the analysis passes need to know about raw
//! bytecode without parsing class files itself:
//!
//! - [`Instruction`] / [`InstructionGroup`] - decoded instructions
//! - [`InstructionSequence`] - a method body plus its exception table
//! - [`VarType`] / [`MethodDescriptor`] - value types and the type lattice
//! - [`ConstantPool`] - the resolution interface for pool operands
//! - [`MethodInfo`] - identity and signature of the analysed method
//! - [`DataPoint`] / [`step_types`] - abstract interpretation of stack and local types
//!
//! # Examples
//!
//! ```rust,ignore
//! use classflow::assembly::{opcodes::*, Instruction, InstructionSequence};
//!
//! let seq = InstructionSequence::new(vec![
//!     Instruction::create(ILOAD_0 + 1, vec![], 0),
//!     Instruction::jump(IFEQ, 7, 1),
//!     Instruction::simple(ICONST_1, 4),
//!     Instruction::simple(IRETURN, 5),
//!     Instruction::simple(ICONST_2, 7),
//!     Instruction::simple(IRETURN, 8),
//! ])?;
//! assert_eq!(seq.index_of(7), Some(4));
//! ```

mod effects;
mod instruction;
mod method;
pub mod opcodes;
mod pool;
mod sequence;
mod types;

pub use effects::{step_types, DataPoint};
pub use instruction::{Instruction, InstructionGroup};
pub use method::MethodInfo;
pub use pool::{ConstantPool, ResolvedPool};
pub use sequence::{ExceptionEntry, InstructionSequence};
pub use types::{MethodDescriptor, TypeCode, TypeFamily, VarType, OBJECT_CLASS};
