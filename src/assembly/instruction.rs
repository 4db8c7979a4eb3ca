//! The instruction model consumed by the CFG builder.
//!
//! An [`Instruction`] is the already-decoded form of one JVM bytecode
//! instruction: its opcode, a coarse [`InstructionGroup`] used by the block
//! builder, its integer operands and the original byte offset in the method.
//!
//! # Operand conventions
//!
//! | Group | Operands |
//! |-------|----------|
//! | [`InstructionGroup::Jump`] | `[target_offset]` (absolute) |
//! | [`InstructionGroup::Switch`] | `[default, key0, target0, key1, target1, ...]` (absolute targets) |
//! | loads/stores/`ret` | `[slot]` |
//! | `iinc` | `[slot, delta]` |
//! | `ldc`, field, invoke, `new`, `checkcast`... | `[constant_pool_index]` |
//! | `newarray` | `[atype]` |
//! | `multianewarray` | `[constant_pool_index, dimensions]` |

use std::fmt;

use strum::{Display, EnumIter};

use crate::assembly::opcodes::{self, *};

/// Coarse classification of an instruction's effect on control flow.
///
/// `ret` belongs to [`InstructionGroup::Return`]: it never falls through and
/// its successors are discovered during subroutine detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum InstructionGroup {
    /// Anything that does not transfer control
    General,
    /// Conditional or unconditional branch with one absolute target, including `jsr`
    Jump,
    /// `tableswitch` / `lookupswitch`
    Switch,
    /// Method invocation
    Invoke,
    /// Field load or store
    FieldAccess,
    /// Method exit, `athrow` or `ret`
    Return,
}

impl InstructionGroup {
    /// Derives the group of a (normalised) opcode.
    #[must_use]
    pub fn of(opcode: u8) -> Self {
        match opcode {
            IFEQ..=JSR | IFNULL | IFNONNULL | GOTO_W | JSR_W => InstructionGroup::Jump,
            TABLESWITCH | LOOKUPSWITCH => InstructionGroup::Switch,
            INVOKEVIRTUAL..=INVOKEDYNAMIC => InstructionGroup::Invoke,
            GETSTATIC..=PUTFIELD => InstructionGroup::FieldAccess,
            RET | IRETURN..=RETURN | ATHROW => InstructionGroup::Return,
            _ => InstructionGroup::General,
        }
    }
}

/// A single decoded bytecode instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Normalised opcode (short forms such as `iload_2` are folded away)
    pub opcode: u8,
    /// Control-flow class of the opcode
    pub group: InstructionGroup,
    /// Integer operands, see the module documentation
    pub operands: Vec<i32>,
    /// Byte offset in the method's code array
    pub offset: u32,
}

impl Instruction {
    /// Creates an instruction, folding `xload_n`/`xstore_n` short forms into the
    /// long form with an explicit slot operand and `goto_w`/`jsr_w` into
    /// `goto`/`jsr`.
    #[must_use]
    pub fn create(opcode: u8, operands: Vec<i32>, offset: u32) -> Self {
        let (opcode, operands) = match opcode {
            ILOAD_0..=ALOAD_3 => {
                let rel = opcode - ILOAD_0;
                (ILOAD + rel / 4, vec![i32::from(rel % 4)])
            }
            ISTORE_0..=ASTORE_3 => {
                let rel = opcode - ISTORE_0;
                (ISTORE + rel / 4, vec![i32::from(rel % 4)])
            }
            GOTO_W => (GOTO, operands),
            JSR_W => (JSR, operands),
            _ => (opcode, operands),
        };
        Instruction {
            opcode,
            group: InstructionGroup::of(opcode),
            operands,
            offset,
        }
    }

    /// Shorthand for an instruction without operands.
    #[must_use]
    pub fn simple(opcode: u8, offset: u32) -> Self {
        Self::create(opcode, Vec::new(), offset)
    }

    /// Shorthand for a branch to an absolute target offset.
    #[must_use]
    pub fn jump(opcode: u8, target: u32, offset: u32) -> Self {
        Self::create(opcode, vec![target_operand(target)], offset)
    }

    /// Shorthand for a switch; `cases` holds `(key, target)` pairs.
    #[must_use]
    pub fn switch(opcode: u8, default: u32, cases: &[(i32, u32)], offset: u32) -> Self {
        let mut operands = Vec::with_capacity(1 + cases.len() * 2);
        operands.push(target_operand(default));
        for &(key, target) in cases {
            operands.push(key);
            operands.push(target_operand(target));
        }
        Self::create(opcode, operands, offset)
    }

    /// Returns operand `index`, if present.
    #[must_use]
    pub fn operand(&self, index: usize) -> Option<i32> {
        self.operands.get(index).copied()
    }

    /// Returns `true` if control may continue with the next instruction.
    #[must_use]
    pub fn can_fall_through(&self) -> bool {
        !matches!(
            self.opcode,
            GOTO | GOTO_W
                | JSR
                | JSR_W
                | RET
                | IRETURN
                | LRETURN
                | FRETURN
                | DRETURN
                | ARETURN
                | RETURN
                | ATHROW
                | TABLESWITCH
                | LOOKUPSWITCH
        )
    }

    /// Absolute target of a jump, `None` for other groups or a negative operand.
    #[must_use]
    pub fn jump_target(&self) -> Option<u32> {
        if self.group != InstructionGroup::Jump {
            return None;
        }
        self.operand(0).and_then(|t| u32::try_from(t).ok())
    }

    /// Default target of a switch.
    #[must_use]
    pub fn switch_default(&self) -> Option<u32> {
        if self.group != InstructionGroup::Switch {
            return None;
        }
        self.operand(0).and_then(|t| u32::try_from(t).ok())
    }

    /// `(key, target)` pairs of a switch, in operand order.
    #[must_use]
    pub fn switch_cases(&self) -> Vec<(i32, u32)> {
        if self.group != InstructionGroup::Switch {
            return Vec::new();
        }
        self.operands
            .get(1..)
            .unwrap_or_default()
            .chunks_exact(2)
            .filter_map(|pair| u32::try_from(pair[1]).ok().map(|t| (pair[0], t)))
            .collect()
    }

    /// Every absolute branch target, default first for switches.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match self.group {
            InstructionGroup::Jump => self.jump_target().into_iter().collect(),
            InstructionGroup::Switch => self
                .switch_default()
                .into_iter()
                .chain(self.switch_cases().into_iter().map(|(_, t)| t))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Human readable opcode name.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        opcodes::mnemonic(self.opcode)
    }
}

fn target_operand(target: u32) -> i32 {
    i32::try_from(target).unwrap_or(i32::MAX)
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5}: {}", self.offset, self.mnemonic())?;
        for op in &self.operands {
            write!(f, " {op}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_forms_are_folded() {
        let load = Instruction::create(ILOAD_0 + 2, Vec::new(), 0);
        assert_eq!(load.opcode, ILOAD);
        assert_eq!(load.operands, vec![2]);

        let aload = Instruction::create(ALOAD_0, Vec::new(), 0);
        assert_eq!(aload.opcode, ALOAD);
        assert_eq!(aload.operands, vec![0]);

        let dstore = Instruction::create(DSTORE_0 + 3, Vec::new(), 0);
        assert_eq!(dstore.opcode, DSTORE);
        assert_eq!(dstore.operands, vec![3]);

        let jsr = Instruction::jump(JSR_W, 40, 0);
        assert_eq!(jsr.opcode, JSR);
        assert_eq!(jsr.group, InstructionGroup::Jump);
    }

    #[test]
    fn test_groups() {
        assert_eq!(InstructionGroup::of(IFEQ), InstructionGroup::Jump);
        assert_eq!(InstructionGroup::of(IFNONNULL), InstructionGroup::Jump);
        assert_eq!(InstructionGroup::of(RET), InstructionGroup::Return);
        assert_eq!(InstructionGroup::of(ATHROW), InstructionGroup::Return);
        assert_eq!(InstructionGroup::of(GETFIELD), InstructionGroup::FieldAccess);
        assert_eq!(InstructionGroup::of(INVOKEDYNAMIC), InstructionGroup::Invoke);
        assert_eq!(InstructionGroup::of(LOOKUPSWITCH), InstructionGroup::Switch);
        assert_eq!(InstructionGroup::of(IADD), InstructionGroup::General);
    }

    #[test]
    fn test_fall_through() {
        assert!(Instruction::jump(IFEQ, 10, 0).can_fall_through());
        assert!(!Instruction::jump(GOTO, 10, 0).can_fall_through());
        assert!(!Instruction::jump(JSR, 10, 0).can_fall_through());
        assert!(!Instruction::create(RET, vec![1], 0).can_fall_through());
        assert!(!Instruction::simple(ATHROW, 0).can_fall_through());
        assert!(Instruction::simple(IADD, 0).can_fall_through());
    }

    #[test]
    fn test_switch_targets() {
        let sw = Instruction::switch(LOOKUPSWITCH, 50, &[(1, 20), (7, 30)], 4);
        assert_eq!(sw.switch_default(), Some(50));
        assert_eq!(sw.switch_cases(), vec![(1, 20), (7, 30)]);
        assert_eq!(sw.branch_targets(), vec![50, 20, 30]);
        assert!(!sw.can_fall_through());
    }
}
