//! Inlining of `jsr`/`ret` subroutines.
//!
//! Legacy compilers emit `finally` bodies as subroutines entered with `jsr` and
//! left with `ret`. Inlining makes every call site own a private copy of the
//! subroutine blocks, after which the call and return instructions (and the
//! stores of the return address) carry no information and are removed.

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::debug;

use crate::{
    analysis::cfg::{BlockId, ControlFlowGraph, ExceptionRange},
    assembly::{opcodes, step_types, ConstantPool, DataPoint, MethodInfo, TypeCode, VarType},
    decompiler::DecompileContext,
    Result,
};

/// One call site and the blocks its subroutine owns.
struct JsrRecord {
    jsr: BlockId,
    ret: BlockId,
    range: BTreeSet<BlockId>,
}

impl ControlFlowGraph {
    /// Inlines every subroutine so no retained block ends in `jsr` or `ret`.
    ///
    /// # Steps
    ///
    /// 1. Remove unreachable blocks
    /// 2. Split subroutine ranges shared between call sites until all ranges
    ///    are either disjoint or nested
    /// 3. Remove `jsr`, `ret` and the `astore`/`pop` of return addresses by
    ///    simulating operand types from the entry block
    /// 4. Remove the blocks left empty, then unreachable blocks again
    ///
    /// A graph without `jsr` or `ret` is left untouched; dead code in such a
    /// graph is removed separately with [`ControlFlowGraph::remove_dead_blocks`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if type simulation underflows the
    /// operand stack or an empty block cannot be removed.
    pub fn inline_jsr(&mut self, ctx: &DecompileContext, pool: &dyn ConstantPool, method: &MethodInfo) -> Result<()> {
        let has_subroutines = !self.subroutines.is_empty()
            || self
                .blocks
                .values()
                .any(|b| matches!(b.last_opcode(), Some(opcodes::JSR | opcodes::RET)));
        if !has_subroutines {
            return Ok(());
        }
        self.remove_dead_blocks();

        let mut splits = 0usize;
        while self.process_jsr_ranges()? {
            splits += 1;
        }
        debug!("{}: {} subroutine range splits", ctx.method_name(), splits);

        self.clear_marks();
        self.remove_jsr_instructions(pool, method)?;
        self.clear_marks();

        self.remove_empty_blocks(ctx.options().remove_empty_ranges)?;
        self.remove_dead_blocks();
        self.refresh_exit();
        Ok(())
    }

    /// Splits the first pair of overlapping, non-nested subroutine ranges.
    /// Returns `false` once all ranges are disjoint or nested.
    fn process_jsr_ranges(&mut self) -> Result<bool> {
        let all: Vec<JsrRecord> = self
            .subroutines
            .iter()
            .map(|&(jsr, ret)| JsrRecord {
                jsr,
                ret,
                range: self.jsr_range(jsr, ret),
            })
            .collect();

        // containing ranges come after the records whose entry they contain
        let mut ordered: Vec<JsrRecord> = Vec::with_capacity(all.len());
        for record in all {
            let pos = ordered
                .iter()
                .position(|r| r.range.contains(&record.jsr))
                .unwrap_or(ordered.len());
            ordered.insert(pos, record);
        }

        for (i, first) in ordered.iter().enumerate() {
            for second in &ordered[i + 1..] {
                if first.range.contains(&second.jsr) || second.range.contains(&first.jsr) {
                    continue;
                }
                let common: BTreeSet<BlockId> = first.range.intersection(&second.range).copied().collect();
                if !common.is_empty() {
                    debug!(
                        "splitting subroutine of jsr {} ({} shared blocks with jsr {})",
                        first.jsr,
                        common.len(),
                        second.jsr
                    );
                    self.split_jsr_range(first.jsr, first.ret, &common)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Blocks owned by the subroutine entered from `jsr` and returning to `ret`.
    ///
    /// A block is owned when all its predecessors are dominated by the
    /// subroutine entry. The walk does not leave through the `ret` edge back to
    /// the continuation, nor through exception edges of the `jsr` block.
    fn jsr_range(&self, jsr: BlockId, ret: BlockId) -> BTreeSet<BlockId> {
        let mut owned = BTreeSet::new();
        let Some(&dom) = self.block(jsr).and_then(|b| b.succs().first()) else {
            return owned;
        };

        let mut worklist = VecDeque::from([jsr]);
        while let Some(node) = worklist.pop_front() {
            let Some(block) = self.block(node) else {
                continue;
            };
            let returns_here = block.last_opcode() == Some(opcodes::RET) && block.is_successor(ret);
            let mut lists: Vec<&[BlockId]> = Vec::with_capacity(2);
            if !returns_here {
                lists.push(block.succs());
            }
            if node != jsr {
                lists.push(block.succ_exceptions());
            }

            for list in lists {
                'child: for &child in list.iter().rev() {
                    if owned.contains(&child) {
                        continue;
                    }
                    if node != jsr {
                        let Some(c) = self.block(child) else {
                            continue;
                        };
                        for &pred in c.preds().iter().chain(c.pred_exceptions()) {
                            if !self.is_dominator(pred, dom) {
                                continue 'child;
                            }
                        }
                    }
                    if child != self.exit.id {
                        owned.insert(child);
                    }
                    worklist.push_back(child);
                }
            }
        }
        owned
    }

    /// Gives the call site `jsr` private copies of the `common` blocks.
    fn split_jsr_range(&mut self, jsr: BlockId, ret: BlockId, common: &BTreeSet<BlockId>) -> Result<()> {
        let mut copies: HashMap<BlockId, BlockId> = HashMap::from([(jsr, jsr)]);
        let mut worklist = VecDeque::from([jsr]);

        while let Some(node) = worklist.pop_front() {
            for exceptional in [false, true] {
                let Some(block) = self.block(node) else {
                    break;
                };
                let children: Vec<BlockId> = if exceptional {
                    if node == jsr {
                        continue;
                    }
                    block.succ_exceptions().to_vec()
                } else {
                    if block.last_opcode() == Some(opcodes::RET) && block.is_successor(ret) {
                        continue;
                    }
                    block.succs().to_vec()
                };

                for &child in children.iter().rev() {
                    if let Some(&copy) = copies.get(&child) {
                        self.replace_successor(node, child, copy)?;
                    } else if common.contains(&child) {
                        let copy = self.copy_block(child, ret)?;
                        copies.insert(child, copy);
                        worklist.push_back(copy);
                        self.replace_successor(node, child, copy)?;
                    }
                }
            }
        }

        self.split_jsr_exception_ranges(common, &copies);
        Ok(())
    }

    /// Duplicates `original` under a fresh id with the same outgoing edges. A
    /// returning `ret` block hands its edge to the continuation over to the copy.
    fn copy_block(&mut self, original: BlockId, ret: BlockId) -> Result<BlockId> {
        let source = self
            .block(original)
            .ok_or_else(|| malformed_error!("Subroutine block {} vanished during split", original))?;
        let succs = source.succs().to_vec();
        let handlers = source.succ_exceptions().to_vec();
        let moves_return = source.last_opcode() == Some(opcodes::RET) && succs.contains(&ret);
        let copy = self.insert_block(source.clone_as(0));

        if moves_return {
            self.add_successor(copy, ret)?;
            self.remove_successor(original, ret);
        } else {
            for succ in succs {
                self.add_successor(copy, succ)?;
            }
        }
        for handler in handlers {
            self.add_successor_exception(copy, handler)?;
        }
        Ok(copy)
    }

    /// Extends exception ranges to the copies made by a split. A range lying
    /// completely inside the copied blocks gets a separate twin range whose
    /// handler is the copied handler when one exists.
    fn split_jsr_exception_ranges(&mut self, common: &BTreeSet<BlockId>, copies: &HashMap<BlockId, BlockId>) {
        for i in (0..self.exceptions.len()).rev() {
            let range = &self.exceptions[i];
            let shared: Vec<BlockId> = range
                .protected_range
                .iter()
                .copied()
                .filter(|b| common.contains(b))
                .collect();
            if shared.is_empty() {
                continue;
            }
            let copied: Vec<BlockId> = shared.iter().filter_map(|b| copies.get(b).copied()).collect();

            if shared.len() == range.protected_range.len() {
                let twin = ExceptionRange {
                    protected_range: copied,
                    handler: copies.get(&range.handler).copied().unwrap_or(range.handler),
                    exception_types: range.exception_types.clone(),
                };
                self.exceptions.push(twin);
            } else {
                self.exceptions[i].protected_range.extend(copied);
            }
        }
    }

    /// Walks all paths from the entry, simulating operand types, and removes
    /// `jsr`, `ret` and every `astore`/`pop` whose operand is a return address.
    fn remove_jsr_instructions(&mut self, pool: &dyn ConstantPool, method: &MethodInfo) -> Result<()> {
        let mut worklist: Vec<(BlockId, DataPoint)> = vec![(self.first, method.initial_data_point())];

        while let Some((id, mut data)) = worklist.pop() {
            let Some(block) = self.blocks.get_mut(&id) else {
                continue;
            };
            if block.mark == 1 {
                continue;
            }

            let mut i = 0;
            while i < block.size() {
                let instr = block.instructions()[i].clone();
                let top = match instr.opcode {
                    opcodes::ASTORE | opcodes::POP => data.peek().cloned(),
                    _ => None,
                };
                step_types(&mut data, &instr, pool)?;
                let remove = match instr.opcode {
                    opcodes::JSR | opcodes::RET => true,
                    opcodes::ASTORE | opcodes::POP => top.is_some_and(|t| t.code == TypeCode::Address),
                    _ => false,
                };
                if remove {
                    block.remove_instruction(i);
                } else {
                    i += 1;
                }
            }
            block.mark = 1;

            for &handler in block.succ_exceptions().iter().rev() {
                let entry = DataPoint::handler_entry(data.locals.clone(), VarType::root_object());
                worklist.push((handler, entry));
            }
            for &succ in block.succs().iter().rev() {
                worklist.push((succ, data.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::cfg::ControlFlowGraph,
        assembly::{opcodes::*, Instruction, InstructionSequence, MethodInfo, ResolvedPool},
        decompiler::{DecompileContext, DecompilerOptions},
    };

    /// `try { x = 1; } finally { y = 2; }` as emitted by an old javac:
    /// the finally body is a subroutine called from the normal path and from
    /// the catch-all handler.
    fn try_finally_with_jsr() -> InstructionSequence {
        InstructionSequence::new(vec![
            // try body
            Instruction::simple(ICONST_1, 0),
            Instruction::create(ISTORE, vec![1], 1),
            Instruction::jump(JSR, 15, 3),
            Instruction::simple(RETURN, 6),
            // catch-all handler
            Instruction::create(ASTORE, vec![2], 7),
            Instruction::jump(JSR, 15, 9),
            Instruction::create(ALOAD, vec![2], 12),
            Instruction::simple(ATHROW, 14),
            // subroutine
            Instruction::create(ASTORE, vec![3], 15),
            Instruction::simple(ICONST_2, 17),
            Instruction::create(ISTORE, vec![4], 18),
            Instruction::create(RET, vec![3], 20),
        ])
        .unwrap()
        .with_exception(0, 3, 7, None)
        .unwrap()
    }

    fn run(seq: &InstructionSequence) -> ControlFlowGraph {
        let mut cfg = ControlFlowGraph::build(seq).unwrap();
        let ctx = DecompileContext::new(DecompilerOptions::default());
        let method = MethodInfo::new("a/B", "f", "()V", true).unwrap();
        cfg.inline_jsr(&ctx, &ResolvedPool::new(), &method).unwrap();
        cfg
    }

    #[test]
    fn test_no_jsr_or_ret_remains() {
        let cfg = run(&try_finally_with_jsr());
        for block in cfg.blocks() {
            assert!(!block
                .instructions()
                .iter()
                .any(|i| i.opcode == JSR || i.opcode == RET));
            assert!(!block
                .instructions()
                .iter()
                .any(|i| i.opcode == ASTORE && i.operand(0) == Some(3)));
        }
        // the handler's own astore of the caught exception survives
        assert!(cfg
            .blocks()
            .any(|b| b.instructions().iter().any(|i| i.opcode == ASTORE && i.operand(0) == Some(2))));
    }

    #[test]
    fn test_each_call_site_owns_a_copy() {
        let cfg = run(&try_finally_with_jsr());
        let copies = cfg
            .blocks()
            .filter(|b| b.instructions().iter().any(|i| i.opcode == ISTORE && i.operand(0) == Some(4)))
            .count();
        assert_eq!(copies, 2);
    }

    #[test]
    fn test_jsr_free_graph_is_unchanged() {
        let seq = InstructionSequence::new(vec![
            Instruction::create(ILOAD, vec![0], 0),
            Instruction::jump(IFEQ, 6, 2),
            Instruction::simple(RETURN, 5),
            Instruction::simple(RETURN, 6),
        ])
        .unwrap();
        let before = ControlFlowGraph::build(&seq).unwrap();
        let after = run(&seq);
        assert_eq!(before.to_string(), after.to_string());
    }
}
