//! Removal of unreachable and empty blocks.

use std::collections::HashSet;

use log::debug;

use crate::{
    analysis::cfg::{BlockId, ControlFlowGraph},
    assembly::InstructionGroup,
    Result,
};

impl ControlFlowGraph {
    /// Removes every block not reachable from the entry over regular or
    /// exception edges. Returns the number of removed blocks.
    pub fn remove_dead_blocks(&mut self) -> usize {
        let reachable = self.reachable_blocks();
        let dead: Vec<BlockId> = self
            .blocks
            .keys()
            .copied()
            .filter(|id| !reachable.contains(id))
            .collect();
        for &id in &dead {
            self.remove_block(id);
        }
        if !dead.is_empty() {
            debug!("removed {} unreachable blocks", dead.len());
        }
        dead.len()
    }

    /// Removes instruction-less blocks, rewiring each predecessor to the single
    /// successor. Ranges consisting only of the removed block are dropped when
    /// `remove_empty_ranges` is set; otherwise such a block is kept.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an empty block with more than one
    /// successor, or an empty entry block without exactly one successor.
    pub fn remove_empty_blocks(&mut self, remove_empty_ranges: bool) -> Result<()> {
        loop {
            let mut changed = false;
            let ids: Vec<BlockId> = self.blocks.keys().rev().copied().collect();
            for id in ids {
                if !self.blocks.contains_key(&id) {
                    continue;
                }
                let (removed, dropped_ranges) = self.remove_empty_block(id, remove_empty_ranges)?;
                if dropped_ranges {
                    self.remove_dead_blocks();
                }
                changed |= removed;
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Returns `(block removed, exception ranges dropped)`.
    fn remove_empty_block(&mut self, id: BlockId, remove_empty_ranges: bool) -> Result<(bool, bool)> {
        let Some(block) = self.blocks.get(&id) else {
            return Ok((false, false));
        };
        if !block.is_empty() {
            return Ok((false, false));
        }
        if block.succs().len() > 1 {
            if block.preds().len() > 1 {
                return Err(malformed_error!(
                    "Empty block {} with multiple predecessors and successors",
                    id
                ));
            }
            return Err(malformed_error!("Empty block {} with multiple successors", id));
        }

        let is_exit = block.succs().is_empty();
        if !block.pred_exceptions().is_empty() || (is_exit && block.preds().len() != 1) {
            return Ok((false, false));
        }
        if is_exit {
            let pred_is_simple = block
                .preds()
                .first()
                .and_then(|p| self.blocks.get(p))
                .is_some_and(|pred| {
                    pred.succs().len() == 1
                        && pred
                            .last_instruction()
                            .map_or(true, |last| last.group != InstructionGroup::Switch)
                });
            if !pred_is_simple {
                return Ok((false, false));
            }
        }

        let preds: Vec<BlockId> = block.preds().to_vec();
        let succs: Vec<BlockId> = block.succs().to_vec();
        let own_handlers: HashSet<BlockId> = block.succ_exceptions().iter().copied().collect();

        // handlers shared by all neighbours must also protect the empty block
        let mut common: Option<HashSet<BlockId>> = None;
        for neighbour in preds.iter().chain(&succs) {
            let handlers: HashSet<BlockId> = self
                .blocks
                .get(neighbour)
                .map(|b| b.succ_exceptions().iter().copied().collect())
                .unwrap_or_default();
            common = Some(match common {
                None => handlers,
                Some(acc) => acc.intersection(&handlers).copied().collect(),
            });
        }
        if common.is_some_and(|set| !set.is_subset(&own_handlers)) {
            return Ok((false, false));
        }

        let single_ranges: Vec<usize> = self
            .exceptions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.protected_range.as_slice() == [id])
            .map(|(i, _)| i)
            .collect();
        if !single_ranges.is_empty() && !remove_empty_ranges {
            return Ok((false, false));
        }
        let dropped_ranges = !single_ranges.is_empty();
        for &i in single_ranges.iter().rev() {
            let range = self.exceptions.remove(i);
            self.remove_successor_exception(id, range.handler);
        }

        for &pred in &preds {
            if let Some(&succ) = succs.first() {
                self.replace_successor(pred, id, succ)?;
            }
        }

        if self.finally_exits.remove(&id) {
            if let Some(&pred) = preds.first() {
                self.finally_exits.insert(pred);
            }
        }

        if self.first == id {
            match succs.as_slice() {
                [next] => self.first = *next,
                _ => return Err(malformed_error!("Empty entry block {} has no single successor", id)),
            }
        }

        self.remove_block(id);
        Ok((true, dropped_ranges))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        analysis::cfg::ControlFlowGraph,
        assembly::{opcodes::*, Instruction, InstructionSequence},
    };

    #[test]
    fn test_unreachable_block_is_removed() {
        let seq = InstructionSequence::new(vec![
            Instruction::jump(GOTO, 4, 0),
            Instruction::simple(NOP, 3),
            Instruction::simple(RETURN, 4),
        ])
        .unwrap();
        let mut cfg = ControlFlowGraph::build(&seq).unwrap();
        assert_eq!(cfg.block_count(), 3);
        assert_eq!(cfg.remove_dead_blocks(), 1);
        assert!(cfg.block(2).is_none());
        assert!(cfg.block(3).unwrap().preds().contains(&1));
    }

    #[test]
    fn test_empty_block_is_bypassed() {
        let seq = InstructionSequence::new(vec![
            Instruction::simple(NOP, 0),
            Instruction::jump(GOTO, 4, 1),
            Instruction::simple(RETURN, 4),
        ])
        .unwrap();
        let mut cfg = ControlFlowGraph::build(&seq).unwrap();
        assert_eq!(cfg.block_count(), 2);
        // strip block 1 so it becomes empty
        let block = cfg.block_mut(1).unwrap();
        block.remove_instruction(1);
        block.remove_instruction(0);
        cfg.remove_empty_blocks(true).unwrap();
        assert_eq!(cfg.block_count(), 1);
        assert_eq!(cfg.first(), 2);
    }
}
