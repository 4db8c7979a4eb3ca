//! Control Flow Graph implementation.
//!
//! This module provides the [`ControlFlowGraph`] structure: the basic blocks of
//! one method, their regular and exception edges, the exception ranges and the
//! `jsr` subroutine map.
//!
//! Blocks live in an id-ordered arena. Edges are stored as ids on both ends and
//! every mutation goes through the graph so predecessor and successor lists
//! stay symmetric.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    fmt,
};

use log::debug;

use crate::{
    analysis::cfg::{block::EdgeList, BasicBlock, BlockId, ExceptionRange},
    assembly::{opcodes, InstructionGroup, InstructionSequence},
    utils::graph::IndexedGraph,
    Error::GraphError,
    Result,
};

/// A control flow graph built from a JVM instruction sequence.
///
/// # Construction
///
/// ```rust,ignore
/// use classflow::analysis::ControlFlowGraph;
///
/// let cfg = ControlFlowGraph::build(&sequence)?;
/// println!("CFG has {} blocks", cfg.block_count());
/// for id in cfg.reverse_postorder() {
///     println!("{}", cfg.block(id).unwrap().size());
/// }
/// ```
///
/// # Sentinels
///
/// [`ControlFlowGraph::first`] is the entry block. [`ControlFlowGraph::exit`]
/// is a synthetic block outside the collection whose predecessors are exactly
/// the blocks without regular successors; it never holds instructions and never
/// appears in a block's successor list.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub(super) blocks: BTreeMap<BlockId, BasicBlock>,
    pub(super) first: BlockId,
    pub(super) exit: BasicBlock,
    pub(super) exceptions: Vec<ExceptionRange>,
    /// `jsr` block -> continuation block, in discovery order
    pub(super) subroutines: Vec<(BlockId, BlockId)>,
    pub(super) finally_exits: BTreeSet<BlockId>,
    pub(super) last_id: BlockId,
}

impl ControlFlowGraph {
    /// Builds the graph for a method body.
    ///
    /// # Steps
    ///
    /// 1. Mark block starts (entry, branch targets, instructions after a
    ///    branch/switch/return, exception-table boundaries)
    /// 2. Create one block per mark, ids from 1 in instruction order
    /// 3. Link jumps, switches and fall-through edges
    /// 4. Create exception edges and ranges, merging identical rows
    /// 5. Discover `jsr`/`ret` subroutine edges
    /// 6. Register the exit sentinel's predecessors
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an empty body, an unresolvable
    /// branch target, a `ret` without an open `jsr`, or a `jsr` that is the last
    /// block of the method.
    pub fn build(seq: &InstructionSequence) -> Result<Self> {
        if seq.is_empty() {
            return Err(malformed_error!("Method body has no instructions"));
        }

        let starts = find_start_instructions(seq)?;
        let mut cfg = ControlFlowGraph {
            blocks: BTreeMap::new(),
            first: 1,
            exit: BasicBlock::new(0),
            exceptions: Vec::new(),
            subroutines: Vec::new(),
            finally_exits: BTreeSet::new(),
            last_id: 0,
        };

        let instr_to_block = cfg.create_blocks(seq, &starts);
        cfg.connect_blocks(seq, &instr_to_block)?;
        cfg.set_exception_edges(seq, &instr_to_block)?;
        cfg.set_subroutine_edges()?;

        cfg.first = 1;
        cfg.last_id += 1;
        cfg.exit = BasicBlock::new(cfg.last_id);
        cfg.refresh_exit();

        debug!(
            "built cfg: {} blocks, {} exception ranges, {} subroutine calls",
            cfg.blocks.len(),
            cfg.exceptions.len(),
            cfg.subroutines.len()
        );
        Ok(cfg)
    }

    fn create_blocks(&mut self, seq: &InstructionSequence, starts: &[bool]) -> Vec<BlockId> {
        let mut instr_to_block = Vec::with_capacity(seq.len());
        let mut current: Option<BasicBlock> = None;
        for (idx, instr) in seq.instructions().iter().enumerate() {
            if starts[idx] || current.is_none() {
                if let Some(done) = current.take() {
                    self.blocks.insert(done.id, done);
                }
                self.last_id += 1;
                current = Some(BasicBlock::new(self.last_id));
            }
            if let Some(block) = current.as_mut() {
                block.push_instruction(instr);
                instr_to_block.push(block.id);
            }
        }
        if let Some(done) = current {
            self.blocks.insert(done.id, done);
        }
        instr_to_block
    }

    fn connect_blocks(&mut self, seq: &InstructionSequence, instr_to_block: &[BlockId]) -> Result<()> {
        let ids: Vec<BlockId> = self.blocks.keys().copied().collect();
        for (pos, &id) in ids.iter().enumerate() {
            let Some(last) = self.blocks.get(&id).and_then(BasicBlock::last_instruction) else {
                continue;
            };
            let fall_through = last.can_fall_through();
            let targets: Vec<u32> = match last.group {
                InstructionGroup::Jump => last
                    .jump_target()
                    .map(|t| vec![t])
                    .ok_or_else(|| malformed_error!("Jump without target in block {}", id))?,
                InstructionGroup::Switch => last.branch_targets(),
                _ => Vec::new(),
            };
            for target in targets {
                let index = seq.resolve_target(target)?;
                self.add_successor(id, instr_to_block[index])?;
            }
            if fall_through {
                if let Some(&next) = ids.get(pos + 1) {
                    self.add_successor(id, next)?;
                }
            }
        }
        Ok(())
    }

    fn set_exception_edges(&mut self, seq: &InstructionSequence, instr_to_block: &[BlockId]) -> Result<()> {
        let mut merged: HashMap<(BlockId, BlockId, BlockId), usize> = HashMap::new();
        let end_id = self.last_id + 1;

        for entry in seq.exception_table() {
            let block_at = |offset: u32| -> Result<BlockId> {
                match seq.index_of_or_end(offset) {
                    Some(i) if i < instr_to_block.len() => Ok(instr_to_block[i]),
                    Some(_) => Ok(end_id),
                    None => Err(malformed_error!(
                        "Exception table offset {} does not start an instruction",
                        offset
                    )),
                }
            };
            let from = block_at(entry.from)?;
            let to = block_at(entry.to)?;
            let handler = block_at(entry.handler)?;

            let key = (from, to, handler);
            if let Some(&idx) = merged.get(&key) {
                self.exceptions[idx].add_exception_type(entry.exception_class.as_deref());
                continue;
            }

            let protected: Vec<BlockId> = (from..to).filter(|id| self.blocks.contains_key(id)).collect();
            for &id in &protected {
                self.add_successor_exception(id, handler)?;
            }
            merged.insert(key, self.exceptions.len());
            self.exceptions.push(ExceptionRange::new(
                protected,
                handler,
                entry.exception_class.as_deref(),
            ));
        }
        Ok(())
    }

    /// Walks from every `jsr` block with a per-path stack of open calls and
    /// links each returning `ret` block to the continuation `jsr.id + 1`.
    fn set_subroutine_edges(&mut self) -> Result<()> {
        let jsr_blocks: Vec<BlockId> = self
            .blocks
            .values()
            .filter(|b| b.last_opcode() == Some(opcodes::JSR))
            .map(|b| b.id)
            .collect();

        for start in jsr_blocks {
            let mut worklist: VecDeque<(BlockId, Vec<BlockId>)> = VecDeque::new();
            let mut visited: HashSet<BlockId> = HashSet::new();
            worklist.push_back((start, Vec::new()));

            while let Some((node, mut open_calls)) = worklist.pop_front() {
                visited.insert(node);
                match self.block(node).and_then(BasicBlock::last_opcode) {
                    Some(opcodes::JSR) => open_calls.push(node),
                    Some(opcodes::RET) => {
                        let enter = open_calls.pop().ok_or_else(|| {
                            malformed_error!("ret in block {} without an open jsr", node)
                        })?;
                        let exit = enter + 1;
                        if !self.blocks.contains_key(&exit) {
                            return Err(malformed_error!(
                                "jsr in block {} has no continuation block",
                                enter
                            ));
                        }
                        self.add_successor(node, exit)?;
                        match self.subroutines.iter_mut().find(|(j, _)| *j == enter) {
                            Some(slot) => slot.1 = exit,
                            None => self.subroutines.push((enter, exit)),
                        }
                    }
                    _ => {}
                }

                if !open_calls.is_empty() {
                    for &succ in self.successors_of(node) {
                        if !visited.contains(&succ) {
                            worklist.push_back((succ, open_calls.clone()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn successors_of(&self, id: BlockId) -> &[BlockId] {
        self.blocks.get(&id).map(BasicBlock::succs).unwrap_or_default()
    }

    /// Re-registers the exit sentinel's predecessors: every block without a
    /// regular successor.
    pub(crate) fn refresh_exit(&mut self) {
        let exits: Vec<BlockId> = self
            .blocks
            .values()
            .filter(|b| b.succs().is_empty())
            .map(|b| b.id)
            .collect();
        *self.exit.edge_list_mut(EdgeList::Preds) = exits;
    }

    // ── Accessors ────────────────────────────────────────────────────────

    /// Entry block id.
    #[must_use]
    pub fn first(&self) -> BlockId {
        self.first
    }

    /// Exit sentinel.
    #[must_use]
    pub fn exit(&self) -> &BasicBlock {
        &self.exit
    }

    /// Block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    /// All blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    /// Block ids in ascending order.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    /// Number of blocks (the exit sentinel excluded).
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Exception ranges.
    #[must_use]
    pub fn exceptions(&self) -> &[ExceptionRange] {
        &self.exceptions
    }

    /// `(jsr block, continuation block)` pairs.
    #[must_use]
    pub fn subroutines(&self) -> &[(BlockId, BlockId)] {
        &self.subroutines
    }

    /// Blocks that leave a `finally` handler.
    #[must_use]
    pub fn finally_exits(&self) -> &BTreeSet<BlockId> {
        &self.finally_exits
    }

    /// Marks `id` as a `finally` exit.
    pub fn add_finally_exit(&mut self, id: BlockId) {
        self.finally_exits.insert(id);
    }

    /// Highest id handed out so far.
    #[must_use]
    pub fn last_id(&self) -> BlockId {
        self.last_id
    }

    /// The range whose handler is `handler`, if any.
    #[must_use]
    pub fn exception_range_for(&self, handler: BlockId) -> Option<&ExceptionRange> {
        self.exceptions.iter().find(|r| r.handler == handler)
    }

    // ── Mutation ─────────────────────────────────────────────────────────

    fn link(&mut self, from: BlockId, to: BlockId, forward: EdgeList, backward: EdgeList) -> Result<()> {
        if !self.blocks.contains_key(&to) {
            return Err(GraphError(format!("Edge {from} -> {to}: unknown target")));
        }
        let source = self
            .blocks
            .get_mut(&from)
            .ok_or_else(|| GraphError(format!("Edge {from} -> {to}: unknown source")))?;
        let list = source.edge_list_mut(forward);
        if !list.contains(&to) {
            list.push(to);
        }
        if let Some(target) = self.blocks.get_mut(&to) {
            let list = target.edge_list_mut(backward);
            if !list.contains(&from) {
                list.push(from);
            }
        }
        Ok(())
    }

    fn unlink(&mut self, from: BlockId, to: BlockId, forward: EdgeList, backward: EdgeList) {
        if let Some(source) = self.blocks.get_mut(&from) {
            source.edge_list_mut(forward).retain(|&id| id != to);
        }
        if let Some(target) = self.blocks.get_mut(&to) {
            target.edge_list_mut(backward).retain(|&id| id != from);
        }
    }

    /// Adds a regular edge and its inverse predecessor entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphError`] if either block does not exist.
    pub fn add_successor(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        self.link(from, to, EdgeList::Succs, EdgeList::Preds)
    }

    /// Adds an exception edge from a protected block to a handler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphError`] if either block does not exist.
    pub fn add_successor_exception(&mut self, from: BlockId, handler: BlockId) -> Result<()> {
        self.link(from, handler, EdgeList::SuccExceptions, EdgeList::PredExceptions)
    }

    /// Removes a regular edge in both directions.
    pub fn remove_successor(&mut self, from: BlockId, to: BlockId) {
        self.unlink(from, to, EdgeList::Succs, EdgeList::Preds);
    }

    /// Removes an exception edge in both directions.
    pub fn remove_successor_exception(&mut self, from: BlockId, handler: BlockId) {
        self.unlink(from, handler, EdgeList::SuccExceptions, EdgeList::PredExceptions);
    }

    /// Redirects every edge `block -> old` (regular and exception) to `new`,
    /// keeping the position in the successor list.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphError`] if `block` or `new` does not exist.
    pub fn replace_successor(&mut self, block: BlockId, old: BlockId, new: BlockId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if !self.blocks.contains_key(&new) {
            return Err(GraphError(format!("replace {old} -> {new}: unknown block {new}")));
        }
        for (forward, backward) in [
            (EdgeList::Succs, EdgeList::Preds),
            (EdgeList::SuccExceptions, EdgeList::PredExceptions),
        ] {
            let source = self
                .blocks
                .get_mut(&block)
                .ok_or_else(|| GraphError(format!("replace in unknown block {block}")))?;
            let list = source.edge_list_mut(forward);
            let Some(pos) = list.iter().position(|&id| id == old) else {
                continue;
            };
            if list.contains(&new) {
                list.remove(pos);
            } else {
                list[pos] = new;
            }
            if let Some(old_block) = self.blocks.get_mut(&old) {
                old_block.edge_list_mut(backward).retain(|&id| id != block);
            }
            if let Some(new_block) = self.blocks.get_mut(&new) {
                let preds = new_block.edge_list_mut(backward);
                if !preds.contains(&block) {
                    preds.push(block);
                }
            }
        }
        Ok(())
    }

    /// Inserts a block under a fresh id and returns the id.
    pub fn insert_block(&mut self, mut block: BasicBlock) -> BlockId {
        self.last_id += 1;
        block.id = self.last_id;
        self.blocks.insert(block.id, block);
        self.last_id
    }

    /// Removes a block with all its edges, its exception-range memberships
    /// (ranges handled by it or left empty are dropped) and subroutine entries.
    pub fn remove_block(&mut self, id: BlockId) {
        let Some(block) = self.blocks.get(&id).cloned() else {
            return;
        };
        for &succ in block.succs() {
            self.remove_successor(id, succ);
        }
        for &handler in block.succ_exceptions() {
            self.remove_successor_exception(id, handler);
        }
        for &pred in block.preds() {
            self.remove_successor(pred, id);
        }
        for &pred in block.pred_exceptions() {
            self.remove_successor_exception(pred, id);
        }
        self.blocks.remove(&id);

        self.exceptions.retain_mut(|range| {
            if range.handler == id {
                return false;
            }
            range.protected_range.retain(|&b| b != id);
            !range.protected_range.is_empty()
        });
        self.subroutines.retain(|&(jsr, exit)| jsr != id && exit != id);
        self.finally_exits.remove(&id);
        self.refresh_exit();
    }

    /// Mutable access to a block's instructions and mark.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&id)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Returns `true` if every path from the entry to `block` passes through `dom`.
    ///
    /// Walks predecessors (regular and exception) backwards from `block`,
    /// never crossing `dom`; reaching the entry means `dom` can be bypassed.
    #[must_use]
    pub fn is_dominator(&self, block: BlockId, dom: BlockId) -> bool {
        if block == dom {
            return true;
        }
        let mut marked: HashSet<BlockId> = HashSet::new();
        let mut worklist = VecDeque::from([block]);
        while let Some(node) = worklist.pop_front() {
            if !marked.insert(node) {
                continue;
            }
            if node == self.first {
                return false;
            }
            let Some(b) = self.blocks.get(&node) else {
                continue;
            };
            for &pred in b.preds().iter().chain(b.pred_exceptions()) {
                if pred != dom && !marked.contains(&pred) {
                    worklist.push_back(pred);
                }
            }
        }
        true
    }

    /// Blocks reachable from the entry (regular and exception edges) in reverse postorder.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut graph: IndexedGraph<BlockId> = IndexedGraph::new();
        graph.add_node(self.first);
        for block in self.blocks.values() {
            graph.add_node(block.id);
            for &succ in block.succs().iter().chain(block.succ_exceptions()) {
                graph.add_edge(block.id, succ);
            }
        }
        graph.reverse_postorder_from(&self.first)
    }

    /// Ids of all blocks reachable from the entry.
    #[must_use]
    pub fn reachable_blocks(&self) -> HashSet<BlockId> {
        self.reverse_postorder().into_iter().collect()
    }

    /// Clears every block's scratch mark.
    pub fn clear_marks(&mut self) {
        for block in self.blocks.values_mut() {
            block.mark = 0;
        }
    }
}

/// Marks instruction indices that start a block.
fn find_start_instructions(seq: &InstructionSequence) -> Result<Vec<bool>> {
    let len = seq.len();
    let mut starts = vec![false; len];
    starts[0] = true;

    for (idx, instr) in seq.instructions().iter().enumerate() {
        match instr.group {
            InstructionGroup::Jump | InstructionGroup::Switch => {
                for target in instr.branch_targets() {
                    starts[seq.resolve_target(target)?] = true;
                }
                if idx + 1 < len {
                    starts[idx + 1] = true;
                }
            }
            InstructionGroup::Return => {
                if idx + 1 < len {
                    starts[idx + 1] = true;
                }
            }
            _ => {}
        }
    }

    for entry in seq.exception_table() {
        for offset in [entry.from, entry.handler, entry.to] {
            if let Some(i) = seq.index_of_or_end(offset) {
                if i < len {
                    starts[i] = true;
                }
            }
        }
    }
    Ok(starts)
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ids: &[BlockId]| {
            ids.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        };
        for block in self.blocks.values() {
            writeln!(f, "----- block {} -----", block.id)?;
            for (i, instr) in block.instructions().iter().enumerate() {
                let original = block.original_offset(i).unwrap_or_default();
                write!(f, "  {original:>5}: {}", instr.mnemonic())?;
                for op in &instr.operands {
                    write!(f, " {op}")?;
                }
                writeln!(f)?;
            }
            writeln!(f, "  succs: {}", join(block.succs()))?;
            if !block.succ_exceptions().is_empty() {
                writeln!(f, "  exceptions: {}", join(block.succ_exceptions()))?;
            }
        }
        writeln!(f, "----- exit {} <- {}", self.exit.id, join(self.exit.preds()))?;
        for range in &self.exceptions {
            writeln!(f, "{range}")?;
        }
        for (jsr, exit) in &self.subroutines {
            writeln!(f, "subroutine: {jsr} -> {exit}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{opcodes::*, Instruction};

    /// `int f(boolean b){ int x; if (b) x=1; else x=2; return x; }`
    fn if_else_sequence() -> InstructionSequence {
        InstructionSequence::new(vec![
            Instruction::create(ILOAD, vec![1], 0),
            Instruction::jump(IFEQ, 9, 1),
            Instruction::simple(ICONST_1, 4),
            Instruction::create(ISTORE, vec![2], 5),
            Instruction::jump(GOTO, 11, 6),
            Instruction::simple(ICONST_2, 9),
            Instruction::create(ISTORE, vec![2], 10),
            Instruction::create(ILOAD, vec![2], 11),
            Instruction::simple(IRETURN, 12),
        ])
        .unwrap()
    }

    #[test]
    fn test_if_else_has_four_blocks() {
        let cfg = ControlFlowGraph::build(&if_else_sequence()).unwrap();
        assert_eq!(cfg.block_count(), 4);
        assert_eq!(cfg.first(), 1);
        assert_eq!(cfg.block(1).unwrap().succs(), &[3, 2]);
        assert_eq!(cfg.block(2).unwrap().succs(), &[4]);
        assert_eq!(cfg.block(3).unwrap().succs(), &[4]);
        let mut preds = cfg.block(4).unwrap().preds().to_vec();
        preds.sort_unstable();
        assert_eq!(preds, vec![2, 3]);
        assert_eq!(cfg.exit().preds(), &[4]);
        assert!(cfg.exit().id > 4);
    }

    #[test]
    fn test_symmetric_edge_mutation() {
        let mut cfg = ControlFlowGraph::build(&if_else_sequence()).unwrap();
        cfg.remove_successor(1, 2);
        assert!(!cfg.block(2).unwrap().preds().contains(&1));
        cfg.add_successor(1, 2).unwrap();
        assert!(cfg.block(2).unwrap().preds().contains(&1));
        cfg.replace_successor(2, 4, 3).unwrap();
        assert_eq!(cfg.block(2).unwrap().succs(), &[3]);
        assert!(!cfg.block(4).unwrap().preds().contains(&2));
        assert!(cfg.block(3).unwrap().preds().contains(&2));
        assert!(cfg.add_successor(1, 99).is_err());
    }

    #[test]
    fn test_is_dominator() {
        let cfg = ControlFlowGraph::build(&if_else_sequence()).unwrap();
        assert!(cfg.is_dominator(4, 1));
        assert!(!cfg.is_dominator(4, 2));
        assert!(cfg.is_dominator(2, 2));
    }

    #[test]
    fn test_remove_block_updates_exit() {
        let mut cfg = ControlFlowGraph::build(&if_else_sequence()).unwrap();
        cfg.remove_block(4);
        let mut exits = cfg.exit().preds().to_vec();
        exits.sort_unstable();
        assert_eq!(exits, vec![2, 3]);
        assert!(cfg.block(4).is_none());
    }

    #[test]
    fn test_subroutine_edges() {
        let seq = InstructionSequence::new(vec![
            Instruction::jump(JSR, 4, 0),
            Instruction::simple(RETURN, 3),
            Instruction::create(RET, vec![1], 4),
        ])
        .unwrap();
        let cfg = ControlFlowGraph::build(&seq).unwrap();
        assert_eq!(cfg.subroutines(), &[(1, 2)]);
        assert_eq!(cfg.block(3).unwrap().succs(), &[2]);
        assert!(cfg.block(1).unwrap().succs().contains(&3));
    }

    #[test]
    fn test_jsr_without_continuation_is_malformed() {
        let seq = InstructionSequence::new(vec![
            Instruction::jump(GOTO, 5, 0),
            Instruction::create(RET, vec![1], 3),
            Instruction::jump(JSR, 3, 5),
        ])
        .unwrap();
        assert!(matches!(
            ControlFlowGraph::build(&seq),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_display_lists_blocks() {
        let cfg = ControlFlowGraph::build(&if_else_sequence()).unwrap();
        let dump = cfg.to_string();
        assert!(dump.contains("----- block 1 -----"));
        assert!(dump.contains("ifeq 9"));
    }
}
