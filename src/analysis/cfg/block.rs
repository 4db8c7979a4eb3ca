//! Basic blocks of the control-flow graph.

use crate::assembly::Instruction;

/// Identifier of a block inside one [`ControlFlowGraph`](super::ControlFlowGraph).
///
/// Ids start at 1 in instruction order and new ids come from the graph's
/// monotonically increasing counter, so an id is never reused.
pub type BlockId = u32;

/// A maximal straight-line run of instructions.
///
/// Edges are stored as block ids on both ends. They are mutated only through
/// the owning graph, which keeps successor and predecessor lists symmetric.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Unique id within the graph
    pub id: BlockId,
    /// Scratch flag for graph walks
    pub mark: u32,
    instructions: Vec<Instruction>,
    original_offsets: Vec<u32>,
    succs: Vec<BlockId>,
    preds: Vec<BlockId>,
    succ_exceptions: Vec<BlockId>,
    pred_exceptions: Vec<BlockId>,
}

impl BasicBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            mark: 0,
            instructions: Vec::new(),
            original_offsets: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
            succ_exceptions: Vec::new(),
            pred_exceptions: Vec::new(),
        }
    }

    /// Appends an instruction. Its offset is rebased to the block start; the
    /// original offset is kept separately.
    pub fn push_instruction(&mut self, instr: &Instruction) {
        let start = self.original_offsets.first().copied().unwrap_or(instr.offset);
        let mut local = instr.clone();
        local.offset = instr.offset - start;
        self.original_offsets.push(instr.offset);
        self.instructions.push(local);
    }

    /// Instructions with block-relative offsets.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Offset of instruction `index` in the method's code array.
    #[must_use]
    pub fn original_offset(&self, index: usize) -> Option<u32> {
        self.original_offsets.get(index).copied()
    }

    /// Original offset of the first instruction.
    #[must_use]
    pub fn start_offset(&self) -> Option<u32> {
        self.original_offsets.first().copied()
    }

    /// Last instruction, if any.
    #[must_use]
    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// Opcode of the last instruction, if any.
    #[must_use]
    pub fn last_opcode(&self) -> Option<u8> {
        self.instructions.last().map(|i| i.opcode)
    }

    /// Returns `true` if the block holds no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Number of instructions.
    #[must_use]
    pub fn size(&self) -> usize {
        self.instructions.len()
    }

    /// Removes instruction `index` together with its original offset.
    pub fn remove_instruction(&mut self, index: usize) {
        if index < self.instructions.len() {
            self.instructions.remove(index);
            self.original_offsets.remove(index);
        }
    }

    /// Regular successors, in edge insertion order.
    #[must_use]
    pub fn succs(&self) -> &[BlockId] {
        &self.succs
    }

    /// Regular predecessors.
    #[must_use]
    pub fn preds(&self) -> &[BlockId] {
        &self.preds
    }

    /// Exception handlers protecting this block.
    #[must_use]
    pub fn succ_exceptions(&self) -> &[BlockId] {
        &self.succ_exceptions
    }

    /// Blocks protected by this handler block.
    #[must_use]
    pub fn pred_exceptions(&self) -> &[BlockId] {
        &self.pred_exceptions
    }

    /// Returns `true` if `id` is a regular successor.
    #[must_use]
    pub fn is_successor(&self, id: BlockId) -> bool {
        self.succs.contains(&id)
    }

    /// Copy of the instructions under a new id, without any edges.
    #[must_use]
    pub fn clone_as(&self, id: BlockId) -> Self {
        BasicBlock {
            id,
            mark: 0,
            instructions: self.instructions.clone(),
            original_offsets: self.original_offsets.clone(),
            ..BasicBlock::new(id)
        }
    }

    pub(crate) fn edge_list_mut(&mut self, kind: EdgeList) -> &mut Vec<BlockId> {
        match kind {
            EdgeList::Succs => &mut self.succs,
            EdgeList::Preds => &mut self.preds,
            EdgeList::SuccExceptions => &mut self.succ_exceptions,
            EdgeList::PredExceptions => &mut self.pred_exceptions,
        }
    }
}

/// Selector for one of a block's four adjacency lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeList {
    Succs,
    Preds,
    SuccExceptions,
    PredExceptions,
}
