//! Subroutine inlining integration tests.

use std::collections::HashSet;

use classflow::{
    analysis::cfg::ControlFlowGraph,
    assembly::{opcodes::*, Instruction, InstructionSequence, MethodInfo, ResolvedPool},
    decompiler::{DecompileContext, DecompilerOptions},
    Result,
};

fn inline(seq: &InstructionSequence, descriptor: &str) -> Result<ControlFlowGraph> {
    let mut cfg = ControlFlowGraph::build(seq)?;
    let ctx = DecompileContext::new(DecompilerOptions::default()).with_method("a/B.f");
    let method = MethodInfo::new("a/B", "f", descriptor, true)?;
    cfg.inline_jsr(&ctx, &ResolvedPool::new(), &method)?;
    Ok(cfg)
}

/// Both branches of `if (b)` call the same subroutine, which stores 0 into
/// local 2 before returning.
fn two_call_sites() -> Result<InstructionSequence> {
    InstructionSequence::new(vec![
        Instruction::create(ILOAD, vec![0], 0),
        Instruction::jump(IFEQ, 8, 1),
        Instruction::jump(JSR, 12, 4),
        Instruction::simple(RETURN, 7),
        Instruction::jump(JSR, 12, 8),
        Instruction::simple(RETURN, 11),
        Instruction::create(ASTORE, vec![1], 12),
        Instruction::simple(ICONST_0, 13),
        Instruction::create(ISTORE, vec![2], 14),
        Instruction::create(RET, vec![1], 16),
    ])
}

fn assert_consistent(cfg: &ControlFlowGraph) {
    let ids = cfg.block_ids();
    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
    assert!(!unique.contains(&cfg.exit().id));

    let exit = cfg.exit().id;
    for block in cfg.blocks() {
        assert!(!matches!(block.last_opcode(), Some(JSR) | Some(RET)));
        for &succ in block.succs() {
            assert!(succ == exit || cfg.block(succ).is_some_and(|s| s.preds().contains(&block.id)));
        }
    }
}

#[test]
fn test_subroutine_is_duplicated_per_call_site() -> Result<()> {
    let seq = two_call_sites()?;
    let before = ControlFlowGraph::build(&seq)?;
    assert_eq!(before.subroutines().len(), 2);

    let cfg = inline(&seq, "(Z)V")?;
    assert_consistent(&cfg);
    assert!(cfg.subroutines().is_empty());

    let copies: Vec<_> = cfg
        .blocks()
        .filter(|b| b.instructions().iter().any(|i| i.opcode == ISTORE && i.operand(0) == Some(2)))
        .map(|b| b.id)
        .collect();
    assert_eq!(copies.len(), 2);
    // the address store is gone from both copies
    assert!(!cfg
        .blocks()
        .any(|b| b.instructions().iter().any(|i| i.opcode == ASTORE)));
    Ok(())
}

#[test]
fn test_each_copy_returns_to_its_own_caller() -> Result<()> {
    let cfg = inline(&two_call_sites()?, "(Z)V")?;
    let returns: Vec<_> = cfg
        .blocks()
        .filter(|b| b.last_opcode() == Some(RETURN))
        .map(|b| b.id)
        .collect();
    assert_eq!(returns.len(), 2);

    // every copy of the subroutine body reaches exactly one return
    for block in cfg
        .blocks()
        .filter(|b| b.instructions().iter().any(|i| i.opcode == ISTORE))
    {
        let mut reached = HashSet::new();
        let mut stack = vec![block.id];
        while let Some(id) = stack.pop() {
            if let Some(b) = cfg.block(id) {
                if b.last_opcode() == Some(RETURN) {
                    reached.insert(id);
                }
                stack.extend(b.succs().iter().copied().filter(|&s| s != id));
            }
        }
        assert_eq!(reached.len(), 1, "copy in block {}", block.id);
    }
    Ok(())
}

#[test]
fn test_graph_without_subroutines_is_unchanged() -> Result<()> {
    // int f(boolean b){ int x; if (b) x=1; else x=2; return x; }
    let seq = InstructionSequence::new(vec![
        Instruction::create(ILOAD, vec![1], 0),
        Instruction::jump(IFEQ, 9, 1),
        Instruction::simple(ICONST_1, 4),
        Instruction::create(ISTORE, vec![2], 5),
        Instruction::jump(GOTO, 11, 6),
        Instruction::simple(ICONST_2, 9),
        Instruction::create(ISTORE, vec![2], 10),
        Instruction::create(ILOAD, vec![2], 11),
        Instruction::simple(IRETURN, 12),
    ])?;
    let before = ControlFlowGraph::build(&seq)?;
    let mut after = before.clone();
    let ctx = DecompileContext::new(DecompilerOptions::default());
    let method = MethodInfo::new("a/B", "f", "(Z)I", false)?;
    after.inline_jsr(&ctx, &ResolvedPool::new(), &method)?;

    assert_eq!(before.to_string(), after.to_string());
    assert_eq!(after.block_count(), 4);
    Ok(())
}

#[test]
fn test_dead_code_without_subroutines_is_left_alone() -> Result<()> {
    // the iconst after the first return is never executed
    let seq = InstructionSequence::new(vec![
        Instruction::simple(RETURN, 0),
        Instruction::simple(ICONST_0, 1),
        Instruction::simple(IRETURN, 2),
    ])?;
    let before = ControlFlowGraph::build(&seq)?;
    assert_eq!(before.block_count(), 2);

    let inlined = inline(&seq, "()V")?;
    assert_eq!(inlined.to_string(), before.to_string());

    let mut cfg = before.clone();
    assert_eq!(cfg.remove_dead_blocks(), 1);
    assert_eq!(cfg.block_count(), 1);
    assert_eq!(cfg.exit().preds(), &[cfg.first()]);
    Ok(())
}
