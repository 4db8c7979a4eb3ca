//! Control-flow graph integration tests.
//!
//! Sequences are assembled by hand from [`Instruction`] constructors, so the
//! offsets below follow real javac output for the quoted source.

use std::collections::HashSet;

use classflow::{
    analysis::cfg::{BasicBlock, ControlFlowGraph},
    assembly::{opcodes::*, Instruction, InstructionSequence},
    Error, Result,
};

/// `static void f(boolean b) { try { int x = b ? 0 : 1; } catch (IOException | RuntimeException e) {} }`
fn guarded_sequence() -> Result<InstructionSequence> {
    InstructionSequence::new(vec![
        Instruction::create(ILOAD, vec![0], 0),
        Instruction::jump(IFEQ, 5, 1),
        Instruction::simple(ICONST_1, 4),
        Instruction::create(ISTORE, vec![1], 5),
        Instruction::simple(RETURN, 7),
        Instruction::create(ASTORE, vec![2], 8),
        Instruction::simple(RETURN, 10),
    ])?
    .with_exception(0, 7, 8, Some("java/io/IOException"))?
    .with_exception(0, 7, 8, Some("java/lang/RuntimeException"))
}

fn block_at(cfg: &ControlFlowGraph, offset: u32) -> &BasicBlock {
    cfg.blocks()
        .find(|b| b.start_offset() == Some(offset))
        .unwrap_or_else(|| panic!("no block starts at {offset}"))
}

#[test]
fn test_protected_blocks_have_exception_edges() -> Result<()> {
    let cfg = ControlFlowGraph::build(&guarded_sequence()?)?;
    let handler = block_at(&cfg, 8).id;

    for block in cfg.blocks() {
        let protected = block.start_offset().is_some_and(|o| o < 7);
        assert_eq!(
            block.succ_exceptions().contains(&handler),
            protected,
            "block {} at {:?}",
            block.id,
            block.start_offset()
        );
    }
    assert_eq!(cfg.block(handler).map(|b| b.pred_exceptions().len()), Some(3));
    Ok(())
}

#[test]
fn test_identical_rows_collapse_into_one_range() -> Result<()> {
    let cfg = ControlFlowGraph::build(&guarded_sequence()?)?;
    assert_eq!(cfg.exceptions().len(), 1);

    let handler = block_at(&cfg, 8).id;
    let range = cfg.exception_range_for(handler).expect("range for handler");
    assert_eq!(range.protected_range.len(), 3);
    assert!(!range.is_catch_all());
    assert_eq!(
        range.unique_exceptions_string().as_deref(),
        Some("java/io/IOException|java/lang/RuntimeException")
    );
    Ok(())
}

#[test]
fn test_catch_all_row_widens_range_to_catch_all() -> Result<()> {
    let seq = guarded_sequence()?.with_exception(0, 7, 8, None)?;
    let cfg = ControlFlowGraph::build(&seq)?;
    assert_eq!(cfg.exceptions().len(), 1);
    assert!(cfg.exceptions()[0].is_catch_all());
    Ok(())
}

#[test]
fn test_edges_are_symmetric() -> Result<()> {
    let cfg = ControlFlowGraph::build(&guarded_sequence()?)?;
    let exit = cfg.exit().id;
    for block in cfg.blocks() {
        for &succ in block.succs() {
            if succ == exit {
                assert!(cfg.exit().preds().contains(&block.id));
            } else {
                assert!(cfg.block(succ).is_some_and(|s| s.preds().contains(&block.id)));
            }
        }
        for &handler in block.succ_exceptions() {
            assert!(cfg
                .block(handler)
                .is_some_and(|h| h.pred_exceptions().contains(&block.id)));
        }
    }
    Ok(())
}

#[test]
fn test_returns_reach_exit_sentinel() -> Result<()> {
    let cfg = ControlFlowGraph::build(&guarded_sequence()?)?;
    let exits: HashSet<_> = cfg.exit().preds().iter().copied().collect();
    let expected: HashSet<_> = [block_at(&cfg, 7).id, block_at(&cfg, 8).id].into_iter().collect();
    assert_eq!(exits, expected);
    Ok(())
}

#[test]
fn test_reverse_postorder_covers_handler() -> Result<()> {
    let cfg = ControlFlowGraph::build(&guarded_sequence()?)?;
    let order = cfg.reverse_postorder();
    assert_eq!(order.first(), Some(&cfg.first()));
    assert_eq!(order.len(), cfg.block_count());
    assert!(order.contains(&block_at(&cfg, 8).id));
    Ok(())
}

#[test]
fn test_switch_links_default_and_cases() -> Result<()> {
    // switch (i) { case 1: return; case 5: return; default: return; }
    let seq = InstructionSequence::new(vec![
        Instruction::create(ILOAD, vec![0], 0),
        Instruction::switch(LOOKUPSWITCH, 32, &[(1, 28), (5, 30)], 1),
        Instruction::simple(RETURN, 28),
        Instruction::simple(RETURN, 30),
        Instruction::simple(RETURN, 32),
    ])?;
    let cfg = ControlFlowGraph::build(&seq)?;
    assert_eq!(cfg.block_count(), 4);

    let head = cfg.block(cfg.first()).expect("entry block");
    let targets: HashSet<_> = head.succs().iter().copied().collect();
    let expected: HashSet<_> = [28, 30, 32].iter().map(|&o| block_at(&cfg, o).id).collect();
    assert_eq!(targets, expected);
    Ok(())
}

#[test]
fn test_removing_handler_drops_its_range() -> Result<()> {
    let mut cfg = ControlFlowGraph::build(&guarded_sequence()?)?;
    let protected = block_at(&cfg, 4).id;
    cfg.remove_block(protected);
    assert_eq!(cfg.exceptions()[0].protected_range.len(), 2);
    assert!(!cfg.exceptions()[0].contains(protected));

    let handler = block_at(&cfg, 8).id;
    cfg.remove_block(handler);
    assert!(cfg.exceptions().is_empty());
    assert!(cfg.blocks().all(|b| b.succ_exceptions().is_empty()));
    Ok(())
}

#[test]
fn test_unresolvable_jump_is_malformed() -> Result<()> {
    let seq = InstructionSequence::new(vec![
        Instruction::jump(GOTO, 7, 0),
        Instruction::simple(RETURN, 3),
    ])?;
    assert!(matches!(ControlFlowGraph::build(&seq), Err(Error::Malformed { .. })));
    Ok(())
}
