//! Benchmarks for the per-method analysis passes.
//!
//! - CFG construction and subroutine inlining of a legacy try/finally
//! - Flattening and read-only SSA of a loop nest
//! - Versioning, typing and compaction of the same loop nest

extern crate classflow;

use classflow::{
    analysis::{cfg::ControlFlowGraph, flatten::flatten, ssa::SsaConstructor, vars::VarVersionsProcessor},
    assembly::{opcodes::*, Instruction, InstructionSequence, MethodInfo, ResolvedPool, VarType},
    decompiler::{DecompileContext, DecompilerOptions},
    structure::{Expr, FunctionType, LoopType, StatId, StatementTree, StatementTreeBuilder},
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

/// `try { x = 1; } finally { y = 2; }` compiled with `jsr`.
fn try_finally_with_jsr() -> InstructionSequence {
    InstructionSequence::new(vec![
        Instruction::simple(ICONST_1, 0),
        Instruction::create(ISTORE, vec![1], 1),
        Instruction::jump(JSR, 15, 3),
        Instruction::simple(RETURN, 6),
        Instruction::create(ASTORE, vec![2], 7),
        Instruction::jump(JSR, 15, 9),
        Instruction::create(ALOAD, vec![2], 12),
        Instruction::simple(ATHROW, 14),
        Instruction::create(ASTORE, vec![3], 15),
        Instruction::simple(ICONST_2, 17),
        Instruction::create(ISTORE, vec![4], 18),
        Instruction::create(RET, vec![3], 20),
    ])
    .unwrap()
    .with_exception(0, 3, 7, None)
    .unwrap()
}

/// `int s = 0; while (c) { int i = 0; while (c) { s = s + i; i = i + 1; } } return s;`
/// repeated `depth` times in sequence.
fn loop_chain(depth: usize) -> StatementTree {
    let mut b = StatementTreeBuilder::new();
    let s = Expr::var(b.ids(), 1);
    let zero = Expr::int_const(b.ids(), 0, false);
    let init = Expr::assign(b.ids(), s, zero);
    let start = b.basic(vec![init]);

    let mut parts: Vec<StatId> = vec![start];
    for _ in 0..depth {
        let i = Expr::var(b.ids(), 2);
        let zero = Expr::int_const(b.ids(), 0, false);
        let reset = Expr::assign(b.ids(), i, zero);
        let outer_head = b.basic(vec![reset]);

        let s_read = Expr::var(b.ids(), 1);
        let i_read = Expr::var(b.ids(), 2);
        let sum = Expr::function(b.ids(), FunctionType::Add, vec![s_read, i_read]);
        let s_def = Expr::var(b.ids(), 1);
        let acc = Expr::assign(b.ids(), s_def, sum);
        let i_read = Expr::var(b.ids(), 2);
        let one = Expr::int_const(b.ids(), 1, false);
        let next = Expr::function(b.ids(), FunctionType::Add, vec![i_read, one]);
        let i_def = Expr::var(b.ids(), 2);
        let step = Expr::assign(b.ids(), i_def, next);
        let inner_body = b.basic(vec![acc, step]);
        let inner_cond = Expr::var(b.ids(), 0);
        let inner = b.do_loop(LoopType::While, inner_body, None, Some(inner_cond), None);
        b.continue_to(inner_body, inner);

        let outer_body = b.sequence(vec![outer_head, inner]);
        let outer_cond = Expr::var(b.ids(), 0);
        let outer = b.do_loop(LoopType::While, outer_body, None, Some(outer_cond), None);
        b.regular(outer_head, inner).continue_to(inner, outer);

        if let Some(&prev) = parts.last() {
            b.regular(prev, outer);
        }
        parts.push(outer);
    }

    let s_ret = Expr::var(b.ids(), 1);
    let ret_expr = Expr::ret(b.ids(), Some(s_ret), VarType::INT);
    let ret = b.basic(vec![ret_expr]);
    let exit = b.exit();
    if let Some(&prev) = parts.last() {
        b.regular(prev, ret);
    }
    b.break_to(ret, exit);
    parts.push(ret);
    let body = b.sequence(parts);
    b.build(body).unwrap()
}

fn method() -> MethodInfo {
    MethodInfo::new("a/B", "f", "(Z)I", true).unwrap()
}

/// Benchmark CFG construction plus `jsr` inlining.
fn bench_cfg_inline_jsr(c: &mut Criterion) {
    let seq = try_finally_with_jsr();
    let ctx = DecompileContext::new(DecompilerOptions::default());
    let pool = ResolvedPool::new();
    let method = MethodInfo::new("a/B", "f", "()V", true).unwrap();

    c.bench_function("cfg_inline_jsr", |b| {
        b.iter(|| {
            let mut cfg = ControlFlowGraph::build(black_box(&seq)).unwrap();
            cfg.inline_jsr(&ctx, &pool, &method).unwrap();
            black_box(cfg)
        });
    });
}

/// Benchmark flattening of a chain of nested loops.
fn bench_flatten(c: &mut Criterion) {
    let tree = loop_chain(16);

    c.bench_function("flatten_loop_chain", |b| {
        b.iter(|| black_box(flatten(black_box(&tree)).unwrap()));
    });
}

/// Benchmark read-only SSA of a chain of nested loops.
fn bench_ssa(c: &mut Criterion) {
    let tree = loop_chain(16);
    let method = method();

    c.bench_function("ssa_loop_chain", |b| {
        b.iter(|| {
            let mut tree = tree.clone();
            black_box(SsaConstructor::split_variables(&mut tree, &method).unwrap())
        });
    });
}

/// Benchmark the whole variable stage: versioning, typing, merging and compaction.
fn bench_var_versions(c: &mut Criterion) {
    let tree = loop_chain(16);
    let method = method();

    c.bench_function("var_versions_loop_chain", |b| {
        b.iter(|| {
            let mut tree = tree.clone();
            let mut ctx = DecompileContext::new(DecompilerOptions::default());
            black_box(VarVersionsProcessor::set_var_versions(&mut ctx, &mut tree, &method).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_cfg_inline_jsr,
    bench_flatten,
    bench_ssa,
    bench_var_versions
);
criterion_main!(benches);
