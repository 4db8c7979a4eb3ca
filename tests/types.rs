//! Type inference and version merging integration tests.

use classflow::{
    analysis::{
        cfg::ControlFlowGraph,
        ssa::SsaConstructor,
        vars::{FinalType, VarInfo, VarProcessor, VarVersionsProcessor},
    },
    assembly::{opcodes::*, Instruction, InstructionSequence, MethodDescriptor, MethodInfo, VarType},
    decompiler::{DecompileContext, DecompilerOptions},
    structure::{Expr, StatementTree, StatementTreeBuilder},
    Result,
};

fn process(tree: &mut StatementTree, method: &MethodInfo, options: DecompilerOptions) -> Result<VarProcessor> {
    let mut ctx = DecompileContext::new(options).with_method(method.display_name());
    VarVersionsProcessor::set_var_versions(&mut ctx, tree, method)
}

fn by_slot(vars: &VarProcessor, slot: i32) -> Vec<&VarInfo> {
    vars.vars().filter(|v| v.original_index == slot).collect()
}

/// `if (b) x = a; else x = c; return x;` with `b` in slot `cond` and `x` in
/// slot `target`.
fn if_else_tree(cond: i32, target: i32, then_value: i32, else_value: i32, ret_type: VarType) -> Result<StatementTree> {
    let mut b = StatementTreeBuilder::new();
    let condition = Expr::var(b.ids(), cond);
    let head = b.basic(vec![]);
    let x1 = Expr::var(b.ids(), target);
    let c1 = Expr::int_const(b.ids(), then_value, false);
    let then_expr = Expr::assign(b.ids(), x1, c1);
    let then = b.basic(vec![then_expr]);
    let x2 = Expr::var(b.ids(), target);
    let c2 = Expr::int_const(b.ids(), else_value, false);
    let else_expr = Expr::assign(b.ids(), x2, c2);
    let other = b.basic(vec![else_expr]);
    let stat = b.if_stat(head, condition, then, Some(other));
    let x = Expr::var(b.ids(), target);
    let ret_expr = Expr::ret(b.ids(), Some(x), ret_type);
    let ret = b.basic(vec![ret_expr]);
    let exit = b.exit();
    b.regular(then, ret).regular(other, ret).regular(stat, ret).break_to(ret, exit);
    let body = b.sequence(vec![stat, ret]);
    b.build(body)
}

#[test]
fn test_if_else_method_yields_one_int_variable() -> Result<()> {
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
    assert_eq!(ControlFlowGraph::build(&seq)?.block_count(), 4);

    let method = MethodInfo::new("a/B", "f", "(Z)I", false)?;
    let mut tree = if_else_tree(1, 2, 1, 2, VarType::INT)?;

    let mut versioned = tree.clone();
    let ssa = SsaConstructor::split_variables(&mut versioned, &method)?;
    let phis: Vec<_> = ssa.phi.iter().filter(|(pair, _)| pair.var == 2).collect();
    assert_eq!(phis.len(), 1);
    assert_eq!(phis[0].1, &vec![1, 2]);

    let vars = process(&mut tree, &method, DecompilerOptions::default())?;
    assert_eq!(vars.len(), 3);
    assert_eq!(vars.name(0), Some("this"));
    assert_eq!(vars.var_type(0), Some(&VarType::object("a/B")));
    assert_eq!(vars.var_type(1), Some(&VarType::BOOLEAN));

    let x = by_slot(&vars, 2);
    assert_eq!(x.len(), 1);
    assert_eq!(x[0].var_type, VarType::INT);
    assert_eq!(x[0].finality, FinalType::NonFinal);
    Ok(())
}

#[test]
fn test_merged_type_covers_every_constituent() -> Result<()> {
    // static short f(boolean b) { short x; if (b) x = 1; else x = 200; return x; }
    let method = MethodInfo::new("a/B", "f", "(Z)S", true)?;
    let mut tree = if_else_tree(0, 1, 1, 200, VarType::SHORT)?;
    let vars = process(&mut tree, &method, DecompilerOptions::default())?;

    let x = by_slot(&vars, 1);
    assert_eq!(x.len(), 1);
    let join = VarType::BYTECHAR.join(&VarType::SHORTCHAR).expect("integer join");
    assert_eq!(join, VarType::SHORTCHAR);
    assert_eq!(x[0].var_type, VarType::SHORT);
    assert_eq!(VarType::SHORT.join(&join), Some(VarType::SHORT));
    Ok(())
}

#[test]
fn test_null_merges_with_reference() -> Result<()> {
    // static void f() { x = null; y = x; x = new Object(); z = x; }
    let mut b = StatementTreeBuilder::new();
    let x = Expr::var(b.ids(), 0);
    let null = Expr::null(b.ids());
    let first = Expr::assign(b.ids(), x, null);
    let y = Expr::var(b.ids(), 1);
    let x_read = Expr::var(b.ids(), 0);
    let copy = Expr::assign(b.ids(), y, x_read);
    let x_again = Expr::var(b.ids(), 0);
    let object = Expr::new_object(b.ids(), "java/lang/Object", MethodDescriptor::parse("()V")?, vec![]);
    let second = Expr::assign(b.ids(), x_again, object);
    let z = Expr::var(b.ids(), 2);
    let x_last = Expr::var(b.ids(), 0);
    let copy_again = Expr::assign(b.ids(), z, x_last);
    let block = b.basic(vec![first, copy, second, copy_again]);
    let exit = b.exit();
    b.break_to(block, exit);
    let mut tree = b.build(block)?;

    let method = MethodInfo::new("a/B", "f", "()V", true)?;
    let vars = process(&mut tree, &method, DecompilerOptions::default())?;

    let x = by_slot(&vars, 0);
    assert_eq!(x.len(), 1);
    assert_eq!(x[0].var_type, VarType::object("java/lang/Object"));
    assert_eq!(x[0].finality, FinalType::NonFinal);

    // a variable only ever holding null is typed as Object
    let y = by_slot(&vars, 1);
    assert_eq!(y.len(), 1);
    assert_eq!(y[0].var_type, VarType::object("java/lang/Object"));
    Ok(())
}

#[test]
fn test_debug_names_follow_option() -> Result<()> {
    let build = || -> Result<(StatementTree, MethodInfo)> {
        let method = MethodInfo::new("a/B", "f", "(ZI)I", true)?
            .with_local_name(0, "flag")
            .with_local_name(2, "result");
        Ok((if_else_tree(0, 2, 1, 2, VarType::INT)?, method))
    };

    let (mut tree, method) = build()?;
    let named = process(&mut tree, &method, DecompilerOptions::default())?;
    assert_eq!(named.name(0), Some("flag"));
    assert_eq!(by_slot(&named, 2)[0].name, "result");

    let (mut tree, method) = build()?;
    let plain = process(&mut tree, &method, DecompilerOptions::default().with_debug_var_names(false))?;
    assert_eq!(plain.name(0), Some("var0"));
    let x = by_slot(&plain, 2)[0];
    assert_eq!(x.name, format!("var{}", x.index));
    Ok(())
}

#[test]
fn test_references_carry_final_indices() -> Result<()> {
    let method = MethodInfo::new("a/B", "f", "(Z)I", true)?;
    let mut tree = if_else_tree(0, 1, 1, 2, VarType::INT)?;
    let vars = process(&mut tree, &method, DecompilerOptions::default())?;

    let mut refs = Vec::new();
    tree.visit_exprs(&mut |e| {
        if let Some(v) = e.as_var() {
            refs.push((v.pair(), v.var_type.clone()));
        }
    });
    assert!(!refs.is_empty());
    for (pair, var_type) in refs {
        assert_eq!(pair.version, 0);
        assert_eq!(vars.var_type(pair.var), Some(&var_type));
    }
    Ok(())
}
