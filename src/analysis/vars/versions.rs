//! From SSA versions to the final variables of a method.
//!
//! The steps run in a fixed order:
//!
//! 1. read-only SSA assigns versions in place
//! 2. versions joined by a phi or a compound assignment collapse to the
//!    group's smallest version
//! 3. type inference bounds every version
//! 4. versions of one slot with the same type and disjoint live ranges merge
//! 5. analysis-only placeholder types become Java types
//! 6. every surviving version gets its own index and the tree is rewritten

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::debug;

use crate::{
    analysis::{
        flatten::{DirectGraph, NodeIdx},
        ssa::{SsaConstructor, SsaResult},
        vars::{
            liveness::Interference,
            processor::{FinalType, VarInfo, VarProcessor},
            types::VarTypeProcessor,
        },
    },
    assembly::{MethodInfo, TypeCode, VarType},
    decompiler::DecompileContext,
    structure::{ExprKind, StatementTree, VarVersionPair, STACK_BASE},
    Result,
};

/// Versioning, typing and compaction of a method's variables.
///
/// # Examples
///
/// ```rust,ignore
/// use classflow::analysis::vars::VarVersionsProcessor;
///
/// let vars = VarVersionsProcessor::set_var_versions(&mut ctx, &mut tree, &method)?;
/// assert!(vars.indices().all(|i| vars.var_type(i).is_some()));
/// ```
pub struct VarVersionsProcessor;

impl VarVersionsProcessor {
    /// Runs the whole variable pipeline over `tree` and returns the variable
    /// table. Every variable reference in `tree` carries its final index and
    /// version 0 afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be flattened.
    pub fn set_var_versions(ctx: &mut DecompileContext, tree: &mut StatementTree, method: &MethodInfo) -> Result<VarProcessor> {
        let ssa = SsaConstructor::split_variables(tree, method)?;
        merge_phi_versions(&ssa, tree);

        let mut types = VarTypeProcessor::new();
        let passes = types.calculate_var_types(tree, &ssa.graph, method);

        let entry_defs = entry_definitions(tree, &ssa.graph, method);
        let interference = Interference::compute(tree, &ssa.graph, &entry_defs);
        let merged = simple_merge(&mut types, tree, &ssa.graph, method, &interference);

        eliminate_non_java_types(&mut types);
        let vars = set_new_var_indices(ctx, &types, tree, method, &merged);

        debug!(
            "{}: {} variables from {} phi groups, {} type passes, {} simple merges",
            ctx.method_name(),
            vars.len(),
            ssa.phi.len(),
            passes,
            merged.len()
        );
        Ok(vars)
    }
}

/// Rewrites versions of `tree` through `remap`.
fn update_versions(tree: &mut StatementTree, remap: &HashMap<VarVersionPair, i32>) {
    if remap.is_empty() {
        return;
    }
    tree.visit_vars_mut(&mut |var| {
        if let Some(&version) = remap.get(&var.pair()) {
            var.version = version;
        }
    });
}

/// Collapses each phi version and its sources, transitively, into the
/// smallest version of the group. A compound assignment's version joins the
/// group of the versions it read.
fn merge_phi_versions(ssa: &SsaResult, tree: &mut StatementTree) {
    let mut groups: Vec<BTreeSet<VarVersionPair>> = Vec::new();
    for (phi, sources) in ssa.phi.iter().chain(&ssa.updates) {
        let mut group: BTreeSet<VarVersionPair> = sources.iter().map(|&v| VarVersionPair::new(phi.var, v)).collect();
        group.insert(*phi);
        groups.retain(|other| {
            if other.is_disjoint(&group) {
                true
            } else {
                group.extend(other.iter().copied());
                false
            }
        });
        groups.push(group);
    }

    let mut remap = HashMap::new();
    for group in &groups {
        let Some(min) = group.iter().map(|p| p.version).min() else {
            continue;
        };
        for pair in group.iter().filter(|p| p.version != min) {
            remap.insert(*pair, min);
        }
    }
    update_versions(tree, &remap);
}

/// Versions defined on entry to a node: parameters at the first node, catch
/// variables at their handler.
fn entry_definitions(tree: &StatementTree, graph: &DirectGraph, method: &MethodInfo) -> Vec<(NodeIdx, VarVersionPair)> {
    let mut defs: Vec<(NodeIdx, VarVersionPair)> = method
        .parameter_slots()
        .into_iter()
        .map(|(slot, _)| (graph.first(), VarVersionPair::new(i32::from(slot), 1)))
        .collect();

    for stat in tree.statements() {
        for (var, handler) in stat.catch_vars().iter().zip(stat.children.iter().skip(1)) {
            if let (Some(var), Some(node)) = (var.as_var(), graph.statement_node(*handler)) {
                defs.push((node, var.pair()));
            }
        }
    }
    defs
}

fn mergeable(first: &VarType, second: &VarType) -> bool {
    let is_null = |t: &VarType| t.code == TypeCode::Null && t.array_dim == 0;
    first == second || (is_null(first) && second.is_reference()) || (is_null(second) && first.is_reference())
}

/// Merges versions of the same slot whose minimum types agree and whose live
/// ranges are disjoint. Returns the versions that absorbed others.
fn simple_merge(
    types: &mut VarTypeProcessor,
    tree: &mut StatementTree,
    graph: &DirectGraph,
    method: &MethodInfo,
    interference: &Interference,
) -> HashSet<VarVersionPair> {
    let mut versions: BTreeMap<i32, BTreeSet<i32>> = BTreeMap::new();
    for idx in 0..graph.len() {
        for expr in graph.exprs(tree, idx) {
            expr.visit(&mut |e| {
                if let Some(var) = e.as_var().filter(|v| v.version > 0) {
                    versions.entry(var.index).or_default().insert(var.version);
                }
            });
        }
    }

    let this = VarVersionPair::new(0, 1);
    let mut remap = HashMap::new();
    let mut merged = HashSet::new();
    for (&var, set) in &versions {
        let mut list: Vec<i32> = set.iter().copied().collect();
        let mut i = 0;
        while i < list.len() {
            let first = VarVersionPair::new(var, list[i]);
            if !method.is_static && first == this {
                i += 1;
                continue;
            }

            let mut group = vec![first];
            let mut j = i + 1;
            while j < list.len() {
                let second = VarVersionPair::new(var, list[j]);
                let (Some(first_type), Some(second_type)) =
                    (types.min_type(first).cloned(), types.min_type(second).cloned())
                else {
                    j += 1;
                    continue;
                };
                if !mergeable(&first_type, &second_type)
                    || group.iter().any(|&member| interference.interferes(member, second))
                {
                    j += 1;
                    continue;
                }

                let max = match (types.max_type(first), types.max_type(second)) {
                    (Some(a), Some(b)) => Some(a.meet(b).unwrap_or_else(|| a.clone())),
                    (a, b) => a.or(b).cloned(),
                };
                types.remove(second);
                if let Some(max) = max {
                    types.set_max_type(first, max);
                }
                if first_type.code == TypeCode::Null {
                    types.set_min_type(first, second_type);
                }

                group.push(second);
                remap.insert(second, first.version);
                merged.insert(first);
                list.remove(j);
            }
            i += 1;
        }
    }

    update_versions(tree, &remap);
    merged
}

/// Replaces the placeholder types no Java declaration can carry.
fn eliminate_non_java_types(types: &mut VarTypeProcessor) {
    let pairs: Vec<VarVersionPair> = types.min_types().keys().copied().collect();
    for pair in pairs {
        let Some(ty) = types.min_type(pair).filter(|t| t.array_dim == 0) else {
            continue;
        };
        let replacement = match ty.code {
            TypeCode::ByteChar | TypeCode::ShortChar => match types.max_type(pair) {
                Some(max) if max.array_dim == 0 && matches!(max.code, TypeCode::Char | TypeCode::Byte | TypeCode::Short) => {
                    max.clone()
                }
                _ => VarType::INT,
            },
            TypeCode::Null => VarType::root_object(),
            _ => continue,
        };
        types.set_min_type(pair, replacement);
    }
}

/// Number of writes per version: assignments, increments and catch clauses.
fn count_writes(tree: &StatementTree) -> HashMap<VarVersionPair, usize> {
    let mut writes: HashMap<VarVersionPair, usize> = HashMap::new();
    tree.visit_exprs(&mut |e| {
        let target = match &e.kind {
            ExprKind::Assignment(a) => a.left.as_var(),
            ExprKind::Function(f) if f.func.is_increment() => f.operands.first().and_then(|o| o.as_var()),
            _ => None,
        };
        if let Some(var) = target {
            *writes.entry(var.pair()).or_default() += 1;
        }
    });
    for stat in tree.statements() {
        for var in stat.catch_vars().iter().filter_map(|e| e.as_var()) {
            *writes.entry(var.pair()).or_default() += 1;
        }
    }
    writes
}

/// Gives every version its own index and rewrites the tree.
fn set_new_var_indices(
    ctx: &mut DecompileContext,
    types: &VarTypeProcessor,
    tree: &mut StatementTree,
    method: &MethodInfo,
    merged: &HashSet<VarVersionPair>,
) -> VarProcessor {
    let param_slots: HashSet<i32> = method.parameter_slots().iter().map(|(slot, _)| i32::from(*slot)).collect();
    ctx.reset_var_counter(i32::from(method.parameter_slot_count()));

    let mut pairs: BTreeSet<VarVersionPair> = types.min_types().keys().filter(|p| p.version >= 0).copied().collect();
    tree.visit_exprs(&mut |e| {
        if let Some(var) = e.as_var().filter(|v| v.version >= 0) {
            pairs.insert(var.pair());
        }
    });
    let writes = count_writes(tree);

    let mut mapping: HashMap<VarVersionPair, i32> = HashMap::new();
    let mut vars = VarProcessor::new();
    for pair in pairs {
        let is_param = pair.version == 1 && param_slots.contains(&pair.var);
        let index = if is_param { pair.var } else { ctx.next_var_index() };
        mapping.insert(pair, index);

        let write_count = writes.get(&pair).copied().unwrap_or(0) + usize::from(is_param);
        let finality = if merged.contains(&pair) || write_count > 1 {
            FinalType::NonFinal
        } else {
            FinalType::Final
        };
        let debug_name = if ctx.options().use_debug_var_names && pair.var < STACK_BASE {
            u16::try_from(pair.var)
                .ok()
                .and_then(|slot| method.local_names.get(&slot))
                .map(String::as_str)
        } else {
            None
        };
        let info = VarInfo {
            index,
            var_type: types.min_type(pair).cloned().unwrap_or(VarType::UNKNOWN),
            max_type: types.max_type(pair).cloned(),
            finality,
            original_index: pair.var,
            name: String::new(),
        };
        vars.insert(info, is_param && !method.is_static && pair.var == 0, debug_name);
    }

    tree.visit_exprs_mut(&mut |e| {
        let id = e.id;
        match &mut e.kind {
            ExprKind::Var(var) => {
                if let Some(&index) = mapping.get(&var.pair()) {
                    if let Some(ty) = vars.var_type(index) {
                        var.var_type = ty.clone();
                    }
                    var.index = index;
                    var.version = 0;
                }
            }
            ExprKind::Const(c) => {
                if types.max_type(VarVersionPair::constant(id)) == Some(&VarType::CHAR) {
                    c.const_type = VarType::CHAR;
                }
            }
            _ => {}
        }
    });
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decompiler::DecompilerOptions,
        structure::{ConstValue, Expr, StatId, StatementTreeBuilder},
    };

    fn ctx() -> DecompileContext {
        DecompileContext::new(DecompilerOptions::default())
    }

    fn indices_of(tree: &StatementTree) -> Vec<(i32, i32)> {
        let mut out = Vec::new();
        tree.visit_exprs(&mut |e| {
            if let Some(v) = e.as_var() {
                out.push((v.index, v.version));
            }
        });
        out
    }

    /// `static int f(boolean b) { int x; if (b) x = 1; else x = 2; return x; }`
    fn if_else_tree() -> (StatementTree, StatId) {
        let mut b = StatementTreeBuilder::new();
        let cond = Expr::var(b.ids(), 0);
        let head = b.basic(vec![]);
        let x1 = Expr::var(b.ids(), 1);
        let one = Expr::int_const(b.ids(), 1, false);
        let then_expr = Expr::assign(b.ids(), x1, one);
        let then = b.basic(vec![then_expr]);
        let x2 = Expr::var(b.ids(), 1);
        let two = Expr::int_const(b.ids(), 2, false);
        let else_expr = Expr::assign(b.ids(), x2, two);
        let other = b.basic(vec![else_expr]);
        let stat = b.if_stat(head, cond, then, Some(other));
        let x = Expr::var(b.ids(), 1);
        let ret_expr = Expr::ret(b.ids(), Some(x), VarType::INT);
        let ret = b.basic(vec![ret_expr]);
        let exit = b.exit();
        b.regular(then, ret).regular(other, ret).regular(stat, ret).break_to(ret, exit);
        let body = b.sequence(vec![stat, ret]);
        (b.build(body).unwrap(), ret)
    }

    #[test]
    fn test_phi_versions_merge_into_one_int_variable() {
        let (mut tree, _) = if_else_tree();
        let method = MethodInfo::new("a/B", "f", "(Z)I", true).unwrap();
        let vars = VarVersionsProcessor::set_var_versions(&mut ctx(), &mut tree, &method).unwrap();

        assert_eq!(vars.len(), 2);
        assert_eq!(vars.var_type(0), Some(&VarType::BOOLEAN));
        assert_eq!(vars.var_type(1), Some(&VarType::INT));
        assert_eq!(vars.finality(0), Some(FinalType::Final));
        assert_eq!(vars.finality(1), Some(FinalType::NonFinal));
        assert_eq!(vars.original_index(1), Some(1));
        assert_eq!(vars.name(1), Some("var1"));

        let refs = indices_of(&tree);
        assert!(refs.iter().all(|&(_, version)| version == 0));
        assert_eq!(refs.iter().filter(|&&(index, _)| index == 1).count(), 3);
    }

    #[test]
    fn test_sequential_versions_merge() {
        // static int f() { x = 1; y = x; x = 2; return x + y; }
        let mut b = StatementTreeBuilder::new();
        let x = Expr::var(b.ids(), 0);
        let one = Expr::int_const(b.ids(), 1, false);
        let first = Expr::assign(b.ids(), x, one);
        let y = Expr::var(b.ids(), 1);
        let x_read = Expr::var(b.ids(), 0);
        let copy = Expr::assign(b.ids(), y, x_read);
        let x_again = Expr::var(b.ids(), 0);
        let two = Expr::int_const(b.ids(), 2, false);
        let second = Expr::assign(b.ids(), x_again, two);
        let x_last = Expr::var(b.ids(), 0);
        let y_last = Expr::var(b.ids(), 1);
        let sum = Expr::function(b.ids(), crate::structure::FunctionType::Add, vec![x_last, y_last]);
        let ret = Expr::ret(b.ids(), Some(sum), VarType::INT);
        let block = b.basic(vec![first, copy, second, ret]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();
        let method = MethodInfo::new("a/B", "f", "()I", true).unwrap();

        let vars = VarVersionsProcessor::set_var_versions(&mut ctx(), &mut tree, &method).unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.original_index(0), Some(0));
        assert_eq!(vars.original_index(1), Some(1));
        assert_eq!(vars.finality(0), Some(FinalType::NonFinal));
        assert_eq!(vars.finality(1), Some(FinalType::Final));
        assert_eq!(vars.var_type(0), Some(&VarType::INT));
    }

    #[test]
    fn test_compound_assignment_joins_its_source() {
        // static int f() { x = 1; x += 2; return x; }
        let mut b = StatementTreeBuilder::new();
        let x = Expr::var(b.ids(), 0);
        let one = Expr::int_const(b.ids(), 1, false);
        let first = Expr::assign(b.ids(), x, one);
        let target = Expr::var(b.ids(), 0);
        let two = Expr::int_const(b.ids(), 2, false);
        let update = Expr::compound_assign(b.ids(), crate::structure::FunctionType::Add, target, two);
        let x_last = Expr::var(b.ids(), 0);
        let ret = Expr::ret(b.ids(), Some(x_last), VarType::INT);
        let block = b.basic(vec![first, update, ret]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();
        let method = MethodInfo::new("a/B", "f", "()I", true).unwrap();

        let vars = VarVersionsProcessor::set_var_versions(&mut ctx(), &mut tree, &method).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.finality(0), Some(FinalType::NonFinal));
        assert_eq!(indices_of(&tree), vec![(0, 0), (0, 0), (0, 0)]);
    }

    #[test]
    fn test_different_types_stay_apart() {
        // static void f() { x = 1; y = x; x = "s"; y2 = x; }
        let mut b = StatementTreeBuilder::new();
        let x = Expr::var(b.ids(), 0);
        let one = Expr::int_const(b.ids(), 1, false);
        let first = Expr::assign(b.ids(), x, one);
        let y = Expr::var(b.ids(), 1);
        let x_read = Expr::var(b.ids(), 0);
        let copy = Expr::assign(b.ids(), y, x_read);
        let x_again = Expr::var(b.ids(), 0);
        let s = Expr::constant(
            b.ids(),
            ConstValue::String("s".to_string()),
            VarType::object("java/lang/String"),
        );
        let second = Expr::assign(b.ids(), x_again, s);
        let block = b.basic(vec![first, copy, second]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();
        let method = MethodInfo::new("a/B", "f", "()V", true)
            .unwrap()
            .with_local_name(0, "x")
            .with_local_name(1, "y");

        let vars = VarVersionsProcessor::set_var_versions(&mut ctx(), &mut tree, &method).unwrap();
        let from_slot_zero: Vec<i32> = vars.vars().filter(|v| v.original_index == 0).map(|v| v.index).collect();
        assert_eq!(from_slot_zero, vec![0, 1]);
        assert_eq!(vars.var_type(1), Some(&VarType::object("java/lang/String")));
        assert_eq!(vars.name(0), Some("x"));
        assert_eq!(vars.name(1), Some("var1"));
        assert_eq!(vars.name(2), Some("y"));
        assert!(vars.vars().all(|v| v.finality == FinalType::Final));
    }

    #[test]
    fn test_this_is_kept() {
        // void f() { o = this; }
        let mut b = StatementTreeBuilder::new();
        let o = Expr::var(b.ids(), 1);
        let this = Expr::var(b.ids(), 0);
        let set = Expr::assign(b.ids(), o, this);
        let block = b.basic(vec![set]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();
        let method = MethodInfo::new("a/B", "f", "()V", false).unwrap();

        let vars = VarVersionsProcessor::set_var_versions(&mut ctx(), &mut tree, &method).unwrap();
        assert_eq!(vars.name(0), Some("this"));
        assert_eq!(vars.var_type(0), Some(&VarType::object("a/B")));
        assert_eq!(vars.var_type(1), Some(&VarType::object("a/B")));
        assert_eq!(vars.original_index(1), Some(1));
    }

    #[test]
    fn test_char_bounded_constant_becomes_char() {
        // static char f() { return 65; }
        let mut b = StatementTreeBuilder::new();
        let c = Expr::int_const(b.ids(), 65, false);
        let ret = Expr::ret(b.ids(), Some(c), VarType::CHAR);
        let block = b.basic(vec![ret]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();
        let method = MethodInfo::new("a/B", "f", "()C", true).unwrap();

        VarVersionsProcessor::set_var_versions(&mut ctx(), &mut tree, &method).unwrap();
        let mut const_types = Vec::new();
        tree.visit_exprs(&mut |e| {
            if let ExprKind::Const(c) = &e.kind {
                const_types.push(c.const_type.clone());
            }
        });
        assert_eq!(const_types, vec![VarType::CHAR]);
    }
}
