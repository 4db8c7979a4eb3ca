//! Where each local variable gets declared.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::{
    analysis::vars::processor::VarProcessor,
    assembly::MethodInfo,
    structure::{ExprId, ExprKind, ExprSlot, StatId, StatementKind, StatementTree},
};

/// Declaration point of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionSite {
    /// The plain assignment `expr` in basic statement `statement` declares
    /// the variable; its target is marked as a definition.
    Assignment {
        /// Variable index
        index: i32,
        /// Basic statement holding the assignment
        statement: StatId,
        /// The assignment
        expr: ExprId,
    },
    /// A declaration without initializer is needed. In a basic statement it
    /// goes before expression `position`; for any other statement it goes
    /// right before the statement and `position` is 0.
    Standalone {
        /// Variable index
        index: i32,
        /// Statement the declaration belongs to
        statement: StatId,
        /// Insertion point
        position: usize,
    },
}

impl DefinitionSite {
    /// Variable the site declares.
    #[must_use]
    pub fn index(&self) -> i32 {
        match *self {
            DefinitionSite::Assignment { index, .. } | DefinitionSite::Standalone { index, .. } => index,
        }
    }

    /// Statement holding the declaration.
    #[must_use]
    pub fn statement(&self) -> StatId {
        match *self {
            DefinitionSite::Assignment { statement, .. } | DefinitionSite::Standalone { statement, .. } => statement,
        }
    }
}

/// Places the declaration of every local variable.
pub struct VarDefinitionHelper;

impl VarDefinitionHelper {
    /// Finds, for each variable of `vars` that is neither a parameter nor a
    /// catch variable, the innermost statement enclosing all its references
    /// and the first reference inside it.
    ///
    /// Expects `tree` to carry final indices, as left by
    /// [`crate::analysis::vars::VarVersionsProcessor::set_var_versions`].
    pub fn place_definitions(tree: &mut StatementTree, vars: &VarProcessor, method: &MethodInfo) -> Vec<DefinitionSite> {
        let first_local = i32::from(method.parameter_slot_count());
        let catch_vars: HashSet<i32> = tree
            .statements()
            .flat_map(|s| s.catch_vars().iter().filter_map(|e| e.as_var()).map(|v| v.index))
            .collect();

        let mut refs: BTreeMap<i32, BTreeSet<StatId>> = BTreeMap::new();
        for stat in tree.statements() {
            for slot in tree.own_slots(stat.id) {
                for expr in tree.slot_exprs(slot) {
                    expr.visit(&mut |e| {
                        if let Some(var) = e.as_var() {
                            refs.entry(var.index).or_default().insert(stat.id);
                        }
                    });
                }
            }
        }

        let mut sites = Vec::new();
        for index in vars.indices() {
            if index < first_local || catch_vars.contains(&index) {
                continue;
            }
            let Some(stats) = refs.get(&index) else {
                continue;
            };
            let Some(scope) = enclosing_statement(tree, stats) else {
                continue;
            };
            let target = first_block(tree, scope, stats);
            sites.push(place_in(tree, target, index));
        }
        sites
    }
}

/// Innermost statement containing every statement of `stats`.
fn enclosing_statement(tree: &StatementTree, stats: &BTreeSet<StatId>) -> Option<StatId> {
    let first = *stats.iter().next()?;
    tree.ancestors(first)
        .into_iter()
        .find(|&candidate| stats.iter().all(|&s| tree.contains(candidate, s)))
}

/// Descends from `scope` towards the first reference while the declaration
/// can still move inwards.
fn first_block(tree: &StatementTree, scope: StatId, stats: &BTreeSet<StatId>) -> StatId {
    let mut current = scope;
    loop {
        let Some(stat) = tree.get(current) else {
            return current;
        };
        let next = match stat.kind {
            StatementKind::Sequence => stat
                .children
                .iter()
                .copied()
                .find(|&child| stats.iter().any(|&s| tree.contains(child, s)))
                .or_else(|| stat.children.last().copied()),
            StatementKind::If { .. }
            | StatementKind::Root
            | StatementKind::Switch { .. }
            | StatementKind::Synchronized { .. } => stat.first(),
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => return current,
        }
    }
}

fn place_in(tree: &mut StatementTree, statement: StatId, index: i32) -> DefinitionSite {
    let exprs = match tree.get(statement).map(|s| &s.kind) {
        Some(StatementKind::Basic { exprs, .. }) => exprs,
        _ => {
            return DefinitionSite::Standalone {
                index,
                statement,
                position: 0,
            }
        }
    };

    let mut found = None;
    for (position, expr) in exprs.iter().enumerate() {
        if let ExprKind::Assignment(a) = &expr.kind {
            if a.op.is_none() && a.left.as_var().is_some_and(|v| v.index == index) && !a.right.references_var(index) {
                found = Some((position, expr.id));
                break;
            }
        }
        if expr.references_var(index) {
            return DefinitionSite::Standalone {
                index,
                statement,
                position,
            };
        }
    }
    let Some((position, expr)) = found else {
        return DefinitionSite::Standalone {
            index,
            statement,
            position: exprs.len(),
        };
    };

    if let Some(ExprKind::Assignment(a)) = tree
        .slot_exprs_mut(ExprSlot::Basic(statement))
        .get_mut(position)
        .map(|e| &mut e.kind)
    {
        if let Some(var) = a.left.as_var_mut() {
            var.is_definition = true;
        }
    }
    DefinitionSite::Assignment {
        index,
        statement,
        expr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::vars::VarVersionsProcessor,
        assembly::VarType,
        decompiler::{DecompileContext, DecompilerOptions},
        structure::{Expr, StatementTreeBuilder},
    };

    fn process(tree: &mut StatementTree, method: &MethodInfo) -> Vec<DefinitionSite> {
        let mut ctx = DecompileContext::new(DecompilerOptions::default());
        let vars = VarVersionsProcessor::set_var_versions(&mut ctx, tree, method).unwrap();
        VarDefinitionHelper::place_definitions(tree, &vars, method)
    }

    #[test]
    fn test_first_assignment_declares() {
        // static int f(int a) { x = a; return x; }
        let mut b = StatementTreeBuilder::new();
        let x = Expr::var(b.ids(), 1);
        let a = Expr::var(b.ids(), 0);
        let set = Expr::assign(b.ids(), x, a);
        let set_id = set.id;
        let x_read = Expr::var(b.ids(), 1);
        let ret = Expr::ret(b.ids(), Some(x_read), VarType::INT);
        let block = b.basic(vec![set, ret]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();
        let method = MethodInfo::new("a/B", "f", "(I)I", true).unwrap();

        let sites = process(&mut tree, &method);
        assert_eq!(
            sites,
            vec![DefinitionSite::Assignment {
                index: 1,
                statement: block,
                expr: set_id,
            }]
        );
        let mut definitions = 0;
        tree.visit_exprs(&mut |e| {
            if e.as_var().is_some_and(|v| v.is_definition) {
                definitions += 1;
            }
        });
        assert_eq!(definitions, 1);
    }

    #[test]
    fn test_branch_assignments_need_standalone_declaration() {
        // static int f(boolean b) { if (b) x = 1; else x = 2; return x; }
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
        let mut tree = b.build(body).unwrap();
        let method = MethodInfo::new("a/B", "f", "(Z)I", true).unwrap();

        let sites = process(&mut tree, &method);
        assert_eq!(
            sites,
            vec![DefinitionSite::Standalone {
                index: 1,
                statement: head,
                position: 0,
            }]
        );
        assert_eq!(sites[0].index(), 1);
        assert_eq!(sites[0].statement(), head);
    }

    #[test]
    fn test_self_referencing_assignment_is_not_a_declaration() {
        // x = x + 1 on an already compacted tree
        let mut b = StatementTreeBuilder::new();
        let x_read = Expr::var(b.ids(), 0);
        let one = Expr::int_const(b.ids(), 1, false);
        let sum = Expr::function(b.ids(), crate::structure::FunctionType::Add, vec![x_read, one]);
        let x = Expr::var(b.ids(), 0);
        let step = Expr::assign(b.ids(), x, sum);
        let block = b.basic(vec![step]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();
        let method = MethodInfo::new("a/B", "f", "()V", true).unwrap();

        let mut vars = VarProcessor::new();
        vars.insert(
            crate::analysis::vars::VarInfo {
                index: 0,
                var_type: VarType::INT,
                max_type: None,
                finality: crate::analysis::vars::FinalType::NonFinal,
                original_index: 0,
                name: String::new(),
            },
            false,
            None,
        );

        let sites = VarDefinitionHelper::place_definitions(&mut tree, &vars, &method);
        assert_eq!(
            sites,
            vec![DefinitionSite::Standalone {
                index: 0,
                statement: block,
                position: 0,
            }]
        );
    }
}
