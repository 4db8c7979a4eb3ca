//! Type inference over versioned variables.
//!
//! Every version carries an interval of types: a minimum that only widens
//! and a maximum that only narrows. Expressions push constraints onto their
//! children (see [`Expr::check_type_bounds`]) until a full pass over the
//! graph widens no minimum. Integer constants take part as pseudo variables
//! keyed by their expression id with version -1.

use std::collections::HashMap;

use log::{debug, trace};

use crate::{
    analysis::flatten::{DirectGraph, ExprAction},
    assembly::{MethodInfo, TypeCode, TypeFamily, VarType},
    structure::{Bound, ConstExpr, Expr, ExprKind, FunctionType, StatementTree, VarVersionPair},
};

/// Minimum and maximum types per version.
///
/// # Examples
///
/// ```rust,ignore
/// use classflow::analysis::vars::VarTypeProcessor;
///
/// let mut types = VarTypeProcessor::new();
/// types.calculate_var_types(&mut tree, &ssa.graph, &method);
/// let ty = types.min_type(VarVersionPair::new(1, 1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct VarTypeProcessor {
    min_types: HashMap<VarVersionPair, VarType>,
    max_types: HashMap<VarVersionPair, VarType>,
}

impl VarTypeProcessor {
    /// Creates a processor without any known types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs inference to a fixpoint and returns the number of passes.
    ///
    /// `this`, the parameters and the catch variables are seeded from
    /// `method` and the tree; every other variable and every integer constant
    /// starts from scratch.
    pub fn calculate_var_types(&mut self, tree: &mut StatementTree, graph: &DirectGraph, method: &MethodInfo) -> usize {
        self.set_init_vars(tree, method);
        reset_expr_types(tree, graph);

        let mut passes = 1;
        while !self.process_var_types(tree, graph) {
            passes += 1;
            trace!("{}: type pass {passes}", method.display_name());
        }
        debug!(
            "{}: types settled after {passes} passes, {} versions",
            method.display_name(),
            self.min_types.len()
        );
        passes
    }

    /// Lower bound of `pair`.
    #[must_use]
    pub fn min_type(&self, pair: VarVersionPair) -> Option<&VarType> {
        self.min_types.get(&pair)
    }

    /// Upper bound of `pair`.
    #[must_use]
    pub fn max_type(&self, pair: VarVersionPair) -> Option<&VarType> {
        self.max_types.get(&pair)
    }

    /// Overrides the lower bound of `pair`.
    pub fn set_min_type(&mut self, pair: VarVersionPair, ty: VarType) {
        self.min_types.insert(pair, ty);
    }

    /// Overrides the upper bound of `pair`.
    pub fn set_max_type(&mut self, pair: VarVersionPair, ty: VarType) {
        self.max_types.insert(pair, ty);
    }

    /// Forgets both bounds of `pair`.
    pub fn remove(&mut self, pair: VarVersionPair) {
        self.min_types.remove(&pair);
        self.max_types.remove(&pair);
    }

    /// All lower bounds.
    #[must_use]
    pub fn min_types(&self) -> &HashMap<VarVersionPair, VarType> {
        &self.min_types
    }

    /// All upper bounds.
    #[must_use]
    pub fn max_types(&self) -> &HashMap<VarVersionPair, VarType> {
        &self.max_types
    }

    fn set_init_vars(&mut self, tree: &StatementTree, method: &MethodInfo) {
        for (slot, ty) in method.parameter_slots() {
            let pair = VarVersionPair::new(i32::from(slot), 1);
            self.min_types.insert(pair, ty.clone());
            self.max_types.insert(pair, ty);
        }

        for stat in tree.statements() {
            for var in stat.catch_vars().iter().filter_map(Expr::as_var) {
                let ty = if var.var_type.code == TypeCode::Unknown {
                    VarType::object("java/lang/Throwable")
                } else {
                    var.var_type.clone()
                };
                self.min_types.insert(var.pair(), ty.clone());
                self.max_types.insert(var.pair(), ty);
            }
        }
    }

    fn process_var_types(&mut self, tree: &mut StatementTree, graph: &DirectGraph) -> bool {
        graph.iterate_exprents(tree, |expr| {
            if self.check_type_expr(expr) {
                ExprAction::Continue
            } else {
                ExprAction::Stop
            }
        })
    }

    /// Applies the constraints of `expr` and its descendants. Returns `false`
    /// as soon as a lower bound widened.
    fn check_type_expr(&mut self, expr: &mut Expr) -> bool {
        for child in expr.children_mut() {
            if !self.check_type_expr(child) {
                return false;
            }
        }

        if let ExprKind::Const(c) = &expr.kind {
            if matches!(c.const_type.family(), TypeFamily::Boolean | TypeFamily::Integer) {
                self.min_types
                    .entry(VarVersionPair::constant(expr.id))
                    .or_insert_with(|| c.const_type.clone());
            }
        }

        let constraints = {
            let min_types = &self.min_types;
            expr.check_type_bounds(&|pair| min_types.get(&pair).cloned())
        };
        if constraints.is_empty() {
            return true;
        }

        let mut children = expr.children_mut();
        for constraint in constraints.iter().filter(|c| c.bound == Bound::Max) {
            if constraint.ty.family() == TypeFamily::Object {
                continue;
            }
            if let Some(child) = children.get_mut(constraint.child) {
                self.change_expr_type(child, &constraint.ty, Bound::Max);
            }
        }

        let mut result = true;
        for constraint in constraints.iter().filter(|c| c.bound == Bound::Min) {
            if let Some(child) = children.get_mut(constraint.child) {
                result &= self.change_expr_type(child, &constraint.ty, Bound::Min);
            }
        }
        result
    }

    fn change_expr_type(&mut self, expr: &mut Expr, ty: &VarType, bound: Bound) -> bool {
        let id = expr.id;
        match &mut expr.kind {
            ExprKind::Const(c) => {
                let const_family = c.const_type.family();
                let new_family = ty.family();
                if const_family > TypeFamily::Integer || new_family > TypeFamily::Integer {
                    return true;
                }
                let mut ty = ty.clone();
                if new_family == TypeFamily::Integer {
                    if let Some(value) = c.int_value() {
                        let min_integer = VarType::of_int_constant(value, false);
                        if min_integer.is_strict_superset(&ty) {
                            ty = min_integer;
                        }
                    }
                }
                self.change_var_type(VarVersionPair::constant(id), ty, bound, Some(c))
            }
            ExprKind::Var(v) => {
                let pair = v.pair();
                self.change_var_type(pair, ty.clone(), bound, None)
            }
            ExprKind::Assignment(a) => self.change_expr_type(&mut a.right, ty, bound),
            ExprKind::Function(f) => match (f.func, f.operands.as_mut_slice()) {
                (FunctionType::Iif, [_, on_true, on_false]) => {
                    let first = self.change_expr_type(on_true, ty, bound);
                    let second = self.change_expr_type(on_false, ty, bound);
                    first && second
                }
                (FunctionType::And | FunctionType::Or | FunctionType::Xor, [left, right]) => {
                    let first = self.change_expr_type(left, ty, bound);
                    let second = self.change_expr_type(right, ty, bound);
                    first && second
                }
                _ => true,
            },
            _ => true,
        }
    }

    /// Moves one bound of `pair` towards `ty`. Returns `false` if the lower
    /// bound widened, which forces another pass.
    fn change_var_type(
        &mut self,
        pair: VarVersionPair,
        ty: VarType,
        bound: Bound,
        constant: Option<&mut ConstExpr>,
    ) -> bool {
        match bound {
            Bound::Min => {
                let current = self.min_types.get(&pair).cloned();
                let new_min = match &current {
                    None => ty,
                    Some(cur) if ty.family() > cur.family() => ty,
                    Some(cur) if ty.family() < cur.family() => return true,
                    Some(cur) => cur.join(&ty).unwrap_or_else(|| cur.clone()),
                };
                if let Some(constant) = constant {
                    constant.const_type = new_min.clone();
                }
                let widened = current
                    .as_ref()
                    .is_some_and(|cur| new_min.family() > cur.family() || new_min.is_strict_superset(cur));
                self.min_types.insert(pair, new_min);
                !widened
            }
            Bound::Max => {
                let new_max = match self.max_types.get(&pair) {
                    None => ty,
                    Some(cur) if ty.family() < cur.family() => ty,
                    Some(cur) if ty.family() > cur.family() => return true,
                    Some(cur) => cur.meet(&ty).unwrap_or_else(|| cur.clone()),
                };
                self.max_types.insert(pair, new_max);
                true
            }
        }
    }
}

/// Clears variable types and resets integer constants to their literal type.
fn reset_expr_types(tree: &mut StatementTree, graph: &DirectGraph) {
    graph.iterate_exprents(tree, |expr| {
        expr.visit_mut(&mut |e| match &mut e.kind {
            ExprKind::Var(v) => v.var_type = VarType::UNKNOWN,
            ExprKind::Const(c) if c.const_type.family() == TypeFamily::Integer => {
                if let Some(ty) = c.initial_int_type() {
                    c.const_type = ty;
                }
            }
            _ => {}
        });
        ExprAction::Continue
    });
}
