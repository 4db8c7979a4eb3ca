//! Structured statement tree.
//!
//! The tree is an arena of [`Statement`]s addressed by [`StatId`]. Parent and
//! child links are ids, and control transfer between statements is described by
//! [`StatEdge`]s stored on the source statement. Expressions live inside the
//! statements; analysis passes reach them through [`ExprSlot`] locators so the
//! flattened graph never borrows from the tree.

use std::fmt;

use strum::Display;

use crate::{
    structure::expr::{Expr, ExprKind, VarExpr},
    Error, Result,
};

/// Statement identifier, unique within one tree.
pub type StatId = u32;

/// Kind of a control transfer between statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum EdgeKind {
    /// Fall-through or jump to the next statement
    Regular,
    /// Transfer to an exception handler
    Exception,
    /// `break` out of an enclosing statement
    Break,
    /// `continue` of an enclosing loop
    Continue,
    /// Normal completion of a `finally` handler
    FinallyExit,
}

/// A successor edge of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatEdge {
    /// Edge kind
    pub kind: EdgeKind,
    /// Statement the edge leaves
    pub source: StatId,
    /// Statement the edge enters
    pub destination: StatId,
    /// Statement closed by a `break`/`continue`, if labelled
    pub closure: Option<StatId>,
}

/// Shape of an `if` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IfType {
    /// `if (c) { .. }`: the statement's own first successor is the negative branch
    If,
    /// `if (c) { .. } else { .. }`
    IfElse,
}

/// Shape of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LoopType {
    /// Endless loop, left through `break`
    Do,
    /// Condition checked before the body
    While,
    /// Condition checked after the body
    DoWhile,
    /// Init, condition, increment
    For,
}

/// Statement payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// Straight-line expressions
    Basic {
        /// Expressions in execution order
        exprs: Vec<Expr>,
        /// The block is the head of an `if`; its first successor is the positive branch
        ends_with_if: bool,
    },
    /// Children run in order
    Sequence,
    /// Children: head block, then-branch, optional else-branch
    If {
        /// `If` or `IfElse`
        if_type: IfType,
        /// The condition, wrapped as an [`ExprKind::If`] head
        head: Option<Expr>,
    },
    /// Children: the loop body
    Do {
        /// Loop shape
        loop_type: LoopType,
        /// `for` initializer
        init: Option<Expr>,
        /// Loop condition, wrapped as an [`ExprKind::If`] head
        condition: Option<Expr>,
        /// `for` increment
        increment: Option<Expr>,
    },
    /// Children: head block, then the case bodies
    Switch {
        /// The selector, wrapped as an [`ExprKind::Switch`] head
        head: Option<Expr>,
    },
    /// Children: head block, body
    Synchronized {
        /// The `monitorenter` expression
        head: Option<Expr>,
    },
    /// Children: protected body, then one handler per catch variable
    TryCatch {
        /// Exception variables, `vars[i]` belongs to child `i + 1`
        vars: Vec<Expr>,
    },
    /// Children: protected body, handler
    CatchAll {
        /// Exception variable of the handler
        vars: Vec<Expr>,
        /// The handler is a `finally` block
        is_finally: bool,
        /// Monitor variable when the block comes from `synchronized`
        monitor: Option<Expr>,
    },
    /// Children: the method body
    Root,
    /// Target of every method exit
    DummyExit,
}

impl StatementKind {
    /// Short name used in logs and graph dumps.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StatementKind::Basic { .. } => "basic",
            StatementKind::Sequence => "sequence",
            StatementKind::If { .. } => "if",
            StatementKind::Do { .. } => "do",
            StatementKind::Switch { .. } => "switch",
            StatementKind::Synchronized { .. } => "synchronized",
            StatementKind::TryCatch { .. } => "trycatch",
            StatementKind::CatchAll { .. } => "catchall",
            StatementKind::Root => "root",
            StatementKind::DummyExit => "dummyexit",
        }
    }
}

/// One statement node.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Unique id
    pub id: StatId,
    /// Payload
    pub kind: StatementKind,
    /// Enclosing statement, `None` for the root and the dummy exit
    pub parent: Option<StatId>,
    /// Nested statements in the order documented on [`StatementKind`]
    pub children: Vec<StatId>,
    /// Outgoing edges
    pub successors: Vec<StatEdge>,
}

impl Statement {
    /// Outgoing edges except exception edges, in insertion order.
    pub fn direct_successors(&self) -> impl Iterator<Item = &StatEdge> {
        self.successors.iter().filter(|e| e.kind != EdgeKind::Exception)
    }

    /// First child, if any.
    #[must_use]
    pub fn first(&self) -> Option<StatId> {
        self.children.first().copied()
    }

    /// Catch variables of a try/catch or catch-all statement.
    #[must_use]
    pub fn catch_vars(&self) -> &[Expr] {
        match &self.kind {
            StatementKind::TryCatch { vars } | StatementKind::CatchAll { vars, .. } => vars,
            _ => &[],
        }
    }

    /// Mutable catch variables.
    pub fn catch_vars_mut(&mut self) -> &mut [Expr] {
        match &mut self.kind {
            StatementKind::TryCatch { vars } | StatementKind::CatchAll { vars, .. } => vars,
            _ => &mut [],
        }
    }

    /// Returns `true` for a catch-all that is a `finally` block.
    #[must_use]
    pub fn is_finally(&self) -> bool {
        matches!(self.kind, StatementKind::CatchAll { is_finally: true, .. })
    }

    /// Returns `true` for a catch-all produced from `synchronized`.
    #[must_use]
    pub fn has_monitor(&self) -> bool {
        matches!(self.kind, StatementKind::CatchAll { monitor: Some(_), .. })
    }
}

/// Locator of an expression list owned by a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExprSlot {
    /// Expressions of a basic statement
    Basic(StatId),
    /// Head of an if, switch or synchronized statement
    Head(StatId),
    /// `for` initializer
    DoInit(StatId),
    /// Loop condition
    DoCondition(StatId),
    /// `for` increment
    DoIncrement(StatId),
}

impl ExprSlot {
    /// Owning statement.
    #[must_use]
    pub fn statement(self) -> StatId {
        match self {
            ExprSlot::Basic(id)
            | ExprSlot::Head(id)
            | ExprSlot::DoInit(id)
            | ExprSlot::DoCondition(id)
            | ExprSlot::DoIncrement(id) => id,
        }
    }
}

fn option_slice(expr: &Option<Expr>) -> &[Expr] {
    match expr {
        Some(e) => std::slice::from_ref(e),
        None => &[],
    }
}

fn option_slice_mut(expr: &mut Option<Expr>) -> &mut [Expr] {
    match expr {
        Some(e) => std::slice::from_mut(e),
        None => &mut [],
    }
}

/// Arena of statements with a root and a dummy exit.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementTree {
    pub(crate) statements: Vec<Statement>,
    pub(crate) root: StatId,
    pub(crate) dummy_exit: StatId,
}

impl StatementTree {
    /// The root statement id.
    #[must_use]
    pub fn root(&self) -> StatId {
        self.root
    }

    /// The dummy exit id.
    #[must_use]
    pub fn dummy_exit(&self) -> StatId {
        self.dummy_exit
    }

    /// Number of statements, including root and dummy exit.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Returns `true` if the tree holds no statement.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Statement by id.
    #[must_use]
    pub fn get(&self, id: StatId) -> Option<&Statement> {
        self.statements.get(id as usize)
    }

    /// Mutable statement by id.
    pub fn get_mut(&mut self, id: StatId) -> Option<&mut Statement> {
        self.statements.get_mut(id as usize)
    }

    /// Statement by id, failing for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if `id` is not part of the tree.
    pub fn stat(&self, id: StatId) -> Result<&Statement> {
        self.get(id)
            .ok_or_else(|| Error::GraphError(format!("Unknown statement {id}")))
    }

    /// All statements in id order.
    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }

    /// Returns `true` if `inner` is a proper descendant of `outer`.
    #[must_use]
    pub fn contains_strict(&self, outer: StatId, inner: StatId) -> bool {
        let mut current = self.get(inner).and_then(|s| s.parent);
        while let Some(id) = current {
            if id == outer {
                return true;
            }
            current = self.get(id).and_then(|s| s.parent);
        }
        false
    }

    /// Returns `true` if `inner` is `outer` or one of its descendants.
    #[must_use]
    pub fn contains(&self, outer: StatId, inner: StatId) -> bool {
        outer == inner || self.contains_strict(outer, inner)
    }

    /// `id` followed by all its ancestors up to the root.
    #[must_use]
    pub fn ancestors(&self, id: StatId) -> Vec<StatId> {
        let mut out = vec![id];
        let mut current = self.get(id).and_then(|s| s.parent);
        while let Some(p) = current {
            out.push(p);
            current = self.get(p).and_then(|s| s.parent);
        }
        out
    }

    /// Statements of the subtree rooted at `id` in pre-order.
    #[must_use]
    pub fn preorder(&self, id: StatId) -> Vec<StatId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(stat) = self.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(stat.children.iter().rev());
        }
        out
    }

    /// Expression slots owned by `id` itself, in source order.
    #[must_use]
    pub fn own_slots(&self, id: StatId) -> Vec<ExprSlot> {
        match self.get(id).map(|s| &s.kind) {
            Some(StatementKind::Basic { .. }) => vec![ExprSlot::Basic(id)],
            Some(StatementKind::If { .. } | StatementKind::Switch { .. } | StatementKind::Synchronized { .. }) => {
                vec![ExprSlot::Head(id)]
            }
            Some(StatementKind::Do { .. }) => {
                vec![ExprSlot::DoInit(id), ExprSlot::DoCondition(id), ExprSlot::DoIncrement(id)]
            }
            _ => Vec::new(),
        }
    }

    /// Expressions stored in `slot`; empty for a slot the statement does not have.
    #[must_use]
    pub fn slot_exprs(&self, slot: ExprSlot) -> &[Expr] {
        let Some(stat) = self.get(slot.statement()) else {
            return &[];
        };
        match (slot, &stat.kind) {
            (ExprSlot::Basic(_), StatementKind::Basic { exprs, .. }) => exprs,
            (
                ExprSlot::Head(_),
                StatementKind::If { head, .. } | StatementKind::Switch { head } | StatementKind::Synchronized { head },
            ) => option_slice(head),
            (ExprSlot::DoInit(_), StatementKind::Do { init, .. }) => option_slice(init),
            (ExprSlot::DoCondition(_), StatementKind::Do { condition, .. }) => option_slice(condition),
            (ExprSlot::DoIncrement(_), StatementKind::Do { increment, .. }) => option_slice(increment),
            _ => &[],
        }
    }

    /// Mutable view of the expressions stored in `slot`.
    pub fn slot_exprs_mut(&mut self, slot: ExprSlot) -> &mut [Expr] {
        let Some(stat) = self.get_mut(slot.statement()) else {
            return &mut [];
        };
        match (slot, &mut stat.kind) {
            (ExprSlot::Basic(_), StatementKind::Basic { exprs, .. }) => exprs,
            (
                ExprSlot::Head(_),
                StatementKind::If { head, .. } | StatementKind::Switch { head } | StatementKind::Synchronized { head },
            ) => option_slice_mut(head),
            (ExprSlot::DoInit(_), StatementKind::Do { init, .. }) => option_slice_mut(init),
            (ExprSlot::DoCondition(_), StatementKind::Do { condition, .. }) => option_slice_mut(condition),
            (ExprSlot::DoIncrement(_), StatementKind::Do { increment, .. }) => option_slice_mut(increment),
            _ => &mut [],
        }
    }

    /// Removes expression `index` from `slot`.
    pub fn remove_slot_expr(&mut self, slot: ExprSlot, index: usize) -> Option<Expr> {
        let stat = self.get_mut(slot.statement())?;
        let holder = match (slot, &mut stat.kind) {
            (ExprSlot::Basic(_), StatementKind::Basic { exprs, .. }) => {
                return (index < exprs.len()).then(|| exprs.remove(index));
            }
            (
                ExprSlot::Head(_),
                StatementKind::If { head, .. } | StatementKind::Switch { head } | StatementKind::Synchronized { head },
            ) => head,
            (ExprSlot::DoInit(_), StatementKind::Do { init, .. }) => init,
            (ExprSlot::DoCondition(_), StatementKind::Do { condition, .. }) => condition,
            (ExprSlot::DoIncrement(_), StatementKind::Do { increment, .. }) => increment,
            _ => return None,
        };
        if index == 0 {
            holder.take()
        } else {
            None
        }
    }

    /// Visits every expression tree of the statement tree (slots and catch
    /// variables), children before parents.
    pub fn visit_exprs<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        for stat in &self.statements {
            for slot in self.own_slots(stat.id) {
                for expr in self.slot_exprs(slot) {
                    expr.visit(f);
                }
            }
            for var in stat.catch_vars() {
                var.visit(f);
            }
        }
    }

    /// Mutable variant of [`StatementTree::visit_exprs`].
    pub fn visit_exprs_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        for i in 0..self.statements.len() {
            let id = self.statements[i].id;
            for slot in self.own_slots(id) {
                for expr in self.slot_exprs_mut(slot) {
                    expr.visit_mut(f);
                }
            }
            if let StatementKind::TryCatch { vars } | StatementKind::CatchAll { vars, .. } =
                &mut self.statements[i].kind
            {
                for var in vars {
                    var.visit_mut(f);
                }
            }
        }
    }

    /// Applies `f` to every variable occurrence of the tree.
    pub fn visit_vars_mut(&mut self, f: &mut impl FnMut(&mut VarExpr)) {
        self.visit_exprs_mut(&mut |expr| {
            if let ExprKind::Var(var) = &mut expr.kind {
                f(var);
            }
        });
    }
}

impl fmt::Display for StatementTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(stat) = self.get(id) else {
                continue;
            };
            write!(f, "{:indent$}{} {}", "", stat.kind.name(), id, indent = depth * 2)?;
            for edge in &stat.successors {
                write!(f, " {}->{}", edge.kind, edge.destination)?;
            }
            writeln!(f)?;
            for slot in self.own_slots(id) {
                for expr in self.slot_exprs(slot) {
                    writeln!(f, "{:indent$}{}", "", expr, indent = depth * 2 + 4)?;
                }
            }
            for &child in stat.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        Ok(())
    }
}
