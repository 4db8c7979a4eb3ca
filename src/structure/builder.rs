//! Convenience constructor for [`StatementTree`]s.
//!
//! The builder hands out statement ids bottom-up: children are created first
//! and passed to their container. Edges are added explicitly, except the
//! edges every container implies (if head to its branches, switch head to its
//! cases, synchronized head to its body).
//!
//! # Examples
//!
//! ```rust,ignore
//! use classflow::structure::{Expr, StatementTreeBuilder};
//!
//! let mut b = StatementTreeBuilder::new();
//! let cond = Expr::var(b.ids(), 1);
//! let head = b.basic(vec![]);
//! let then = b.basic(vec![]);
//! let stat = b.if_stat(head, cond, then, None);
//! let ret = b.basic(vec![]);
//! b.regular(then, ret);
//! b.regular(stat, ret);
//! b.break_to(ret, b.exit());
//! let body = b.sequence(vec![stat, ret]);
//! let tree = b.build(body)?;
//! ```

use crate::{
    structure::{
        expr::{Expr, ExprIdGenerator, ExprKind, MonitorKind},
        statement::{EdgeKind, IfType, LoopType, StatEdge, StatId, Statement, StatementKind, StatementTree},
    },
    Result,
};

/// Incrementally assembles a [`StatementTree`].
#[derive(Debug)]
pub struct StatementTreeBuilder {
    statements: Vec<Statement>,
    ids: ExprIdGenerator,
    dummy_exit: StatId,
}

impl Default for StatementTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementTreeBuilder {
    /// Creates a builder holding only the dummy exit.
    #[must_use]
    pub fn new() -> Self {
        let mut builder = StatementTreeBuilder {
            statements: Vec::new(),
            ids: ExprIdGenerator::new(),
            dummy_exit: 0,
        };
        builder.dummy_exit = builder.push(StatementKind::DummyExit, Vec::new());
        builder
    }

    /// Expression id source shared by everything built for this tree.
    pub fn ids(&mut self) -> &mut ExprIdGenerator {
        &mut self.ids
    }

    /// The dummy exit statement.
    #[must_use]
    pub fn exit(&self) -> StatId {
        self.dummy_exit
    }

    fn push(&mut self, kind: StatementKind, children: Vec<StatId>) -> StatId {
        let id = StatId::try_from(self.statements.len()).unwrap_or(StatId::MAX);
        for &child in &children {
            if let Some(stat) = self.statements.get_mut(child as usize) {
                stat.parent = Some(id);
            }
        }
        self.statements.push(Statement {
            id,
            kind,
            parent: None,
            children,
            successors: Vec::new(),
        });
        id
    }

    fn mark_if_head(&mut self, head: StatId) {
        if let Some(Statement {
            kind: StatementKind::Basic { ends_with_if, .. },
            ..
        }) = self.statements.get_mut(head as usize)
        {
            *ends_with_if = true;
        }
    }

    /// Basic statement.
    pub fn basic(&mut self, exprs: Vec<Expr>) -> StatId {
        self.push(
            StatementKind::Basic {
                exprs,
                ends_with_if: false,
            },
            Vec::new(),
        )
    }

    /// Sequence of `children`. Edges between them are not implied.
    pub fn sequence(&mut self, children: Vec<StatId>) -> StatId {
        self.push(StatementKind::Sequence, children)
    }

    /// `if (condition) then [else other]`, with `head` as the block evaluating
    /// the condition. Adds `head -> then` and `head -> other`.
    pub fn if_stat(&mut self, head: StatId, condition: Expr, then: StatId, other: Option<StatId>) -> StatId {
        let cond = Expr {
            id: self.ids.next_id(),
            kind: ExprKind::If(Box::new(condition)),
        };
        let mut children = vec![head, then];
        children.extend(other);
        let if_type = if other.is_some() { IfType::IfElse } else { IfType::If };
        let id = self.push(
            StatementKind::If {
                if_type,
                head: Some(cond),
            },
            children,
        );
        self.mark_if_head(head);
        self.regular(head, then);
        if let Some(other) = other {
            self.regular(head, other);
        }
        id
    }

    /// Loop around `body`. The condition is wrapped as an if head.
    pub fn do_loop(
        &mut self,
        loop_type: LoopType,
        body: StatId,
        init: Option<Expr>,
        condition: Option<Expr>,
        increment: Option<Expr>,
    ) -> StatId {
        let condition = condition.map(|c| Expr {
            id: self.ids.next_id(),
            kind: ExprKind::If(Box::new(c)),
        });
        self.push(
            StatementKind::Do {
                loop_type,
                init,
                condition,
                increment,
            },
            vec![body],
        )
    }

    /// `switch (value)` evaluated by `head`, with `cases` as case bodies.
    pub fn switch(&mut self, head: StatId, value: Expr, cases: Vec<StatId>) -> StatId {
        let selector = Expr {
            id: self.ids.next_id(),
            kind: ExprKind::Switch(Box::new(value)),
        };
        let mut children = vec![head];
        children.extend(&cases);
        let id = self.push(StatementKind::Switch { head: Some(selector) }, children);
        for case in cases {
            self.regular(head, case);
        }
        id
    }

    /// `synchronized (value) body`, with `head` entering the monitor.
    pub fn synchronized(&mut self, head: StatId, value: Expr, body: StatId) -> StatId {
        let enter = Expr {
            id: self.ids.next_id(),
            kind: ExprKind::Monitor(MonitorKind::Enter, Box::new(value)),
        };
        let id = self.push(StatementKind::Synchronized { head: Some(enter) }, vec![head, body]);
        self.regular(head, body);
        id
    }

    /// `try body catch ...`; each handler comes with its exception variable.
    pub fn try_catch(&mut self, body: StatId, handlers: Vec<(StatId, Expr)>) -> StatId {
        let mut children = vec![body];
        let mut vars = Vec::with_capacity(handlers.len());
        for (handler, var) in handlers {
            children.push(handler);
            vars.push(var);
        }
        self.push(StatementKind::TryCatch { vars }, children)
    }

    /// Catch-all around `body`; a `finally` when `is_finally` is set.
    pub fn catch_all(
        &mut self,
        body: StatId,
        handler: StatId,
        var: Expr,
        is_finally: bool,
        monitor: Option<Expr>,
    ) -> StatId {
        self.push(
            StatementKind::CatchAll {
                vars: vec![var],
                is_finally,
                monitor,
            },
            vec![body, handler],
        )
    }

    /// Adds an edge of `kind`.
    pub fn edge(&mut self, kind: EdgeKind, source: StatId, destination: StatId) -> &mut Self {
        if let Some(stat) = self.statements.get_mut(source as usize) {
            let edge = StatEdge {
                kind,
                source,
                destination,
                closure: None,
            };
            if !stat.successors.contains(&edge) {
                stat.successors.push(edge);
            }
        }
        self
    }

    /// Regular edge.
    pub fn regular(&mut self, source: StatId, destination: StatId) -> &mut Self {
        self.edge(EdgeKind::Regular, source, destination)
    }

    /// Break edge.
    pub fn break_to(&mut self, source: StatId, destination: StatId) -> &mut Self {
        self.edge(EdgeKind::Break, source, destination)
    }

    /// Continue edge to the loop `target`.
    pub fn continue_to(&mut self, source: StatId, target: StatId) -> &mut Self {
        self.edge(EdgeKind::Continue, source, target)
    }

    /// Finally-exit edge, leaving a `finally` handler normally.
    pub fn finally_exit(&mut self, source: StatId, destination: StatId) -> &mut Self {
        self.edge(EdgeKind::FinallyExit, source, destination)
    }

    /// Wraps `body` in the root statement and checks the tree.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when a statement is nested twice or
    /// not at all, a container has the wrong number of children, or an edge
    /// names an unknown statement.
    pub fn build(mut self, body: StatId) -> Result<StatementTree> {
        let root = self.push(StatementKind::Root, vec![body]);
        let tree = StatementTree {
            statements: self.statements,
            root,
            dummy_exit: self.dummy_exit,
        };
        validate(&tree)?;
        Ok(tree)
    }
}

fn validate(tree: &StatementTree) -> Result<()> {
    let count = tree.statements.len();
    let mut seen = vec![0usize; count];
    for stat in &tree.statements {
        for &child in &stat.children {
            let slot = seen
                .get_mut(child as usize)
                .ok_or_else(|| malformed_error!("Statement {} has unknown child {}", stat.id, child))?;
            *slot += 1;
            if child == tree.root || child == tree.dummy_exit {
                return Err(malformed_error!("Statement {} nests {} which cannot be nested", stat.id, child));
            }
        }
        for edge in &stat.successors {
            if edge.destination as usize >= count {
                return Err(malformed_error!(
                    "Edge {} -> {} names an unknown statement",
                    edge.source,
                    edge.destination
                ));
            }
        }

        let children = stat.children.len();
        let shape_ok = match &stat.kind {
            StatementKind::Basic { .. } | StatementKind::DummyExit => children == 0,
            StatementKind::Sequence => children > 0,
            StatementKind::If { if_type, head } => {
                head.is_some()
                    && match if_type {
                        IfType::If => children == 2,
                        IfType::IfElse => children == 3,
                    }
            }
            StatementKind::Do { .. } | StatementKind::Root => children == 1,
            StatementKind::Switch { head } => head.is_some() && children >= 1,
            StatementKind::Synchronized { head } => head.is_some() && children == 2,
            StatementKind::TryCatch { vars } => children >= 2 && vars.len() == children - 1,
            StatementKind::CatchAll { vars, .. } => children == 2 && vars.len() == 1,
        };
        if !shape_ok {
            return Err(malformed_error!(
                "{} statement {} has an invalid shape",
                stat.kind.name(),
                stat.id
            ));
        }
        if let StatementKind::If { .. } | StatementKind::Switch { .. } | StatementKind::Synchronized { .. } = stat.kind {
            let head_is_basic = stat
                .first()
                .and_then(|h| tree.get(h))
                .is_some_and(|h| matches!(h.kind, StatementKind::Basic { .. }));
            if !head_is_basic {
                return Err(malformed_error!("Head of statement {} is not a basic statement", stat.id));
            }
        }
        if let StatementKind::TryCatch { vars } | StatementKind::CatchAll { vars, .. } = &stat.kind {
            if vars.iter().any(|v| v.as_var().is_none()) {
                return Err(malformed_error!("Catch variable of statement {} is not a variable", stat.id));
            }
        }
    }

    for (id, &n) in seen.iter().enumerate() {
        let expected = usize::from(id as StatId != tree.root && id as StatId != tree.dummy_exit);
        if n != expected {
            return Err(malformed_error!("Statement {} is nested {} times", id, n));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{structure::ExprSlot, Error};

    #[test]
    fn test_if_else_shape() {
        let mut b = StatementTreeBuilder::new();
        let cond = Expr::var(b.ids(), 1);
        let head = b.basic(vec![]);
        let then = b.basic(vec![]);
        let other = b.basic(vec![]);
        let stat = b.if_stat(head, cond, then, Some(other));
        let tree = b.build(stat).unwrap();

        let head_stat = tree.get(head).unwrap();
        assert!(matches!(head_stat.kind, StatementKind::Basic { ends_with_if: true, .. }));
        let dests: Vec<StatId> = head_stat.successors.iter().map(|e| e.destination).collect();
        assert_eq!(dests, vec![then, other]);
        assert_eq!(tree.get(then).unwrap().parent, Some(stat));
        assert!(tree.contains_strict(tree.root(), then));
        assert!(!tree.contains_strict(then, then));
        assert_eq!(tree.slot_exprs(ExprSlot::Head(stat)).len(), 1);
    }

    #[test]
    fn test_double_nesting_is_rejected() {
        let mut b = StatementTreeBuilder::new();
        let a = b.basic(vec![]);
        let inner = b.sequence(vec![a]);
        let outer = b.sequence(vec![inner, a]);
        assert!(matches!(b.build(outer), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_remove_slot_expr() {
        let mut b = StatementTreeBuilder::new();
        let x = Expr::var(b.ids(), 1);
        let one = Expr::int_const(b.ids(), 1, false);
        let assign = Expr::assign(b.ids(), x, one);
        let block = b.basic(vec![assign]);
        let mut tree = b.build(block).unwrap();
        assert!(tree.remove_slot_expr(ExprSlot::Basic(block), 1).is_none());
        assert!(tree.remove_slot_expr(ExprSlot::Basic(block), 0).is_some());
        assert!(tree.slot_exprs(ExprSlot::Basic(block)).is_empty());
    }
}
