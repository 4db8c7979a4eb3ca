//! The flattened statement graph.

use std::{collections::HashMap, collections::VecDeque, fmt};

use strum::Display;

use crate::structure::{Expr, ExprSlot, StatId, StatementTree};

/// Dense index of a node in a [`DirectGraph`]; nodes are stored in reverse
/// post order, so index 0 is the entry.
pub type NodeIdx = usize;

/// Role of a [`DirectNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DirectNodeKind {
    /// A basic statement or the dummy exit
    Direct,
    /// Head expressions of an if, switch or synchronized statement
    Tail,
    /// `for` initializer
    Init,
    /// Loop condition
    Condition,
    /// `for` increment
    Increment,
    /// Entry of a try/catch or catch-all statement
    Try,
}

/// A node of the flattened graph.
#[derive(Debug, Clone)]
pub struct DirectNode {
    /// Statement id, possibly with a `_tail`, `_cond`, `_init`, `_inc` or
    /// `_try` suffix
    pub id: String,
    /// Node role
    pub kind: DirectNodeKind,
    /// Statement the node was produced from
    pub statement: StatId,
    /// Expressions evaluated by the node, `None` for try heads and the exit
    pub slot: Option<ExprSlot>,
    pub(crate) succs: Vec<NodeIdx>,
    pub(crate) preds: Vec<NodeIdx>,
}

impl DirectNode {
    pub(crate) fn new(id: String, kind: DirectNodeKind, statement: StatId, slot: Option<ExprSlot>) -> Self {
        DirectNode {
            id,
            kind,
            statement,
            slot,
            succs: Vec::new(),
            preds: Vec::new(),
        }
    }

    /// Successor indices.
    #[must_use]
    pub fn succs(&self) -> &[NodeIdx] {
        &self.succs
    }

    /// Predecessor indices.
    #[must_use]
    pub fn preds(&self) -> &[NodeIdx] {
        &self.preds
    }
}

/// One way through a `finally` handler.
///
/// `source` is the node the path leaves the protected region from,
/// `destination` the node reached after the handler completes and `entry`
/// the first node of the handler copy the path runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FinallyPathWrapper {
    /// Node leaving the protected region
    pub source: NodeIdx,
    /// Node reached after the handler
    pub destination: NodeIdx,
    /// First node of the handler
    pub entry: NodeIdx,
}

/// What [`DirectGraph::iterate_exprents`] does after visiting an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprAction {
    /// Visit the next expression
    Continue,
    /// Abort the walk
    Stop,
    /// Remove the visited expression and continue
    Remove,
}

/// Flattened statement graph with finally path bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct DirectGraph {
    pub(crate) nodes: Vec<DirectNode>,
    pub(crate) index: HashMap<String, NodeIdx>,
    pub(crate) statement_nodes: HashMap<StatId, NodeIdx>,
    pub(crate) neg_if_branch: HashMap<NodeIdx, NodeIdx>,
    pub(crate) short_range_finally_paths: HashMap<NodeIdx, Vec<FinallyPathWrapper>>,
    pub(crate) long_range_finally_paths: HashMap<NodeIdx, Vec<FinallyPathWrapper>>,
    pub(crate) finally_monitor_exception_exits: HashMap<NodeIdx, NodeIdx>,
}

impl DirectGraph {
    /// Entry node.
    #[must_use]
    pub fn first(&self) -> NodeIdx {
        0
    }

    /// Nodes in reverse post order.
    #[must_use]
    pub fn nodes(&self) -> &[DirectNode] {
        &self.nodes
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` for a graph without nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at `idx`.
    #[must_use]
    pub fn node(&self, idx: NodeIdx) -> Option<&DirectNode> {
        self.nodes.get(idx)
    }

    /// Index of the node named `id`.
    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<NodeIdx> {
        self.index.get(id).copied()
    }

    /// Node named `id`.
    #[must_use]
    pub fn node_by_id(&self, id: &str) -> Option<&DirectNode> {
        self.index_of(id).and_then(|i| self.nodes.get(i))
    }

    /// The node control enters when it reaches statement `stat`.
    #[must_use]
    pub fn statement_node(&self, stat: StatId) -> Option<NodeIdx> {
        self.statement_nodes.get(&stat).copied()
    }

    /// Target of the negative branch of the condition evaluated by `idx`.
    #[must_use]
    pub fn neg_if_branch(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.neg_if_branch.get(&idx).copied()
    }

    /// Short-range finally paths leaving node `idx`.
    #[must_use]
    pub fn short_range_paths(&self, idx: NodeIdx) -> &[FinallyPathWrapper] {
        self.short_range_finally_paths.get(&idx).map_or(&[][..], Vec::as_slice)
    }

    /// Long-range finally paths leaving node `idx`.
    #[must_use]
    pub fn long_range_paths(&self, idx: NodeIdx) -> &[FinallyPathWrapper] {
        self.long_range_finally_paths.get(&idx).map_or(&[][..], Vec::as_slice)
    }

    /// Returns `true` if `idx` ends a path through some finally handler.
    #[must_use]
    pub fn is_finally_exit(&self, idx: NodeIdx) -> bool {
        self.short_range_finally_paths.contains_key(&idx)
    }

    /// Exception destination of a synchronized finally exit at `idx`.
    #[must_use]
    pub fn monitor_exception_exit(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.finally_monitor_exception_exits.get(&idx).copied()
    }

    /// Expressions evaluated by node `idx`.
    #[must_use]
    pub fn exprs<'t>(&self, tree: &'t StatementTree, idx: NodeIdx) -> &'t [Expr] {
        match self.nodes.get(idx).and_then(|n| n.slot) {
            Some(slot) => tree.slot_exprs(slot),
            None => &[],
        }
    }

    /// Visits the top-level expressions of every node breadth-first from the
    /// entry, each node once. Returns `false` if `f` stopped the walk.
    pub fn iterate_exprents(&self, tree: &mut StatementTree, mut f: impl FnMut(&mut Expr) -> ExprAction) -> bool {
        if self.nodes.is_empty() {
            return true;
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([self.first()]);
        visited[self.first()] = true;

        while let Some(idx) = queue.pop_front() {
            let node = &self.nodes[idx];
            if let Some(slot) = node.slot {
                let mut i = 0;
                while i < tree.slot_exprs(slot).len() {
                    match f(&mut tree.slot_exprs_mut(slot)[i]) {
                        ExprAction::Continue => i += 1,
                        ExprAction::Stop => return false,
                        ExprAction::Remove => {
                            tree.remove_slot_expr(slot, i);
                        }
                    }
                }
            }
            for &succ in &node.succs {
                if !visited[succ] {
                    visited[succ] = true;
                    queue.push_back(succ);
                }
            }
        }
        true
    }
}

impl fmt::Display for DirectGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |i: NodeIdx| self.nodes.get(i).map_or("?", |n| n.id.as_str());
        for (idx, node) in self.nodes.iter().enumerate() {
            write!(f, "{} ({})", node.id, node.kind)?;
            if !node.succs.is_empty() {
                let succs: Vec<&str> = node.succs.iter().map(|&s| name(s)).collect();
                write!(f, " -> {}", succs.join(", "))?;
            }
            if let Some(neg) = self.neg_if_branch(idx) {
                write!(f, " [neg {}]", name(neg))?;
            }
            writeln!(f)?;
            for path in self.short_range_paths(idx) {
                writeln!(
                    f,
                    "  finally {} => {} via {}",
                    name(path.source),
                    name(path.destination),
                    name(path.entry)
                )?;
            }
        }
        Ok(())
    }
}
