//! Live ranges of versions over the flattened graph.
//!
//! Used before two versions of one slot are merged: they may only share a
//! name if neither is live where the other is defined.

use std::collections::{HashMap, HashSet};

use log::trace;

use crate::{
    analysis::flatten::{DirectGraph, NodeIdx},
    structure::{Expr, ExprKind, StatementTree, VarVersionPair},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Use(VarVersionPair),
    Def(VarVersionPair),
}

/// Interference relation between versions of the same variable.
#[derive(Debug, Clone, Default)]
pub(crate) struct Interference {
    pairs: HashSet<(VarVersionPair, VarVersionPair)>,
}

impl Interference {
    /// Computes liveness backwards over `graph`. `entry_defs` are versions
    /// defined on entry to a node rather than by an expression: parameters at
    /// the first node, catch variables at their handler.
    pub(crate) fn compute(tree: &StatementTree, graph: &DirectGraph, entry_defs: &[(NodeIdx, VarVersionPair)]) -> Self {
        let events: Vec<Vec<Event>> = (0..graph.len())
            .map(|idx| {
                let mut out = Vec::new();
                for expr in graph.exprs(tree, idx) {
                    collect_events(expr, &mut out);
                }
                out
            })
            .collect();

        let mut live_in: Vec<HashSet<VarVersionPair>> = vec![HashSet::new(); graph.len()];
        let mut passes = 0;
        loop {
            passes += 1;
            let mut changed = false;
            for idx in (0..graph.len()).rev() {
                let mut live = live_out(graph, &live_in, idx);
                for event in events[idx].iter().rev() {
                    match *event {
                        Event::Def(pair) => {
                            live.remove(&pair);
                        }
                        Event::Use(pair) => {
                            live.insert(pair);
                        }
                    }
                }
                if live != live_in[idx] {
                    live_in[idx] = live;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        trace!("liveness settled after {passes} passes");

        let mut entry_by_node: HashMap<NodeIdx, Vec<VarVersionPair>> = HashMap::new();
        for &(idx, pair) in entry_defs {
            entry_by_node.entry(idx).or_default().push(pair);
        }

        let mut result = Interference::default();
        for idx in 0..graph.len() {
            let mut live = live_out(graph, &live_in, idx);
            for event in events[idx].iter().rev() {
                match *event {
                    Event::Def(pair) => {
                        result.add_conflicts(pair, &live);
                        live.remove(&pair);
                    }
                    Event::Use(pair) => {
                        live.insert(pair);
                    }
                }
            }
            for &pair in entry_by_node.get(&idx).map_or(&[][..], Vec::as_slice) {
                result.add_conflicts(pair, &live);
            }
        }
        result
    }

    /// Returns `true` if `a` and `b` are live at the same time.
    pub(crate) fn interferes(&self, a: VarVersionPair, b: VarVersionPair) -> bool {
        self.pairs.contains(&ordered(a, b))
    }

    fn add_conflicts(&mut self, def: VarVersionPair, live: &HashSet<VarVersionPair>) {
        for &other in live {
            if other.var == def.var && other != def {
                self.pairs.insert(ordered(def, other));
            }
        }
    }
}

fn ordered(a: VarVersionPair, b: VarVersionPair) -> (VarVersionPair, VarVersionPair) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn live_out(graph: &DirectGraph, live_in: &[HashSet<VarVersionPair>], idx: NodeIdx) -> HashSet<VarVersionPair> {
    let mut out = HashSet::new();
    if let Some(node) = graph.node(idx) {
        for &succ in node.succs() {
            out.extend(live_in[succ].iter().copied());
        }
    }
    out
}

/// Uses and definitions of `expr` in evaluation order.
fn collect_events(expr: &Expr, out: &mut Vec<Event>) {
    match &expr.kind {
        ExprKind::Assignment(a) => {
            if let Some(var) = a.left.as_var() {
                collect_events(&a.right, out);
                if a.op.is_some() {
                    out.push(Event::Use(var.pair()));
                }
                out.push(Event::Def(var.pair()));
                return;
            }
        }
        ExprKind::Function(f) if f.func.is_increment() => {
            if let [operand] = f.operands.as_slice() {
                if let Some(var) = operand.as_var() {
                    out.push(Event::Use(var.pair()));
                    out.push(Event::Def(var.pair()));
                    return;
                }
            }
        }
        _ => {}
    }

    for child in expr.children() {
        collect_events(child, out);
    }
    if let Some(var) = expr.as_var() {
        out.push(Event::Use(var.pair()));
    }
}
