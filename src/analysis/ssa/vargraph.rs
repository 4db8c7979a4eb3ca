//! Version graph of the live (SSU) variant.
//!
//! Nodes are variable versions. A `General` edge runs from a definition to a
//! version splitting off it (a use, or a temporary feeding a phi version); a
//! `Phantom` edge runs from a version leaving a finally handler to the phantom
//! version standing for it at the handler's exit.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use bitflags::bitflags;
use strum::Display;

use crate::{
    analysis::ssa::sfmap::SFormsFastMapDirect,
    structure::VarVersionPair,
    utils::graph::{algorithms::DominatorTree, IndexedGraph},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    /// Marks on a [`VarVersionNode`]
    pub struct VersionFlags: u8 {
        /// Phantom version of a value leaving a finally handler
        const PHANTOM_FINALLY_EXIT = 0x02;
    }
}

/// Kind of a [`VarVersionEdge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum VersionEdgeKind {
    /// Definition to use, or temporary to phi
    General,
    /// Finally exit to its phantom version
    Phantom,
}

/// Directed edge between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarVersionEdge {
    /// Edge kind
    pub kind: VersionEdgeKind,
    /// Origin version
    pub source: VarVersionPair,
    /// Target version
    pub dest: VarVersionPair,
}

/// One version.
#[derive(Debug, Clone)]
pub struct VarVersionNode {
    /// Variable and version
    pub pair: VarVersionPair,
    /// Node marks
    pub flags: VersionFlags,
    /// Versions live at the point the version is used, recorded in the
    /// final pass
    pub live: SFormsFastMapDirect,
    succs: BTreeSet<VarVersionEdge>,
    preds: BTreeSet<VarVersionEdge>,
}

impl VarVersionNode {
    fn new(pair: VarVersionPair) -> Self {
        VarVersionNode {
            pair,
            flags: VersionFlags::empty(),
            live: SFormsFastMapDirect::new(),
            succs: BTreeSet::new(),
            preds: BTreeSet::new(),
        }
    }

    /// Outgoing edges.
    pub fn succs(&self) -> impl Iterator<Item = &VarVersionEdge> {
        self.succs.iter()
    }

    /// Incoming edges.
    pub fn preds(&self) -> impl Iterator<Item = &VarVersionEdge> {
        self.preds.iter()
    }

    /// Number of incoming edges.
    #[must_use]
    pub fn pred_count(&self) -> usize {
        self.preds.len()
    }

    /// Source of the first incoming edge.
    #[must_use]
    pub fn first_pred(&self) -> Option<VarVersionPair> {
        self.preds.iter().next().map(|e| e.source)
    }
}

/// Graph of versions with lazily computed dominance.
///
/// Dominance is computed over a virtual root with an edge to every version
/// without predecessors, so definitions of different variables do not
/// dominate each other.
#[derive(Debug, Clone, Default)]
pub struct VarVersionsGraph {
    nodes: BTreeMap<VarVersionPair, VarVersionNode>,
    dominance: Option<(IndexedGraph<Option<VarVersionPair>>, DominatorTree)>,
}

impl VarVersionsGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The node of `pair`, created if missing.
    pub fn create_node(&mut self, pair: VarVersionPair) -> &mut VarVersionNode {
        self.dominance = None;
        self.nodes.entry(pair).or_insert_with(|| VarVersionNode::new(pair))
    }

    /// Node of `pair`.
    #[must_use]
    pub fn node(&self, pair: VarVersionPair) -> Option<&VarVersionNode> {
        self.nodes.get(&pair)
    }

    /// Mutable node of `pair`.
    pub fn node_mut(&mut self, pair: VarVersionPair) -> Option<&mut VarVersionNode> {
        self.nodes.get_mut(&pair)
    }

    /// Returns `true` if `pair` has a node.
    #[must_use]
    pub fn contains(&self, pair: VarVersionPair) -> bool {
        self.nodes.contains_key(&pair)
    }

    /// All nodes, ordered by variable and version.
    pub fn nodes(&self) -> impl Iterator<Item = &VarVersionNode> {
        self.nodes.values()
    }

    /// Number of versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no versions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Links `source` to `dest`, creating missing nodes.
    pub fn add_edge(&mut self, kind: VersionEdgeKind, source: VarVersionPair, dest: VarVersionPair) {
        let edge = VarVersionEdge { kind, source, dest };
        self.create_node(source).succs.insert(edge);
        self.create_node(dest).preds.insert(edge);
    }

    /// Unlinks `edge` from both endpoints.
    pub fn remove_edge(&mut self, edge: &VarVersionEdge) {
        self.dominance = None;
        if let Some(source) = self.nodes.get_mut(&edge.source) {
            source.succs.remove(edge);
        }
        if let Some(dest) = self.nodes.get_mut(&edge.dest) {
            dest.preds.remove(edge);
        }
    }

    /// Versions without predecessors.
    #[must_use]
    pub fn roots(&self) -> Vec<VarVersionPair> {
        self.nodes
            .values()
            .filter(|n| n.preds.is_empty())
            .map(|n| n.pair)
            .collect()
    }

    /// Computes dominance over the current edges.
    pub fn init_dominators(&mut self) {
        let mut graph = IndexedGraph::new();
        graph.add_node(None);
        for root in self.roots() {
            graph.add_edge(None, Some(root));
        }
        for node in self.nodes.values() {
            graph.add_node(Some(node.pair));
            for edge in &node.succs {
                graph.add_edge(Some(edge.source), Some(edge.dest));
            }
        }
        self.dominance = graph.dominators_from(&None).map(|tree| (graph, tree));
    }

    /// Returns `true` if `dom` dominates `node`. Both must be known and
    /// [`VarVersionsGraph::init_dominators`] must have run since the last
    /// change; otherwise the answer is `false`.
    #[must_use]
    pub fn is_dominator(&self, node: VarVersionPair, dom: VarVersionPair) -> bool {
        let Some((graph, tree)) = &self.dominance else {
            return false;
        };
        match (graph.get_node_id(&Some(dom)), graph.get_node_id(&Some(node))) {
            (Some(d), Some(n)) => tree.dominates(d, n),
            _ => false,
        }
    }

    /// Returns `true` if every path from a root to `node` passes through a
    /// member of `doms`.
    #[must_use]
    pub fn is_dominator_set(&self, node: VarVersionPair, doms: &HashSet<VarVersionPair>) -> bool {
        if doms.len() == 1 {
            return doms.iter().next().is_some_and(|&dom| self.is_dominator(node, dom));
        }
        if doms.contains(&node) {
            return true;
        }

        let mut marked = HashSet::new();
        let mut queue = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            if !marked.insert(current) {
                continue;
            }
            let Some(n) = self.nodes.get(&current) else {
                return false;
            };
            if n.preds.is_empty() {
                return false;
            }
            for edge in &n.preds {
                if !marked.contains(&edge.source) && !doms.contains(&edge.source) {
                    queue.push_back(edge.source);
                }
            }
        }
        true
    }
}
