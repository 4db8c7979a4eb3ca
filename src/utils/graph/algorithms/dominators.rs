//! Dominator tree computation using the Lengauer-Tarjan algorithm.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n`
//! must pass through `d`. The **immediate dominator** of `n` (idom(n)) is the
//! unique node that strictly dominates `n` but does not strictly dominate any
//! other dominator of `n`.
//!
//! The dominator tree is used in two places: deciding which blocks a `jsr`
//! subroutine owns during inlining, and answering dominance queries over the
//! variable version graph built by the live SSA constructor.
//!
//! # Algorithm
//!
//! Lengauer-Tarjan with path compression, O(V α(V)). The DFS numbering and the
//! path compression both use explicit stacks. Nodes unreachable from the entry
//! get no immediate dominator and are dominated by nothing but themselves.

use crate::utils::graph::{NodeId, Successors};

const UNDEF: usize = usize::MAX;

/// Result of dominator tree computation.
///
/// # Examples
///
/// ```rust,ignore
/// use classflow::utils::graph::{IndexedGraph, algorithms::compute_dominators};
///
/// let mut graph: IndexedGraph<&str> = IndexedGraph::new();
/// graph.add_edge("entry", "a");
/// graph.add_edge("a", "b");
///
/// let entry = graph.get_node_id(&"entry").unwrap();
/// let tree = compute_dominators(&graph, entry);
/// let a = graph.get_node_id(&"a").unwrap();
/// let b = graph.get_node_id(&"b").unwrap();
/// assert_eq!(tree.immediate_dominator(b), Some(a));
/// ```
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// The entry (root) node of the dominator tree
    entry: NodeId,
    /// Immediate dominator for each node; `None` for the entry and for unreachable nodes
    idom: Vec<Option<NodeId>>,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of a node, or `None` for the entry node
    /// and for nodes that are not reachable from it.
    #[inline]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(node.index()).copied().flatten()
    }

    /// Returns `true` if `node` was reached from the entry.
    pub fn is_reachable(&self, node: NodeId) -> bool {
        node == self.entry || self.immediate_dominator(node).is_some()
    }

    /// Checks if node `a` dominates node `b`.
    ///
    /// A node dominates itself. An unreachable `b` is dominated only by itself.
    ///
    /// # Complexity
    ///
    /// O(depth) where depth is the depth of `b` in the dominator tree.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        let mut current = b;
        while let Some(idom) = self.immediate_dominator(current) {
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[inline]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns the number of nodes covered by the tree.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Computes the dominator tree for the nodes reachable from `entry`.
///
/// # Arguments
///
/// * `graph` - The graph to analyze
/// * `entry` - Root of the dominator tree
///
/// # Algorithm Overview
///
/// 1. **DFS numbering**: Assign DFS numbers to nodes and compute the DFS tree
/// 2. **Semidominators**: Compute semidominators using the Semidominator Theorem
/// 3. **Implicit idom**: Compute implicit immediate dominators
/// 4. **Explicit idom**: Convert implicit to explicit immediate dominators
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors,
{
    let node_count = graph.node_count();
    if node_count == 0 || entry.index() >= node_count {
        return DominatorTree {
            entry,
            idom: vec![None; node_count],
        };
    }

    let mut lt = LengauerTarjan::new(graph, entry.index());
    lt.compute();

    let idom = lt
        .idom
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            if i == entry.index() || d == UNDEF || lt.dfnum[i] == 0 {
                None
            } else {
                Some(NodeId::new(d))
            }
        })
        .collect();

    DominatorTree { entry, idom }
}

/// Internal state for the Lengauer-Tarjan algorithm.
struct LengauerTarjan {
    /// Entry node
    entry: usize,
    /// Forward edges
    succs: Vec<Vec<usize>>,
    /// Reverse edges
    preds: Vec<Vec<usize>>,
    /// DFS number for each node (0 = not visited)
    dfnum: Vec<usize>,
    /// Node with each DFS number minus one
    vertex: Vec<usize>,
    /// Parent in DFS tree
    parent: Vec<usize>,
    /// Semidominator, stored as node index
    semi: Vec<usize>,
    /// Immediate dominator (final result)
    idom: Vec<usize>,
    /// Ancestor in the forest for link-eval
    ancestor: Vec<usize>,
    /// Best node on path to ancestor (for path compression)
    best: Vec<usize>,
    /// Nodes whose semidominator is this node
    bucket: Vec<Vec<usize>>,
}

impl LengauerTarjan {
    fn new<G: Successors>(graph: &G, entry: usize) -> Self {
        let n = graph.node_count();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for (v, list) in succs.iter_mut().enumerate() {
            for s in graph.successors(NodeId::new(v)) {
                list.push(s.index());
                preds[s.index()].push(v);
            }
        }
        Self {
            entry,
            succs,
            preds,
            dfnum: vec![0; n],
            vertex: Vec::with_capacity(n),
            parent: vec![UNDEF; n],
            semi: (0..n).collect(),
            idom: vec![UNDEF; n],
            ancestor: vec![UNDEF; n],
            best: (0..n).collect(),
            bucket: vec![Vec::new(); n],
        }
    }

    fn compute(&mut self) {
        self.dfs();

        for i in (1..self.vertex.len()).rev() {
            let w = self.vertex[i];
            let parent_w = self.parent[w];

            let preds = std::mem::take(&mut self.preds[w]);
            for &v in &preds {
                if self.dfnum[v] == 0 {
                    // unreachable from entry
                    continue;
                }
                let u = self.eval(v);
                if self.dfnum[self.semi[u]] < self.dfnum[self.semi[w]] {
                    self.semi[w] = self.semi[u];
                }
            }
            self.preds[w] = preds;

            let semi_w = self.semi[w];
            self.bucket[semi_w].push(w);
            self.ancestor[w] = parent_w;

            let bucket = std::mem::take(&mut self.bucket[parent_w]);
            for v in bucket {
                let u = self.eval(v);
                self.idom[v] = if self.semi[u] == self.semi[v] {
                    parent_w
                } else {
                    u
                };
            }
        }

        for i in 1..self.vertex.len() {
            let w = self.vertex[i];
            if self.idom[w] != self.semi[w] {
                self.idom[w] = self.idom[self.idom[w]];
            }
        }

        self.idom[self.entry] = self.entry;
    }

    /// Preorder numbering with an explicit stack; the parent is fixed when a
    /// node is first numbered, not when it is pushed.
    fn dfs(&mut self) {
        let mut stack = vec![(self.entry, UNDEF)];
        while let Some((node, parent)) = stack.pop() {
            if self.dfnum[node] != 0 {
                continue;
            }
            self.vertex.push(node);
            self.dfnum[node] = self.vertex.len();
            self.parent[node] = parent;
            for &succ in self.succs[node].iter().rev() {
                if self.dfnum[succ] == 0 {
                    stack.push((succ, node));
                }
            }
        }
    }

    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v] == UNDEF {
            return v;
        }
        self.compress(v);
        self.best[v]
    }

    fn compress(&mut self, v: usize) {
        let mut path = Vec::new();
        let mut current = v;
        while self.ancestor[current] != UNDEF && self.ancestor[self.ancestor[current]] != UNDEF {
            path.push(current);
            current = self.ancestor[current];
        }

        // Topmost node first, matching the order of the recursive formulation.
        for &x in path.iter().rev() {
            let anc = self.ancestor[x];
            let best_anc = self.best[anc];
            if self.dfnum[self.semi[best_anc]] < self.dfnum[self.semi[self.best[x]]] {
                self.best[x] = best_anc;
            }
            self.ancestor[x] = self.ancestor[anc];
        }
    }
}
