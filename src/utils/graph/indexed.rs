//! Indexed graph wrapper for domain-keyed nodes.
//!
//! This module provides [`IndexedGraph`], which maps domain keys (block ids,
//! direct-node names, variable versions) to dense [`NodeId`] indices so the
//! generic algorithms can run over them, and maps results back.
//!
//! # Examples
//!
//! ```rust,ignore
//! use classflow::utils::graph::IndexedGraph;
//!
//! let mut graph: IndexedGraph<u32> = IndexedGraph::new();
//! graph.add_edge(1, 2);
//! graph.add_edge(2, 3);
//! graph.add_edge(1, 3);
//!
//! assert_eq!(graph.reverse_postorder_from(&1), vec![1, 2, 3]);
//! ```

use std::collections::HashMap;
use std::hash::Hash;

use crate::utils::graph::{
    algorithms::{self, DominatorTree},
    NodeId, Successors,
};

/// A graph that maps domain keys of type `K` to `NodeId`.
///
/// Nodes are created implicitly on first mention. Edges are unlabelled and
/// duplicate edges are ignored.
#[derive(Debug, Clone)]
pub struct IndexedGraph<K>
where
    K: Hash + Eq + Clone,
{
    /// Outgoing edges per node
    succs: Vec<Vec<NodeId>>,
    /// Map from domain key to `NodeId`
    key_to_node: HashMap<K, NodeId>,
    /// Map from `NodeId` to domain key
    node_to_key: Vec<K>,
}

impl<K> Default for IndexedGraph<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> IndexedGraph<K>
where
    K: Hash + Eq + Clone,
{
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            succs: Vec::new(),
            key_to_node: HashMap::new(),
            node_to_key: Vec::new(),
        }
    }

    /// Adds a node for `key`, or returns the existing one.
    pub fn add_node(&mut self, key: K) -> NodeId {
        if let Some(&id) = self.key_to_node.get(&key) {
            return id;
        }
        let id = NodeId::new(self.node_to_key.len());
        self.key_to_node.insert(key.clone(), id);
        self.node_to_key.push(key);
        self.succs.push(Vec::new());
        id
    }

    /// Adds an edge between two keys, creating missing nodes.
    ///
    /// Returns `false` if the edge already existed.
    pub fn add_edge(&mut self, from: K, to: K) -> bool {
        let from = self.add_node(from);
        let to = self.add_node(to);
        let list = &mut self.succs[from.index()];
        if list.contains(&to) {
            return false;
        }
        list.push(to);
        true
    }

    /// Returns the `NodeId` of a key, if present.
    pub fn get_node_id(&self, key: &K) -> Option<NodeId> {
        self.key_to_node.get(key).copied()
    }

    /// Returns the key of a `NodeId`, if valid.
    pub fn get_key(&self, node_id: NodeId) -> Option<&K> {
        self.node_to_key.get(node_id.index())
    }

    /// Returns `true` if no node was added.
    pub fn is_empty(&self) -> bool {
        self.node_to_key.is_empty()
    }

    /// Maps a node list back to domain keys.
    pub fn map_nodes_to_keys(&self, nodes: &[NodeId]) -> Vec<K> {
        nodes
            .iter()
            .filter_map(|&n| self.get_key(n).cloned())
            .collect()
    }

    /// Reverse postorder of the keys reachable from `start`.
    ///
    /// Returns an empty list when `start` is not part of the graph.
    pub fn reverse_postorder_from(&self, start: &K) -> Vec<K> {
        match self.get_node_id(start) {
            Some(entry) => self.map_nodes_to_keys(&algorithms::reverse_postorder(self, entry)),
            None => Vec::new(),
        }
    }

    /// Dominator tree rooted at `start`, or `None` when `start` is unknown.
    pub fn dominators_from(&self, start: &K) -> Option<DominatorTree> {
        self.get_node_id(start)
            .map(|entry| algorithms::compute_dominators(self, entry))
    }
}

impl<K> Successors for IndexedGraph<K>
where
    K: Hash + Eq + Clone,
{
    fn node_count(&self) -> usize {
        self.node_to_key.len()
    }

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.succs
            .get(node.index())
            .into_iter()
            .flat_map(|list| list.iter().copied())
    }
}
