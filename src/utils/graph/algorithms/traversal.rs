//! Postorder and reverse postorder traversals.

use crate::utils::graph::{NodeId, Successors};

/// Computes the postorder traversal of nodes reachable from `start`.
///
/// Children are visited in successor order, so the result is deterministic for
/// a given insertion order.
///
/// # Arguments
///
/// * `graph` - The graph to traverse
/// * `start` - The starting node for traversal
///
/// # Returns
///
/// A vector of `NodeId` in postorder. Empty if `start` is out of range.
///
/// # Examples
///
/// ```rust,ignore
/// use classflow::utils::graph::{IndexedGraph, algorithms::postorder};
///
/// let mut graph: IndexedGraph<&str> = IndexedGraph::new();
/// graph.add_edge("A", "B");
/// graph.add_edge("B", "C");
///
/// let order = postorder(&graph, graph.get_node_id(&"A").unwrap());
/// assert_eq!(graph.map_nodes_to_keys(&order), vec!["C", "B", "A"]);
/// ```
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    // Each frame keeps the successor list and the position of the next child,
    // so siblings are only examined after the previous child's subtree closed.
    struct Frame {
        node: NodeId,
        succs: Vec<NodeId>,
        next: usize,
    }

    visited[start.index()] = true;
    let mut stack = vec![Frame {
        node: start,
        succs: graph.successors(start).collect(),
        next: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        if frame.next < frame.succs.len() {
            let succ = frame.succs[frame.next];
            frame.next += 1;
            if !visited[succ.index()] {
                visited[succ.index()] = true;
                stack.push(Frame {
                    node: succ,
                    succs: graph.successors(succ).collect(),
                    next: 0,
                });
            }
        } else {
            result.push(frame.node);
            stack.pop();
        }
    }

    result
}

/// Computes the reverse postorder traversal of nodes reachable from `start`.
///
/// Reverse postorder (RPO) places a node before any of its successors in a DAG,
/// which is the preferred iteration order for forward data flow analysis.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}
