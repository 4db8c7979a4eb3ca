//! Statement tree to [`DirectGraph`] conversion.
//!
//! The walk uses an explicit work stack of [`Pending`] entries. Compound
//! statements are revisited after each child, and an entry whose outgoing
//! edges are being routed through a `finally` handler is parked with a resume
//! point while the handler is flattened for that exit.

use std::collections::{hash_map::Entry, HashMap};

use log::debug;

use crate::{
    analysis::flatten::graph::{DirectGraph, DirectNode, DirectNodeKind, FinallyPathWrapper, NodeIdx},
    structure::{EdgeKind, ExprSlot, IfType, LoopType, StatEdge, StatId, StatementKind, StatementTree},
    utils::graph::IndexedGraph,
    Error, Result,
};

/// Flattens `tree` into a [`DirectGraph`].
///
/// # Errors
///
/// Returns [`Error::GraphError`] if an edge targets a statement that produced
/// no node, and [`crate::Error::Malformed`] for containers without children.
pub fn flatten(tree: &StatementTree) -> Result<DirectGraph> {
    let mut flattener = Flattener::new(tree);
    flattener.run()?;
    let graph = flattener.finish()?;
    debug!(
        "flattened {} statements into {} nodes ({} finally exits)",
        tree.len(),
        graph.len(),
        graph.short_range_finally_paths.len()
    );
    Ok(graph)
}

/// Open `finally` around the statement being flattened.
#[derive(Debug, Clone)]
enum FinallyContext {
    /// Inside the protected body of `catch_all`
    Protected { catch_all: StatId },
    /// Inside the handler, which continues to `destination` when it completes
    Handler(HandlerContext),
}

#[derive(Debug, Clone)]
struct HandlerContext {
    catch_all: StatId,
    edge_kind: EdgeKind,
    destination: StatId,
    short_entry: StatId,
    long_entry: StatId,
    short_source: String,
    long_source: String,
    exception_path: bool,
}

/// Where the path currently being routed came from.
#[derive(Debug, Clone)]
struct PathState {
    short_source: String,
    long_source: String,
    short_entry: Option<StatId>,
    long_entry: Option<StatId>,
    monitor_exception: bool,
    finally_exit: bool,
}

#[derive(Debug)]
struct Resume {
    source: String,
    edges: Vec<StatEdge>,
    edge_index: usize,
}

#[derive(Debug)]
struct Pending {
    statement: StatId,
    finally_stack: Vec<FinallyContext>,
    tail: Option<ExprSlot>,
    child_index: usize,
    resume: Option<Resume>,
}

impl Pending {
    fn new(statement: StatId, finally_stack: Vec<FinallyContext>, tail: Option<ExprSlot>) -> Self {
        Pending {
            statement,
            finally_stack,
            tail,
            child_index: 0,
            resume: None,
        }
    }
}

/// Edge destination before node resolution. `Aux` is the tail node of a
/// basic statement or the condition node of a `for` loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Dest {
    Stat(StatId),
    Aux(StatId),
}

#[derive(Debug)]
struct PendingEdge {
    source: String,
    dest: Dest,
    kind: EdgeKind,
}

#[derive(Debug)]
struct PathRecord {
    source: String,
    destination: StatId,
    entry: StatId,
    monitor_exception: bool,
    continue_edge: bool,
}

struct Flattener<'a> {
    tree: &'a StatementTree,
    nodes: HashMap<String, DirectNode>,
    destinations: HashMap<Dest, (String, Option<String>)>,
    edges: Vec<PendingEdge>,
    pos_if_branch: HashMap<String, StatId>,
    short_paths: HashMap<String, Vec<PathRecord>>,
    long_paths: HashMap<String, Vec<PathRecord>>,
}

impl<'a> Flattener<'a> {
    fn new(tree: &'a StatementTree) -> Self {
        Flattener {
            tree,
            nodes: HashMap::new(),
            destinations: HashMap::new(),
            edges: Vec::new(),
            pos_if_branch: HashMap::new(),
            short_paths: HashMap::new(),
            long_paths: HashMap::new(),
        }
    }

    fn add_node(&mut self, id: &str, kind: DirectNodeKind, statement: StatId, slot: Option<ExprSlot>) {
        if let Entry::Vacant(e) = self.nodes.entry(id.to_string()) {
            e.insert(DirectNode::new(id.to_string(), kind, statement, slot));
        }
    }

    fn add_edge(&mut self, source: &str, dest: Dest, kind: EdgeKind) {
        self.edges.push(PendingEdge {
            source: source.to_string(),
            dest,
            kind,
        });
    }

    fn entry_node(&self, stat: StatId) -> Result<String> {
        self.destinations
            .get(&Dest::Stat(stat))
            .map(|(first, _)| first.clone())
            .ok_or_else(|| Error::GraphError(format!("Statement {stat} produced no node")))
    }

    fn has_continue_to(&self, stat: StatId) -> bool {
        self.edges
            .iter()
            .any(|e| e.dest == Dest::Stat(stat) && e.kind == EdgeKind::Continue)
    }

    fn run(&mut self) -> Result<()> {
        let tree = self.tree;
        let mut stack = vec![Pending::new(tree.root(), Vec::new(), None)];

        'main: while let Some(mut entry) = stack.pop() {
            let stat = tree.stat(entry.statement)?;
            let mut succ_edges: Vec<StatEdge> = Vec::new();
            let mut source: Option<String> = None;
            let mut edge_start = 0;

            if let Some(resume) = entry.resume.take() {
                source = Some(resume.source);
                succ_edges = resume.edges;
                edge_start = resume.edge_index;
            } else {
                match &stat.kind {
                    StatementKind::Basic { ends_with_if, .. } => {
                        let id = stat.id.to_string();
                        self.add_node(&id, DirectNodeKind::Direct, stat.id, Some(ExprSlot::Basic(stat.id)));
                        self.destinations.insert(Dest::Stat(stat.id), (id.clone(), None));
                        succ_edges.extend(stat.direct_successors().cloned());

                        let mut src = id.clone();
                        if let Some(tail) = entry.tail {
                            let tail_id = format!("{id}_tail");
                            self.add_node(&tail_id, DirectNodeKind::Tail, stat.id, Some(tail));
                            self.destinations.insert(Dest::Aux(stat.id), (tail_id.clone(), None));
                            self.add_edge(&id, Dest::Aux(stat.id), EdgeKind::Regular);
                            src = tail_id;
                        }
                        if *ends_with_if {
                            if let Some(positive) = succ_edges.first() {
                                self.pos_if_branch.insert(src.clone(), positive.destination);
                            }
                        }
                        source = Some(src);
                    }
                    StatementKind::TryCatch { .. } | StatementKind::CatchAll { .. } => {
                        let try_id = format!("{}_try", stat.id);
                        self.add_node(&try_id, DirectNodeKind::Try, stat.id, None);
                        self.destinations.insert(Dest::Stat(stat.id), (try_id.clone(), None));

                        let mut children = Vec::with_capacity(stat.children.len());
                        for (i, &child) in stat.children.iter().enumerate() {
                            self.add_edge(&try_id, Dest::Stat(child), EdgeKind::Regular);
                            let mut finally_stack = entry.finally_stack.clone();
                            if stat.is_finally() {
                                if i == 0 {
                                    finally_stack.push(FinallyContext::Protected { catch_all: stat.id });
                                } else {
                                    finally_stack.push(FinallyContext::Handler(HandlerContext {
                                        catch_all: stat.id,
                                        edge_kind: EdgeKind::Break,
                                        destination: tree.dummy_exit(),
                                        short_entry: child,
                                        long_entry: child,
                                        short_source: try_id.clone(),
                                        long_source: try_id.clone(),
                                        exception_path: true,
                                    }));
                                }
                            }
                            children.push(Pending::new(child, finally_stack, None));
                        }
                        stack.extend(children.into_iter().rev());
                    }
                    StatementKind::Do { loop_type, .. } => {
                        let body = stat
                            .first()
                            .ok_or_else(|| malformed_error!("Loop {} has no body", stat.id))?;
                        if entry.child_index == 0 {
                            entry.child_index = 1;
                            let child = Pending::new(body, entry.finally_stack.clone(), None);
                            stack.push(entry);
                            stack.push(child);
                            continue 'main;
                        }
                        let body_node = self.entry_node(body)?;
                        let id = stat.id;

                        if *loop_type != LoopType::Do {
                            succ_edges.extend(stat.direct_successors().next().cloned());
                        }
                        match loop_type {
                            LoopType::Do => {
                                self.destinations
                                    .insert(Dest::Stat(id), (body_node.clone(), Some(body_node)));
                            }
                            LoopType::While | LoopType::DoWhile => {
                                let cond = format!("{id}_cond");
                                self.add_node(&cond, DirectNodeKind::Condition, id, Some(ExprSlot::DoCondition(id)));
                                self.add_edge(&cond, Dest::Stat(body), EdgeKind::Regular);
                                if *loop_type == LoopType::While {
                                    self.destinations.insert(Dest::Stat(id), (cond.clone(), Some(cond.clone())));
                                } else {
                                    self.destinations
                                        .insert(Dest::Stat(id), (body_node.clone(), Some(cond.clone())));
                                    if !self.has_continue_to(id) {
                                        self.add_edge(&body_node, Dest::Stat(id), EdgeKind::Continue);
                                    }
                                }
                                source = Some(cond);
                            }
                            LoopType::For => {
                                let init = format!("{id}_init");
                                let cond = format!("{id}_cond");
                                let inc = format!("{id}_inc");
                                self.add_node(&init, DirectNodeKind::Init, id, Some(ExprSlot::DoInit(id)));
                                self.add_node(&cond, DirectNodeKind::Condition, id, Some(ExprSlot::DoCondition(id)));
                                self.add_node(&inc, DirectNodeKind::Increment, id, Some(ExprSlot::DoIncrement(id)));
                                self.destinations
                                    .insert(Dest::Stat(id), (init.clone(), Some(inc.clone())));
                                self.destinations.insert(Dest::Aux(id), (cond.clone(), None));
                                self.add_edge(&cond, Dest::Stat(body), EdgeKind::Regular);
                                self.add_edge(&init, Dest::Aux(id), EdgeKind::Regular);
                                self.add_edge(&inc, Dest::Aux(id), EdgeKind::Regular);
                                if !self.has_continue_to(id) {
                                    self.add_edge(&body_node, Dest::Stat(id), EdgeKind::Continue);
                                }
                                source = Some(cond);
                            }
                        }
                    }
                    StatementKind::Sequence
                    | StatementKind::If { .. }
                    | StatementKind::Switch { .. }
                    | StatementKind::Synchronized { .. }
                    | StatementKind::Root => {
                        let tail = match stat.kind {
                            StatementKind::If { .. }
                            | StatementKind::Switch { .. }
                            | StatementKind::Synchronized { .. } => Some(ExprSlot::Head(stat.id)),
                            _ => None,
                        };
                        let count = match stat.kind {
                            StatementKind::Synchronized { .. } => stat.children.len().min(2),
                            _ => stat.children.len(),
                        };
                        if entry.child_index < count {
                            let i = entry.child_index;
                            entry.child_index += 1;
                            let child = Pending::new(
                                stat.children[i],
                                entry.finally_stack.clone(),
                                if i == 0 { tail } else { None },
                            );
                            stack.push(entry);
                            stack.push(child);
                            continue 'main;
                        }

                        let first = stat
                            .first()
                            .ok_or_else(|| malformed_error!("{} {} has no children", stat.kind.name(), stat.id))?;
                        let node = self.entry_node(first)?;
                        self.destinations.insert(Dest::Stat(stat.id), (node.clone(), None));

                        if let StatementKind::If { if_type: IfType::If, .. } = stat.kind {
                            if let Some(negative) = stat.direct_successors().next() {
                                succ_edges.push(negative.clone());
                                source = Some(if tail.is_some() { format!("{node}_tail") } else { node });
                            }
                        }
                    }
                    StatementKind::DummyExit => {}
                }
            }

            let Some(source) = source else {
                continue;
            };

            for edge_index in edge_start..succ_edges.len() {
                let mut kind = succ_edges[edge_index].kind;
                let mut destination = succ_edges[edge_index].destination;
                let mut finally_stack = entry.finally_stack.clone();
                let mut path = PathState {
                    short_source: source.clone(),
                    long_source: source.clone(),
                    short_entry: None,
                    long_entry: None,
                    monitor_exception: false,
                    finally_exit: false,
                };

                loop {
                    match finally_stack.last().cloned() {
                        None => {
                            self.save_edge(&source, destination, kind, &path);
                            break;
                        }
                        Some(FinallyContext::Handler(ctx)) => {
                            if kind == EdgeKind::FinallyExit {
                                finally_stack.pop();
                                destination = ctx.destination;
                                kind = ctx.edge_kind;
                                path = PathState {
                                    short_source: ctx.short_source,
                                    long_source: ctx.long_source,
                                    short_entry: Some(ctx.short_entry),
                                    long_entry: Some(ctx.long_entry),
                                    monitor_exception: ctx.exception_path && tree.stat(ctx.catch_all)?.has_monitor(),
                                    finally_exit: true,
                                };
                            } else if !tree.contains_strict(ctx.catch_all, destination) {
                                finally_stack.pop();
                            } else {
                                self.save_edge(&source, destination, kind, &path);
                                break;
                            }
                        }
                        Some(FinallyContext::Protected { catch_all }) => {
                            if tree.contains_strict(catch_all, destination) {
                                self.save_edge(&source, destination, kind, &path);
                                break;
                            }
                            let handler = tree
                                .stat(catch_all)?
                                .children
                                .get(1)
                                .copied()
                                .ok_or_else(|| malformed_error!("Catch-all {} has no handler", catch_all))?;
                            self.save_edge(&source, handler, EdgeKind::Regular, &path);

                            finally_stack.pop();
                            finally_stack.push(FinallyContext::Handler(HandlerContext {
                                catch_all,
                                edge_kind: kind,
                                destination,
                                short_entry: handler,
                                long_entry: path.long_entry.unwrap_or(handler),
                                short_source: source.clone(),
                                long_source: path.long_source.clone(),
                                exception_path: false,
                            }));

                            entry.resume = Some(Resume {
                                source: source.clone(),
                                edges: succ_edges,
                                edge_index: edge_index + 1,
                            });
                            stack.push(entry);
                            stack.push(Pending::new(handler, finally_stack, None));
                            continue 'main;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn save_edge(&mut self, source: &str, destination: StatId, kind: EdgeKind, path: &PathState) {
        if kind != EdgeKind::FinallyExit {
            self.add_edge(source, Dest::Stat(destination), kind);
        }
        if !path.finally_exit {
            return;
        }
        let (Some(short_entry), Some(long_entry)) = (path.short_entry, path.long_entry) else {
            return;
        };
        let continue_edge = kind == EdgeKind::Continue;
        self.short_paths
            .entry(source.to_string())
            .or_default()
            .push(PathRecord {
                source: path.short_source.clone(),
                destination,
                entry: short_entry,
                monitor_exception: path.monitor_exception,
                continue_edge,
            });
        self.long_paths
            .entry(source.to_string())
            .or_default()
            .push(PathRecord {
                source: path.long_source.clone(),
                destination,
                entry: long_entry,
                monitor_exception: false,
                continue_edge,
            });
    }

    fn resolve(&self, dest: Dest, continue_edge: bool) -> Result<&str> {
        let (first, second) = self
            .destinations
            .get(&dest)
            .ok_or_else(|| Error::GraphError(format!("Edge to {dest:?} which produced no node")))?;
        if continue_edge {
            second
                .as_deref()
                .ok_or_else(|| Error::GraphError(format!("Continue edge to {dest:?} which is not a loop")))
        } else {
            Ok(first)
        }
    }

    fn finish(mut self) -> Result<DirectGraph> {
        let tree = self.tree;
        let exit = tree.dummy_exit();
        let exit_id = exit.to_string();
        self.add_node(&exit_id, DirectNodeKind::Direct, exit, None);
        self.destinations.insert(Dest::Stat(exit), (exit_id, None));

        let first = self.entry_node(tree.root())?;

        let mut succs: HashMap<String, Vec<String>> = HashMap::new();
        let mut neg_if: Vec<(String, String)> = Vec::new();
        for edge in &self.edges {
            let dest = self.resolve(edge.dest, edge.kind == EdgeKind::Continue)?.to_string();
            let list = succs.entry(edge.source.clone()).or_default();
            if !list.contains(&dest) {
                list.push(dest.clone());
            }
            if let Some(&positive) = self.pos_if_branch.get(&edge.source) {
                if edge.dest != Dest::Stat(positive) {
                    neg_if.push((edge.source.clone(), dest));
                }
            }
        }

        let mut short: Vec<(String, Vec<(String, String, String)>)> = Vec::new();
        let mut long: Vec<(String, Vec<(String, String, String)>)> = Vec::new();
        let mut monitor_exits: Vec<(String, String)> = Vec::new();
        for (records, out, is_short) in [(&self.short_paths, &mut short, true), (&self.long_paths, &mut long, false)] {
            for (key, list) in records {
                let mut wrappers = Vec::with_capacity(list.len());
                for record in list {
                    let dest = self.resolve(Dest::Stat(record.destination), record.continue_edge)?;
                    let entry = self.resolve(Dest::Stat(record.entry), false)?;
                    wrappers.push((record.source.clone(), dest.to_string(), entry.to_string()));
                    if is_short && record.monitor_exception {
                        monitor_exits.push((key.clone(), dest.to_string()));
                    }
                }
                out.push((key.clone(), wrappers));
            }
        }

        // reverse post order over the node names
        let mut order_graph: IndexedGraph<String> = IndexedGraph::new();
        order_graph.add_node(first.clone());
        for edge in &self.edges {
            if let Some(dests) = succs.get(&edge.source) {
                for dest in dests {
                    order_graph.add_edge(edge.source.clone(), dest.clone());
                }
            }
        }
        let order = order_graph.reverse_postorder_from(&first);

        let mut graph = DirectGraph::default();
        for (idx, name) in order.iter().enumerate() {
            graph.index.insert(name.clone(), idx);
        }
        for name in &order {
            let Some(node) = self.nodes.remove(name) else {
                return Err(Error::GraphError(format!("Edge names unknown node {name}")));
            };
            graph.nodes.push(node);
        }
        for (source, dests) in &succs {
            let Some(&from) = graph.index.get(source) else {
                continue;
            };
            for dest in dests {
                if let Some(&to) = graph.index.get(dest) {
                    graph.nodes[from].succs.push(to);
                    graph.nodes[to].preds.push(from);
                }
            }
        }

        let lookup = |name: &str| graph.index.get(name).copied();
        let mut neg_if_branch = HashMap::new();
        for (source, dest) in neg_if {
            if let (Some(s), Some(d)) = (lookup(&source), lookup(&dest)) {
                neg_if_branch.insert(s, d);
            }
        }
        let mut finally_monitor_exception_exits = HashMap::new();
        for (source, dest) in monitor_exits {
            if let (Some(s), Some(d)) = (lookup(&source), lookup(&dest)) {
                finally_monitor_exception_exits.insert(s, d);
            }
        }
        let to_paths = |entries: Vec<(String, Vec<(String, String, String)>)>| {
            let mut map: HashMap<NodeIdx, Vec<FinallyPathWrapper>> = HashMap::new();
            for (key, wrappers) in entries {
                let Some(k) = lookup(&key) else {
                    continue;
                };
                let mut list: Vec<FinallyPathWrapper> = wrappers
                    .iter()
                    .filter_map(|(s, d, e)| {
                        Some(FinallyPathWrapper {
                            source: lookup(s)?,
                            destination: lookup(d)?,
                            entry: lookup(e)?,
                        })
                    })
                    .collect();
                list.sort_unstable();
                list.dedup();
                if !list.is_empty() {
                    map.insert(k, list);
                }
            }
            map
        };
        let short_range_finally_paths = to_paths(short);
        let long_range_finally_paths = to_paths(long);

        let mut statement_nodes = HashMap::new();
        for (dest, (first_node, _)) in &self.destinations {
            if let (Dest::Stat(stat), Some(idx)) = (dest, lookup(first_node)) {
                statement_nodes.insert(*stat, idx);
            }
        }

        graph.neg_if_branch = neg_if_branch;
        graph.finally_monitor_exception_exits = finally_monitor_exception_exits;
        graph.short_range_finally_paths = short_range_finally_paths;
        graph.long_range_finally_paths = long_range_finally_paths;
        graph.statement_nodes = statement_nodes;
        Ok(graph)
    }
}
