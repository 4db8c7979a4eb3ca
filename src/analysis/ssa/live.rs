//! Live SSA (SSU) versioning.
//!
//! Unlike [`SsaConstructor`](super::SsaConstructor), every use of a variable
//! gets a version of its own, linked in the [`VarVersionsGraph`] to the
//! definition it reads. A use reached by several definitions becomes a phi
//! version fed by one temporary version per definition. Field reads are
//! tracked as negative pseudo variables so later passes can tell whether a
//! field value is still current.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, trace};

use crate::{
    analysis::{
        flatten::{flatten, DirectGraph, NodeIdx},
        ssa::{
            construct::{set_current, BranchMaps, VersionCounters},
            fastset::FastSparseSetFactory,
            sfmap::{SFormsFastMapDirect, VersionSet},
            vargraph::{VarVersionsGraph, VersionEdgeKind, VersionFlags},
        },
    },
    assembly::{MethodInfo, TypeCode},
    structure::{Expr, ExprId, ExprKind, FunctionExpr, FunctionType, StatId, StatementTree, VarExpr, VarVersionPair},
    Result,
};

/// Output of [`SsauConstructor::split_variables`].
#[derive(Debug, Clone)]
pub struct SsauResult {
    /// The graph the versions were computed over
    pub graph: DirectGraph,
    /// Definitions, uses, phi temporaries and phantom versions
    pub versions: VarVersionsGraph,
    /// Pseudo variable index of every field expression
    pub field_vars: BTreeMap<ExprId, i32>,
    /// Statement in which each version was created
    pub version_first_range: BTreeMap<VarVersionPair, StatId>,
    /// Phantom version standing for the value written by `++`/`--`
    pub phantom_pp: BTreeMap<VarVersionPair, VarVersionPair>,
    /// Per finally exit node: exit version to its phantom version
    pub phantom_exits: BTreeMap<NodeIdx, BTreeMap<VarVersionPair, VarVersionPair>>,
    /// Passes over the graph until the maps stopped changing, excluding the
    /// final recording pass
    pub passes: usize,
}

/// Live SSA constructor producing a [`VarVersionsGraph`].
///
/// # Examples
///
/// ```rust,ignore
/// use classflow::analysis::ssa::SsauConstructor;
///
/// let ssu = SsauConstructor::split_variables(&mut tree, &method)?;
/// for node in ssu.versions.nodes() {
///     println!("{} has {} defs", node.pair, node.pred_count());
/// }
/// ```
pub struct SsauConstructor {
    factory: FastSparseSetFactory<i32>,
    in_maps: HashMap<NodeIdx, SFormsFastMapDirect>,
    out_maps: HashMap<NodeIdx, SFormsFastMapDirect>,
    out_neg_maps: HashMap<NodeIdx, SFormsFastMapDirect>,
    extra_maps: HashMap<NodeIdx, SFormsFastMapDirect>,
    counters: VersionCounters,
    versions: VarVersionsGraph,
    field_vars: BTreeMap<ExprId, i32>,
    next_field_var: i32,
    version_first_range: BTreeMap<VarVersionPair, StatId>,
    phantom_pp: BTreeMap<VarVersionPair, VarVersionPair>,
    phantom_exits: BTreeMap<NodeIdx, BTreeMap<VarVersionPair, VarVersionPair>>,
}

impl SsauConstructor {
    fn new() -> Self {
        SsauConstructor {
            factory: FastSparseSetFactory::new(0..64),
            in_maps: HashMap::new(),
            out_maps: HashMap::new(),
            out_neg_maps: HashMap::new(),
            extra_maps: HashMap::new(),
            counters: VersionCounters::default(),
            versions: VarVersionsGraph::new(),
            field_vars: BTreeMap::new(),
            next_field_var: -1,
            version_first_range: BTreeMap::new(),
            phantom_pp: BTreeMap::new(),
            phantom_exits: BTreeMap::new(),
        }
    }

    /// Assigns a version to every variable occurrence of an unversioned
    /// tree and builds the version graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be flattened.
    pub fn split_variables(tree: &mut StatementTree, method: &MethodInfo) -> Result<SsauResult> {
        let graph = flatten(tree)?;
        let mut ssu = SsauConstructor::new();

        if !graph.is_empty() {
            let first = ssu.first_map(method, tree.root());
            ssu.extra_maps.entry(graph.first()).or_default().union(&first);
            ssu.set_catch_maps(tree, &graph);
        }

        let mut updated = BTreeSet::new();
        let mut passes = 0;
        loop {
            ssu.ssa_statements(tree, &graph, &mut updated, false);
            passes += 1;
            if updated.is_empty() {
                break;
            }
        }
        ssu.ssa_statements(tree, &graph, &mut updated, true);
        ssu.versions.init_dominators();
        debug!(
            "{}: live versions stable after {} passes, {} versions, {} field variables",
            method.display_name(),
            passes,
            ssu.versions.len(),
            ssu.field_vars.len()
        );

        Ok(SsauResult {
            graph,
            versions: ssu.versions,
            field_vars: ssu.field_vars,
            version_first_range: ssu.version_first_range,
            phantom_pp: ssu.phantom_pp,
            phantom_exits: ssu.phantom_exits,
            passes,
        })
    }

    fn next_version(&mut self, var: i32, stat: Option<StatId>) -> i32 {
        let version = self.counters.next(var);
        if let Some(stat) = stat {
            self.version_first_range.insert(VarVersionPair::new(var, version), stat);
        }
        version
    }

    fn first_map(&mut self, method: &MethodInfo, root: StatId) -> SFormsFastMapDirect {
        let mut map = SFormsFastMapDirect::new();
        for (slot, _) in method.parameter_slots() {
            let var = i32::from(slot);
            let version = self.next_version(var, Some(root));
            set_current(&self.factory, &mut map, var, version);
            self.versions.create_node(VarVersionPair::new(var, version));
        }
        map
    }

    fn set_catch_maps(&mut self, tree: &mut StatementTree, graph: &DirectGraph) {
        for id in tree.preorder(tree.root()) {
            let handlers: Vec<StatId> = match tree.get(id) {
                Some(stat) if !stat.catch_vars().is_empty() => stat.children.iter().skip(1).copied().collect(),
                _ => continue,
            };
            for (i, handler) in handlers.into_iter().enumerate() {
                let Some(entry) = graph.statement_node(handler) else {
                    continue;
                };
                let Some(index) = tree
                    .get(id)
                    .and_then(|stat| stat.catch_vars().get(i))
                    .and_then(Expr::as_var)
                    .map(|var| var.index)
                else {
                    continue;
                };
                let version = self.next_version(index, Some(id));
                if let Some(var) = tree
                    .get_mut(id)
                    .and_then(|stat| stat.catch_vars_mut().get_mut(i))
                    .and_then(Expr::as_var_mut)
                {
                    var.version = version;
                }
                self.versions.create_node(VarVersionPair::new(index, version));

                let mut map = SFormsFastMapDirect::new();
                set_current(&self.factory, &mut map, index, version);
                self.extra_maps.entry(entry).or_default().union(&map);
            }
        }
    }

    fn ssa_statements(
        &mut self,
        tree: &mut StatementTree,
        graph: &DirectGraph,
        updated: &mut BTreeSet<NodeIdx>,
        record_live: bool,
    ) {
        for (idx, node) in graph.nodes().iter().enumerate() {
            updated.remove(&idx);
            self.merge_in_maps(idx, graph);

            let mut maps = BranchMaps::new(self.in_maps.get(&idx).cloned().unwrap_or_default());
            if let Some(slot) = node.slot {
                for expr in tree.slot_exprs_mut(slot) {
                    self.process_expr(expr, &mut maps, node.statement, record_live);
                }
            }
            let (mut on_true, mut on_false) = maps.into_parts();

            // field values do not survive a merge or a split of control flow
            let keep_fields = match node.succs() {
                [] => true,
                [succ] => graph.node(*succ).is_some_and(|s| s.preds().len() == 1),
                _ => false,
            };
            if !keep_fields {
                on_true.remove_all_fields();
                on_false.remove_all_fields();
            }

            let changed = self.out_maps.get(&idx) != Some(&on_true)
                || self.out_neg_maps.get(&idx).is_some_and(|neg| *neg != on_false);
            if changed {
                trace!("node {} live out {:?}", node.id, on_true);
                self.out_maps.insert(idx, on_true);
                if graph.neg_if_branch(idx).is_some() {
                    self.out_neg_maps.insert(idx, on_false);
                }
                updated.extend(node.succs().iter().copied());
            }
        }
    }

    fn merge_in_maps(&mut self, idx: NodeIdx, graph: &DirectGraph) {
        let mut merged = SFormsFastMapDirect::new();
        for &pred in graph.nodes()[idx].preds() {
            let out = self.filtered_out_map(idx, pred, graph, idx);
            merged.union(&out);
        }
        if let Some(extra) = self.extra_maps.get(&idx) {
            merged.union(extra);
        }
        self.in_maps.insert(idx, merged);
    }

    /// The out-map of `pred` as seen by `node`. Versions leaving a finally
    /// handler towards `dest` on a path other than the one they entered by
    /// are replaced by phantom versions.
    fn filtered_out_map(&mut self, node: NodeIdx, pred: NodeIdx, graph: &DirectGraph, dest: NodeIdx) -> SFormsFastMapDirect {
        let mut map_new = if graph.neg_if_branch(pred) == Some(node) {
            self.out_neg_maps.get(&pred).cloned().unwrap_or_default()
        } else {
            self.out_maps.get(&pred).cloned().unwrap_or_default()
        };
        if !graph.is_finally_exit(pred) {
            return map_new;
        }

        let mut map_new_temp = map_new.clone();
        let mut true_source = SFormsFastMapDirect::new();
        let monitor_exit = graph.monitor_exception_exit(pred).is_some_and(|exc| exc != node);
        let long_paths: HashSet<(NodeIdx, NodeIdx)> = graph
            .long_range_finally_paths
            .values()
            .flatten()
            .map(|w| (w.destination, w.source))
            .collect();

        for wrapper in graph.short_range_paths(pred).to_vec() {
            let nested = graph.is_finally_exit(wrapper.source);
            let map = if nested {
                Some(self.filtered_out_map(wrapper.entry, wrapper.source, graph, dest))
            } else if graph.neg_if_branch(wrapper.source) == Some(wrapper.entry) {
                self.out_neg_maps.get(&wrapper.source).cloned()
            } else {
                self.out_maps.get(&wrapper.source).cloned()
            };
            let Some(map) = map else {
                continue;
            };
            let false_path = if nested {
                wrapper.destination != node
            } else {
                !long_paths.contains(&(dest, wrapper.source))
            };
            if false_path {
                map_new_temp.complement(&map);
            } else {
                true_source.union(&map);
            }
        }

        if monitor_exit {
            return true_source;
        }
        map_new_temp.union(&true_source);
        map_new.intersection(&map_new_temp);
        if !true_source.is_empty() && !map_new.is_empty() {
            self.replace_exit_versions(pred, &mut map_new, &true_source);
        }
        map_new
    }

    /// Versions reaching the exit of a finally handler only through the
    /// handler itself are replaced by per-exit phantom versions.
    fn replace_exit_versions(&mut self, pred: NodeIdx, map: &mut SFormsFastMapDirect, true_source: &SFormsFastMapDirect) {
        let mut exit_vars = map.clone();
        exit_vars.complement(true_source);

        let mut phantoms = self.phantom_exits.remove(&pred).unwrap_or_default();
        let exits: Vec<(i32, Vec<i32>)> = exit_vars.entries().into_iter().map(|(k, s)| (k, s.to_vec())).collect();
        for (var, exit_versions) in exits {
            for version in exit_versions {
                let exit = VarVersionPair::new(var, version);
                let phantom = match phantoms.get(&exit) {
                    Some(&phantom) => phantom,
                    None => {
                        let phantom = VarVersionPair::new(var, self.next_version(var, None));
                        self.versions.create_node(phantom).flags |= VersionFlags::PHANTOM_FINALLY_EXIT;
                        self.versions.add_edge(VersionEdgeKind::Phantom, exit, phantom);
                        trace!("phantom finally exit {} -> {}", exit, phantom);
                        phantoms.insert(exit, phantom);
                        phantom
                    }
                };
                if let Some(set) = map.get_mut(var) {
                    set.remove(&version);
                    set.add(phantom.version);
                }
            }
        }
        if !phantoms.is_empty() {
            self.phantom_exits.insert(pred, phantoms);
        }
    }

    fn process_expr(&mut self, expr: &mut Expr, maps: &mut BranchMaps, stat: StatId, record_live: bool) {
        let assigns_var = matches!(&expr.kind, ExprKind::Assignment(a) if a.op.is_none() && a.left.as_var().is_some());

        let finished = match &mut expr.kind {
            ExprKind::Function(func) => self.process_conditional(func, maps, stat, record_live),
            _ => false,
        };
        if !finished {
            if assigns_var {
                if let ExprKind::Assignment(assign) = &mut expr.kind {
                    self.process_expr(&mut assign.right, maps, stat, record_live);
                }
            } else {
                for child in expr.children_mut() {
                    self.process_expr(child, maps, stat, record_live);
                }
            }
        }

        self.track_fields(expr, &mut maps.on_true);

        match &mut expr.kind {
            ExprKind::Assignment(assign) if assigns_var => {
                if let Some(var) = assign.left.as_var_mut() {
                    self.define(var, &mut maps.on_true, stat, record_live);
                }
            }
            ExprKind::Function(func) if func.func.is_increment() => {
                if let Some(var) = func.operands.first().and_then(Expr::as_var) {
                    let pair = var.pair();
                    self.increment(pair, &mut maps.on_true, stat, record_live);
                }
            }
            ExprKind::Assignment(assign) if assign.op.is_some() => {
                if let Some(var) = assign.left.as_var() {
                    let pair = var.pair();
                    self.increment(pair, &mut maps.on_true, stat, record_live);
                }
            }
            ExprKind::Var(var) => self.read(var, &mut maps.on_true, stat, record_live),
            _ => {}
        }
    }

    /// Field reads become pseudo variables; anything that may write a field
    /// forgets all of them.
    fn track_fields(&mut self, expr: &Expr, map: &mut SFormsFastMapDirect) {
        let kills = match &expr.kind {
            ExprKind::Field(_) => {
                let index = match self.field_vars.get(&expr.id) {
                    Some(&index) => index,
                    None => {
                        let index = self.next_field_var;
                        self.next_field_var -= 1;
                        self.field_vars.insert(expr.id, index);
                        self.versions.create_node(VarVersionPair::new(index, 1));
                        index
                    }
                };
                set_current(&self.factory, map, index, 1);
                false
            }
            ExprKind::Invocation(_) => true,
            ExprKind::Assignment(assign) => matches!(assign.left.kind, ExprKind::Field(_)),
            ExprKind::New(new) => new.new_type.code == TypeCode::Object,
            ExprKind::Function(func) => {
                func.func.is_increment() && matches!(func.operands.first().map(|o| &o.kind), Some(ExprKind::Field(_)))
            }
            _ => false,
        };
        if kills {
            map.remove_all_fields();
        }
    }

    fn process_conditional(&mut self, func: &mut FunctionExpr, maps: &mut BranchMaps, stat: StatId, record_live: bool) -> bool {
        match (func.func, func.operands.as_mut_slice()) {
            (FunctionType::Iif, [condition, then, otherwise]) => {
                self.process_expr(condition, maps, stat, record_live);
                let false_map = maps.on_false.take().unwrap_or_else(|| maps.on_true.clone());
                self.process_expr(then, maps, stat, record_live);
                let mut negative = BranchMaps::new(false_map);
                self.process_expr(otherwise, &mut negative, stat, record_live);
                maps.on_true.union(&negative.on_true);
                maps.on_false = None;
            }
            (FunctionType::Cadd, [left, right]) => {
                self.process_expr(left, maps, stat, record_live);
                let mut and = BranchMaps::new(maps.on_true.clone());
                self.process_expr(right, &mut and, stat, record_live);
                let mut on_false = maps.false_or_true().clone();
                on_false.union(and.false_or_true());
                maps.on_false = Some(on_false);
                maps.on_true = and.on_true;
            }
            (FunctionType::Cor, [left, right]) => {
                self.process_expr(left, maps, stat, record_live);
                let mut or = BranchMaps::new(maps.false_or_true().clone());
                self.process_expr(right, &mut or, stat, record_live);
                maps.on_true.union(&or.on_true);
                maps.on_false = Some(or.on_false.unwrap_or(or.on_true));
            }
            _ => return false,
        }
        true
    }

    fn record_live(&mut self, pair: VarVersionPair, map: &SFormsFastMapDirect) {
        if let Some(node) = self.versions.node_mut(pair) {
            node.live = map.clone();
        }
    }

    fn define(&mut self, var: &mut VarExpr, map: &mut SFormsFastMapDirect, stat: StatId, record_live: bool) {
        if var.version <= 0 {
            var.version = self.next_version(var.index, Some(stat));
            self.versions.create_node(var.pair());
        } else if record_live {
            self.record_live(var.pair(), map);
        }
        set_current(&self.factory, map, var.index, var.version);
    }

    /// `++`/`--` or `op=` on a variable writes a phantom version joined into
    /// the phi of the operand.
    fn increment(&mut self, operand: VarVersionPair, map: &mut SFormsFastMapDirect, stat: StatId, record_live: bool) {
        let phantom = match self.phantom_pp.get(&operand) {
            Some(&phantom) => phantom,
            None => {
                let phantom = VarVersionPair::new(operand.var, self.next_version(operand.var, None));
                self.versions.create_node(phantom);

                let mut sources = self.factory.spawn_empty_set();
                let defs: Vec<VarVersionPair> = match self.versions.node(operand) {
                    Some(node) if node.pred_count() == 1 => node.first_pred().into_iter().collect(),
                    Some(node) => node
                        .preds()
                        .filter_map(|e| self.versions.node(e.source).and_then(|temp| temp.first_pred()))
                        .collect(),
                    None => Vec::new(),
                };
                for def in defs {
                    sources.add(def.version);
                }
                sources.add(phantom.version);
                self.phantom_pp.insert(operand, phantom);
                self.create_or_update_phi(operand, &sources, stat);
                phantom
            }
        };
        if record_live {
            self.record_live(operand, map);
        }
        set_current(&self.factory, map, operand.var, phantom.version);
    }

    fn read(&mut self, var: &mut VarExpr, map: &mut SFormsFastMapDirect, stat: StatId, record_live: bool) {
        let Some(versions) = map.get(var.index).filter(|set| !set.is_empty()).cloned() else {
            // nothing reaches this read; it starts its own version
            if var.version <= 0 {
                var.version = self.next_version(var.index, Some(stat));
                self.versions.create_node(var.pair());
            }
            set_current(&self.factory, map, var.index, var.version);
            return;
        };

        if var.version > 0 {
            if record_live {
                self.record_live(var.pair(), map);
            }
            set_current(&self.factory, map, var.index, var.version);
        } else {
            let use_version = self.next_version(var.index, Some(stat));
            var.version = use_version;
            set_current(&self.factory, map, var.index, use_version);
            self.versions.create_node(var.pair());
            if let Some(def) = versions.single() {
                self.versions
                    .add_edge(VersionEdgeKind::General, VarVersionPair::new(var.index, def), var.pair());
                return;
            }
        }
        if versions.len() > 1 {
            self.create_or_update_phi(var.pair(), &versions, stat);
        }
    }

    /// Makes `phi` a phi version over `sources`: one temporary version per
    /// source, stale temporaries unlinked.
    fn create_or_update_phi(&mut self, phi: VarVersionPair, sources: &VersionSet, stat: StatId) {
        let mut missing = sources.clone();
        let pp_version = self.phantom_pp.get(&phi).map(|p| p.version);

        let preds: Vec<_> = self
            .versions
            .node(phi)
            .map(|n| n.preds().copied().collect())
            .unwrap_or_default();
        if let [edge] = preds.as_slice() {
            // a plain use turning into a phi
            self.versions.remove_edge(edge);
        } else {
            for edge in &preds {
                let source = self.versions.node(edge.source).and_then(|t| t.first_pred());
                let Some(source) = source else {
                    continue;
                };
                if !sources.contains(&source.version) && Some(source.version) != pp_version {
                    self.versions.remove_edge(edge);
                } else {
                    missing.remove(&source.version);
                }
            }
        }

        for version in missing.to_vec() {
            let def = VarVersionPair::new(phi.var, version);
            let temp = VarVersionPair::new(phi.var, self.next_version(phi.var, Some(stat)));
            self.versions.add_edge(VersionEdgeKind::General, def, temp);
            self.versions.add_edge(VersionEdgeKind::General, temp, phi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ssa::VarVersionNode,
        assembly::{MethodDescriptor, VarType},
        structure::StatementTreeBuilder,
    };

    fn assign(b: &mut StatementTreeBuilder, var: i32, value: i32) -> Expr {
        let x = Expr::var(b.ids(), var);
        let c = Expr::int_const(b.ids(), value, false);
        Expr::assign(b.ids(), x, c)
    }

    fn method() -> MethodInfo {
        MethodInfo::new("a/B", "f", "(Z)I", true).unwrap()
    }

    fn var_versions(tree: &StatementTree, index: i32) -> Vec<i32> {
        let mut out = Vec::new();
        tree.visit_exprs(&mut |e| {
            if let Some(v) = e.as_var().filter(|v| v.index == index) {
                out.push(v.version);
            }
        });
        out
    }

    #[test]
    fn test_if_else_use_is_phi_over_temporaries() {
        let mut b = StatementTreeBuilder::new();
        let cond = Expr::var(b.ids(), 0);
        let head = b.basic(vec![]);
        let then_expr = assign(&mut b, 1, 1);
        let then = b.basic(vec![then_expr]);
        let else_expr = assign(&mut b, 1, 2);
        let other = b.basic(vec![else_expr]);
        let stat = b.if_stat(head, cond, then, Some(other));
        let x = Expr::var(b.ids(), 1);
        let ret_expr = Expr::ret(b.ids(), Some(x), VarType::INT);
        let ret = b.basic(vec![ret_expr]);
        let exit = b.exit();
        b.regular(then, ret).regular(other, ret).regular(stat, ret).break_to(ret, exit);
        let body = b.sequence(vec![stat, ret]);
        let mut tree = b.build(body).unwrap();

        let ssu = SsauConstructor::split_variables(&mut tree, &method()).unwrap();
        let use_version = *var_versions(&tree, 1).last().unwrap();
        let phi = ssu.versions.node(VarVersionPair::new(1, use_version)).unwrap();
        assert_eq!(phi.pred_count(), 2);

        let defs: BTreeSet<i32> = phi
            .preds()
            .filter_map(|e| ssu.versions.node(e.source).and_then(VarVersionNode::first_pred))
            .map(|p| p.version)
            .collect();
        let mut assigned = var_versions(&tree, 1);
        assigned.pop();
        assert_eq!(defs, assigned.into_iter().collect());

        // the condition read splits off the parameter
        let cond_version = var_versions(&tree, 0)[0];
        let cond_node = ssu.versions.node(VarVersionPair::new(0, cond_version)).unwrap();
        assert_eq!(cond_node.first_pred(), Some(VarVersionPair::new(0, 1)));
        assert!(ssu.versions.is_dominator(VarVersionPair::new(0, cond_version), VarVersionPair::new(0, 1)));
    }

    #[test]
    fn test_increment_creates_phantom_version() {
        let mut b = StatementTreeBuilder::new();
        let init = assign(&mut b, 1, 0);
        let operand = Expr::var(b.ids(), 1);
        let inc = Expr::function(b.ids(), FunctionType::Ipp, vec![operand]);
        let read = Expr::var(b.ids(), 1);
        let ret_expr = Expr::ret(b.ids(), Some(read), VarType::INT);
        let block = b.basic(vec![init, inc, ret_expr]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();

        let ssu = SsauConstructor::split_variables(&mut tree, &method()).unwrap();
        assert_eq!(ssu.phantom_pp.len(), 1);
        let (operand, phantom) = ssu.phantom_pp.iter().next().unwrap();
        assert!(ssu.versions.contains(*phantom));

        // the read after the increment splits off the phantom version
        let read_version = *var_versions(&tree, 1).last().unwrap();
        let read_node = ssu.versions.node(VarVersionPair::new(1, read_version)).unwrap();
        assert_eq!(read_node.first_pred(), Some(*phantom));
        assert!(ssu.versions.node(*operand).unwrap().pred_count() >= 1);
    }

    #[test]
    fn test_compound_assignment_uses_then_writes() {
        // x = 0; x += 2; return x;
        let mut b = StatementTreeBuilder::new();
        let init = assign(&mut b, 1, 0);
        let target = Expr::var(b.ids(), 1);
        let two = Expr::int_const(b.ids(), 2, false);
        let update = Expr::compound_assign(b.ids(), FunctionType::Add, target, two);
        let read = Expr::var(b.ids(), 1);
        let ret_expr = Expr::ret(b.ids(), Some(read), VarType::INT);
        let block = b.basic(vec![init, update, ret_expr]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();

        let ssu = SsauConstructor::split_variables(&mut tree, &method()).unwrap();
        let versions = var_versions(&tree, 1);
        assert_eq!(versions.len(), 3);
        let (def, target, read) = (versions[0], versions[1], versions[2]);

        // the target reads the first definition, through its phi temporaries
        let target_pair = VarVersionPair::new(1, target);
        let sources: BTreeSet<i32> = ssu
            .versions
            .node(target_pair)
            .unwrap()
            .preds()
            .filter_map(|e| ssu.versions.node(e.source).and_then(VarVersionNode::first_pred))
            .map(|p| p.version)
            .collect();
        assert!(sources.contains(&def));
        // and its write is what the return reads
        let written = ssu.phantom_pp.get(&target_pair).copied().unwrap();
        let read_node = ssu.versions.node(VarVersionPair::new(1, read)).unwrap();
        assert_eq!(read_node.first_pred(), Some(written));
    }

    #[test]
    fn test_field_pseudo_variables_are_killed_by_calls() {
        let mut b = StatementTreeBuilder::new();
        let this = Expr::var(b.ids(), 0);
        let field = Expr::field(b.ids(), "a/B", "f", VarType::INT, Some(this));
        let x = Expr::var(b.ids(), 1);
        let load = Expr::assign(b.ids(), x, field);
        let call = Expr::invoke(b.ids(), "a/B", "g", MethodDescriptor::parse("()V").unwrap(), None, vec![]);
        let y = Expr::var(b.ids(), 2);
        let x_read = Expr::var(b.ids(), 1);
        let copy = Expr::assign(b.ids(), y, x_read);
        let block = b.basic(vec![load, call, copy]);
        let exit = b.exit();
        b.break_to(block, exit);
        let mut tree = b.build(block).unwrap();

        let method = MethodInfo::new("a/B", "h", "()V", false).unwrap();
        let ssu = SsauConstructor::split_variables(&mut tree, &method).unwrap();
        assert_eq!(ssu.field_vars.values().copied().collect::<Vec<_>>(), vec![-1]);
        assert!(ssu.versions.contains(VarVersionPair::new(-1, 1)));
        // `this` is read once, splitting off the parameter version
        assert_eq!(var_versions(&tree, 0), vec![2]);
        assert_eq!(ssu.version_first_range.get(&VarVersionPair::new(0, 2)), Some(&block));

        // the load sees the field, the read after `g()` does not
        let x = var_versions(&tree, 1);
        assert_eq!(x.len(), 2);
        assert!(sees_field(&ssu, VarVersionPair::new(1, x[0]), -1));
        assert!(!sees_field(&ssu, VarVersionPair::new(1, x[1]), -1));
    }

    fn sees_field(ssu: &SsauResult, pair: VarVersionPair, field: i32) -> bool {
        ssu.versions
            .node(pair)
            .and_then(|node| node.live.get(field))
            .is_some_and(|set| !set.is_empty())
    }

    /// `x = this.f;` followed by a read of `x` in the next statement.
    fn field_then_read(b: &mut StatementTreeBuilder) -> (Expr, Expr) {
        let this = Expr::var(b.ids(), 0);
        let field = Expr::field(b.ids(), "a/B", "f", VarType::INT, Some(this));
        let x = Expr::var(b.ids(), 2);
        let load = Expr::assign(b.ids(), x, field);
        let y = Expr::var(b.ids(), 3);
        let x_read = Expr::var(b.ids(), 2);
        (load, Expr::assign(b.ids(), y, x_read))
    }

    #[test]
    fn test_field_survives_straight_line_edge() {
        let mut b = StatementTreeBuilder::new();
        let (load, copy) = field_then_read(&mut b);
        let first = b.basic(vec![load]);
        let second = b.basic(vec![copy]);
        let exit = b.exit();
        b.regular(first, second).break_to(second, exit);
        let seq = b.sequence(vec![first, second]);
        let mut tree = b.build(seq).unwrap();

        let method = MethodInfo::new("a/B", "h", "(Z)V", false).unwrap();
        let ssu = SsauConstructor::split_variables(&mut tree, &method).unwrap();
        let x = var_versions(&tree, 2);
        assert_eq!(x.len(), 2);
        assert!(x.iter().all(|&v| sees_field(&ssu, VarVersionPair::new(2, v), -1)));
    }

    #[test]
    fn test_field_does_not_cross_split_or_merge() {
        // void h(boolean b) { x = this.f; if (b) { y = x; } else {} y = x; }
        let mut b = StatementTreeBuilder::new();
        let (load, then_copy) = field_then_read(&mut b);
        let head = b.basic(vec![load]);
        let cond = Expr::var(b.ids(), 1);
        let then = b.basic(vec![then_copy]);
        let other = b.basic(vec![]);
        let stat = b.if_stat(head, cond, then, Some(other));
        let y = Expr::var(b.ids(), 3);
        let x_read = Expr::var(b.ids(), 2);
        let after_copy = Expr::assign(b.ids(), y, x_read);
        let after = b.basic(vec![after_copy]);
        let exit = b.exit();
        b.regular(then, after).regular(other, after).regular(stat, after).break_to(after, exit);
        let body = b.sequence(vec![stat, after]);
        let mut tree = b.build(body).unwrap();

        let method = MethodInfo::new("a/B", "h", "(Z)V", false).unwrap();
        let ssu = SsauConstructor::split_variables(&mut tree, &method).unwrap();
        let x = var_versions(&tree, 2);
        assert_eq!(x.len(), 3);
        let seeing: Vec<i32> = x
            .iter()
            .copied()
            .filter(|&v| sees_field(&ssu, VarVersionPair::new(2, v), -1))
            .collect();
        // only the load inside the head statement
        assert_eq!(seeing.len(), 1);
        assert_eq!(ssu.version_first_range.get(&VarVersionPair::new(2, seeing[0])), Some(&head));
    }
}
