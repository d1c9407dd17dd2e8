//! DFU (Depth-First-and-Up) traverser: matches a jobspec against the
//! resource graph and, on a second pass, commits the match (spec.md
//! §4.6).
//!
//! This crate implements the traverser over a single dominant subsystem
//! (`"containment"`); the aux-subsystem up-visit (`UPV`) machinery spec.md
//! describes for cross-subsystem constraints (e.g. a network-topology
//! subsystem walked alongside containment) is not built — every seeded
//! scenario in spec.md §8 is expressible as a pure containment match, and
//! DESIGN.md records this as a deliberate scope cut rather than an
//! oversight.

pub mod cancel;
pub mod find;
pub mod status;
pub mod update;

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::error::{CoreError, ErrorLog};
use crate::graph::{EdgeId, Graph, VtxId, X_CHECKER_NJOBS};
use crate::jobspec::{Jobspec, Resource};
use crate::planner::multi::MultiPlanner;
use crate::planner::Planner;
use crate::policy::{calc_count, calc_effective_max, DfuContext, ExclusivityRegistry, MatchPolicy, CB_ERR, CB_OK};
use crate::scoring::{Arena, CmpOrder, EdgeGroup, MATCH_MET, MATCH_UNMET};

/// The only subsystem this crate's traverser walks depth-first.
pub const DOM: &str = "containment";

/// Parameters shared by `select`/`update`/`find` — the window being
/// matched and whether satisfiability or full allocation is the goal.
#[derive(Debug, Clone, Copy)]
pub struct MatchMeta {
    pub at: i64,
    pub duration: u64,
    /// `false` ⇒ only already-`UP` resources are eligible (the normal
    /// case); `true` relaxes the status check for what-if queries.
    pub satisfiability_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocType {
    Allocation,
    Reservation,
}

/// What `select` hands back on success: the scored arena (for
/// diagnostics) and the generation `update` must observe.
#[derive(Debug)]
pub struct SelectOutcome {
    pub generation: u64,
    pub score: i64,
}

pub struct Traverser {
    pub graph: Graph,
    policy: Box<dyn MatchPolicy>,
    exclusivity: ExclusivityRegistry,
    arena: Arena,
    generation: u64,
    pub errors: ErrorLog,
    nodes_up: i64,
    base_time: i64,
    duration: u64,
}

impl DfuContext for Traverser {
    fn overall_score(&self) -> i64 {
        self.arena.overall_score()
    }

    fn hier_constrain_now(&self) -> bool {
        true
    }

    fn total_count(&self, subsystem: &str, ty: &str) -> u64 {
        self.arena.total_count(subsystem, ty)
    }

    fn qualified_count(&self, subsystem: &str, ty: &str) -> u64 {
        self.arena.qualified_count(subsystem, ty)
    }
}

impl Traverser {
    pub fn new(graph: Graph, policy: Box<dyn MatchPolicy>) -> Self {
        let nodes_up = (0..graph.num_vertices())
            .filter(|&v| graph.vertex(v).map(|x| x.status == crate::graph::Status::Up).unwrap_or(false))
            .count() as i64;
        Traverser {
            graph,
            policy,
            exclusivity: ExclusivityRegistry::new(),
            arena: Arena::new(),
            generation: 0,
            errors: ErrorLog::new(),
            nodes_up,
            base_time: 0,
            duration: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn nodes_up(&self) -> i64 {
        self.nodes_up
    }

    /// New traversal generation: bumps `m_best_k_cnt` and rebases the
    /// dominant subsystem's colors. O(1) (spec.md §4.6.2).
    fn tick(&mut self) -> u64 {
        self.generation += 1;
        self.graph.reset_colors(DOM);
        self.generation
    }

    /// Graph priming (spec.md §4.6.1): depth-first over `DOM`, installing
    /// each vertex's own timeline and, where `filters` says a type should
    /// be tracked, a subtree-aggregate subplan.
    pub fn prime_graph(
        &mut self,
        filters: &crate::filter::PruningFilterRegistry,
        base_time: i64,
        duration: u64,
    ) -> Result<(), CoreError> {
        self.base_time = base_time;
        self.duration = duration;
        let roots: Vec<VtxId> = (0..self.graph.num_vertices())
            .filter(|&v| self.graph.in_edges(v, DOM).is_empty())
            .collect();
        for r in roots {
            self.prime_vertex(filters, r, base_time, duration)?;
        }
        Ok(())
    }

    fn prime_vertex(
        &mut self,
        filters: &crate::filter::PruningFilterRegistry,
        v: VtxId,
        base_time: i64,
        duration: u64,
    ) -> Result<BTreeMap<String, u64>, CoreError> {
        let children: Vec<VtxId> = self
            .graph
            .out_edges(v, DOM)
            .into_iter()
            .map(|e| self.graph.edge(e).unwrap().target)
            .collect();

        let mut dfv: BTreeMap<String, u64> = BTreeMap::new();
        {
            let vx = self.graph.vertex(v).unwrap();
            *dfv.entry(vx.type_.clone()).or_insert(0) += vx.size;
        }
        for child in &children {
            let child_dfv = self.prime_vertex(filters, *child, base_time, duration)?;
            for (ty, sz) in child_dfv {
                *dfv.entry(ty).or_insert(0) += sz;
            }
        }

        if let Some(vx) = self.graph.vertex(v) {
            if vx.schedule.plans.is_none() {
                let total = vx.size.max(1);
                let ty = vx.type_.clone();
                let plan = Planner::new(base_time, duration, total, ty)?;
                self.graph.vertex_mut(v).unwrap().schedule.plans = Some(plan);
            }
        }

        let anchor_ty = self.graph.vertex(v).unwrap().type_.clone();
        let tracked = filters.get_my_pruning_types(DOM, &anchor_ty);
        if !tracked.is_empty() {
            let totals: Vec<(String, u64)> = tracked
                .iter()
                .map(|ty| (ty.clone(), *dfv.get(ty).unwrap_or(&0)))
                .collect();
            let mp = MultiPlanner::new(base_time, duration, &totals)?;
            self.graph
                .vertex_mut(v)
                .unwrap()
                .idata
                .subplans
                .insert(DOM.to_string(), mp);
            debug!(vertex = v, anchor = %anchor_ty, ?totals, "installed subtree subplan");
        }

        Ok(dfv)
    }

    /// Jobspec priming: aggregate `user_data` and register exclusive
    /// resource types with the policy's exclusivity set.
    pub fn prime_jobspec(&mut self, js: &Jobspec) -> BTreeMap<String, u64> {
        self.exclusivity.reset_exclusive_resource_types();
        js.register_exclusive_types(&mut self.exclusivity);
        js.aggregate_user_data()
    }

    fn ensure_x_checker(&mut self, v: VtxId) -> Result<(), CoreError> {
        if self.graph.vertex(v).unwrap().idata.x_checker.is_none() {
            let p = Planner::new(self.base_time, self.duration.max(1), X_CHECKER_NJOBS, "exclusive")?;
            self.graph.vertex_mut(v).unwrap().idata.x_checker = Some(p);
        }
        Ok(())
    }

    /// `prune(meta, excl, s, u, resources)` (spec.md §4.6.2).
    fn prune(
        &mut self,
        v: VtxId,
        meta: MatchMeta,
        exclusive: bool,
        user_data: &BTreeMap<String, u64>,
    ) -> Result<bool, CoreError> {
        let vx = self.graph.vertex(v).unwrap();
        if !meta.satisfiability_only && vx.status != crate::graph::Status::Up {
            return Ok(true);
        }
        if let Some(plans) = &vx.schedule.plans {
            if plans.avail_during(meta.at, meta.duration)? == 0 {
                return Ok(true);
            }
        }
        if exclusive {
            self.ensure_x_checker(v)?;
            let vx = self.graph.vertex(v).unwrap();
            if let Some(xc) = &vx.idata.x_checker {
                if xc.avail_during(meta.at, meta.duration).unwrap_or(0) < X_CHECKER_NJOBS as i64 {
                    return Ok(true);
                }
            }
        }
        if let Some(mp) = self.graph.vertex(v).unwrap().idata.subplans.get(DOM) {
            let types = mp.types().to_vec();
            let req: Vec<u64> = types.iter().map(|t| *user_data.get(t).unwrap_or(&0)).collect();
            if req.iter().any(|&r| r > 0) && mp.avail_during(meta.at, meta.duration, &req)? == -1 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `select(jobspec, root, meta)` — read-only DFV match (spec.md
    /// §4.6.2), driven by `self.policy` throughout. On success, qualifying
    /// out-edges are stamped with the current generation; no other graph
    /// state changes.
    pub fn select(&mut self, js: &Jobspec, root: VtxId, meta: MatchMeta) -> Result<SelectOutcome, CoreError> {
        let generation = self.tick();
        self.arena = Arena::new();
        let user_data = self.prime_jobspec(js);
        info!(root, generation, "select: starting DFV match");

        let score = self.match_resource_list(&js.resources, root, meta, &user_data, false)?;
        let graph_ok = self.policy.dom_finish_graph(root, DOM, self) == CB_OK;
        if score <= MATCH_UNMET || !graph_ok || !self.arena.has_remaining_all() {
            warn!(root, generation, "select: no satisfying assignment");
            return Err(CoreError::not_found("no satisfying assignment found"));
        }
        Ok(SelectOutcome { generation, score })
    }

    fn match_resource_list(
        &mut self,
        resources: &[Resource],
        v: VtxId,
        meta: MatchMeta,
        user_data: &BTreeMap<String, u64>,
        exclusive_ctx: bool,
    ) -> Result<i64, CoreError> {
        let mut total_score = 0i64;
        for resource in resources {
            let score = if resource.type_ == "slot" {
                self.match_slot(resource, v, meta, user_data, exclusive_ctx)?
            } else {
                let exclusive = exclusive_ctx || resource.exclusive == Some(true);
                self.match_one_resource(resource, resource.count.0.min, v, meta, user_data, exclusive)?
            };
            if score <= MATCH_UNMET {
                return Ok(MATCH_UNMET);
            }
            total_score += score;
        }
        Ok(total_score.max(MATCH_MET))
    }

    /// Scan `v`'s out-edges of type `ty`, pruning and running
    /// `dom_discover_vtx` over each survivor, adding a one-edge
    /// [`EdgeGroup`] to `arena`'s `(dom, ty)` entry as it's discovered.
    /// When `self.policy.stop_on_k_matches() > 0` the scan stops as soon
    /// as the arena already covers `count_hint`'s effective max — dynamic
    /// exploration's early exit (spec.md §4.6.2 "Dynamic"); `out_edges`
    /// already returns descending `(weight, uniq_id)` order, so the
    /// candidates kept are the same ones static exploration would have
    /// picked first anyway.
    fn discover_candidates(
        &mut self,
        arena: &mut Arena,
        v: VtxId,
        ty: &str,
        meta: MatchMeta,
        user_data: &BTreeMap<String, u64>,
        exclusive: bool,
        count_hint: &crate::policy::ResourceCount,
    ) -> Result<(), CoreError> {
        let dynamic = self.policy.stop_on_k_matches() > 0;
        let effective_max = calc_effective_max(count_hint);
        for e in self.graph.out_edges(v, DOM) {
            let tgt = self.graph.edge(e).unwrap().target;
            if self.graph.vertex(tgt).unwrap().type_ != ty {
                continue;
            }
            if self.prune(tgt, meta, exclusive, user_data)? {
                continue;
            }
            if self.policy.dom_discover_vtx(tgt, DOM, self) == CB_ERR {
                continue;
            }
            let score = self
                .graph
                .vertex(tgt)
                .unwrap()
                .schedule
                .plans
                .as_ref()
                .map(|p| p.avail_during(meta.at, meta.duration).unwrap_or(0))
                .unwrap_or(0);
            let mut group = EdgeGroup::new(score, 1, v);
            group.edges.push(e);
            group.exclusive = exclusive;
            arena.entry(DOM, ty).add(group);
            if dynamic && arena.total_count(DOM, ty) >= effective_max {
                break;
            }
        }
        Ok(())
    }

    fn match_one_resource(
        &mut self,
        resource: &Resource,
        needed: u64,
        v: VtxId,
        meta: MatchMeta,
        user_data: &BTreeMap<String, u64>,
        exclusive: bool,
    ) -> Result<i64, CoreError> {
        // `self.arena` is detached for the scan so `discover_candidates`
        // can take `&mut self` as receiver and `&mut Arena` as an
        // argument without aliasing. A `dom_discover_vtx` callback that
        // read `dfu.overall_score()`/`total_count` during this window
        // would see the arena without this resource's own in-flight
        // groups; both shipped policies ignore `dfu` in that callback.
        let mut arena = std::mem::take(&mut self.arena);
        let discovered = self.discover_candidates(&mut arena, v, &resource.type_, meta, user_data, exclusive, &resource.count.0);
        self.arena = arena;
        discovered?;

        let qc = self.arena.total_count(DOM, &resource.type_);
        let effective = calc_count(&resource.count.0, qc);
        let take = needed.min(effective);
        if take == 0 && needed > 0 {
            return Ok(MATCH_UNMET);
        }

        self.arena.entry(DOM, &resource.type_).choose_best_k(take, CmpOrder::GreaterScore);

        let mut selected: Vec<(EdgeId, VtxId)> = Vec::new();
        {
            let entry = self.arena.entry(DOM, &resource.type_);
            for g in &entry.groups {
                if g.needs > 0 {
                    if let Some(&e) = g.edges.first() {
                        selected.push((e, self.graph.edge(e).unwrap().target));
                    }
                }
            }
        }

        if (selected.len() as u64) < take {
            return Ok(MATCH_UNMET);
        }

        let mut total = MATCH_MET;
        for (e, tgt) in &selected {
            self.graph.edge_mut(*e).unwrap().idata.trav_token = self.generation;
            self.graph.edge_mut(*e).unwrap().idata.exclusive = exclusive;
            self.graph.edge_mut(*e).unwrap().idata.needs = 1;
            let sub_score = self.match_resource_list(&resource.with, *tgt, meta, user_data, exclusive)?;
            if self.policy.dom_finish_vtx(*tgt, DOM, self) == CB_ERR || sub_score <= MATCH_UNMET {
                return Ok(MATCH_UNMET);
            }
            total += sub_score;
        }
        Ok(total)
    }

    /// `dom_slot(slot, v)` (spec.md §4.6.2): explore the slot's shape
    /// into a slot-local arena, derive `cnt_slot` — the minimum, over
    /// every slot member, of `qualified_count / count(member)` capped by
    /// that member's qualified granule count — then record exactly
    /// `cnt_slot` synthetic `(dom, "slot")` edge-groups in the parent
    /// arena, scored `MATCH_MET` plus the members' contribution. Every
    /// resource under a slot is exclusive unconditionally, regardless of
    /// its own `exclusive:` flag (spec.md §4.6.2, "under a slot or
    /// explicit-exclusive").
    fn match_slot(
        &mut self,
        slot: &Resource,
        v: VtxId,
        meta: MatchMeta,
        user_data: &BTreeMap<String, u64>,
        exclusive_ctx: bool,
    ) -> Result<i64, CoreError> {
        let _ = exclusive_ctx;
        let mut local = Arena::new();
        for member in &slot.with {
            self.discover_candidates(&mut local, v, &member.type_, meta, user_data, true, &member.count.0)?;
        }

        let mut nslots: Option<u64> = None;
        for member in &slot.with {
            let qc = local.total_count(DOM, &member.type_);
            let granules = local.get(DOM, &member.type_).map(|g| g.qualified_granules).unwrap_or(0);
            let count_elem = calc_count(&member.count.0, qc).max(1);
            let elem_slots = (qc / count_elem).min(granules);
            nslots = Some(nslots.map_or(elem_slots, |n| n.min(elem_slots)));
        }
        let nslots = nslots.unwrap_or(0);

        if self.policy.dom_finish_slot(DOM, self) == CB_ERR {
            return Ok(MATCH_UNMET);
        }

        let needed = calc_count(&slot.count.0, nslots);
        let take = needed.min(nslots);
        if take == 0 && needed > 0 {
            return Ok(MATCH_UNMET);
        }

        let mut total = MATCH_MET;
        for member in &slot.with {
            let qc = local.total_count(DOM, &member.type_);
            let count_elem = calc_count(&member.count.0, qc).max(1);
            let want = take * count_elem;
            local.entry(DOM, &member.type_).choose_best_k(want, CmpOrder::GreaterScore);
            let selected: Vec<(EdgeId, VtxId)> = local
                .get(DOM, &member.type_)
                .map(|g| {
                    g.groups
                        .iter()
                        .filter(|eg| eg.needs > 0)
                        .filter_map(|eg| eg.edges.first().map(|&e| (e, self.graph.edge(e).unwrap().target)))
                        .collect()
                })
                .unwrap_or_default();
            if (selected.len() as u64) < want {
                return Ok(MATCH_UNMET);
            }
            for (e, tgt) in &selected {
                self.graph.edge_mut(*e).unwrap().idata.trav_token = self.generation;
                self.graph.edge_mut(*e).unwrap().idata.exclusive = true;
                self.graph.edge_mut(*e).unwrap().idata.needs = 1;
                let sub_score = self.match_resource_list(&member.with, *tgt, meta, user_data, true)?;
                if self.policy.dom_finish_vtx(*tgt, DOM, self) == CB_ERR || sub_score <= MATCH_UNMET {
                    return Ok(MATCH_UNMET);
                }
                total += sub_score;
            }
        }

        // Synthetic edge-groups under (dom, "slot") for the parent's own
        // accounting — each instance's member contribution is
        // approximated by the arena-wide average per member type, since
        // this crate's flattened candidate model doesn't keep per-vertex
        // co-location across member types within one slot instance.
        let member_avg: i64 = slot
            .with
            .iter()
            .map(|m| {
                local
                    .get(DOM, &m.type_)
                    .map(|g| {
                        let n = g.groups.len().max(1) as i64;
                        g.groups.iter().map(|x| x.score).sum::<i64>() / n
                    })
                    .unwrap_or(0)
            })
            .sum();
        for _ in 0..take {
            self.arena.entry(DOM, "slot").add(EdgeGroup::new(MATCH_MET + member_avg, 1, v));
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::jobspec::Jobspec;
    use crate::policy::builtin::{FirstMatch, HighIdFirst};

    /// `cluster -> node -> core{0..n}`, one node so candidate counts are
    /// easy to reason about.
    fn node_graph(n: u32) -> (Graph, VtxId) {
        let mut g = Graph::new();
        let cluster = g.add_vertex("cluster", "cluster", "cluster0", -1, -1, 1, "");
        let node = g.add_vertex("node", "node", "node0", 0, -1, 1, "");
        g.add_edge(DOM, "contains", cluster, node, 0).unwrap();
        for c in 0..n {
            let core = g.add_vertex("core", "core", format!("core{c}"), c as i64, 0, 1, "");
            g.add_edge(DOM, "contains", node, core, 0).unwrap();
        }
        (g, cluster)
    }

    fn meta() -> MatchMeta {
        MatchMeta { at: 0, duration: 3600, satisfiability_only: false }
    }

    #[test]
    fn slot_members_are_exclusive_without_an_explicit_flag() {
        let mut g = Graph::new();
        let cluster = g.add_vertex("cluster", "cluster", "cluster0", -1, -1, 1, "");
        let rack = g.add_vertex("rack", "rack", "rack0", 0, -1, 1, "");
        g.add_edge(DOM, "contains", cluster, rack, 0).unwrap();
        let node = g.add_vertex("node", "node", "node0", 0, 0, 1, "");
        g.add_edge(DOM, "contains", rack, node, 0).unwrap();
        let mut cores = Vec::new();
        for c in 0..4 {
            let core = g.add_vertex("core", "core", format!("core{c}"), c, 0, 1, "");
            g.add_edge(DOM, "contains", node, core, 0).unwrap();
            cores.push(core);
        }

        let mut t = Traverser::new(g, Box::new(FirstMatch));
        t.prime_graph(&crate::filter::PruningFilterRegistry::new(), 0, 1_000_000).unwrap();
        let js = Jobspec::from_yaml_str(
            r#"
version: 1
resources:
  - type: rack
    count: 1
    with:
      - type: node
        count: 1
        with:
          - type: slot
            label: s
            count: 1
            with:
              - type: core
                count: 4
tasks:
  - command: ["app"]
    slot: s
attributes:
  system:
    duration: 3600
"#,
        )
        .unwrap();

        t.select(&js, cluster, meta()).unwrap();

        for core in cores {
            let edges = t.graph.in_edges(core, DOM);
            assert_eq!(edges.len(), 1);
            let e = edges[0];
            assert!(t.graph.edge(e).unwrap().idata.exclusive, "slot member must be forced exclusive");
        }
    }

    #[test]
    fn dynamic_exploration_stops_early_for_first_match() {
        let (g, cluster) = node_graph(8);
        let mut t = Traverser::new(g, Box::new(FirstMatch));
        t.prime_graph(&crate::filter::PruningFilterRegistry::new(), 0, 1_000_000).unwrap();
        let js = Jobspec::from_yaml_str(
            "version: 1\nresources:\n  - type: node\n    count: 1\n    with:\n      - type: core\n        count: 2\n",
        )
        .unwrap();

        t.select(&js, cluster, meta()).unwrap();
        assert_eq!(t.arena.total_count(DOM, "core"), 2, "FirstMatch should stop scanning once the count is met");
    }

    #[test]
    fn static_exploration_scores_every_candidate_for_high_id_first() {
        let (g, cluster) = node_graph(8);
        let mut t = Traverser::new(g, Box::new(HighIdFirst));
        t.prime_graph(&crate::filter::PruningFilterRegistry::new(), 0, 1_000_000).unwrap();
        let js = Jobspec::from_yaml_str(
            "version: 1\nresources:\n  - type: node\n    count: 1\n    with:\n      - type: core\n        count: 2\n",
        )
        .unwrap();

        t.select(&js, cluster, meta()).unwrap();
        assert_eq!(t.arena.total_count(DOM, "core"), 8, "HighIdFirst never early-exits");
    }
}
