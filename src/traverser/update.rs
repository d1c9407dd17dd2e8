//! `update` — the mutating second pass that commits a prior `select`
//! (spec.md §4.6.3).

use std::collections::BTreeMap;

use tracing::info;

use crate::emit::Writer;
use crate::error::CoreError;
use crate::graph::VtxId;

use super::{AllocType, MatchMeta, Traverser, DOM};

#[derive(Debug)]
enum UndoOp {
    XChecker(VtxId, u64),
    Plan(VtxId, u64),
    Subplan(VtxId, u64),
}

impl Traverser {
    /// `update(root, writers, meta)` — spec.md §4.6.3. Requires a prior
    /// `select` on this traverser (its generation stamped the edges this
    /// walk follows). On any mid-walk failure, every exclusive span
    /// already recorded for `jobid` is rolled back before returning.
    pub fn update(
        &mut self,
        root: VtxId,
        jobid: u64,
        meta: MatchMeta,
        alloc_type: AllocType,
        writer: &mut dyn Writer,
    ) -> Result<(), CoreError> {
        if self.generation == 0 {
            return Err(CoreError::internal("update called before any select"));
        }
        info!(root, jobid, generation = self.generation, "update: committing allocation");
        self.graph.reset_colors(DOM);
        let mut undo = Vec::new();
        match self.update_vertex(root, meta, jobid, alloc_type, false, false, writer, &mut undo) {
            Ok(agg) => Ok(drop(agg)),
            Err(e) => {
                self.rollback(&mut undo);
                Err(e)
            }
        }
    }

    fn update_vertex(
        &mut self,
        v: VtxId,
        meta: MatchMeta,
        jobid: u64,
        alloc_type: AllocType,
        incoming_exclusive: bool,
        incoming_cascade: bool,
        writer: &mut dyn Writer,
        undo: &mut Vec<UndoOp>,
    ) -> Result<BTreeMap<String, u64>, CoreError> {
        let mut aggregate = BTreeMap::new();
        let own_cascade = {
            let vx = self.graph.vertex(v).unwrap();
            *aggregate.entry(vx.type_.clone()).or_insert(0u64) += vx.size;
            incoming_cascade || self.exclusivity.is_resource_type_exclusive(&vx.type_)
        };

        let edges = self.graph.out_edges(v, DOM);
        for e in edges {
            let (target, trav_token, exclusive) = {
                let edge = self.graph.edge(e).unwrap();
                (edge.target, edge.idata.trav_token, edge.idata.exclusive)
            };
            // Modify-traversal (spec.md §4.6.3): follow an edge either
            // because `select` stamped it this generation, or because
            // the parent's own visiting type is exclusive-registered —
            // cascading exclusivity, which consumes every descendant
            // regardless of whether it was part of the matched subtree.
            if trav_token != self.generation && !own_cascade {
                continue;
            }
            let child_exclusive = exclusive || own_cascade;
            let child_aggregate = self.update_vertex(
                target,
                meta,
                jobid,
                alloc_type,
                child_exclusive,
                own_cascade,
                writer,
                undo,
            )?;
            for (ty, sz) in child_aggregate {
                *aggregate.entry(ty).or_insert(0) += sz;
            }
            writer.emit_edge(&self.graph, v, target);
        }

        self.ensure_x_checker(v)?;
        let x_span = self
            .graph
            .vertex_mut(v)
            .unwrap()
            .idata
            .x_checker
            .as_mut()
            .unwrap()
            .add_span(meta.at, meta.duration, 1)?;
        undo.push(UndoOp::XChecker(v, x_span));
        let vx = self.graph.vertex_mut(v).unwrap();
        vx.idata.x_spans.insert(jobid, x_span);
        vx.idata.tags.insert(jobid);

        if incoming_exclusive {
            let size = self.graph.vertex(v).unwrap().size;
            let span = self
                .graph
                .vertex_mut(v)
                .unwrap()
                .schedule
                .plans
                .as_mut()
                .ok_or_else(|| CoreError::internal("exclusive vertex missing schedule.plans"))?
                .add_span(meta.at, meta.duration, size)?;
            undo.push(UndoOp::Plan(v, span));
            let vx = self.graph.vertex_mut(v).unwrap();
            match alloc_type {
                AllocType::Allocation => vx.schedule.allocations.insert(jobid, span),
                AllocType::Reservation => vx.schedule.reservations.insert(jobid, span),
            };
        }

        if self.graph.vertex(v).unwrap().idata.subplans.contains_key(DOM) {
            let req: Vec<u64> = {
                let mp = &self.graph.vertex(v).unwrap().idata.subplans[DOM];
                mp.types().iter().map(|t| *aggregate.get(t).unwrap_or(&0)).collect()
            };
            let span = self
                .graph
                .vertex_mut(v)
                .unwrap()
                .idata
                .subplans
                .get_mut(DOM)
                .unwrap()
                .add_span(meta.at, meta.duration, &req)?;
            undo.push(UndoOp::Subplan(v, span));
            self.graph
                .vertex_mut(v)
                .unwrap()
                .idata
                .job2span
                .entry(DOM.to_string())
                .or_default()
                .insert(jobid, span);
        }

        writer.emit_vertex(&self.graph, v);
        Ok(aggregate)
    }

    fn rollback(&mut self, undo: &mut Vec<UndoOp>) {
        for op in undo.drain(..).rev() {
            match op {
                UndoOp::XChecker(v, id) => {
                    if let Some(xc) = self.graph.vertex_mut(v).and_then(|vx| vx.idata.x_checker.as_mut()) {
                        let _ = xc.rem_span(id);
                    }
                }
                UndoOp::Plan(v, id) => {
                    if let Some(p) = self.graph.vertex_mut(v).and_then(|vx| vx.schedule.plans.as_mut()) {
                        let _ = p.rem_span(id);
                    }
                }
                UndoOp::Subplan(v, id) => {
                    if let Some(mp) = self.graph.vertex_mut(v).and_then(|vx| vx.idata.subplans.get_mut(DOM)) {
                        let _ = mp.rem_span(id);
                    }
                }
            }
        }
    }
}
