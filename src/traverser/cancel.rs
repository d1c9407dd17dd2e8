//! `remove`/`partial_cancel` — the inverse of `update` (spec.md §4.6.4).
//!
//! Full cancellation walks the tagged subtree exactly once; partial
//! cancellation reduces ancestor subplans by whatever a JGF or RV1
//! document says was released, without touching tags the document
//! doesn't name.

use std::collections::BTreeMap;

use tracing::info;

use crate::emit::jgf::JgfDoc;
use crate::emit::rv1::{self, Rv1Doc};
use crate::error::CoreError;
use crate::graph::VtxId;

use super::{Traverser, DOM};

/// Either wire format `partial_cancel` accepts (spec.md §4.6.4).
#[derive(Debug, Clone)]
pub enum PartialCancelDoc {
    Jgf(JgfDoc),
    Rv1(Rv1Doc),
}

impl Traverser {
    /// `cancel(jobid, noent_ok)` full-cancellation, rooted at `root`: a
    /// DFV that stops descending once a vertex no longer holds `jobid`,
    /// releasing every span that vertex holds for it. Best-effort: every
    /// vertex under the tagged subtree is attempted even if one fails,
    /// and the last error is returned.
    pub fn remove(&mut self, root: VtxId, jobid: u64, noent_ok: bool) -> Result<(), CoreError> {
        let holds = self
            .graph
            .vertex(root)
            .map(|vx| vx.idata.tags.contains(&jobid))
            .unwrap_or(false);
        if !holds {
            return if noent_ok {
                Ok(())
            } else {
                Err(CoreError::not_found(format!("jobid {jobid} not found under root {root}")))
            };
        }
        info!(root, jobid, "remove: cancelling tagged subtree");
        self.errors.clear();
        self.cancel_subtree(root, jobid);
        match self.errors.last() {
            Some(msg) => Err(CoreError::internal(msg.to_string())),
            None => Ok(()),
        }
    }

    /// Release every span `jobid` holds at `v` and its tagged
    /// descendants, accumulating per-type released size for the
    /// caller (used by partial cancel to size an ancestor reduction).
    /// Does not touch vertices that don't hold `jobid`.
    fn cancel_subtree(&mut self, v: VtxId, jobid: u64) -> BTreeMap<String, u64> {
        let holds = self
            .graph
            .vertex(v)
            .map(|vx| vx.idata.tags.contains(&jobid))
            .unwrap_or(false);
        if !holds {
            return BTreeMap::new();
        }

        let children: Vec<VtxId> = self
            .graph
            .out_edges(v, DOM)
            .into_iter()
            .map(|e| self.graph.edge(e).unwrap().target)
            .collect();
        let mut released = BTreeMap::new();
        for child in children {
            for (ty, sz) in self.cancel_subtree(child, jobid) {
                *released.entry(ty).or_insert(0) += sz;
            }
        }

        let vx = self.graph.vertex(v).unwrap();
        *released.entry(vx.type_.clone()).or_insert(0) += vx.size;

        if let Some(x_span) = self.graph.vertex(v).unwrap().idata.x_spans.get(&jobid).copied() {
            if let Some(xc) = self.graph.vertex_mut(v).unwrap().idata.x_checker.as_mut() {
                if let Err(e) = xc.rem_span(x_span) {
                    self.errors.push(&e);
                }
            }
            self.graph.vertex_mut(v).unwrap().idata.x_spans.remove(&jobid);
        }

        if let Some(span) = self
            .graph
            .vertex(v)
            .unwrap()
            .idata
            .job2span
            .get(DOM)
            .and_then(|m| m.get(&jobid))
            .copied()
        {
            if let Some(mp) = self.graph.vertex_mut(v).unwrap().idata.subplans.get_mut(DOM) {
                if let Err(e) = mp.rem_span(span) {
                    self.errors.push(&e);
                }
            }
            if let Some(m) = self.graph.vertex_mut(v).unwrap().idata.job2span.get_mut(DOM) {
                m.remove(&jobid);
            }
        }

        let span = self.graph.vertex(v).unwrap().schedule.allocations.get(&jobid).copied();
        let span = span.or_else(|| self.graph.vertex(v).unwrap().schedule.reservations.get(&jobid).copied());
        if let Some(span) = span {
            if let Some(p) = self.graph.vertex_mut(v).unwrap().schedule.plans.as_mut() {
                if let Err(e) = p.rem_span(span) {
                    self.errors.push(&e);
                }
            }
        }
        let vx = self.graph.vertex_mut(v).unwrap();
        vx.schedule.allocations.remove(&jobid);
        vx.schedule.reservations.remove(&jobid);
        vx.idata.tags.remove(&jobid);

        released
    }

    /// `v`'s containment parent, if any — a tree, so at most one.
    fn parent_of(&self, v: VtxId) -> Option<VtxId> {
        self.graph.in_edges(v, DOM).into_iter().next().map(|e| self.graph.edge(e).unwrap().source)
    }

    /// Reduce every ancestor subplan from `from`'s parent up to and
    /// including `root` by `counts`, without touching tags.
    fn reduce_ancestor_subplans(
        &mut self,
        from: VtxId,
        root: VtxId,
        jobid: u64,
        counts: &BTreeMap<String, u64>,
    ) -> Result<(), CoreError> {
        let mut cur = from;
        loop {
            let Some(parent) = self.parent_of(cur) else { break };
            self.reduce_one_subplan(parent, jobid, counts)?;
            if parent == root {
                break;
            }
            cur = parent;
        }
        Ok(())
    }

    fn reduce_one_subplan(&mut self, v: VtxId, jobid: u64, counts: &BTreeMap<String, u64>) -> Result<(), CoreError> {
        let Some(span_id) = self
            .graph
            .vertex(v)
            .unwrap()
            .idata
            .job2span
            .get(DOM)
            .and_then(|m| m.get(&jobid))
            .copied()
        else {
            return Ok(());
        };
        let types: Vec<String> = self.graph.vertex(v).unwrap().idata.subplans[DOM].types().to_vec();
        let req: Vec<u64> = types.iter().map(|t| *counts.get(t).unwrap_or(&0)).collect();
        if req.iter().all(|&r| r == 0) {
            return Ok(());
        }
        let mut removed = false;
        self.graph
            .vertex_mut(v)
            .unwrap()
            .idata
            .subplans
            .get_mut(DOM)
            .unwrap()
            .reduce_span(span_id, &req, &mut removed)?;
        if removed {
            self.graph
                .vertex_mut(v)
                .unwrap()
                .idata
                .job2span
                .get_mut(DOM)
                .unwrap()
                .remove(&jobid);
        }
        Ok(())
    }

    /// `partial_cancel(root, doc, jobid)` — spec.md §4.6.4. Returns
    /// `full_cancel = (jobid ∉ root.tags)` after the reduction.
    pub fn partial_cancel(&mut self, root: VtxId, doc: &PartialCancelDoc, jobid: u64) -> Result<bool, CoreError> {
        info!(root, jobid, "partial_cancel: applying released spans");
        let released = match doc {
            PartialCancelDoc::Jgf(jgf) => self.partial_cancel_jgf(root, jgf, jobid)?,
            PartialCancelDoc::Rv1(rv1) => self.partial_cancel_rv1(root, rv1, jobid)?,
        };
        for (v, counts) in released {
            self.reduce_ancestor_subplans(v, root, jobid, &counts)?;
        }
        let full_cancel = !self
            .graph
            .vertex(root)
            .map(|vx| vx.idata.tags.contains(&jobid))
            .unwrap_or(false);
        Ok(full_cancel)
    }

    fn partial_cancel_jgf(
        &mut self,
        _root: VtxId,
        doc: &JgfDoc,
        jobid: u64,
    ) -> Result<Vec<(VtxId, BTreeMap<String, u64>)>, CoreError> {
        let mut out = Vec::new();
        for node in &doc.graph.nodes {
            let uniq_id: u64 = node
                .id
                .parse()
                .map_err(|_| CoreError::invalid_input(format!("JGF node id '{}' is not numeric", node.id)))?;
            let Some(v) = (0..self.graph.num_vertices()).find(|&v| self.graph.vertex(v).unwrap().uniq_id == uniq_id)
            else {
                continue;
            };
            let counts = self.cancel_subtree(v, jobid);
            if !counts.is_empty() {
                out.push((v, counts));
            }
        }
        Ok(out)
    }

    fn partial_cancel_rv1(
        &mut self,
        _root: VtxId,
        doc: &Rv1Doc,
        jobid: u64,
    ) -> Result<Vec<(VtxId, BTreeMap<String, u64>)>, CoreError> {
        let ranks = rv1::ranks_removed(doc)?;
        let mut out = Vec::new();
        for rank in ranks {
            let candidates: Vec<VtxId> = (0..self.graph.num_vertices())
                .filter(|&v| {
                    let vx = self.graph.vertex(v).unwrap();
                    vx.rank == rank as i64 && vx.idata.tags.contains(&jobid)
                })
                .collect();
            // The shortest-path root for this rank: the candidate whose
            // containment parent is not itself a candidate.
            let Some(&root_for_rank) = candidates.iter().find(|&&v| {
                self.parent_of(v).map(|p| !candidates.contains(&p)).unwrap_or(true)
            }) else {
                continue;
            };
            let counts = self.cancel_subtree(root_for_rank, jobid);
            if !counts.is_empty() {
                out.push((root_for_rank, counts));
            }
        }
        Ok(out)
    }
}
