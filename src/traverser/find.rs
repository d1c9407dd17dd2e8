//! `find(writers, criteria)` — spec.md §4.6.6.
//!
//! A DFV where each vertex is tested against a boolean predicate tree;
//! a vertex is emitted iff it matches or any descendant does. Parental
//! overrides ("a down parent forces children down, an allocated parent
//! forces children allocated") are threaded down the recursion rather
//! than re-derived per vertex, the same accumulate-as-you-descend shape
//! `prime_vertex`'s `dfv` aggregate uses.

use std::collections::BTreeSet;

use tracing::info;

use crate::emit::Writer;
use crate::error::CoreError;
use crate::graph::{Status, VtxId};

use super::{MatchMeta, Traverser, DOM};

/// Leaf predicates spec.md §4.6.6 names, combined by `And`/`Or`/`Not`.
/// `Agfilter(jobid)` — `jobid == 0` requests current aggregate usage
/// rather than one job's share, per spec.md's documented special case.
#[derive(Debug, Clone)]
pub enum Criteria {
    Status(Status),
    SchedNow,
    SchedFuture,
    JobidAlloc(u64),
    JobidReserved(u64),
    JobidTag(u64),
    Agfilter(u64),
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Not(Box<Criteria>),
}

#[derive(Debug, Clone, Default)]
struct Overrides {
    forced_down: bool,
    forced_alloc: BTreeSet<u64>,
    forced_reserved: BTreeSet<u64>,
}

impl Traverser {
    /// Runs the search, writing every matching vertex (and the edges
    /// connecting matches to the root) to `writer`. Returns the number
    /// of vertices whose own predicate held (not counting ones emitted
    /// only because a descendant matched).
    pub fn find(
        &mut self,
        root: VtxId,
        criteria: &Criteria,
        meta: MatchMeta,
        writer: &mut dyn Writer,
    ) -> Result<usize, CoreError> {
        self.tick();
        info!(root, "find: starting DFV search");
        self.errors.clear();
        let (matched, _) = self.find_vertex(root, criteria, meta, &Overrides::default(), writer);
        Ok(matched)
    }

    fn find_vertex(
        &mut self,
        v: VtxId,
        criteria: &Criteria,
        meta: MatchMeta,
        overrides: &Overrides,
        writer: &mut dyn Writer,
    ) -> (usize, bool) {
        let mut child_overrides = overrides.clone();
        if let Some(vx) = self.graph.vertex(v) {
            if vx.status == Status::Down {
                child_overrides.forced_down = true;
            }
            child_overrides.forced_alloc.extend(vx.schedule.allocations.keys().copied());
            child_overrides.forced_reserved.extend(vx.schedule.reservations.keys().copied());
        }

        let self_match = self.eval(v, criteria, meta, overrides);

        let children: Vec<VtxId> = self
            .graph
            .out_edges(v, DOM)
            .into_iter()
            .map(|e| self.graph.edge(e).unwrap().target)
            .collect();

        let mut matched_count = self_match as usize;
        let mut matched_children = Vec::new();
        for child in children {
            let (count, child_matched) = self.find_vertex(child, criteria, meta, &child_overrides, writer);
            matched_count += count;
            if child_matched {
                matched_children.push(child);
            }
        }

        if self_match || !matched_children.is_empty() {
            writer.emit_vertex(&self.graph, v);
            for child in matched_children {
                writer.emit_edge(&self.graph, v, child);
            }
            (matched_count, true)
        } else {
            (matched_count, false)
        }
    }

    fn eval(&mut self, v: VtxId, c: &Criteria, meta: MatchMeta, ov: &Overrides) -> bool {
        let Some(vx) = self.graph.vertex(v) else {
            self.errors.push_msg(format!("find: no vertex {v}"));
            return false;
        };
        match c {
            Criteria::Status(s) => {
                if ov.forced_down {
                    *s == Status::Down
                } else {
                    vx.status == *s
                }
            }
            Criteria::SchedNow => vx
                .schedule
                .plans
                .as_ref()
                .and_then(|p| p.avail_during(meta.at, meta.duration.max(1)).ok().map(|a| a < p.total() as i64))
                .unwrap_or(false),
            Criteria::SchedFuture => vx
                .schedule
                .plans
                .as_ref()
                .map(|p| p.spans().any(|(_, s)| s.start > meta.at))
                .unwrap_or(false),
            Criteria::JobidAlloc(j) => ov.forced_alloc.contains(j) || vx.schedule.allocations.contains_key(j),
            Criteria::JobidReserved(j) => ov.forced_reserved.contains(j) || vx.schedule.reservations.contains_key(j),
            Criteria::JobidTag(j) => vx.idata.tags.contains(j),
            Criteria::Agfilter(jobid) => {
                if *jobid == 0 {
                    !vx.idata.subplans.is_empty()
                } else {
                    vx.idata.tags.contains(jobid) && !vx.idata.subplans.is_empty()
                }
            }
            Criteria::And(cs) => {
                let cs = cs.clone();
                cs.iter().all(|c| self.eval(v, c, meta, ov))
            }
            Criteria::Or(cs) => {
                let cs = cs.clone();
                cs.iter().any(|c| self.eval(v, c, meta, ov))
            }
            Criteria::Not(c) => {
                let c = (**c).clone();
                !self.eval(v, &c, meta, ov)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::RecordingWriter;
    use crate::graph::Graph;
    use crate::policy::builtin::FirstMatch;

    fn sample() -> (Graph, VtxId, VtxId, VtxId) {
        let mut g = Graph::new();
        let root = g.add_vertex("cluster", "cluster", "cluster0", -1, -1, 1, "");
        let up = g.add_vertex("node", "node", "node0", 0, 0, 1, "");
        let down = g.add_vertex("node", "node", "node1", 1, 1, 1, "");
        g.add_edge("containment", "contains", root, up, 0).unwrap();
        g.add_edge("containment", "contains", root, down, 0).unwrap();
        g.mark(down, "containment", Status::Down, false);
        (g, root, up, down)
    }

    fn meta() -> MatchMeta {
        MatchMeta { at: 0, duration: 10, satisfiability_only: false }
    }

    #[test]
    fn finds_down_vertex_and_emits_root_as_ancestor() {
        let (graph, root, _up, down) = sample();
        let mut t = Traverser::new(graph, Box::new(FirstMatch));
        let mut rec = RecordingWriter::new();
        let matched = t.find(root, &Criteria::Status(Status::Down), meta(), &mut rec).unwrap();
        assert_eq!(matched, 1);
        assert!(rec.vertices.contains(&down));
        assert!(rec.vertices.contains(&root));
    }

    #[test]
    fn does_not_emit_unrelated_subtree() {
        let (graph, root, up, down) = sample();
        let mut t = Traverser::new(graph, Box::new(FirstMatch));
        let mut rec = RecordingWriter::new();
        t.find(root, &Criteria::Status(Status::Down), meta(), &mut rec).unwrap();
        assert!(!rec.vertices.contains(&up));
        let _ = down;
    }

    #[test]
    fn down_parent_override_forces_children_down() {
        let mut g = Graph::new();
        let root = g.add_vertex("cluster", "cluster", "cluster0", -1, -1, 1, "");
        let rack = g.add_vertex("rack", "rack", "rack0", 0, -1, 1, "");
        let node = g.add_vertex("node", "node", "node0", 0, 0, 1, "");
        g.add_edge("containment", "contains", root, rack, 0).unwrap();
        g.add_edge("containment", "contains", rack, node, 0).unwrap();
        g.mark(rack, "containment", Status::Down, false);

        let mut t = Traverser::new(g, Box::new(FirstMatch));
        let mut rec = RecordingWriter::new();
        let matched = t.find(root, &Criteria::Status(Status::Down), meta(), &mut rec).unwrap();
        // rack itself plus node forced down by the override.
        assert_eq!(matched, 2);
        assert!(rec.vertices.contains(&node));
    }

    #[test]
    fn or_and_not_combinators_evaluate() {
        let (graph, root, up, _down) = sample();
        let mut t = Traverser::new(graph, Box::new(FirstMatch));
        let c = Criteria::Or(vec![
            Criteria::Status(Status::Up),
            Criteria::Status(Status::Down),
        ]);
        let mut rec = RecordingWriter::new();
        let matched = t.find(root, &c, meta(), &mut rec).unwrap();
        assert_eq!(matched, 3);
        assert!(rec.vertices.contains(&up));

        let not_down = Criteria::Not(Box::new(Criteria::Status(Status::Down)));
        let mut rec2 = RecordingWriter::new();
        t.find(root, &not_down, meta(), &mut rec2).unwrap();
        assert!(rec2.vertices.contains(&up));
    }
}
