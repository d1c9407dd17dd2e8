//! `mark`/`remove_subgraph` — spec.md §4.6.5: status changes and
//! subtree removal, addressed either by a registered path or by a rank
//! number (the "shortest-path root of each rank's vertex set" — the
//! topmost vertex at that rank, found the same way `cancel`'s
//! `parent_of` finds a containment ancestor).

use std::collections::BTreeSet;

use tracing::info;

use crate::error::CoreError;
use crate::graph::{Status, VtxId};

use super::{Traverser, DOM};

impl Traverser {
    pub fn mark_path(&mut self, path: &str, status: Status) -> Result<(), CoreError> {
        let v = self.resolve_path(path)?;
        self.mark_vertex(v, status);
        Ok(())
    }

    pub fn mark_ranks(&mut self, ranks: &[i64], status: Status) -> Result<(), CoreError> {
        for &rank in ranks {
            let v = self.resolve_rank(rank)?;
            self.mark_vertex(v, status);
        }
        Ok(())
    }

    pub fn remove_subgraph_path(&mut self, path: &str) -> Result<(), CoreError> {
        let v = self.resolve_path(path)?;
        self.remove_subgraph_vertex(v);
        Ok(())
    }

    pub fn remove_subgraph_ranks(&mut self, ranks: &[i64]) -> Result<(), CoreError> {
        for &rank in ranks {
            let v = self.resolve_rank(rank)?;
            self.remove_subgraph_vertex(v);
        }
        Ok(())
    }

    fn resolve_path(&self, path: &str) -> Result<VtxId, CoreError> {
        self.graph
            .lookup_path(DOM, path)
            .ok_or_else(|| CoreError::not_found(format!("no vertex registered at path {path}")))
    }

    fn resolve_rank(&self, rank: i64) -> Result<VtxId, CoreError> {
        let candidates: BTreeSet<VtxId> = (0..self.graph.num_vertices())
            .filter(|&v| self.graph.vertex(v).map(|vx| vx.rank == rank).unwrap_or(false))
            .collect();
        candidates
            .iter()
            .copied()
            .find(|&v| {
                self.graph
                    .in_edges(v, DOM)
                    .iter()
                    .all(|&e| !candidates.contains(&self.graph.edge(e).unwrap().source))
            })
            .ok_or_else(|| CoreError::not_found(format!("no vertex at rank {rank}")))
    }

    fn mark_vertex(&mut self, v: VtxId, status: Status) {
        let before = self.count_up(v);
        self.graph.mark(v, DOM, status, true);
        let after = self.count_up(v);
        let delta = after - before;
        self.nodes_up += delta;
        info!(v, status = status.as_str(), delta, "mark: status updated");
    }

    fn remove_subgraph_vertex(&mut self, v: VtxId) {
        let removed = self.count_up(v);
        self.graph.remove_subgraph(v, DOM);
        self.nodes_up -= removed;
        info!(v, removed, "remove_subgraph: subtree disconnected");
    }

    fn count_up(&self, v: VtxId) -> i64 {
        let mut n = 0;
        self.count_up_rec(v, &mut n);
        n
    }

    fn count_up_rec(&self, v: VtxId, n: &mut i64) {
        if self.graph.vertex(v).map(|vx| vx.status == Status::Up).unwrap_or(false) {
            *n += 1;
        }
        for e in self.graph.out_edges(v, DOM) {
            self.count_up_rec(self.graph.edge(e).unwrap().target, n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::policy::builtin::FirstMatch;

    fn rack() -> (Graph, VtxId, VtxId, VtxId, VtxId) {
        let mut g = Graph::new();
        let root = g.add_vertex("cluster", "cluster", "cluster0", -1, -1, 1, "");
        let rack = g.add_vertex("rack", "rack", "rack0", 0, -1, 1, "");
        let node0 = g.add_vertex("node", "node", "node0", 0, 0, 1, "");
        let node1 = g.add_vertex("node", "node", "node1", 1, 1, 1, "");
        g.add_edge(DOM, "contains", root, rack, 0).unwrap();
        g.add_edge(DOM, "contains", rack, node0, 0).unwrap();
        g.add_edge(DOM, "contains", rack, node1, 0).unwrap();
        g.register_path(DOM, "/cluster0/rack0/node0", node0);
        (g, root, rack, node0, node1)
    }

    #[test]
    fn mark_by_path_updates_status_and_nodes_up() {
        let (graph, _root, _rack, node0, _node1) = rack();
        let mut t = Traverser::new(graph, Box::new(FirstMatch));
        let before = t.nodes_up();
        t.mark_path("/cluster0/rack0/node0", Status::Down).unwrap();
        assert_eq!(t.graph.vertex(node0).unwrap().status, Status::Down);
        assert_eq!(t.nodes_up(), before - 1);
    }

    #[test]
    fn mark_unknown_path_is_not_found() {
        let (graph, ..) = rack();
        let mut t = Traverser::new(graph, Box::new(FirstMatch));
        assert!(t.mark_path("/no/such/path", Status::Down).is_err());
    }

    #[test]
    fn mark_by_rank_finds_topmost_vertex_at_that_rank() {
        let (graph, _root, _rack, node0, _node1) = rack();
        let mut t = Traverser::new(graph, Box::new(FirstMatch));
        t.mark_ranks(&[0], Status::Down).unwrap();
        assert_eq!(t.graph.vertex(node0).unwrap().status, Status::Down);
    }

    #[test]
    fn remove_subgraph_by_path_detaches_and_decrements_nodes_up() {
        let (graph, rack_root, rack, node0, node1) = rack();
        let mut t = Traverser::new(graph, Box::new(FirstMatch));
        let before = t.nodes_up();
        t.remove_subgraph_path("/cluster0/rack0/node0").unwrap();
        assert!(t.graph.out_edges(rack, DOM).iter().all(|&e| t.graph.edge(e).unwrap().target != node0));
        assert_eq!(t.nodes_up(), before - 1);
        // vertex storage is untouched; node1 is unaffected.
        assert_eq!(t.graph.vertex(node0).unwrap().name, "node0");
        assert_eq!(t.graph.vertex(node1).unwrap().status, Status::Up);
        let _ = rack_root;
    }

    #[test]
    fn remove_subgraph_by_rank_removes_whole_subtree_count() {
        let (graph, _root, rack, node0, _node1) = rack();
        let mut t = Traverser::new(graph, Box::new(FirstMatch));
        let before = t.nodes_up();
        t.remove_subgraph_ranks(&[0]).unwrap();
        assert_eq!(t.nodes_up(), before - 1);
        assert!(t.graph.out_edges(rack, DOM).iter().all(|&e| t.graph.edge(e).unwrap().target != node0));
    }
}
