//! Resource graph storage: vertices, edges, and the per-vertex
//! bookkeeping the traverser reads and mutates (spec §3, §4.11).
//!
//! Vertices and edges live in flat, append-only `Vec`s indexed by a
//! stable id — the same shape Steditor's adjacency-array graphs use,
//! adapted here to grow incrementally (priming adds vertices/edges one
//! at a time rather than bulk-loading a fixed edge list) and to carry
//! the scheduling/idata payload the matcher needs on every vertex.

pub mod color;

use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::planner::multi::MultiPlanner;
use crate::planner::Planner;
use color::{Color, ColorState};

/// Capacity of the per-vertex exclusivity checker: an `x_checker`
/// planner tracks only "is this vertex exclusively claimed", never a
/// real resource count, so its total is a large constant rather than
/// anything jobspec-derived.
pub const X_CHECKER_NJOBS: u64 = 1 << 30;

pub type VtxId = usize;
pub type EdgeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Up,
    Down,
    Lost,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "up",
            Status::Down => "down",
            Status::Lost => "lost",
        }
    }
}

/// Per-vertex scheduling state: the vertex's own allocation timeline
/// plus which jobs hold which span on it.
#[derive(Debug, Clone, Default)]
pub struct ScheduleData {
    pub plans: Option<Planner>,
    pub allocations: BTreeMap<u64, u64>,
    pub reservations: BTreeMap<u64, u64>,
}

/// Traversal-local bookkeeping that does not belong to the resource's
/// identity: exclusivity, subsystem subplans, tags, and per-subsystem
/// DFS color.
#[derive(Debug, Clone, Default)]
pub struct VertexIdata {
    pub x_checker: Option<Planner>,
    pub subplans: BTreeMap<String, MultiPlanner>,
    pub tags: std::collections::BTreeSet<u64>,
    pub job2span: BTreeMap<String, BTreeMap<u64, u64>>,
    pub x_spans: BTreeMap<u64, u64>,
    pub colors: BTreeMap<String, Color>,
    pub member_of: BTreeMap<String, String>,
    pub ephemeral: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: VtxId,
    pub uniq_id: u64,
    pub type_: String,
    pub basename: String,
    pub name: String,
    /// The resource's own numeric `id` field (e.g. core index); `-1`
    /// when the vertex has none (clusters, synthetic roots).
    pub local_id: i64,
    pub rank: i64,
    pub size: u64,
    pub unit: String,
    pub properties: BTreeMap<String, String>,
    pub paths: BTreeMap<String, String>,
    pub status: Status,
    pub schedule: ScheduleData,
    pub idata: VertexIdata,
    out_edges: Vec<EdgeId>,
    in_edges: Vec<EdgeId>,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeIdata {
    pub member_of: BTreeMap<String, String>,
    pub weight: i64,
    pub trav_token: u64,
    pub needs: u64,
    pub exclusive: bool,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub source: VtxId,
    pub target: VtxId,
    pub subsystem: String,
    pub relation: String,
    pub idata: EdgeIdata,
}

#[derive(Debug, Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    next_uniq_id: u64,
    color_states: BTreeMap<String, ColorState>,
    path_index: BTreeMap<(String, String), VtxId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(
        &mut self,
        type_: impl Into<String>,
        basename: impl Into<String>,
        name: impl Into<String>,
        local_id: i64,
        rank: i64,
        size: u64,
        unit: impl Into<String>,
    ) -> VtxId {
        let id = self.vertices.len();
        let uniq_id = self.next_uniq_id;
        self.next_uniq_id += 1;
        self.vertices.push(Vertex {
            id,
            uniq_id,
            type_: type_.into(),
            basename: basename.into(),
            name: name.into(),
            local_id,
            rank,
            size,
            unit: unit.into(),
            properties: BTreeMap::new(),
            paths: BTreeMap::new(),
            status: Status::Up,
            schedule: ScheduleData::default(),
            idata: VertexIdata::default(),
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        });
        id
    }

    pub fn add_edge(
        &mut self,
        subsystem: impl Into<String>,
        relation: impl Into<String>,
        source: VtxId,
        target: VtxId,
        weight: i64,
    ) -> Result<EdgeId, CoreError> {
        if source >= self.vertices.len() || target >= self.vertices.len() {
            return Err(CoreError::invalid_input("edge endpoint out of range"));
        }
        let id = self.edges.len();
        let subsystem = subsystem.into();
        self.edges.push(Edge {
            id,
            source,
            target,
            subsystem,
            relation: relation.into(),
            idata: EdgeIdata {
                weight,
                ..EdgeIdata::default()
            },
        });
        self.vertices[source].out_edges.push(id);
        self.vertices[target].in_edges.push(id);
        Ok(id)
    }

    pub fn vertex(&self, id: VtxId) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    pub fn vertex_mut(&mut self, id: VtxId) -> Option<&mut Vertex> {
        self.vertices.get_mut(id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(id)
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Register the canonical path for `vtx` in `subsystem`, enabling
    /// later lookups by `mark`/`remove_subgraph`/`find`.
    pub fn register_path(&mut self, subsystem: impl Into<String>, path: impl Into<String>, vtx: VtxId) {
        let subsystem = subsystem.into();
        let path = path.into();
        if let Some(v) = self.vertices.get_mut(vtx) {
            v.paths.insert(subsystem.clone(), path.clone());
        }
        self.path_index.insert((subsystem, path), vtx);
    }

    pub fn lookup_path(&self, subsystem: &str, path: &str) -> Option<VtxId> {
        self.path_index
            .get(&(subsystem.to_string(), path.to_string()))
            .copied()
    }

    /// `v`'s out-edges within `subsystem`, ordered by descending
    /// `(weight, target.uniq_id)` — invariant I6's declared out-edge
    /// order. Computed on demand: a weight change (`set_edge_weight`)
    /// needs no separate reinsertion step because order is never cached.
    pub fn out_edges(&self, v: VtxId, subsystem: &str) -> Vec<EdgeId> {
        let Some(vertex) = self.vertices.get(v) else {
            return Vec::new();
        };
        let mut ids: Vec<EdgeId> = vertex
            .out_edges
            .iter()
            .copied()
            .filter(|&e| self.edges[e].subsystem == subsystem)
            .collect();
        ids.sort_by(|&a, &b| {
            let ea = &self.edges[a];
            let eb = &self.edges[b];
            let wa = ea.idata.weight;
            let wb = eb.idata.weight;
            let ua = self.vertices[ea.target].uniq_id;
            let ub = self.vertices[eb.target].uniq_id;
            wb.cmp(&wa).then(ub.cmp(&ua))
        });
        ids
    }

    pub fn in_edges(&self, v: VtxId, subsystem: &str) -> Vec<EdgeId> {
        let Some(vertex) = self.vertices.get(v) else {
            return Vec::new();
        };
        vertex
            .in_edges
            .iter()
            .copied()
            .filter(|&e| self.edges[e].subsystem == subsystem)
            .collect()
    }

    pub fn set_edge_weight(&mut self, e: EdgeId, weight: i64) -> Result<(), CoreError> {
        let edge = self
            .edges
            .get_mut(e)
            .ok_or_else(|| CoreError::not_found(format!("no edge with id {e}")))?;
        edge.idata.weight = weight;
        Ok(())
    }

    /// Start a new traversal generation for `subsystem`'s coloring —
    /// O(1), no vertex is touched (spec §3 I7).
    pub fn reset_colors(&mut self, subsystem: &str) {
        self.color_states
            .entry(subsystem.to_string())
            .or_insert_with(ColorState::new)
            .reset();
    }

    pub fn vertex_color(&self, v: VtxId, subsystem: &str) -> Color {
        self.vertices
            .get(v)
            .and_then(|vx| vx.idata.colors.get(subsystem).copied())
            .unwrap_or_default()
    }

    pub fn set_vertex_color(&mut self, v: VtxId, subsystem: &str, c: Color) {
        if let Some(vx) = self.vertices.get_mut(v) {
            vx.idata.colors.insert(subsystem.to_string(), c);
        }
    }

    pub fn color_state(&self, subsystem: &str) -> ColorState {
        self.color_states.get(subsystem).copied().unwrap_or_default()
    }

    pub fn is_white(&self, v: VtxId, subsystem: &str) -> bool {
        self.color_state(subsystem).is_white(self.vertex_color(v, subsystem))
    }

    pub fn is_gray(&self, v: VtxId, subsystem: &str) -> bool {
        self.color_state(subsystem).is_gray(self.vertex_color(v, subsystem))
    }

    pub fn is_black(&self, v: VtxId, subsystem: &str) -> bool {
        self.color_state(subsystem).is_black(self.vertex_color(v, subsystem))
    }

    pub fn mark_gray(&mut self, v: VtxId, subsystem: &str) {
        let c = self.color_state(subsystem).gray();
        self.set_vertex_color(v, subsystem, c);
    }

    pub fn mark_black(&mut self, v: VtxId, subsystem: &str) {
        let c = self.color_state(subsystem).black();
        self.set_vertex_color(v, subsystem, c);
    }

    /// Mark `v` (and, if `recursive`, every descendant reachable via
    /// `subsystem`'s containment edges) with `status`.
    pub fn mark(&mut self, v: VtxId, subsystem: &str, status: Status, recursive: bool) {
        if let Some(vx) = self.vertices.get_mut(v) {
            vx.status = status;
        }
        if !recursive {
            return;
        }
        let children: Vec<VtxId> = self
            .out_edges(v, subsystem)
            .into_iter()
            .map(|e| self.edges[e].target)
            .collect();
        for child in children {
            self.mark(child, subsystem, status, true);
        }
    }

    /// Detach `v` from its `subsystem` parent(s) and drop the path-index
    /// entry for `v` and every descendant reachable through `subsystem`.
    /// Vertex storage is left alone — descriptors stay valid at their
    /// existing ids, only reachability and path lookups change (spec.md
    /// §4.6.5's "these do not delete vertex storage").
    pub fn remove_subgraph(&mut self, v: VtxId, subsystem: &str) {
        for e in self.in_edges(v, subsystem) {
            let source = self.edges[e].source;
            if let Some(sx) = self.vertices.get_mut(source) {
                sx.out_edges.retain(|&x| x != e);
            }
            if let Some(vx) = self.vertices.get_mut(v) {
                vx.in_edges.retain(|&x| x != e);
            }
        }
        let mut stack = vec![v];
        while let Some(cur) = stack.pop() {
            self.path_index.retain(|_, vtx| *vtx != cur);
            if let Some(vx) = self.vertices.get_mut(cur) {
                vx.paths.remove(subsystem);
            }
            for e in self.out_edges(cur, subsystem) {
                stack.push(self.edges[e].target);
            }
        }
    }
}
