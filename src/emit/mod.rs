//! Writers producing SIMPLE, PRETTY_SIMPLE, RLITE, JGF, RV1, and
//! RV1_NOSCHED output from the subgraph an `update` walk touches
//! (spec.md §4.7).
//!
//! `update` drives a [`Writer`] while it recurses so every format shares
//! one walk rather than re-traversing the graph per emitter; each
//! concrete format then renders from the vertices/edges a
//! [`RecordingWriter`] captured. Hostlist compression goes through the
//! [`Hostlist`] trait rather than a concrete external crate — spec.md
//! §4.7 treats hostlist support as an external-library contract, and
//! [`SimpleHostlist`] is one conforming implementation, good enough for
//! the idset-shaped hostnames (`foo0`..`foo9`) the seeded scenarios use.

pub mod jgf;
pub mod rlite;
pub mod rv1;

use crate::error::CoreError;
use crate::graph::{Edge, Graph, VtxId};
use crate::idset;

/// Callback interface `update` drives during its commit walk (spec.md
/// §4.6.3). Implementors accumulate whatever representation they need;
/// [`RecordingWriter`] is the crate's own accumulator, feeding the
/// format renderers below.
pub trait Writer {
    fn emit_vertex(&mut self, graph: &Graph, v: VtxId);
    fn emit_edge(&mut self, graph: &Graph, parent: VtxId, child: VtxId);
}

/// Captures the subgraph `update` touches in call order: vertices
/// post-order (children before parent, matching the DFU walk), edges as
/// each child finishes. The format renderers below consume this rather
/// than re-walking the graph.
#[derive(Debug, Clone, Default)]
pub struct RecordingWriter {
    pub vertices: Vec<VtxId>,
    pub edges: Vec<(VtxId, VtxId)>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Children of `v` among the recorded edges, in the order recorded.
    pub fn children_of(&self, v: VtxId) -> Vec<VtxId> {
        self.edges.iter().filter(|(p, _)| *p == v).map(|(_, c)| *c).collect()
    }

    /// The vertex no recorded edge targets — the walk's root.
    pub fn root(&self) -> Option<VtxId> {
        let targets: std::collections::BTreeSet<VtxId> = self.edges.iter().map(|(_, c)| *c).collect();
        self.vertices.iter().copied().find(|v| !targets.contains(v))
    }
}

impl Writer for RecordingWriter {
    fn emit_vertex(&mut self, _graph: &Graph, v: VtxId) {
        self.vertices.push(v);
    }

    fn emit_edge(&mut self, _graph: &Graph, parent: VtxId, child: VtxId) {
        self.edges.push((parent, child));
    }
}

/// The DOM containment edge from `parent` to `child`, if the graph
/// still has one — used to recover a child's `needs`/`exclusive` mode
/// after `update` has already committed it.
pub fn containment_edge<'a>(graph: &'a Graph, subsystem: &str, parent: VtxId, child: VtxId) -> Option<&'a Edge> {
    graph
        .out_edges(parent, subsystem)
        .into_iter()
        .map(|e| graph.edge(e).unwrap())
        .find(|e| e.target == child)
}

/// `prefix name[needs:mode]`, mode ∈ {`x`,`s`} — spec.md §4.7's SIMPLE
/// format. `prefix` is indentation by depth in the recorded tree.
pub fn emit_simple(graph: &Graph, subsystem: &str, rec: &RecordingWriter) -> Result<String, CoreError> {
    render_simple(graph, subsystem, rec, false)
}

/// Same content as [`emit_simple`] but root-first: the root line is
/// moved to the front rather than appearing in post-order position.
pub fn emit_pretty_simple(graph: &Graph, subsystem: &str, rec: &RecordingWriter) -> Result<String, CoreError> {
    render_simple(graph, subsystem, rec, true)
}

fn render_simple(graph: &Graph, subsystem: &str, rec: &RecordingWriter, pretty: bool) -> Result<String, CoreError> {
    let Some(root) = rec.root() else {
        return Ok(String::new());
    };
    let mut lines = Vec::new();
    simple_line(graph, subsystem, rec, root, 0, &mut lines)?;
    if pretty && !lines.is_empty() {
        let root_line = lines.remove(0);
        lines.insert(0, root_line);
    }
    Ok(lines.join("\n"))
}

fn simple_line(
    graph: &Graph,
    subsystem: &str,
    rec: &RecordingWriter,
    v: VtxId,
    depth: usize,
    out: &mut Vec<String>,
) -> Result<(), CoreError> {
    let vx = graph
        .vertex(v)
        .ok_or_else(|| CoreError::not_found(format!("no vertex {v}")))?;
    let (needs, exclusive) = rec
        .edges
        .iter()
        .find(|(_, c)| *c == v)
        .and_then(|(p, _)| containment_edge(graph, subsystem, *p, v))
        .map(|e| (e.idata.needs.max(1), e.idata.exclusive))
        .unwrap_or((1, false));
    let mode = if exclusive { 'x' } else { 's' };
    out.push(format!("{}{}[{}:{}]", "  ".repeat(depth), vx.name, needs, mode));
    for child in rec.children_of(v) {
        simple_line(graph, subsystem, rec, child, depth + 1, out)?;
    }
    Ok(())
}

/// A hostlist codec seam (spec.md §4.7's "external hostlist library
/// contract"). Implementors own the accumulated entry set and know how
/// to fold a `decode`d batch in, and how to `encode` back to the
/// compressed wire form.
pub trait Hostlist {
    fn decode(&self, s: &str) -> Result<Vec<String>, CoreError>;
    fn append(&mut self, host: &str);
    fn encode(&self) -> String;
}

/// The idset-shaped hostlist implementation this crate ships:
/// `prefix<digits>` hostnames compressed the same way `idset::compress`
/// compresses rank sets. Hosts with no trailing digits, or whose prefix
/// differs from the first host appended, are kept as their own
/// singleton entries rather than folded into the numeric run.
#[derive(Debug, Clone, Default)]
pub struct SimpleHostlist {
    prefix: Option<String>,
    ids: std::collections::BTreeSet<u32>,
    other: Vec<String>,
}

impl SimpleHostlist {
    pub fn new() -> Self {
        Self::default()
    }
}

fn split_host(host: &str) -> Option<(&str, u32)> {
    let digits_at = host.find(|c: char| c.is_ascii_digit())?;
    let (prefix, digits) = host.split_at(digits_at);
    if digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok().map(|n| (prefix, n))
    } else {
        None
    }
}

impl Hostlist for SimpleHostlist {
    fn decode(&self, s: &str) -> Result<Vec<String>, CoreError> {
        idset::expand_hostlist(s)
    }

    fn append(&mut self, host: &str) {
        let compatible_prefix = match &self.prefix {
            Some(cur) => split_host(host).is_some_and(|(p, _)| p == cur),
            None => true,
        };
        match split_host(host) {
            Some((p, n)) if compatible_prefix => {
                self.prefix.get_or_insert_with(|| p.to_string());
                self.ids.insert(n);
            }
            _ => self.other.push(host.to_string()),
        }
    }

    fn encode(&self) -> String {
        let mut parts = Vec::new();
        if let Some(prefix) = &self.prefix {
            if !self.ids.is_empty() {
                parts.push(format!("{prefix}[{}]", idset::compress(self.ids.iter().copied())));
            }
        }
        parts.extend(self.other.iter().cloned());
        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn sample() -> (Graph, VtxId, VtxId, VtxId) {
        let mut g = Graph::new();
        let root = g.add_vertex("node", "node", "node0", -1, 0, 1, "");
        let a = g.add_vertex("core", "core", "core0", 0, 0, 1, "");
        let b = g.add_vertex("core", "core", "core1", 1, 0, 1, "");
        let ea = g.add_edge("containment", "contains", root, a, 0).unwrap();
        let eb = g.add_edge("containment", "contains", root, b, 0).unwrap();
        g.edge_mut(ea).unwrap().idata.needs = 1;
        g.edge_mut(eb).unwrap().idata.needs = 1;
        g.edge_mut(eb).unwrap().idata.exclusive = true;
        (g, root, a, b)
    }

    #[test]
    fn recording_writer_tracks_root_and_children() {
        let (_, root, a, b) = sample();
        let mut rec = RecordingWriter::new();
        rec.edges.push((root, a));
        rec.edges.push((root, b));
        rec.vertices.push(a);
        rec.vertices.push(b);
        rec.vertices.push(root);
        assert_eq!(rec.root(), Some(root));
        assert_eq!(rec.children_of(root), vec![a, b]);
    }

    #[test]
    fn simple_emits_indented_needs_and_mode() {
        let (g, root, a, b) = sample();
        let mut rec = RecordingWriter::new();
        rec.edges.push((root, a));
        rec.edges.push((root, b));
        rec.vertices.push(a);
        rec.vertices.push(b);
        rec.vertices.push(root);
        let s = emit_simple(&g, "containment", &rec).unwrap();
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines[0], "node0[1:s]");
        assert!(lines.contains(&"  core0[1:s]"));
        assert!(lines.contains(&"  core1[1:x]"));
    }

    #[test]
    fn simple_hostlist_compresses_numeric_runs() {
        let mut hl = SimpleHostlist::new();
        for h in ["foo2", "foo3", "foo4"] {
            hl.append(h);
        }
        assert_eq!(hl.encode(), "foo[2-4]");
    }

    #[test]
    fn simple_hostlist_keeps_mismatched_prefix_as_own_entry() {
        let mut hl = SimpleHostlist::new();
        hl.append("foo2");
        hl.append("bar9");
        assert_eq!(hl.encode(), "foo[2],bar9");
    }
}
