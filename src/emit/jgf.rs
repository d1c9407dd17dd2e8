//! JGF: `{graph:{nodes, edges}}` with metadata per vertex (spec.md
//! §4.7). Grounded on
//! `Steditor-Enumeration-of-Solution-Parts/src/io/json.rs`'s
//! serialize-to-writer idiom — the teacher itself never emits JSON, so
//! this crate reaches for `serde_json` directly rather than adapting a
//! teacher module that does not exist.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::graph::{Graph, VtxId};

use super::RecordingWriter;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeMetadata {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub id: i64,
    pub rank: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub paths: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub ephemeral: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agfilter: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JgfNode {
    pub id: String,
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EdgeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsystem: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JgfEdge {
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EdgeMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JgfGraph {
    pub nodes: Vec<JgfNode>,
    pub edges: Vec<JgfEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JgfDoc {
    pub graph: JgfGraph,
}

fn node_metadata(graph: &Graph, v: VtxId) -> Result<NodeMetadata, CoreError> {
    let vx = graph
        .vertex(v)
        .ok_or_else(|| CoreError::not_found(format!("no vertex {v}")))?;
    Ok(NodeMetadata {
        type_: vx.type_.clone(),
        basename: Some(vx.basename.clone()),
        name: Some(vx.name.clone()),
        id: vx.local_id,
        rank: vx.rank,
        unit: if vx.unit.is_empty() { None } else { Some(vx.unit.clone()) },
        size: Some(vx.size),
        exclusive: None,
        properties: vx.properties.clone(),
        paths: vx.paths.clone(),
        ephemeral: vx.idata.ephemeral.clone(),
        agfilter: None,
    })
}

/// Render the subgraph `rec` captured as a full JGF document.
pub fn write(graph: &Graph, subsystem: &str, rec: &RecordingWriter) -> Result<JgfDoc, CoreError> {
    let mut nodes = Vec::new();
    for &v in &rec.vertices {
        let uniq_id = graph
            .vertex(v)
            .ok_or_else(|| CoreError::not_found(format!("no vertex {v}")))?
            .uniq_id;
        nodes.push(JgfNode {
            id: uniq_id.to_string(),
            metadata: node_metadata(graph, v)?,
        });
    }
    let mut edges = Vec::new();
    for &(p, c) in &rec.edges {
        let source = graph.vertex(p).unwrap().uniq_id.to_string();
        let target = graph.vertex(c).unwrap().uniq_id.to_string();
        edges.push(JgfEdge {
            source,
            target,
            metadata: Some(EdgeMetadata { subsystem: Some(subsystem.to_string()) }),
        });
    }
    Ok(JgfDoc { graph: JgfGraph { nodes, edges } })
}

pub fn to_string(graph: &Graph, subsystem: &str, rec: &RecordingWriter) -> Result<String, CoreError> {
    let doc = write(graph, subsystem, rec)?;
    serde_json::to_string(&doc).map_err(|e| CoreError::internal(format!("JGF serialize error: {e}")))
}

pub fn parse(s: &str) -> Result<JgfDoc, CoreError> {
    serde_json::from_str(s).map_err(|e| CoreError::invalid_input(format!("JGF parse error: {e}")))
}

/// What `cancel`'s JGF path needs out of a parsed document (spec.md
/// §4.6.4): per-type counts to subtract, and the ranks the RV1 reader
/// would otherwise have had to infer.
#[derive(Debug, Clone, Default)]
pub struct ModData {
    pub type_to_count: BTreeMap<String, u64>,
    pub node_ids: Vec<u64>,
}

/// Build [`ModData`] from a parsed JGF document: one unit per node,
/// aggregated by type across all nodes the document names.
pub fn mod_data(doc: &JgfDoc) -> ModData {
    let mut md = ModData::default();
    for node in &doc.graph.nodes {
        *md.type_to_count.entry(node.metadata.type_.clone()).or_insert(0) +=
            node.metadata.size.unwrap_or(1);
        if let Ok(id) = node.id.parse() {
            md.node_ids.push(id);
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn write_then_parse_round_trips_node_count() {
        let mut g = Graph::new();
        let root = g.add_vertex("node", "node", "node0", -1, 0, 1, "");
        let a = g.add_vertex("core", "core", "core0", 0, 0, 1, "");
        g.add_edge("containment", "contains", root, a, 0).unwrap();

        let mut rec = RecordingWriter::new();
        rec.vertices.push(a);
        rec.vertices.push(root);
        rec.edges.push((root, a));

        let s = to_string(&g, "containment", &rec).unwrap();
        let doc = parse(&s).unwrap();
        assert_eq!(doc.graph.nodes.len(), 2);
        assert_eq!(doc.graph.edges.len(), 1);
    }

    #[test]
    fn mod_data_aggregates_by_type() {
        let doc = JgfDoc {
            graph: JgfGraph {
                nodes: vec![
                    JgfNode {
                        id: "1".into(),
                        metadata: NodeMetadata {
                            type_: "core".into(),
                            size: Some(1),
                            ..Default::default()
                        },
                    },
                    JgfNode {
                        id: "2".into(),
                        metadata: NodeMetadata {
                            type_: "core".into(),
                            size: Some(1),
                            ..Default::default()
                        },
                    },
                ],
                edges: vec![],
            },
        };
        let md = mod_data(&doc);
        assert_eq!(md.type_to_count.get("core"), Some(&2));
        assert_eq!(md.node_ids, vec![1, 2]);
    }
}
