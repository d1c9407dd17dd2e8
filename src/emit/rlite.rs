//! RLITE: per-node records of reducer-type resources, plus a
//! hostlist-compressed `nodelist` and a property→rank-set map
//! (spec.md §4.7).
//!
//! Walks the recorded subtree bottom-up, accumulating ids of
//! `REDUCER_TYPES` at each vertex until a `GATHERER_TYPE` ancestor
//! closes — the node absorbs everything beneath it into one compressed
//! range per resource type, the same roll-up the original RV1 writer
//! performs at node granularity.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::graph::{Graph, VtxId};
use crate::idset;

use super::{Hostlist, RecordingWriter, SimpleHostlist};

/// Resource types whose ids are accumulated and compressed rather than
/// emitted as their own record.
pub const REDUCER_TYPES: &[&str] = &["core", "gpu"];
/// The type whose closing flushes one `RliteEntry`.
pub const GATHERER_TYPE: &str = "node";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RliteEntry {
    pub rank: String,
    pub children: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RliteDoc {
    #[serde(rename = "R_lite")]
    pub r_lite: Vec<RliteEntry>,
    pub nodelist: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub properties: BTreeMap<String, String>,
}

pub fn write(graph: &Graph, rec: &RecordingWriter) -> Result<RliteDoc, CoreError> {
    let Some(root) = rec.root() else {
        return Ok(RliteDoc::default());
    };
    let mut entries = Vec::new();
    let mut nodelist = SimpleHostlist::new();
    let mut properties: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
    collect(graph, rec, root, &mut entries, &mut nodelist, &mut properties)?;
    let properties = properties
        .into_iter()
        .map(|(k, ranks)| (k, idset::compress(ranks)))
        .collect();
    Ok(RliteDoc {
        r_lite: entries,
        nodelist: vec![nodelist.encode()],
        properties,
    })
}

fn collect(
    graph: &Graph,
    rec: &RecordingWriter,
    v: VtxId,
    entries: &mut Vec<RliteEntry>,
    nodelist: &mut SimpleHostlist,
    properties: &mut BTreeMap<String, BTreeSet<u32>>,
) -> Result<BTreeMap<String, BTreeSet<u32>>, CoreError> {
    let vx = graph
        .vertex(v)
        .ok_or_else(|| CoreError::not_found(format!("no vertex {v}")))?;
    let rank = vx.rank.max(0) as u32;

    let mut agg: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
    if REDUCER_TYPES.contains(&vx.type_.as_str()) {
        let id = if vx.local_id >= 0 { vx.local_id as u32 } else { 0 };
        agg.entry(vx.type_.clone()).or_default().insert(id);
    }
    for prop in vx.properties.keys() {
        properties.entry(prop.clone()).or_default().insert(rank);
    }

    for child in rec.children_of(v) {
        let child_agg = collect(graph, rec, child, entries, nodelist, properties)?;
        for (ty, ids) in child_agg {
            agg.entry(ty).or_default().extend(ids);
        }
    }

    if vx.type_ == GATHERER_TYPE {
        nodelist.append(&vx.name);
        let children = agg
            .iter()
            .map(|(ty, ids)| (ty.clone(), idset::compress(ids.iter().copied())))
            .collect();
        entries.push(RliteEntry {
            rank: idset::compress([rank]),
            children,
        });
        return Ok(BTreeMap::new());
    }
    Ok(agg)
}

pub fn to_string(graph: &Graph, rec: &RecordingWriter) -> Result<String, CoreError> {
    let doc = write(graph, rec)?;
    serde_json::to_string(&doc).map_err(|e| CoreError::internal(format!("RLITE serialize error: {e}")))
}
