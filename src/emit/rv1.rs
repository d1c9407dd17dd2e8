//! RV1 / RV1_NOSCHED: the composite `{version, execution, scheduling?,
//! attributes?}` document (spec.md §4.7) — `execution` is an RLITE
//! document plus a time window, `scheduling` (when present) is the full
//! JGF this `update` walk produced.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::graph::Graph;

use super::rlite::{self, RliteDoc};
use super::{jgf, RecordingWriter};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Execution {
    #[serde(flatten)]
    pub rlite: RliteDoc,
    pub starttime: i64,
    pub expiration: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerAttrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemAttrs {
    pub system: SchedulerAttrs,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Rv1Doc {
    pub version: u32,
    pub execution: Execution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<jgf::JgfDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<SystemAttrs>,
}

/// Build the full RV1 document (`scheduling` populated).
pub fn write(
    graph: &Graph,
    subsystem: &str,
    rec: &RecordingWriter,
    starttime: i64,
    expiration: i64,
) -> Result<Rv1Doc, CoreError> {
    Ok(Rv1Doc {
        version: 1,
        execution: Execution {
            rlite: rlite::write(graph, rec)?,
            starttime,
            expiration,
        },
        scheduling: Some(jgf::write(graph, subsystem, rec)?),
        attributes: None,
    })
}

/// RV1_NOSCHED: the same document with `scheduling` omitted.
pub fn write_nosched(graph: &Graph, rec: &RecordingWriter, starttime: i64, expiration: i64) -> Result<Rv1Doc, CoreError> {
    Ok(Rv1Doc {
        version: 1,
        execution: Execution {
            rlite: rlite::write(graph, rec)?,
            starttime,
            expiration,
        },
        scheduling: None,
        attributes: None,
    })
}

pub fn to_string(doc: &Rv1Doc) -> Result<String, CoreError> {
    serde_json::to_string(doc).map_err(|e| CoreError::internal(format!("RV1 serialize error: {e}")))
}

pub fn parse(s: &str) -> Result<Rv1Doc, CoreError> {
    serde_json::from_str(s).map_err(|e| CoreError::invalid_input(format!("RV1 parse error: {e}")))
}

/// What cancel's RV1 path needs (spec.md §4.6.4): the ranks the
/// document covers, derived from `execution.R_lite`'s rank idsets.
pub fn ranks_removed(doc: &Rv1Doc) -> Result<Vec<u32>, CoreError> {
    let mut ranks = Vec::new();
    for entry in &doc.execution.rlite.r_lite {
        ranks.extend(crate::idset::decode(&entry.rank)?);
    }
    Ok(ranks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn nosched_omits_scheduling_key() {
        let mut g = Graph::new();
        let root = g.add_vertex("node", "node", "node0", -1, 0, 1, "");
        let mut rec = RecordingWriter::new();
        rec.vertices.push(root);
        let doc = write_nosched(&g, &rec, 100, 200).unwrap();
        let s = serde_json::to_string(&doc).unwrap();
        assert!(!s.contains("scheduling"));
        assert!(s.contains("\"starttime\":100"));
    }

    #[test]
    fn full_rv1_includes_scheduling_jgf() {
        let mut g = Graph::new();
        let root = g.add_vertex("node", "node", "node0", -1, 0, 1, "");
        let mut rec = RecordingWriter::new();
        rec.vertices.push(root);
        let doc = write(&g, "containment", &rec, 100, 200).unwrap();
        assert!(doc.scheduling.is_some());
    }

    #[test]
    fn ranks_removed_decodes_rlite_rank_idsets() {
        let doc = Rv1Doc {
            version: 1,
            execution: Execution {
                rlite: RliteDoc {
                    r_lite: vec![rlite::RliteEntry { rank: "0-2".into(), children: Default::default() }],
                    nodelist: vec![],
                    properties: Default::default(),
                },
                starttime: 0,
                expiration: 0,
            },
            scheduling: None,
            attributes: None,
        };
        assert_eq!(ranks_removed(&doc).unwrap(), vec![0, 1, 2]);
    }
}
