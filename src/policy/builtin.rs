//! Two concrete [`MatchPolicy`] implementations shipped as the crate's
//! defaults, the way `timpani-o` ships three concrete scheduling
//! algorithms behind one dispatch point.

use super::{CbResult, DfuContext, MatchPolicy, CB_ERR, CB_OK};
use crate::graph::VtxId;
use crate::scoring::MATCH_UNMET;

/// Takes the first subtree whose accumulated score clears
/// [`MATCH_UNMET`]; switches the DFV walk to dynamic out-edge order
/// with `stop_on_k_matches = 1` so exploration can exit early once one
/// qualifying candidate per requested type is found.
#[derive(Debug, Default)]
pub struct FirstMatch;

impl MatchPolicy for FirstMatch {
    fn dom_discover_vtx(&self, _vtx: VtxId, _subsystem: &str, _dfu: &dyn DfuContext) -> CbResult {
        CB_OK
    }

    fn dom_finish_vtx(&self, _vtx: VtxId, _subsystem: &str, dfu: &dyn DfuContext) -> CbResult {
        if dfu.overall_score() > MATCH_UNMET {
            CB_OK
        } else {
            CB_ERR
        }
    }

    fn dom_finish_slot(&self, _subsystem: &str, dfu: &dyn DfuContext) -> CbResult {
        if dfu.overall_score() > MATCH_UNMET {
            CB_OK
        } else {
            CB_ERR
        }
    }

    fn dom_finish_graph(&self, _vtx: VtxId, _subsystem: &str, dfu: &dyn DfuContext) -> CbResult {
        if dfu.overall_score() > MATCH_UNMET {
            CB_OK
        } else {
            CB_ERR
        }
    }

    fn aux_discover_vtx(&self, _vtx: VtxId, _subsystem: &str, _dfu: &dyn DfuContext) -> CbResult {
        CB_OK
    }

    fn aux_finish_vtx(&self, _vtx: VtxId, _subsystem: &str, _dfu: &dyn DfuContext) -> CbResult {
        CB_OK
    }

    fn stop_on_k_matches(&self) -> u32 {
        1
    }
}

/// Same acceptance criterion as [`FirstMatch`], but never switches to
/// dynamic exploration on its own — used by the tie-break tests (spec.md
/// S6) that need deterministic descending `(weight, uniq_id)` out-edge
/// order without early exit, so every candidate gets scored.
#[derive(Debug, Default)]
pub struct HighIdFirst;

impl MatchPolicy for HighIdFirst {
    fn dom_discover_vtx(&self, _vtx: VtxId, _subsystem: &str, _dfu: &dyn DfuContext) -> CbResult {
        CB_OK
    }

    fn dom_finish_vtx(&self, _vtx: VtxId, _subsystem: &str, dfu: &dyn DfuContext) -> CbResult {
        if dfu.overall_score() > MATCH_UNMET {
            CB_OK
        } else {
            CB_ERR
        }
    }

    fn dom_finish_slot(&self, _subsystem: &str, dfu: &dyn DfuContext) -> CbResult {
        if dfu.overall_score() > MATCH_UNMET {
            CB_OK
        } else {
            CB_ERR
        }
    }

    fn dom_finish_graph(&self, _vtx: VtxId, _subsystem: &str, dfu: &dyn DfuContext) -> CbResult {
        if dfu.overall_score() > MATCH_UNMET {
            CB_OK
        } else {
            CB_ERR
        }
    }

    fn aux_discover_vtx(&self, _vtx: VtxId, _subsystem: &str, _dfu: &dyn DfuContext) -> CbResult {
        CB_OK
    }

    fn aux_finish_vtx(&self, _vtx: VtxId, _subsystem: &str, _dfu: &dyn DfuContext) -> CbResult {
        CB_OK
    }

    fn stop_on_k_matches(&self) -> u32 {
        0
    }
}
