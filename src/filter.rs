//! Pruning-filter registry: which anchor vertices get an aggregate
//! subplan, and which resource types that subplan tracks (spec.md §4.4).
//!
//! The registry is populated once, eagerly, from a small grammar string
//! (`"rack:core,node:gpu"`) — validated at load time rather than at use
//! time, the same posture `timpani-o/src/config/mod.rs` takes toward its
//! YAML node configuration: a malformed spec fails fast at startup, not
//! mid-traversal.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::CoreError;

/// Anchor value meaning "every vertex in this subsystem".
pub const ALL: &str = "ALL";

/// One `anchor:tracked` pair parsed from a filter spec string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPair {
    pub anchor: String,
    pub tracked: String,
}

/// Parse `spec = pair ("," pair)*`, `pair = anchor ":" tracked`.
pub fn parse_spec(spec: &str) -> Result<Vec<FilterPair>, CoreError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(Vec::new());
    }
    let mut pairs = Vec::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        let Some((anchor, tracked)) = entry.split_once(':') else {
            return Err(CoreError::invalid_input(format!(
                "malformed pruning-filter pair '{entry}', expected anchor:tracked"
            )));
        };
        let anchor = anchor.trim();
        let tracked = tracked.trim();
        if anchor.is_empty() || tracked.is_empty() {
            return Err(CoreError::invalid_input(format!(
                "empty anchor or tracked type in pruning-filter pair '{entry}'"
            )));
        }
        pairs.push(FilterPair {
            anchor: anchor.to_string(),
            tracked: tracked.to_string(),
        });
    }
    Ok(pairs)
}

/// `subsystem -> anchor -> tracked types`.
#[derive(Debug, Clone, Default)]
pub struct PruningFilterRegistry {
    table: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl PruningFilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pruning_types(&mut self, subsystem: impl Into<String>, anchor: impl Into<String>, tracked: impl Into<String>) {
        self.table
            .entry(subsystem.into())
            .or_default()
            .entry(anchor.into())
            .or_default()
            .insert(tracked.into());
    }

    /// Parse and load a whole `"anchor:tracked,anchor:tracked"` spec for
    /// one subsystem.
    pub fn load_spec(&mut self, subsystem: &str, spec: &str) -> Result<(), CoreError> {
        for pair in parse_spec(spec)? {
            self.set_pruning_types(subsystem, pair.anchor, pair.tracked);
        }
        Ok(())
    }

    /// `true` iff `tracked` is pruned at `anchor` in `subsystem`, either
    /// by an explicit registration or because `ALL` covers it.
    pub fn is_my_pruning_type(&self, subsystem: &str, anchor: &str, tracked: &str) -> bool {
        self.get_my_pruning_types(subsystem, anchor).contains(tracked)
    }

    /// Anchor-specific tracked types plus whatever `ALL` contributes,
    /// minus the self-type collision (an anchor never tracks itself).
    /// An explicit anchor registration for a type also covered by `ALL`
    /// is not double-counted — it folds into the same set entry.
    pub fn get_my_pruning_types(&self, subsystem: &str, anchor: &str) -> BTreeSet<String> {
        let Some(anchors) = self.table.get(subsystem) else {
            return BTreeSet::new();
        };
        let mut result = BTreeSet::new();
        if anchor != ALL {
            if let Some(set) = anchors.get(anchor) {
                result.extend(set.iter().cloned());
            }
        }
        if let Some(all_set) = anchors.get(ALL) {
            result.extend(all_set.iter().cloned());
        }
        result.remove(anchor);
        result
    }

    /// `true` if any anchor in `subsystem` (explicit or `ALL`) tracks
    /// `ty`, used by graph priming to decide whether a non-leaf vertex
    /// needs a subplan installed at all.
    pub fn tracks_any(&self, subsystem: &str, ty: &str) -> bool {
        self.table
            .get(subsystem)
            .map(|anchors| anchors.values().any(|set| set.contains(ty)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spec_splits_pairs_on_comma_and_colon() {
        let pairs = parse_spec("rack:core,node:gpu").unwrap();
        assert_eq!(
            pairs,
            vec![
                FilterPair { anchor: "rack".into(), tracked: "core".into() },
                FilterPair { anchor: "node".into(), tracked: "gpu".into() },
            ]
        );
    }

    #[test]
    fn parse_spec_rejects_missing_colon() {
        assert!(parse_spec("rack-core").is_err());
    }

    #[test]
    fn parse_spec_empty_string_is_empty() {
        assert_eq!(parse_spec("").unwrap(), Vec::new());
    }

    #[test]
    fn explicit_anchor_tracks_its_type() {
        let mut f = PruningFilterRegistry::new();
        f.set_pruning_types("containment", "rack", "core");
        assert!(f.is_my_pruning_type("containment", "rack", "core"));
        assert!(!f.is_my_pruning_type("containment", "node", "core"));
    }

    #[test]
    fn all_anchor_covers_every_anchor() {
        let mut f = PruningFilterRegistry::new();
        f.set_pruning_types("containment", ALL, "core");
        assert!(f.is_my_pruning_type("containment", "rack", "core"));
        assert!(f.is_my_pruning_type("containment", "node", "core"));
    }

    #[test]
    fn get_my_pruning_types_excludes_self_type_collision() {
        let mut f = PruningFilterRegistry::new();
        f.set_pruning_types("containment", ALL, "rack");
        let types = f.get_my_pruning_types("containment", "rack");
        assert!(!types.contains("rack"));
    }

    #[test]
    fn get_my_pruning_types_unions_anchor_specific_and_all() {
        let mut f = PruningFilterRegistry::new();
        f.set_pruning_types("containment", "rack", "core");
        f.set_pruning_types("containment", ALL, "gpu");
        let types = f.get_my_pruning_types("containment", "rack");
        assert!(types.contains("core"));
        assert!(types.contains("gpu"));
        assert_eq!(types.len(), 2);
    }
}
