//! Scoring arena: per-`(subsystem, type)` accumulation of candidate
//! edge-groups during a DFU walk, with best-k selection (spec.md §4.3).
//!
//! Kept as a `BTreeMap` keyed by `(subsystem, type)` rather than a
//! nested hash map, for the same reason `timpani-o`'s `AvailCpus`/
//! `CpuUtil` tables are `BTreeMap`s: the traverser's merge/accumulate
//! order is externally observable (it drives which edges get stamped
//! with the current trav-token) and must not depend on hash iteration
//! order.

use std::cmp::Ordering as StdOrdering;
use std::collections::BTreeMap;

use crate::graph::EdgeId;

/// A reference to one selected out-edge within an edge-group.
pub type EdgeRef = EdgeId;

/// Score sentinels used throughout selection (spec.md §4.6.2): a vertex
/// or slot that matched nothing scores `MATCH_UNMET`; a bare match with
/// no further scoring contributes `MATCH_MET`.
pub const MATCH_UNMET: i64 = -1;
pub const MATCH_MET: i64 = 1;

/// A scorable unit: a contiguous matching subtree, or a synthetic
/// group built during slot expansion / root wrap-up.
#[derive(Debug, Clone)]
pub struct EdgeGroup {
    pub score: i64,
    pub count: u64,
    pub needs: u64,
    pub exclusive: bool,
    pub root: usize,
    pub edges: Vec<EdgeRef>,
}

impl EdgeGroup {
    pub fn new(score: i64, count: u64, root: usize) -> Self {
        EdgeGroup {
            score,
            count,
            needs: 0,
            exclusive: false,
            root,
            edges: Vec::new(),
        }
    }
}

/// How `choose_best_k` orders candidate groups before taking a prefix.
#[derive(Debug, Clone, Copy)]
pub enum CmpOrder {
    GreaterScore,
    LesserScore,
    /// Bucket scores into half-open intervals of the given width and
    /// order buckets descending, ties broken by raw score descending.
    IntervalGreater(i64),
    /// Same bucketing, ascending bucket order.
    IntervalLesser(i64),
}

impl CmpOrder {
    fn bucket(width: i64, score: i64) -> i64 {
        if width <= 0 {
            return score;
        }
        score.div_euclid(width)
    }

    fn compare(&self, a: &EdgeGroup, b: &EdgeGroup) -> StdOrdering {
        match *self {
            CmpOrder::GreaterScore => b.score.cmp(&a.score),
            CmpOrder::LesserScore => a.score.cmp(&b.score),
            CmpOrder::IntervalGreater(w) => Self::bucket(w, b.score)
                .cmp(&Self::bucket(w, a.score))
                .then(b.score.cmp(&a.score)),
            CmpOrder::IntervalLesser(w) => Self::bucket(w, a.score)
                .cmp(&Self::bucket(w, b.score))
                .then(a.score.cmp(&b.score)),
        }
    }
}

/// The groups accumulated for one `(subsystem, type)` key.
#[derive(Debug, Clone, Default)]
pub struct EvalGroups {
    pub groups: Vec<EdgeGroup>,
    pub cutline: i64,
    pub qualified_count: u64,
    pub total_count: u64,
    pub qualified_granules: u64,
    best_k: Option<u64>,
    best_i: Option<usize>,
}

impl EvalGroups {
    pub fn new(cutline: i64) -> Self {
        EvalGroups {
            cutline,
            ..Default::default()
        }
    }

    pub fn add(&mut self, eg: EdgeGroup) {
        self.total_count += eg.count;
        if eg.score > self.cutline {
            self.qualified_count += eg.count;
            self.qualified_granules += 1;
        }
        self.groups.push(eg);
    }

    /// Sort by `cmp`, walk the prefix fulfilling `k` units by summing
    /// `count`, and record exactly how many units were pulled from each
    /// selected group (the last partial group gets the remainder).
    pub fn choose_best_k(&mut self, k: u64, cmp: CmpOrder) {
        self.groups.sort_by(|a, b| cmp.compare(a, b));
        let mut remaining = k;
        let mut taken = 0usize;
        for g in self.groups.iter_mut() {
            if remaining == 0 {
                g.needs = 0;
                continue;
            }
            let take = remaining.min(g.count);
            g.needs = take;
            remaining -= take;
            taken += 1;
        }
        self.best_k = Some(k - remaining);
        self.best_i = Some(taken);
    }

    pub fn best_k(&self) -> Option<u64> {
        self.best_k
    }

    pub fn best_i(&self) -> Option<usize> {
        self.best_i
    }

    /// Reduce `op` over the first `best_i` selected groups' scores.
    pub fn accum_best_k(&self, op: impl Fn(i64, i64) -> i64, init: i64) -> i64 {
        let Some(best_i) = self.best_i else {
            return init;
        };
        self.groups
            .iter()
            .take(best_i)
            .fold(init, |acc, g| op(acc, g.score))
    }

    /// Concatenate another arena's groups into this one and sum
    /// counters. Caller must ensure both are for the same key.
    pub fn merge(&mut self, other: EvalGroups) {
        self.total_count += other.total_count;
        self.qualified_count += other.qualified_count;
        self.qualified_granules += other.qualified_granules;
        self.groups.extend(other.groups);
        self.best_k = None;
        self.best_i = None;
    }

    pub fn has_remaining(&self) -> bool {
        self.qualified_count > 0
    }
}

/// Default aggregator for [`EvalGroups::accum_best_k`]: simple sum.
pub fn plus(acc: i64, x: i64) -> i64 {
    acc + x
}

pub type ScoreKey = (String, String);

/// The full per-traversal scoring arena, keyed by `(subsystem, type)`.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    groups: BTreeMap<ScoreKey, EvalGroups>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, subsystem: impl Into<String>, ty: impl Into<String>) -> &mut EvalGroups {
        self.groups
            .entry((subsystem.into(), ty.into()))
            .or_insert_with(|| EvalGroups::new(0))
    }

    pub fn get(&self, subsystem: &str, ty: &str) -> Option<&EvalGroups> {
        self.groups
            .get(&(subsystem.to_string(), ty.to_string()))
    }

    pub fn total_count(&self, subsystem: &str, ty: &str) -> u64 {
        self.get(subsystem, ty).map(|g| g.total_count).unwrap_or(0)
    }

    pub fn qualified_count(&self, subsystem: &str, ty: &str) -> u64 {
        self.get(subsystem, ty)
            .map(|g| g.qualified_count)
            .unwrap_or(0)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ScoreKey> {
        self.groups.keys()
    }

    pub fn overall_score(&self) -> i64 {
        self.groups
            .values()
            .map(|g| g.accum_best_k(plus, 0))
            .sum()
    }

    /// `true` once every requested subsystem has nonzero qualified
    /// resources, used by root wrap-up.
    pub fn has_remaining_all(&self) -> bool {
        self.groups.values().all(|g| g.has_remaining())
    }

    /// Absorb another arena wholesale, merging per-key where both
    /// sides have groups for the same `(subsystem, type)`.
    pub fn merge_all(&mut self, other: Arena) {
        for (key, groups) in other.groups {
            match self.groups.remove(&key) {
                Some(mut existing) => {
                    existing.merge(groups);
                    self.groups.insert(key, existing);
                }
                None => {
                    self.groups.insert(key, groups);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_updates_qualified_count_only_above_cutline() {
        let mut eg = EvalGroups::new(5);
        eg.add(EdgeGroup::new(10, 3, 0));
        eg.add(EdgeGroup::new(2, 4, 1));
        assert_eq!(eg.total_count, 7);
        assert_eq!(eg.qualified_count, 3);
        assert_eq!(eg.qualified_granules, 1);
    }

    #[test]
    fn choose_best_k_assigns_needs_with_partial_remainder() {
        let mut eg = EvalGroups::new(0);
        eg.add(EdgeGroup::new(10, 3, 0));
        eg.add(EdgeGroup::new(8, 3, 1));
        eg.add(EdgeGroup::new(6, 3, 2));
        eg.choose_best_k(5, CmpOrder::GreaterScore);
        assert_eq!(eg.groups[0].needs, 3);
        assert_eq!(eg.groups[1].needs, 2);
        assert_eq!(eg.groups[2].needs, 0);
        assert_eq!(eg.best_k(), Some(5));
        assert_eq!(eg.best_i(), Some(2));
    }

    #[test]
    fn choose_best_k_short_of_k_reports_actual_taken() {
        let mut eg = EvalGroups::new(0);
        eg.add(EdgeGroup::new(10, 2, 0));
        eg.choose_best_k(5, CmpOrder::GreaterScore);
        assert_eq!(eg.best_k(), Some(2));
        assert_eq!(eg.best_i(), Some(1));
    }

    #[test]
    fn accum_best_k_sums_only_selected_prefix() {
        let mut eg = EvalGroups::new(0);
        eg.add(EdgeGroup::new(10, 3, 0));
        eg.add(EdgeGroup::new(8, 3, 1));
        eg.add(EdgeGroup::new(6, 3, 2));
        eg.choose_best_k(4, CmpOrder::GreaterScore);
        assert_eq!(eg.accum_best_k(plus, 0), 18);
    }

    #[test]
    fn merge_concatenates_groups_and_sums_counters() {
        let mut a = EvalGroups::new(0);
        a.add(EdgeGroup::new(10, 3, 0));
        let mut b = EvalGroups::new(0);
        b.add(EdgeGroup::new(5, 2, 1));
        a.merge(b);
        assert_eq!(a.groups.len(), 2);
        assert_eq!(a.total_count, 5);
    }

    #[test]
    fn arena_merge_all_combines_matching_keys() {
        let mut a = Arena::new();
        a.entry("containment", "core").add(EdgeGroup::new(1, 1, 0));
        let mut b = Arena::new();
        b.entry("containment", "core").add(EdgeGroup::new(2, 1, 1));
        b.entry("containment", "gpu").add(EdgeGroup::new(3, 1, 2));
        a.merge_all(b);
        assert_eq!(a.total_count("containment", "core"), 2);
        assert_eq!(a.total_count("containment", "gpu"), 1);
    }

    #[test]
    fn interval_ordering_buckets_before_breaking_ties_by_raw_score() {
        let mut eg = EvalGroups::new(0);
        eg.add(EdgeGroup::new(12, 1, 0));
        eg.add(EdgeGroup::new(9, 1, 1));
        eg.add(EdgeGroup::new(3, 1, 2));
        // width 10 -> buckets [10-19]=1, [0-9]=2,3 share a bucket, tie broken by raw score desc.
        eg.choose_best_k(3, CmpOrder::IntervalGreater(10));
        assert_eq!(eg.groups[0].score, 12);
        assert_eq!(eg.groups[1].score, 9);
        assert_eq!(eg.groups[2].score, 3);
    }
}
