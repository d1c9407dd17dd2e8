//! Bundle of [`Planner`]s over a shared timeline for *k* named resource
//! types, driven by one span-id space so that a job occupies a single
//! coherent reservation across all tracked types at once (spec §4.2).
//!
//! This is what gets installed on interior (anchor) vertices during graph
//! priming: one aggregate timeline per pruning-tracked type, all
//! reserved/released together whenever a descendant subtree is matched.

use std::collections::BTreeMap;

use super::Planner;
use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct MultiPlanner {
    planners: Vec<Planner>,
    types: Vec<String>,
    next_span_id: u64,
    /// shared span id -> per-planner underlying span id, same order as `types`.
    span_ids: BTreeMap<u64, Vec<u64>>,
}

impl MultiPlanner {
    /// Build a multi-planner over `[base_time, base_time+duration)` with
    /// one `(type, total)` pair per tracked resource type.
    pub fn new(base_time: i64, duration: u64, totals: &[(String, u64)]) -> Result<Self, CoreError> {
        let mut planners = Vec::with_capacity(totals.len());
        let mut types = Vec::with_capacity(totals.len());
        for (ty, total) in totals {
            planners.push(Planner::new(base_time, duration, *total, ty.clone())?);
            types.push(ty.clone());
        }
        Ok(MultiPlanner {
            planners,
            types,
            next_span_id: 0,
            span_ids: BTreeMap::new(),
        })
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn index_of(&self, ty: &str) -> Option<usize> {
        self.types.iter().position(|t| t == ty)
    }

    pub fn planner(&self, idx: usize) -> Option<&Planner> {
        self.planners.get(idx)
    }

    pub fn avail_at(&self, t: i64, type_idx: usize) -> Result<i64, CoreError> {
        self.planners
            .get(type_idx)
            .ok_or_else(|| CoreError::invalid_input("type index out of range"))?
            .avail_at(t)
    }

    /// Largest integer multiplier `n >= 0` such that every underlying
    /// planner has `avail_during(t, d) >= n * req[i]`; `-1` if any
    /// `req[i]` exceeds that planner's `total`. Types requested with
    /// `req[i] == 0` are unconstrained and do not bound `n`.
    pub fn avail_during(&self, t: i64, d: u64, req: &[u64]) -> Result<i64, CoreError> {
        if req.len() != self.planners.len() {
            return Err(CoreError::invalid_input(
                "request vector length does not match tracked type count",
            ));
        }
        for (p, &r) in self.planners.iter().zip(req) {
            if r > p.total() {
                return Ok(-1);
            }
        }
        let mut n: Option<i64> = None;
        for (p, &r) in self.planners.iter().zip(req) {
            if r == 0 {
                continue;
            }
            let avail = p.avail_during(t, d)?;
            let multiplier = avail / r as i64;
            n = Some(match n {
                Some(cur) => cur.min(multiplier),
                None => multiplier,
            });
        }
        Ok(n.unwrap_or(0).max(0))
    }

    /// Atomically reserve `req[i]` on every underlying planner. Rolls
    /// back already-applied reservations on the first failure.
    pub fn add_span(&mut self, t: i64, d: u64, req: &[u64]) -> Result<u64, CoreError> {
        if req.len() != self.planners.len() {
            return Err(CoreError::invalid_input(
                "request vector length does not match tracked type count",
            ));
        }
        let mut child_ids = Vec::with_capacity(self.planners.len());
        for (p, &r) in self.planners.iter_mut().zip(req) {
            match p.add_span(t, d, r) {
                Ok(id) => child_ids.push(id),
                Err(e) => {
                    for (pp, id) in self.planners.iter_mut().zip(child_ids.iter()) {
                        let _ = pp.rem_span(*id);
                    }
                    return Err(e);
                }
            }
        }
        let shared_id = self.next_span_id;
        self.next_span_id += 1;
        self.span_ids.insert(shared_id, child_ids);
        Ok(shared_id)
    }

    /// Remove a shared span from every underlying planner.
    pub fn rem_span(&mut self, shared_id: u64) -> Result<(), CoreError> {
        let ids = self
            .span_ids
            .remove(&shared_id)
            .ok_or_else(|| CoreError::not_found(format!("no multi-span with id {shared_id}")))?;
        for (p, id) in self.planners.iter_mut().zip(ids.iter()) {
            p.rem_span(*id)?;
        }
        Ok(())
    }

    /// Reduce each underlying span by `delta[i]`. When every underlying
    /// span reaches zero the shared span is removed and `*removed` is set.
    pub fn reduce_span(
        &mut self,
        shared_id: u64,
        delta: &[u64],
        removed: &mut bool,
    ) -> Result<(), CoreError> {
        *removed = false;
        let ids = self
            .span_ids
            .get(&shared_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no multi-span with id {shared_id}")))?;
        if delta.len() != ids.len() {
            return Err(CoreError::invalid_input("delta vector length mismatch"));
        }
        let mut all_removed = true;
        for (p, (id, d)) in self.planners.iter_mut().zip(ids.iter().zip(delta.iter())) {
            let mut child_removed = false;
            p.reduce_span(*id, *d, &mut child_removed)?;
            if !child_removed {
                all_removed = false;
            }
        }
        if all_removed {
            self.span_ids.remove(&shared_id);
            *removed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_type_planner() -> MultiPlanner {
        MultiPlanner::new(
            0,
            1000,
            &[("core".to_string(), 8), ("gpu".to_string(), 2)],
        )
        .unwrap()
    }

    #[test]
    fn avail_during_returns_minus_one_when_over_total() {
        let mp = two_type_planner();
        assert_eq!(mp.avail_during(0, 10, &[9, 1]).unwrap(), -1);
    }

    #[test]
    fn avail_during_returns_limiting_multiplier() {
        let mp = two_type_planner();
        // 8 cores / 4 per unit = 2; 2 gpus / 1 per unit = 2 -> n=2
        assert_eq!(mp.avail_during(0, 10, &[4, 1]).unwrap(), 2);
        // 8 cores / 2 per unit = 4; 2 gpus / 1 per unit = 2 -> n=2 (gpu-bound)
        assert_eq!(mp.avail_during(0, 10, &[2, 1]).unwrap(), 2);
    }

    #[test]
    fn add_span_reserves_atomically_across_all_types() {
        let mut mp = two_type_planner();
        let id = mp.add_span(0, 10, &[4, 1]).unwrap();
        assert_eq!(mp.planner(0).unwrap().avail_during(0, 10).unwrap(), 4);
        assert_eq!(mp.planner(1).unwrap().avail_during(0, 10).unwrap(), 1);
        mp.rem_span(id).unwrap();
        assert_eq!(mp.planner(0).unwrap().avail_during(0, 10).unwrap(), 8);
        assert_eq!(mp.planner(1).unwrap().avail_during(0, 10).unwrap(), 2);
    }

    #[test]
    fn add_span_rolls_back_on_partial_failure() {
        let mut mp = two_type_planner();
        let before0 = mp.planner(0).unwrap().clone();
        let before1 = mp.planner(1).unwrap().clone();
        // gpu request exceeds total -> should fail and leave core untouched
        let err = mp.add_span(0, 10, &[4, 5]).unwrap_err();
        assert!(matches!(err, CoreError::OutOfRange(_)));
        assert_eq!(mp.planner(0).unwrap(), &before0);
        assert_eq!(mp.planner(1).unwrap(), &before1);
    }

    #[test]
    fn reduce_span_removes_only_when_every_type_drained() {
        let mut mp = two_type_planner();
        let id = mp.add_span(0, 10, &[4, 2]).unwrap();
        let mut removed = false;
        mp.reduce_span(id, &[4, 0], &mut removed).unwrap();
        assert!(!removed, "gpu side still holds 2 units");
        mp.reduce_span(id, &[0, 2], &mut removed).unwrap();
        assert!(removed);
    }
}
