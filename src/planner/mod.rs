//! Per-resource temporal availability oracle.
//!
//! A [`Planner`] tracks, over the half-open window `[base_time,
//! base_time+duration)`, how much of a single integer quantity (the
//! `total`) is reserved at each instant. Reservations are recorded as
//! [`Span`]s; the planner never materializes a per-instant array — it
//! keeps a sparse delta table keyed by span boundaries and answers
//! queries by sweeping between them. For the vertex counts this crate
//! deals with (tens of concurrent spans per vertex, not per-microsecond
//! ticks) this is both simpler and cheaper than a dense timeline.
//!
//! # Design vs. a dense timeline
//! The original C implementation keeps an interval tree; this port keeps
//! a `BTreeMap<i64, i64>` of *signed* deltas at span boundaries (`+req` at
//! the start, `-req` at the end). Usage at any instant `t` is the prefix
//! sum of deltas at keys `<= t`; usage over a window is the running
//! maximum of that prefix sum as the sweep crosses the window. This keeps
//! `avail_first`'s "event point" semantics (spec: "no intermediate `t` is
//! returned") exact by construction — the boundary keys of this map *are*
//! the event points.

pub mod multi;

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::error::CoreError;

/// A single reservation recorded in a [`Planner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: i64,
    pub len: u64,
    pub req: u64,
}

#[derive(Debug, Clone)]
struct AvailFirstCursor {
    duration: u64,
    req: u64,
    last_t: i64,
}

/// A per-(resource vertex, resource-type) availability timeline.
#[derive(Debug, Clone)]
pub struct Planner {
    base_time: i64,
    duration: u64,
    total: u64,
    resource_type: String,
    spans: BTreeMap<u64, Span>,
    next_span_id: u64,
    /// Signed usage delta at each span boundary; the map's keys are the
    /// full set of "event points" `avail_first`/`avail_next` search over.
    events: BTreeMap<i64, i64>,
    cursor: Option<AvailFirstCursor>,
}

impl PartialEq for Planner {
    fn eq(&self, other: &Self) -> bool {
        self.base_time == other.base_time
            && self.duration == other.duration
            && self.total == other.total
            && self.resource_type == other.resource_type
            && self.spans == other.spans
    }
}

impl Planner {
    /// Construct a planner over `[base_time, base_time+duration)` with
    /// capacity `total` for `resource_type`. `duration == 0` is `EINVAL`.
    pub fn new(
        base_time: i64,
        duration: u64,
        total: u64,
        resource_type: impl Into<String>,
    ) -> Result<Self, CoreError> {
        if duration == 0 {
            return Err(CoreError::invalid_input("planner duration must be >= 1"));
        }
        Ok(Planner {
            base_time,
            duration,
            total,
            resource_type: resource_type.into(),
            spans: BTreeMap::new(),
            next_span_id: 0,
            events: BTreeMap::new(),
            cursor: None,
        })
    }

    pub fn base_time(&self) -> i64 {
        self.base_time
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn end_time(&self) -> i64 {
        self.base_time + self.duration as i64
    }

    /// Ordered-by-span-id iteration over the planner's live spans.
    pub fn spans(&self) -> impl Iterator<Item = (u64, &Span)> {
        self.spans.iter().map(|(id, s)| (*id, s))
    }

    pub fn num_spans(&self) -> usize {
        self.spans.len()
    }

    fn check_window(&self, t: i64, d: u64) -> Result<(), CoreError> {
        if d == 0 {
            return Err(CoreError::invalid_input("duration must be >= 1"));
        }
        if t < self.base_time {
            return Err(CoreError::invalid_input(format!(
                "t={t} precedes base_time={}",
                self.base_time
            )));
        }
        let window_end = t
            .checked_add(d as i64)
            .ok_or_else(|| CoreError::out_of_range("t + duration overflows i64"))?;
        if window_end > self.end_time() {
            return Err(CoreError::invalid_input(format!(
                "window end {window_end} exceeds planner end {}",
                self.end_time()
            )));
        }
        Ok(())
    }

    /// Running usage at instant `t`, via the prefix sum of deltas `<= t`.
    fn usage_at(&self, t: i64) -> i64 {
        self.events.range(..=t).map(|(_, delta)| *delta).sum()
    }

    /// Maximum usage anywhere in `[t, t+d)`.
    fn usage_during(&self, t: i64, d: u64) -> i64 {
        let end = t + d as i64;
        let mut running = self.usage_at(t);
        let mut max_usage = running;
        for (_, delta) in self.events.range((Bound::Excluded(t), Bound::Excluded(end))) {
            running += *delta;
            if running > max_usage {
                max_usage = running;
            }
        }
        max_usage
    }

    /// Free quantity at instant `t`. `EINVAL` if `t` is outside the
    /// planner's window.
    pub fn avail_at(&self, t: i64) -> Result<i64, CoreError> {
        self.check_window(t, 1)?;
        Ok(self.total as i64 - self.usage_at(t))
    }

    /// Minimum free quantity across `[t, t+d)`.
    pub fn avail_during(&self, t: i64, d: u64) -> Result<i64, CoreError> {
        self.check_window(t, d)?;
        Ok(self.total as i64 - self.usage_during(t, d))
    }

    /// Least `t >= on_or_after` at which `[t, t+d)` can satisfy `req`,
    /// taken only from the planner's event points. `ENOENT` if none
    /// exists before the planner's horizon; `ERANGE` if `req > total`.
    pub fn avail_first(&mut self, on_or_after: i64, d: u64, req: u64) -> Result<i64, CoreError> {
        if d == 0 {
            return Err(CoreError::invalid_input("duration must be >= 1"));
        }
        if req > self.total {
            return Err(CoreError::out_of_range(format!(
                "request {req} exceeds total {}",
                self.total
            )));
        }
        let end = self.end_time();
        if on_or_after >= end {
            return Err(CoreError::not_found(
                "on_or_after is at or past the planner's horizon",
            ));
        }
        let mut candidates: BTreeSet<i64> = self
            .events
            .keys()
            .copied()
            .filter(|&k| k >= on_or_after)
            .collect();
        candidates.insert(on_or_after);

        for t in candidates {
            if t + d as i64 > end {
                continue;
            }
            if self.usage_during(t, d) <= self.total as i64 - req as i64 {
                self.cursor = Some(AvailFirstCursor {
                    duration: d,
                    req,
                    last_t: t,
                });
                return Ok(t);
            }
        }
        Err(CoreError::not_found(
            "no event point satisfies the request within the planner horizon",
        ))
    }

    /// Continue a search started by [`Planner::avail_first`] past the
    /// previously returned point.
    pub fn avail_next(&mut self) -> Result<i64, CoreError> {
        let cursor = self
            .cursor
            .clone()
            .ok_or_else(|| CoreError::invalid_input("avail_next called with no prior avail_first"))?;
        let end = self.end_time();
        let candidates: BTreeSet<i64> = self
            .events
            .keys()
            .copied()
            .filter(|&k| k > cursor.last_t)
            .collect();
        for t in candidates {
            if t + cursor.duration as i64 > end {
                continue;
            }
            if self.usage_during(t, cursor.duration) <= self.total as i64 - cursor.req as i64 {
                self.cursor = Some(AvailFirstCursor { last_t: t, ..cursor });
                return Ok(t);
            }
        }
        Err(CoreError::not_found(
            "no further event point satisfies the request",
        ))
    }

    fn prune_zero_events(&mut self) {
        self.events.retain(|_, delta| *delta != 0);
    }

    /// Reserve `req` over `[t, t+d)`. Succeeds iff `avail_during(t, d) >=
    /// req`; returns a `span_id` unique for this planner's lifetime, and
    /// resets the `avail_first` cursor.
    pub fn add_span(&mut self, t: i64, d: u64, req: u64) -> Result<u64, CoreError> {
        let avail = self.avail_during(t, d)?;
        if avail < req as i64 {
            return Err(CoreError::out_of_range(format!(
                "requested {req} exceeds available {avail} during [{t}, {})",
                t + d as i64
            )));
        }
        let span_id = self.next_span_id;
        self.next_span_id += 1;
        let end = t + d as i64;
        *self.events.entry(t).or_insert(0) += req as i64;
        *self.events.entry(end).or_insert(0) -= req as i64;
        self.prune_zero_events();
        self.spans.insert(span_id, Span { start: t, len: d, req });
        self.cursor = None;
        Ok(span_id)
    }

    /// Remove a span entirely.
    pub fn rem_span(&mut self, span_id: u64) -> Result<(), CoreError> {
        let span = self
            .spans
            .remove(&span_id)
            .ok_or_else(|| CoreError::not_found(format!("no span with id {span_id}")))?;
        let end = span.start + span.len as i64;
        *self.events.entry(span.start).or_insert(0) -= span.req as i64;
        *self.events.entry(end).or_insert(0) += span.req as i64;
        self.prune_zero_events();
        self.cursor = None;
        Ok(())
    }

    /// Shrink a span's reserved quantity by `delta`. When the remaining
    /// `req` reaches zero the span is removed and `*removed` is set.
    /// `ERANGE` if `delta` would drive `req` negative.
    pub fn reduce_span(&mut self, span_id: u64, delta: u64, removed: &mut bool) -> Result<(), CoreError> {
        *removed = false;
        let span = self
            .spans
            .get(&span_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no span with id {span_id}")))?;
        if delta > span.req {
            return Err(CoreError::out_of_range(format!(
                "reduce delta {delta} exceeds span req {}",
                span.req
            )));
        }
        let new_req = span.req - delta;
        if new_req == 0 {
            self.rem_span(span_id)?;
            *removed = true;
            return Ok(());
        }
        let end = span.start + span.len as i64;
        *self.events.entry(span.start).or_insert(0) -= delta as i64;
        *self.events.entry(end).or_insert(0) += delta as i64;
        self.prune_zero_events();
        if let Some(s) = self.spans.get_mut(&span_id) {
            s.req = new_req;
        }
        self.cursor = None;
        Ok(())
    }

    fn peak_usage(&self) -> i64 {
        let mut running = 0i64;
        let mut max_usage = 0i64;
        for delta in self.events.values() {
            running += *delta;
            if running > max_usage {
                max_usage = running;
            }
        }
        max_usage
    }

    /// Change `total`. `ERANGE` if any instant's used quantity would
    /// exceed the new total.
    pub fn update_total(&mut self, new_total: u64) -> Result<(), CoreError> {
        let peak = self.peak_usage();
        if peak > new_total as i64 {
            return Err(CoreError::out_of_range(format!(
                "existing usage {peak} exceeds new total {new_total}"
            )));
        }
        self.total = new_total;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_zero_duration() {
        assert!(Planner::new(0, 0, 4, "core").is_err());
    }

    #[test]
    fn avail_during_on_empty_planner_equals_total() {
        let p = Planner::new(0, 100, 4, "core").unwrap();
        assert_eq!(p.avail_during(0, 10).unwrap(), 4);
    }

    #[test]
    fn add_span_reduces_availability_and_succeeds_at_boundary() {
        let mut p = Planner::new(0, 100, 4, "core").unwrap();
        let prior = p.avail_during(0, 10).unwrap();
        let id = p.add_span(0, 10, 4).unwrap();
        assert_eq!(p.avail_during(0, 10).unwrap(), prior - 4);
        assert_eq!(p.num_spans(), 1);
        let _ = id;
    }

    #[test]
    fn add_span_fails_when_over_capacity() {
        let mut p = Planner::new(0, 100, 4, "core").unwrap();
        p.add_span(0, 10, 4).unwrap();
        let before = p.clone();
        let err = p.add_span(0, 10, 1).unwrap_err();
        assert!(matches!(err, CoreError::OutOfRange(_)));
        assert_eq!(p, before, "failed add_span must not mutate the planner");
    }

    #[test]
    fn avail_first_returns_event_point_not_intermediate_time() {
        let mut p = Planner::new(0, 100, 4, "core").unwrap();
        p.add_span(0, 10, 4).unwrap();
        // Freed up again at t=10; avail_first from 1 must return 10, not e.g. 5.
        let t = p.avail_first(1, 5, 4).unwrap();
        assert_eq!(t, 10);
    }

    #[test]
    fn avail_first_at_end_is_not_found() {
        let mut p = Planner::new(0, 10, 4, "core").unwrap();
        assert!(matches!(
            p.avail_first(10, 1, 1).unwrap_err(),
            CoreError::NotFound(_)
        ));
    }

    #[test]
    fn avail_first_over_total_is_out_of_range() {
        let mut p = Planner::new(0, 10, 4, "core").unwrap();
        assert!(matches!(
            p.avail_first(0, 1, 5).unwrap_err(),
            CoreError::OutOfRange(_)
        ));
    }

    #[test]
    fn avail_next_continues_past_prior_result() {
        let mut p = Planner::new(0, 100, 4, "core").unwrap();
        p.add_span(0, 10, 2).unwrap();
        p.add_span(20, 10, 2).unwrap();
        let first = p.avail_first(0, 10, 3).unwrap();
        assert_eq!(first, 10);
        let next = p.avail_next().unwrap();
        assert_eq!(next, 30);
    }

    #[test]
    fn reduce_span_to_zero_removes_it() {
        let mut p = Planner::new(0, 100, 4, "core").unwrap();
        let id = p.add_span(0, 10, 4).unwrap();
        let mut removed = false;
        p.reduce_span(id, 4, &mut removed).unwrap();
        assert!(removed);
        assert_eq!(p.num_spans(), 0);
        assert_eq!(p.avail_during(0, 10).unwrap(), 4);
    }

    #[test]
    fn reduce_span_partial_keeps_remainder() {
        let mut p = Planner::new(0, 100, 4, "core").unwrap();
        let id = p.add_span(0, 10, 4).unwrap();
        let mut removed = false;
        p.reduce_span(id, 1, &mut removed).unwrap();
        assert!(!removed);
        assert_eq!(p.avail_during(0, 10).unwrap(), 1);
    }

    #[test]
    fn update_total_rejects_when_usage_would_exceed() {
        let mut p = Planner::new(0, 100, 4, "core").unwrap();
        p.add_span(0, 10, 4).unwrap();
        assert!(matches!(
            p.update_total(2).unwrap_err(),
            CoreError::OutOfRange(_)
        ));
        assert!(p.update_total(4).is_ok());
    }

    #[test]
    fn equality_compares_spans_by_id_not_just_shape() {
        let mut a = Planner::new(0, 100, 4, "core").unwrap();
        let mut b = Planner::new(0, 100, 4, "core").unwrap();
        a.add_span(0, 10, 1).unwrap();
        b.add_span(0, 10, 1).unwrap();
        assert_eq!(a, b);
        b.add_span(20, 10, 1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn invariant_avail_plus_used_equals_total_across_random_queries() {
        let mut p = Planner::new(0, 1000, 10, "core").unwrap();
        p.add_span(5, 20, 3).unwrap();
        p.add_span(40, 5, 10).unwrap();
        for t in [0i64, 4, 5, 10, 24, 25, 40, 44, 45, 100] {
            let avail = p.avail_at(t).unwrap();
            let used = p.total() as i64 - avail;
            assert_eq!(avail + used, p.total() as i64);
        }
    }
}
