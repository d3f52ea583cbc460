// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The timer queue (C2): every range that has a future scheduled action,
//! ordered by when that action is due.
//!
//! This generalizes the fixed, enum-indexed timer slots of
//! `lib/multitimer` to an open set of range ids: instead of one timer per
//! enum variant, any number of ranges can be scheduled, each keyed by its own
//! id. A range is in the queue at most once; `schedule` always unschedules
//! first, matching spec.md §4.2.

use std::collections::{BTreeMap, HashMap};

use crate::range::RangeId;

/// A very large "no timer pending" sentinel, used by [`TimerQueue::next_delay`]
/// when the queue is empty.
pub const NO_TIMER_DELAY_NS: u64 = u64::MAX;

#[derive(Default)]
pub struct TimerQueue {
    /// Ordered by `(next_act_time, insertion sequence)`; the sequence number
    /// breaks ties so entries scheduled for the same instant are drained in
    /// the order they were scheduled, per spec.md §5.
    by_time: BTreeMap<(u64, u64), RangeId>,
    by_range: HashMap<RangeId, (u64, u64)>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_time.is_empty()
    }

    /// Schedules `range`'s next action for `at`, replacing any existing
    /// schedule for it.
    pub fn schedule(&mut self, range: RangeId, at: u64) {
        self.unschedule(range);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_time.insert((at, seq), range);
        self.by_range.insert(range, (at, seq));
    }

    /// Removes `range` from the queue, if present.
    pub fn unschedule(&mut self, range: RangeId) -> bool {
        match self.by_range.remove(&range) {
            Some(key) => {
                self.by_time.remove(&key);
                true
            }
            None => false,
        }
    }

    /// The earliest-scheduled range and its due time, without removing it.
    pub fn peek(&self) -> Option<(RangeId, u64)> {
        self.by_time.iter().next().map(|(&(at, _), &range)| (range, at))
    }

    /// Removes and returns the earliest-scheduled range if its due time has
    /// elapsed by `now`. Callers loop this to drain every timer due at once.
    pub fn pop_if_due(&mut self, now: u64) -> Option<RangeId> {
        let (&key, &range) = self.by_time.iter().next()?;
        if key.0 > now {
            return None;
        }
        self.by_time.remove(&key);
        self.by_range.remove(&range);
        Some(range)
    }

    /// Nanoseconds until the next scheduled action, or
    /// [`NO_TIMER_DELAY_NS`] if the queue is empty.
    pub fn next_delay(&self, now: u64) -> u64 {
        match self.peek() {
            Some((_, at)) => at.saturating_sub(now),
            None => NO_TIMER_DELAY_NS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(n: u64) -> RangeId {
        RangeId::new(n)
    }

    #[test]
    fn peek_returns_earliest() {
        let mut q = TimerQueue::new();
        q.schedule(rid(1), 100);
        q.schedule(rid(2), 50);
        assert_eq!(q.peek(), Some((rid(2), 50)));
    }

    #[test]
    fn rescheduling_unschedules_first() {
        let mut q = TimerQueue::new();
        q.schedule(rid(1), 100);
        q.schedule(rid(1), 10);
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek(), Some((rid(1), 10)));
    }

    #[test]
    fn pop_if_due_respects_now() {
        let mut q = TimerQueue::new();
        q.schedule(rid(1), 100);
        assert_eq!(q.pop_if_due(50), None);
        assert_eq!(q.pop_if_due(100), Some(rid(1)));
        assert!(q.is_empty());
    }

    #[test]
    fn same_instant_entries_drain_in_schedule_order() {
        let mut q = TimerQueue::new();
        q.schedule(rid(1), 10);
        q.schedule(rid(2), 10);
        assert_eq!(q.pop_if_due(10), Some(rid(1)));
        assert_eq!(q.pop_if_due(10), Some(rid(2)));
    }

    #[test]
    fn next_delay_is_sentinel_when_empty() {
        let q = TimerQueue::new();
        assert_eq!(q.next_delay(0), NO_TIMER_DELAY_NS);
    }

    #[test]
    fn unschedule_missing_range_is_a_no_op() {
        let mut q = TimerQueue::new();
        assert!(!q.unschedule(rid(42)));
    }
}
