// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The client engine (C5): the top-level coordinator that owns the interval
//! tree, timer queue, notification queue, and the set of live ranges, and
//! dispatches inbound packets and timer ticks to them.
//!
//! The engine holds no socket, no clock, and no RNG of its own (spec.md
//! §1, §5): every entry point that might transmit a frame, pick a random
//! placement, or schedule a timer takes the current time and the
//! [`RandomSource`]/[`FrameTransmitter`] collaborators as arguments, so a
//! host can wire in whatever raw-socket and timer adapters it has without
//! this crate ever reaching for a system clock or RNG directly.

use std::collections::HashMap;

use crate::address::{Address, Pool};
use crate::collab::{FrameTransmitter, RandomSource};
use crate::interval_tree::IntervalTree;
use crate::notify::{Notify, NotifyQueue};
use crate::range::{
    self, enter_probing, on_announce_timer, on_inbound, on_probe_timer, on_released_timer,
    Outcome, Range, RangeId, RangeState, TransitionCtx,
};
use crate::timer_queue::TimerQueue;
use crate::{
    codec::Pdu, MaapError, MAAP_ANNOUNCE_INTERVAL_BASE_MS, MAAP_ANNOUNCE_INTERVAL_VARIATION_MS,
    MAAP_PROBE_INTERVAL_BASE_MS, MAAP_PROBE_INTERVAL_VARIATION_MS, MAAP_PROBE_RETRANSMITS,
    MAAP_RANDOM_PLACEMENT_ATTEMPTS, MAAP_RELEASE_LINGER_MS, MAAP_RESTART_ATTEMPTS,
};

/// Opaque handle tagging a command and its resulting notification(s) with
/// whoever issued the command. The engine never reads, copies deeply, or
/// frees this; it exists purely to let a host correlate an asynchronous
/// notification back to the caller that requested it (spec.md §9).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SenderId(u64);

impl SenderId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Tunable timing constants, normally left at their IEEE 1722-2016 Annex B
/// defaults ([`EngineConfig::default`]); a host may override them (e.g. to
/// speed up probe/announce cycles in a test harness) without touching the
/// engine's logic.
#[derive(Copy, Clone, Debug)]
pub struct EngineConfig {
    /// Number of probes sent before a `Probing` range is considered
    /// acquired.
    pub probe_retransmits: u32,
    /// Minimum spacing between probe transmissions, in milliseconds.
    pub probe_interval_base_ms: u64,
    /// Additional random jitter added to the probe interval, in
    /// milliseconds.
    pub probe_interval_variation_ms: u64,
    /// Minimum spacing between announce (defend) transmissions, in
    /// milliseconds.
    pub announce_interval_base_ms: u64,
    /// Additional random jitter added to the announce interval, in
    /// milliseconds.
    pub announce_interval_variation_ms: u64,
    /// Delay between a range entering `Released` and its teardown tick, in
    /// milliseconds.
    pub release_linger_ms: u64,
    /// Maximum randomized placement attempts before `reserve_random` falls
    /// back to a deterministic gap scan.
    pub random_placement_attempts: u32,
    /// Maximum number of new placements a restarting `Probing` range tries
    /// before giving up.
    pub restart_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_retransmits: MAAP_PROBE_RETRANSMITS,
            probe_interval_base_ms: MAAP_PROBE_INTERVAL_BASE_MS,
            probe_interval_variation_ms: MAAP_PROBE_INTERVAL_VARIATION_MS,
            announce_interval_base_ms: MAAP_ANNOUNCE_INTERVAL_BASE_MS,
            announce_interval_variation_ms: MAAP_ANNOUNCE_INTERVAL_VARIATION_MS,
            release_linger_ms: MAAP_RELEASE_LINGER_MS,
            random_placement_attempts: MAAP_RANDOM_PLACEMENT_ATTEMPTS,
            restart_attempts: MAAP_RESTART_ATTEMPTS,
        }
    }
}

/// The MAAP client engine (C5): owns every range it has reserved, the
/// interval tree backing non-overlap, the timer queue driving retransmits,
/// and the notification queue the host drains for delivery.
///
/// Single-threaded and reentrantly-unsafe by design (spec.md §5): a host
/// must serialize every call through one event loop. No method suspends;
/// each runs to completion before returning.
pub struct Engine {
    initialized: bool,
    pool: Pool,
    src_mac: Address,
    config: EngineConfig,
    maxid: u64,
    tree: IntervalTree,
    timers: TimerQueue,
    notify: NotifyQueue,
    ranges: HashMap<RangeId, Range>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Builds an uninitialized engine. No command other than `init` will
    /// succeed until `init` is called.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Builds an uninitialized engine with non-default timing.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            initialized: false,
            pool: Pool::default(),
            src_mac: 0,
            config,
            maxid: 0,
            tree: IntervalTree::new(),
            timers: TimerQueue::new(),
            notify: NotifyQueue::new(),
            ranges: HashMap::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    /// `(sender, src_mac, pool_base, pool_len)`: clears the tree, timer
    /// queue, notification queue and live-range set, resets `maxid` to
    /// zero, and adopts the new identity and pool. Idempotent: calling
    /// `init` again on an already-initialized engine discards everything
    /// from the previous generation.
    pub fn init(&mut self, sender: SenderId, src_mac: Address, pool_base: Address, pool_len: u32) {
        self.src_mac = src_mac;
        self.pool = Pool::new(pool_base, pool_len);
        self.tree.reset(self.pool);
        self.timers = TimerQueue::new();
        self.ranges.clear();
        self.maxid = 0;
        self.initialized = true;
        self.notify.push(sender, Notify::Initialized);
        log::info!(
            "maap: initialized, pool [{:#x},{:#x}], src {:#014x}",
            self.pool.low(),
            self.pool.high(),
            src_mac
        );
    }

    /// Drops every range without emitting a notification for any of them
    /// (spec.md §4.5). Any notifications already queued are left for the
    /// host to drain; flushing them is the host's responsibility.
    pub fn deinit(&mut self) {
        self.tree = IntervalTree::new();
        self.timers = TimerQueue::new();
        self.ranges.clear();
        self.initialized = false;
        log::info!("maap: deinitialized");
    }

    /// Requests a new range of `length` addresses, `length ∈ [1, 0xFFFF]`.
    ///
    /// Returns the new id, or `-1` if `length` is out of range or the
    /// engine hasn't been initialized. A `length` that cannot be placed
    /// anywhere in the pool is *not* reported through the return value —
    /// per spec.md §4.5 the id is still minted and returned, and the
    /// failure surfaces asynchronously as `Acquiring-failed(out_of_range)`.
    /// This lets a caller always correlate the eventual notification back
    /// to the `reserve` call that produced it.
    pub fn reserve(
        &mut self,
        sender: SenderId,
        length: u32,
        now_ns: u64,
        rng: &mut dyn RandomSource,
        tx: &mut dyn FrameTransmitter,
    ) -> i64 {
        if !self.initialized || length == 0 || length > 0xFFFF {
            return -1;
        }

        self.maxid += 1;
        let id = RangeId::new(self.maxid);

        match self.tree.reserve_random(length, self.pool, id, rng) {
            Some(iv) => {
                let mut new_range = Range::new(id, iv, sender);
                {
                    let mut ctx = self.ctx(now_ns, rng, tx);
                    ctx.notify.push(sender, Notify::Acquiring { id });
                    enter_probing(&mut new_range, &mut ctx);
                }
                self.ranges.insert(id, new_range);
            }
            None => {
                log::warn!("maap: reserve({length}) found no free placement");
                self.notify.push(
                    sender,
                    Notify::AcquiringFailed {
                        id,
                        reason: MaapError::PoolExhausted,
                    },
                );
            }
        }

        id.get() as i64
    }

    /// Releases a previously reserved range. Returns `0` on success, `-1`
    /// if no range with that id exists. The `Released` notification fires
    /// later, when the scheduled teardown tick runs, not synchronously
    /// here (spec.md §4.4).
    pub fn release(
        &mut self,
        id: u64,
        now_ns: u64,
        rng: &mut dyn RandomSource,
        tx: &mut dyn FrameTransmitter,
    ) -> i32 {
        if !self.initialized {
            return -1;
        }
        let rid = RangeId::new(id);
        match self.ranges.get_mut(&rid) {
            Some(r) => {
                let mut ctx = self.ctx(now_ns, rng, tx);
                range::release(r, &mut ctx);
                0
            }
            None => -1,
        }
    }

    /// Always enqueues exactly one `Status` notification to `sender`:
    /// either the range's current state, or an unknown-id status
    /// (`count = 0`, `state = None`) if no such range is live.
    pub fn status(&mut self, sender: SenderId, id: u64) {
        let rid = RangeId::new(id);
        match self.ranges.get(&rid) {
            Some(r) => self.notify.push(
                sender,
                Notify::Status {
                    id: rid,
                    start: r.interval.low,
                    count: r.interval.len(),
                    state: Some(r.state),
                },
            ),
            None => self.notify.push(
                sender,
                Notify::Status {
                    id: rid,
                    start: 0,
                    count: 0,
                    state: None,
                },
            ),
        }
    }

    /// Decodes an inbound frame and applies it to every live range whose
    /// interval overlaps the frame's requested address block. Returns `-1`
    /// on `MalformedFrame` (engine state unchanged) or if uninitialized,
    /// `0` otherwise — including when no range happened to overlap.
    pub fn handle_packet(
        &mut self,
        buf: &[u8],
        now_ns: u64,
        rng: &mut dyn RandomSource,
        tx: &mut dyn FrameTransmitter,
    ) -> i32 {
        if !self.initialized {
            return -1;
        }

        let (peer_mac, pdu) = match Pdu::decode(buf) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("maap: dropping inbound frame: {e}");
                return -1;
            }
        };

        let req_high = pdu
            .requested_start
            .saturating_add(u64::from(pdu.requested_count).saturating_sub(1));
        let owners: Vec<RangeId> = self
            .tree
            .overlaps(pdu.requested_start, req_high)
            .iter()
            .map(|iv| iv.owner)
            .collect();

        for owner in owners {
            let mut r = match self.ranges.remove(&owner) {
                Some(r) => r,
                // Already consumed earlier in this same sweep (e.g. a
                // restart moved another overlapping range out of the way);
                // nothing left to dispatch to.
                None => continue,
            };
            let outcome = {
                let mut ctx = self.ctx(now_ns, rng, tx);
                on_inbound(&mut r, peer_mac, &pdu, &mut ctx)
            };
            if let Outcome::Continue = outcome {
                self.ranges.insert(owner, r);
            }
        }

        0
    }

    /// Drains every timer entry due by `now_ns`, applying each range's
    /// state-appropriate timer action, looping until none remain so a host
    /// that fell behind catches up in one call (spec.md §4.5).
    pub fn handle_timer(
        &mut self,
        now_ns: u64,
        rng: &mut dyn RandomSource,
        tx: &mut dyn FrameTransmitter,
    ) {
        if !self.initialized {
            return;
        }

        while let Some(id) = self.timers.pop_if_due(now_ns) {
            let mut r = match self.ranges.remove(&id) {
                Some(r) => r,
                None => continue,
            };
            let outcome = {
                let mut ctx = self.ctx(now_ns, rng, tx);
                match r.state {
                    RangeState::Probing => on_probe_timer(&mut r, &mut ctx),
                    RangeState::Defending => on_announce_timer(&mut r, &mut ctx),
                    RangeState::Released => on_released_timer(&mut r, &mut ctx),
                }
            };
            if let Outcome::Continue = outcome {
                self.ranges.insert(id, r);
            }
        }
    }

    /// Nanoseconds until the next scheduled timer action, or a large
    /// sentinel ([`crate::timer_queue::NO_TIMER_DELAY_NS`]) if no range has
    /// one pending. A host arms its wake-up primitive for this long.
    pub fn next_delay(&self, now_ns: u64) -> u64 {
        self.timers.next_delay(now_ns)
    }

    /// Pops the oldest pending notification, if any.
    pub fn pop_notify(&mut self) -> Option<(SenderId, Notify)> {
        self.notify.pop()
    }

    pub fn notify_is_empty(&self) -> bool {
        self.notify.is_empty()
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    #[cfg(test)]
    pub(crate) fn range_state(&self, id: u64) -> Option<RangeState> {
        self.ranges.get(&RangeId::new(id)).map(|r| r.state)
    }

    fn ctx<'a>(
        &'a mut self,
        now: u64,
        rng: &'a mut dyn RandomSource,
        tx: &'a mut dyn FrameTransmitter,
    ) -> TransitionCtx<'a> {
        TransitionCtx {
            tree: &mut self.tree,
            timers: &mut self.timers,
            notify: &mut self.notify,
            rng,
            tx,
            pool: self.pool,
            src_mac: self.src_mac,
            config: self.config,
            now,
        }
    }
}
