// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-range state machine (C4): Probing, Defending, Released.
//!
//! A [`Range`] is the reservation the engine manages on a caller's behalf.
//! The functions in this module advance a single range in response to a
//! timer tick or an inbound packet; they never touch any range other than
//! the one passed in, though they may ask the engine context to restart it
//! (which reshapes its `interval` via the interval tree) or remove it
//! outright.

use crate::address::{Address, Interval, Pool};
use crate::codec::{MsgType, Pdu};
use crate::collab::{FrameTransmitter, RandomSource};
use crate::engine::{EngineConfig, SenderId};
use crate::interval_tree::IntervalTree;
use crate::notify::{Notify, NotifyQueue};
use crate::timer_queue::TimerQueue;

/// Opaque, monotonically-assigned, never-reused identifier for a [`Range`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RangeId(u64);

impl RangeId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a [`Range`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RangeState {
    /// Transmitting probes, waiting to see if anyone else claims the block.
    Probing,
    /// Acquired; periodically announcing and defending against claimants.
    Defending,
    /// Released or yielded; waiting for its teardown tick.
    Released,
}

/// A reservation under management.
#[derive(Clone, Debug)]
pub struct Range {
    pub id: RangeId,
    pub state: RangeState,
    /// Remaining probes while `Probing`; unused otherwise.
    pub counter: u32,
    /// Transient flag set by the engine during a conflict-resolution sweep
    /// over intervals overlapping an inbound frame; always cleared before
    /// the sweep returns.
    pub overlapping: bool,
    /// Absolute monotonic time of this range's next scheduled action.
    /// Meaningful iff the range is currently linked into the timer queue.
    pub next_act_time: Option<u64>,
    pub interval: Interval,
    /// Opaque handle identifying the caller that requested this range. The
    /// engine never dereferences it.
    pub sender: SenderId,
    /// Peer MAC we most recently sent a Defend to while Defending, reset at
    /// the start of each announce cycle. Used to detect a peer persisting
    /// past one exchange within the cycle, which triggers a yield.
    defended_peer: Option<Address>,
}

impl Range {
    pub(crate) fn new(id: RangeId, interval: Interval, sender: SenderId) -> Self {
        Self {
            id,
            state: RangeState::Probing,
            // Set for real by `enter_probing`, which always runs before this
            // range is scheduled or reported on.
            counter: 0,
            overlapping: false,
            next_act_time: None,
            interval,
            sender,
            defended_peer: None,
        }
    }
}

/// The collaborators and shared state a range transition needs, gathered
/// into one place so [`Engine`](crate::engine::Engine) doesn't have to pass
/// eight arguments to every function below.
pub(crate) struct TransitionCtx<'a> {
    pub tree: &'a mut IntervalTree,
    pub timers: &'a mut TimerQueue,
    pub notify: &'a mut NotifyQueue,
    pub rng: &'a mut dyn RandomSource,
    pub tx: &'a mut dyn FrameTransmitter,
    pub pool: Pool,
    pub src_mac: Address,
    pub config: EngineConfig,
    pub now: u64,
}

impl TransitionCtx<'_> {
    fn jittered(&mut self, base_ms: u64, variation_ms: u64) -> u64 {
        if variation_ms == 0 {
            return base_ms;
        }
        base_ms + self.rng.uniform_u64() % (variation_ms + 1)
    }

    fn send(&mut self, pdu: &Pdu) {
        let frame = pdu.encode(self.src_mac);
        if self.tx.send_frame(&frame).is_err() {
            log::warn!("maap: frame transmit failed, schedule unaffected");
        }
    }
}

/// Begins probing a freshly-allocated range: arms the first probe timer.
pub(crate) fn enter_probing(range: &mut Range, ctx: &mut TransitionCtx<'_>) {
    range.counter = ctx.config.probe_retransmits;
    let delay = ctx.jittered(
        ctx.config.probe_interval_base_ms,
        ctx.config.probe_interval_variation_ms,
    );
    range.next_act_time = Some(ctx.now + delay);
    ctx.timers.schedule(range.id, ctx.now + delay);
    log::debug!(
        "maap: range {} probing [{:#x},{:#x}]",
        range.id,
        range.interval.low,
        range.interval.high
    );
}

/// Outcome of advancing a range; tells the engine what, if anything, to do
/// with the range afterward.
pub(crate) enum Outcome {
    /// The range is still alive and (possibly) rescheduled.
    Continue,
    /// The range should be removed from the tree and dropped.
    Remove,
}

/// A probe timer fired for a `Probing` range. `counter` holds the number of
/// probes remaining *after* this one; it is decremented here, and reaching
/// zero on this tick (not the next) is what completes acquisition, so that
/// exactly `MAAP_PROBE_RETRANSMITS` probes are sent in total before the
/// range is acquired, per spec.md §8 scenario 1.
pub(crate) fn on_probe_timer(range: &mut Range, ctx: &mut TransitionCtx<'_>) -> Outcome {
    debug_assert!(matches!(range.state, RangeState::Probing));

    ctx.send(&Pdu {
        msg_type: MsgType::Probe,
        requested_start: range.interval.low,
        requested_count: range.interval.len(),
        conflict_start: 0,
        conflict_count: 0,
    });

    if range.counter > 0 {
        range.counter -= 1;
    }

    if range.counter > 0 {
        let delay = ctx.jittered(
            ctx.config.probe_interval_base_ms,
            ctx.config.probe_interval_variation_ms,
        );
        range.next_act_time = Some(ctx.now + delay);
        ctx.timers.schedule(range.id, ctx.now + delay);
        Outcome::Continue
    } else {
        range.state = RangeState::Defending;
        ctx.notify.push(
            range.sender,
            Notify::Acquired {
                id: range.id,
                start: range.interval.low,
                count: range.interval.len(),
            },
        );
        let delay = ctx.jittered(
            ctx.config.announce_interval_base_ms,
            ctx.config.announce_interval_variation_ms,
        );
        range.next_act_time = Some(ctx.now + delay);
        ctx.timers.schedule(range.id, ctx.now + delay);
        log::info!(
            "maap: range {} acquired [{:#x},+{}]",
            range.id,
            range.interval.low,
            range.interval.len()
        );
        Outcome::Continue
    }
}

/// An announce timer fired for a `Defending` range.
pub(crate) fn on_announce_timer(range: &mut Range, ctx: &mut TransitionCtx<'_>) -> Outcome {
    debug_assert!(matches!(range.state, RangeState::Defending));

    range.defended_peer = None;
    ctx.send(&Pdu {
        msg_type: MsgType::Announce,
        requested_start: range.interval.low,
        requested_count: range.interval.len(),
        conflict_start: 0,
        conflict_count: 0,
    });
    let delay = ctx.jittered(
        ctx.config.announce_interval_base_ms,
        ctx.config.announce_interval_variation_ms,
    );
    range.next_act_time = Some(ctx.now + delay);
    ctx.timers.schedule(range.id, ctx.now + delay);
    Outcome::Continue
}

/// The teardown timer fired for a `Released` range.
pub(crate) fn on_released_timer(range: &mut Range, ctx: &mut TransitionCtx<'_>) -> Outcome {
    debug_assert!(matches!(range.state, RangeState::Released));
    ctx.notify.push(range.sender, Notify::Released { id: range.id });
    ctx.tree.remove(range.id);
    log::info!("maap: range {} torn down", range.id);
    Outcome::Remove
}

/// Moves a `Probing` range to a fresh random placement of the same length,
/// after losing (or tying) a probe-time conflict. Bounded by
/// `config.restart_attempts`; persistent failure removes the range and
/// reports [`crate::MaapError::PoolExhausted`] via notification.
pub(crate) fn restart(range: &mut Range, ctx: &mut TransitionCtx<'_>) -> Outcome {
    let length = range.interval.len();
    ctx.tree.remove(range.id);
    ctx.timers.unschedule(range.id);

    for _ in 0..ctx.config.restart_attempts {
        if let Some(iv) = ctx
            .tree
            .reserve_random(length, ctx.pool, range.id, ctx.rng)
        {
            range.interval = iv;
            enter_probing(range, ctx);
            log::debug!("maap: range {} restarted at [{:#x},+{}]", range.id, iv.low, length);
            return Outcome::Continue;
        }
    }

    log::warn!("maap: range {} could not find a new placement, dropping", range.id);
    ctx.notify.push(
        range.sender,
        Notify::AcquiringFailed {
            id: range.id,
            reason: crate::MaapError::PoolExhausted,
        },
    );
    Outcome::Remove
}

/// Transitions a `Defending` (or `Probing`) range straight to `Released`,
/// scheduling its teardown after `config.release_linger_ms` and emitting
/// `Yielded` so the caller can request a fresh range if it wants one.
fn yield_range(range: &mut Range, ctx: &mut TransitionCtx<'_>) {
    range.state = RangeState::Released;
    ctx.notify.push(
        range.sender,
        Notify::Yielded {
            id: range.id,
            start: range.interval.low,
            count: range.interval.len(),
        },
    );
    ctx.timers.unschedule(range.id);
    range.next_act_time = Some(ctx.now + ctx.config.release_linger_ms);
    ctx.timers.schedule(range.id, ctx.now + ctx.config.release_linger_ms);
    log::info!("maap: range {} yielded", range.id);
}

/// Applies the release command: schedules a near-immediate teardown tick
/// without emitting a notification of its own (the `Released` notification
/// fires when that tick is processed).
pub(crate) fn release(range: &mut Range, ctx: &mut TransitionCtx<'_>) {
    range.state = RangeState::Released;
    ctx.timers.unschedule(range.id);
    range.next_act_time = Some(ctx.now + ctx.config.release_linger_ms);
    ctx.timers.schedule(range.id, ctx.now + ctx.config.release_linger_ms);
}

/// A packet overlapping this range's interval arrived. `peer_mac` is the
/// inbound frame's source address; `pdu` its decoded contents. Implements
/// the packet-driven transition table of spec.md §4.4.
pub(crate) fn on_inbound(
    range: &mut Range,
    peer_mac: Address,
    pdu: &Pdu,
    ctx: &mut TransitionCtx<'_>,
) -> Outcome {
    match (range.state, pdu.msg_type) {
        (RangeState::Released, _) => Outcome::Continue,

        (RangeState::Probing, MsgType::Probe) => {
            if ctx.src_mac > peer_mac {
                send_defend(range, ctx);
                Outcome::Continue
            } else {
                // Peer wins on strictly-greater MAC, and ties restart too
                // (spec.md's Open Question: restart-on-equal preserves
                // liveness since neither side concedes otherwise).
                restart(range, ctx)
            }
        }

        (RangeState::Probing, MsgType::Announce) => restart(range, ctx),

        (RangeState::Probing, MsgType::Defend) => restart(range, ctx),

        (RangeState::Defending, MsgType::Probe) => {
            send_defend(range, ctx);
            Outcome::Continue
        }

        (RangeState::Defending, MsgType::Announce) => {
            if range.defended_peer == Some(peer_mac) {
                yield_range(range, ctx);
            } else {
                send_defend(range, ctx);
                range.defended_peer = Some(peer_mac);
            }
            Outcome::Continue
        }

        (RangeState::Defending, MsgType::Defend) => {
            yield_range(range, ctx);
            Outcome::Continue
        }
    }
}

fn send_defend(range: &Range, ctx: &mut TransitionCtx<'_>) {
    ctx.send(&Pdu {
        msg_type: MsgType::Defend,
        requested_start: range.interval.low,
        requested_count: range.interval.len(),
        conflict_start: range.interval.low,
        conflict_count: range.interval.len(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::test_support::{FakeRandom, FakeTransmitter};
    use crate::MAAP_PROBE_RETRANSMITS;

    fn ctx<'a>(
        tree: &'a mut IntervalTree,
        timers: &'a mut TimerQueue,
        notify: &'a mut NotifyQueue,
        rng: &'a mut FakeRandom,
        tx: &'a mut FakeTransmitter,
        now: u64,
    ) -> TransitionCtx<'a> {
        TransitionCtx {
            tree,
            timers,
            notify,
            rng,
            tx,
            pool: Pool::default(),
            src_mac: 0x00_11_22_33_44_55,
            config: EngineConfig::default(),
            now,
        }
    }

    #[test]
    fn probe_countdown_then_acquire() {
        let mut tree = IntervalTree::new();
        let mut timers = TimerQueue::new();
        let mut notify = NotifyQueue::new();
        let mut rng = FakeRandom::new(vec![0]);
        let mut tx = FakeTransmitter::default();

        let iv = tree
            .reserve_random(8, Pool::default(), RangeId::new(1), &mut rng)
            .unwrap();
        let mut range = Range::new(RangeId::new(1), iv, SenderId::new(1));

        let mut c = ctx(&mut tree, &mut timers, &mut notify, &mut rng, &mut tx, 0);
        enter_probing(&mut range, &mut c);
        assert_eq!(range.counter, MAAP_PROBE_RETRANSMITS);

        for _ in 0..MAAP_PROBE_RETRANSMITS {
            let mut c = ctx(&mut tree, &mut timers, &mut notify, &mut rng, &mut tx, 0);
            on_probe_timer(&mut range, &mut c);
        }
        assert!(matches!(range.state, RangeState::Defending));
        assert_eq!(tx.sent.len(), MAAP_PROBE_RETRANSMITS as usize);
        assert!(matches!(
            notify.pop(),
            Some((_, Notify::Acquired { .. }))
        ));
    }

    #[test]
    fn higher_peer_mac_wins_probe_collision() {
        let mut tree = IntervalTree::new();
        let mut timers = TimerQueue::new();
        let mut notify = NotifyQueue::new();
        let mut rng = FakeRandom::new(vec![0]);
        let mut tx = FakeTransmitter::default();

        let iv = tree
            .reserve_random(8, Pool::default(), RangeId::new(1), &mut rng)
            .unwrap();
        let mut range = Range::new(RangeId::new(1), iv, SenderId::new(1));
        let original_low = range.interval.low;

        let mut c = ctx(&mut tree, &mut timers, &mut notify, &mut rng, &mut tx, 0);
        let pdu = Pdu {
            msg_type: MsgType::Probe,
            requested_start: iv.low,
            requested_count: iv.len(),
            conflict_start: 0,
            conflict_count: 0,
        };
        // peer with all-ones MAC beats our local src_mac -> we restart.
        on_inbound(&mut range, 0xFF_FF_FF_FF_FF_FF, &pdu, &mut c);
        assert_ne!(range.interval.low, original_low);
    }

    #[test]
    fn lower_peer_mac_loses_we_defend() {
        let mut tree = IntervalTree::new();
        let mut timers = TimerQueue::new();
        let mut notify = NotifyQueue::new();
        let mut rng = FakeRandom::new(vec![0]);
        let mut tx = FakeTransmitter::default();

        let iv = tree
            .reserve_random(8, Pool::default(), RangeId::new(1), &mut rng)
            .unwrap();
        let mut range = Range::new(RangeId::new(1), iv, SenderId::new(1));
        let original_low = range.interval.low;

        let mut c = ctx(&mut tree, &mut timers, &mut notify, &mut rng, &mut tx, 0);
        let pdu = Pdu {
            msg_type: MsgType::Probe,
            requested_start: iv.low,
            requested_count: iv.len(),
            conflict_start: 0,
            conflict_count: 0,
        };
        on_inbound(&mut range, 0x00_00_00_00_00_01, &pdu, &mut c);
        assert_eq!(range.interval.low, original_low);
        assert_eq!(tx.sent.len(), 1);
    }

    /// spec.md §9's open question: IEEE 1722 doesn't define the degenerate
    /// equal-MAC case, so this picks restart-on-equal to preserve liveness
    /// (neither side would concede under a "higher MAC wins" rule applied
    /// symmetrically).
    #[test]
    fn equal_peer_mac_restarts_for_liveness() {
        let mut tree = IntervalTree::new();
        let mut timers = TimerQueue::new();
        let mut notify = NotifyQueue::new();
        let mut rng = FakeRandom::new(vec![0, 50]);
        let mut tx = FakeTransmitter::default();
        let src_mac = 0x00_11_22_33_44_55;

        let iv = tree
            .reserve_random(8, Pool::default(), RangeId::new(1), &mut rng)
            .unwrap();
        let mut range = Range::new(RangeId::new(1), iv, SenderId::new(1));
        let original_low = range.interval.low;

        let mut c = TransitionCtx {
            tree: &mut tree,
            timers: &mut timers,
            notify: &mut notify,
            rng: &mut rng,
            tx: &mut tx,
            pool: Pool::default(),
            src_mac,
            config: EngineConfig::default(),
            now: 0,
        };
        let pdu = Pdu {
            msg_type: MsgType::Probe,
            requested_start: iv.low,
            requested_count: iv.len(),
            conflict_start: 0,
            conflict_count: 0,
        };
        on_inbound(&mut range, src_mac, &pdu, &mut c);
        assert_ne!(range.interval.low, original_low);
        assert!(tx.sent.is_empty());
    }

    #[test]
    fn sustained_announce_conflict_yields() {
        let mut tree = IntervalTree::new();
        let mut timers = TimerQueue::new();
        let mut notify = NotifyQueue::new();
        let mut rng = FakeRandom::new(vec![0]);
        let mut tx = FakeTransmitter::default();

        let iv = tree
            .reserve_random(8, Pool::default(), RangeId::new(1), &mut rng)
            .unwrap();
        let mut range = Range::new(RangeId::new(1), iv, SenderId::new(1));
        range.state = RangeState::Defending;

        let pdu = Pdu {
            msg_type: MsgType::Announce,
            requested_start: iv.low,
            requested_count: iv.len(),
            conflict_start: 0,
            conflict_count: 0,
        };
        let peer = 0xFF_FF_FF_FF_FF_FFu64;

        let mut c = ctx(&mut tree, &mut timers, &mut notify, &mut rng, &mut tx, 0);
        on_inbound(&mut range, peer, &pdu, &mut c);
        assert!(matches!(range.state, RangeState::Defending));

        let mut c = ctx(&mut tree, &mut timers, &mut notify, &mut rng, &mut tx, 0);
        on_inbound(&mut range, peer, &pdu, &mut c);
        assert!(matches!(range.state, RangeState::Released));
        assert!(notify
            .iter()
            .any(|(_, n)| matches!(n, Notify::Yielded { .. })));
    }
}
