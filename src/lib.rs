// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MAAP (MAC Address Acquisition Protocol) client engine.
//!
//! Implements the dynamic-pool address claiming protocol described in IEEE
//! 1722-2016 Annex B: probing for a free block of multicast addresses,
//! defending an acquired block against later conflicting claimants, and
//! releasing blocks that are no longer needed.
//!
//! This crate is the protocol engine only. It owns no socket, no timer, and
//! no RNG of its own; a host wires in implementations of [`collab::MonotonicClock`],
//! [`collab::RandomSource`] and [`collab::FrameTransmitter`] and drives the
//! engine from its own event loop by feeding it inbound frames
//! ([`Engine::handle_packet`]) and timer ticks ([`Engine::handle_timer`]).

pub mod address;
pub mod codec;
pub mod collab;
pub mod engine;
pub mod error;
pub mod interval_tree;
pub mod notify;
pub mod range;
pub mod timer_queue;

pub use address::{Address, Interval, Pool};
pub use collab::{FrameTransmitter, MonotonicClock, RandomSource};
pub use engine::{Engine, EngineConfig, SenderId};
pub use error::MaapError;
pub use notify::Notify;
pub use range::{RangeId, RangeState};

/// Number of probe transmissions before a probing range is considered
/// acquired, per IEEE 1722-2016 Table B.8.
pub const MAAP_PROBE_RETRANSMITS: u32 = 3;

/// Minimum spacing between probe transmissions, in milliseconds (Table B.8).
pub const MAAP_PROBE_INTERVAL_BASE_MS: u64 = 500;

/// Additional random jitter added to the probe interval, in milliseconds
/// (Table B.8).
pub const MAAP_PROBE_INTERVAL_VARIATION_MS: u64 = 100;

/// Minimum spacing between announce (defend) transmissions, in milliseconds
/// (Table B.8).
pub const MAAP_ANNOUNCE_INTERVAL_BASE_MS: u64 = 30_000;

/// Additional random jitter added to the announce interval, in milliseconds
/// (Table B.8).
pub const MAAP_ANNOUNCE_INTERVAL_VARIATION_MS: u64 = 2_000;

/// Delay between a range entering `Released` and its teardown tick, in
/// milliseconds. Long enough to flush an in-flight announce, short enough
/// that `STATUS` after `RELEASE` reliably reports "unknown id".
pub const MAAP_RELEASE_LINGER_MS: u64 = 10;

/// Maximum number of randomized placement attempts `reserve_random` makes
/// before falling back to a deterministic gap scan.
pub const MAAP_RANDOM_PLACEMENT_ATTEMPTS: u32 = 64;

/// Maximum number of new placements a restarting `Probing` range will try
/// before giving up and reporting `PoolExhausted`.
pub const MAAP_RESTART_ATTEMPTS: u32 = 8;
