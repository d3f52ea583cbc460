// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Engine error kinds.

use core::fmt;

/// Failure kinds the engine can report, either synchronously via a return
/// value or asynchronously via a [`crate::Notify::AcquiringFailed`] record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MaapError {
    /// A command argument was out of range: a reservation length of `0` or
    /// greater than `0xFFFF`, an unknown range id, or a command issued
    /// before [`crate::Engine::init`].
    InvalidArgument,

    /// A received frame failed wire validation: wrong length, Ethertype,
    /// subtype, or message type. The engine's state is unchanged.
    MalformedFrame,

    /// No free sub-interval of the requested length could be found in the
    /// pool, even after the deterministic gap scan.
    PoolExhausted,

    /// A defended range lost a sustained conflict and was yielded.
    ConflictYield,

    /// The network collaborator failed to transmit a frame. Never fatal:
    /// MAAP's retransmission schedule already tolerates lost packets, so a
    /// failed transmit is logged and the range's existing schedule stands.
    TransportFailure,
}

impl fmt::Display for MaapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MaapError::InvalidArgument => "invalid argument",
            MaapError::MalformedFrame => "malformed MAAP frame",
            MaapError::PoolExhausted => "address pool exhausted",
            MaapError::ConflictYield => "range yielded after sustained conflict",
            MaapError::TransportFailure => "frame transmission failed",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for MaapError {}
