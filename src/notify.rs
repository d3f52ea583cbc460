// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The notification queue (C6): a FIFO of pending notifications tagged with
//! the opaque sender handle that requested the range the notification is
//! about.

use std::collections::VecDeque;
use std::fmt;

use crate::address::Address;
use crate::engine::SenderId;
use crate::error::MaapError;
use crate::range::{RangeId, RangeState};

/// A single externally-observable event. Produced by range transitions and
/// by the synchronous command entry points ([`crate::Engine::status`]).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Notify {
    /// `Engine::init` completed.
    Initialized,
    /// A reservation has begun probing.
    Acquiring { id: RangeId },
    /// A range finished probing and is now defended.
    Acquired {
        id: RangeId,
        start: Address,
        count: u32,
    },
    /// A reservation could not be completed.
    AcquiringFailed { id: RangeId, reason: MaapError },
    /// A range was released (by command) or torn down after being yielded.
    Released { id: RangeId },
    /// The synchronous answer to a `STATUS` command, including for an
    /// unknown id (`state` is `None`, `count` is `0`).
    Status {
        id: RangeId,
        start: Address,
        count: u32,
        state: Option<RangeState>,
    },
    /// A defended range lost a sustained conflict and gave up the address
    /// block; the caller may request a fresh range if it still needs one.
    Yielded {
        id: RangeId,
        start: Address,
        count: u32,
    },
}

impl fmt::Display for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notify::Initialized => write!(f, "initialized"),
            Notify::Acquiring { id } => write!(f, "range {id}: acquiring"),
            Notify::Acquired { id, start, count } => {
                write!(f, "range {id}: acquired {count} addresses at {start:#x}")
            }
            Notify::AcquiringFailed { id, reason } => {
                write!(f, "range {id}: acquisition failed ({reason})")
            }
            Notify::Released { id } => write!(f, "range {id}: released"),
            Notify::Status {
                id,
                start,
                count,
                state,
            } => match state {
                Some(state) => write!(f, "range {id}: {state:?} {count} addresses at {start:#x}"),
                None => write!(f, "range {id}: unknown"),
            },
            Notify::Yielded { id, start, count } => {
                write!(f, "range {id}: yielded {count} addresses at {start:#x}")
            }
        }
    }
}

#[derive(Default)]
pub struct NotifyQueue {
    entries: VecDeque<(SenderId, Notify)>,
}

impl NotifyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sender: SenderId, notify: Notify) {
        self.entries.push_back((sender, notify));
    }

    pub fn pop(&mut self) -> Option<(SenderId, Notify)> {
        self.entries.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates the queue without consuming it; useful for host-side
    /// diagnostics and tests.
    pub fn iter(&self) -> impl Iterator<Item = &(SenderId, Notify)> {
        self.entries.iter()
    }
}
