// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The narrow collaborator interfaces the engine consumes from its host:
//! a monotonic clock, a source of randomness, and a frame transmitter.
//!
//! None of these are implemented here; a host wires in the real raw socket,
//! the real OS clock, and a real RNG. Tests wire in the fakes in
//! [`test_support`] instead, so the engine's behavior is fully deterministic
//! under test, as spec.md §5 requires.

use rand_core::RngCore;

/// A monotonic time source, in nanoseconds. The engine never calls a system
/// clock directly; it asks this trait.
pub trait MonotonicClock {
    fn now_ns(&self) -> u64;
}

/// A source of uniformly-distributed 64-bit values, used for interval
/// selection and per-event jitter.
///
/// Any `rand_core::RngCore` implementation — including
/// `rand_chacha::ChaCha8Rng` seeded for deterministic tests — satisfies this
/// automatically via the blanket impl below.
pub trait RandomSource {
    fn uniform_u64(&mut self) -> u64;
}

impl<T: RngCore> RandomSource for T {
    fn uniform_u64(&mut self) -> u64 {
        self.next_u64()
    }
}

/// Transmits an encoded 42-byte MAAP frame on the wire. Transmission
/// failures are logged and swallowed by the caller (spec.md §7,
/// `TransportFailure`): a dropped probe or announce is within MAAP's
/// expected loss tolerance.
pub trait FrameTransmitter {
    fn send_frame(&mut self, frame: &[u8; 42]) -> Result<(), TransmitError>;
}

/// Opaque transmit failure; the engine never inspects the reason, only logs
/// that one occurred.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransmitError;

/// Deterministic fakes for the collaborator traits, used by this crate's own
/// tests and available to host test suites that want to drive the engine
/// under full control.
pub mod test_support {
    use super::*;

    /// A clock whose reading is set directly by the test.
    #[derive(Default)]
    pub struct FakeClock {
        pub now: core::cell::Cell<u64>,
    }

    impl FakeClock {
        pub fn new(now: u64) -> Self {
            Self {
                now: core::cell::Cell::new(now),
            }
        }

        pub fn advance(&self, delta: u64) {
            self.now.set(self.now.get() + delta);
        }

        pub fn set(&self, now: u64) {
            self.now.set(now);
        }
    }

    impl MonotonicClock for FakeClock {
        fn now_ns(&self) -> u64 {
            self.now.get()
        }
    }

    /// A "random" source that replays a fixed, operator-chosen sequence of
    /// values, repeating the last one once exhausted. Gives tests exact
    /// control over which interval `reserve_random` picks and how much
    /// jitter a timer gets.
    pub struct FakeRandom {
        sequence: Vec<u64>,
        pos: usize,
    }

    impl FakeRandom {
        pub fn new(sequence: Vec<u64>) -> Self {
            assert!(!sequence.is_empty(), "FakeRandom needs at least one value");
            Self { sequence, pos: 0 }
        }
    }

    impl RandomSource for FakeRandom {
        fn uniform_u64(&mut self) -> u64 {
            let v = self.sequence[self.pos.min(self.sequence.len() - 1)];
            if self.pos < self.sequence.len() - 1 {
                self.pos += 1;
            }
            v
        }
    }

    /// Records every frame handed to it; never fails.
    #[derive(Default)]
    pub struct FakeTransmitter {
        pub sent: Vec<[u8; 42]>,
    }

    impl FrameTransmitter for FakeTransmitter {
        fn send_frame(&mut self, frame: &[u8; 42]) -> Result<(), TransmitError> {
            self.sent.push(*frame);
            Ok(())
        }
    }
}
