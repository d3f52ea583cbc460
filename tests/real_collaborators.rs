// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drives the engine with a real seeded RNG (`rand_chacha`) instead of the
//! `FakeRandom` test fake used elsewhere, and with `env_logger` installed so
//! a run with `RUST_LOG=maap_core=debug` shows the engine's own log output.
//! `tests/scenarios.rs` pins down exact protocol outcomes against a fake with
//! a known sequence; this file only checks that a real `RngCore` impl is
//! accepted where `RandomSource` is expected and that the engine still
//! reaches a sane end state when driven by it.

use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;

use maap_core::address::{DEFAULT_POOL_BASE, DEFAULT_POOL_LEN};
use maap_core::collab::test_support::FakeTransmitter;
use maap_core::{Engine, Notify, SenderId, MAAP_PROBE_INTERVAL_BASE_MS, MAAP_PROBE_INTERVAL_VARIATION_MS, MAAP_PROBE_RETRANSMITS};

#[test]
fn chacha_rng_satisfies_random_source_and_reserve_completes() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut eng = Engine::new();
    let sender = SenderId::new(1);
    eng.init(sender, 0x00_11_22_33_44_55, DEFAULT_POOL_BASE, DEFAULT_POOL_LEN);

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut tx = FakeTransmitter::default();

    let id = eng.reserve(sender, 8, 0, &mut rng, &mut tx);
    assert!(id > 0);
    assert!(matches!(eng.pop_notify(), Some((_, Notify::Acquiring { .. }))));

    let mut now = 0u64;
    for _ in 0..MAAP_PROBE_RETRANSMITS {
        now += MAAP_PROBE_INTERVAL_BASE_MS + MAAP_PROBE_INTERVAL_VARIATION_MS;
        eng.handle_timer(now, &mut rng, &mut tx);
    }

    match eng.pop_notify() {
        Some((_, Notify::Acquired { start, count, .. })) => {
            assert!(start >= DEFAULT_POOL_BASE && start + u64::from(count) - 1 <= DEFAULT_POOL_BASE + u64::from(DEFAULT_POOL_LEN) - 1);
            assert_eq!(count, 8);
        }
        other => panic!("expected Acquired, got {other:?}"),
    }
    assert_eq!(tx.sent.len(), MAAP_PROBE_RETRANSMITS as usize);
}
