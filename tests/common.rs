//!
//! Shared fixture for integration tests: two coordinators wired in-process.
//!

use chrono::{TimeZone, Utc};
use shard_kit::allocator::KeyIdAllocator;
use shard_kit::clock::FixedClock;
use shard_kit::exchange::{InProcessPeer, SplitKeyExchange, SplitKeyReceiver};
use shard_kit::provider::{LocalKeyProvider, SplitSigner};
use shard_kit::store::MemoryKeyStore;
use std::sync::Arc;

pub const EXCHANGE_KEK: &str = "kms://shared/exchange";
pub const KEK_A: &str = "kms://coordinator-a/kek";
pub const KEK_B: &str = "kms://coordinator-b/kek";

pub struct TwoCoordinators {
    pub exchange: Arc<SplitKeyExchange>,
    pub store_a: Arc<MemoryKeyStore>,
    pub store_b: Arc<MemoryKeyStore>,
    pub provider_a: Arc<LocalKeyProvider>,
    pub provider_b: Arc<LocalKeyProvider>,
    pub clock: Arc<FixedClock>,
}

fn as_signer(provider: &Arc<LocalKeyProvider>) -> Arc<dyn SplitSigner> {
    provider.clone()
}

/// Builds coordinator A (originator) and coordinator B (receiver) sharing one
/// exchange KEK, both signing their attestations, on a fixed clock.
pub fn two_coordinators(allocator: KeyIdAllocator) -> TwoCoordinators {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
    ));

    let provider_a = Arc::new(
        LocalKeyProvider::new()
            .with_generated_kek(KEK_A)
            .unwrap()
            .with_generated_kek(EXCHANGE_KEK)
            .unwrap()
            .with_generated_signing_key()
            .unwrap(),
    );
    let provider_b = Arc::new(
        LocalKeyProvider::new()
            .with_generated_kek(KEK_B)
            .unwrap()
            .with_kek(EXCHANGE_KEK, provider_a.kek_bytes(EXCHANGE_KEK).unwrap())
            .with_generated_signing_key()
            .unwrap(),
    );

    let store_a = Arc::new(MemoryKeyStore::with_clock(clock.clone()));
    let store_b = Arc::new(MemoryKeyStore::with_clock(clock.clone()));

    let receiver = SplitKeyReceiver::new(
        store_b.clone(),
        provider_b.clone(),
        KEK_B,
        Some(as_signer(&provider_b)),
    );
    let peer = Arc::new(InProcessPeer::new(
        receiver,
        provider_b.clone(),
        Some(EXCHANGE_KEK.to_string()),
    ));

    let exchange = Arc::new(SplitKeyExchange::new(
        store_a.clone(),
        provider_a.clone(),
        peer,
        allocator,
        KEK_A,
        Some(as_signer(&provider_a)),
        clock.clone(),
    ));

    TwoCoordinators {
        exchange,
        store_a,
        store_b,
        provider_a,
        provider_b,
        clock,
    }
}
