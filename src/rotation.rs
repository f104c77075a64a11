//! Key rotation policy.
//!
//! Keeps each key set at its desired number of active keys and schedules
//! replacements ahead of expiry so consumers never observe a coverage gap.
//! Every key is created through the split-key exchange, never as a bare
//! insert.

use crate::clock::Clock;
use crate::error::Result;
use crate::exchange::SplitKeyExchange;
use crate::model::{EncryptionKey, KeySetConfig};
use crate::store::KeyStore;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// How far ahead of a key's expiration its replacement must become active.
pub fn refresh_window() -> Duration {
    Duration::days(1)
}

/// The outcome of rotating one key set in a multi-set run.
pub struct SetRotationOutcome {
    pub set_name: String,
    /// Number of keys created, or the failure that aborted this set.
    pub result: Result<usize>,
}

/// Drives rotation for one coordinator pair.
pub struct RotationPolicy {
    store: Arc<dyn KeyStore>,
    exchange: Arc<SplitKeyExchange>,
    clock: Arc<dyn Clock>,
}

impl RotationPolicy {
    pub fn new(
        store: Arc<dyn KeyStore>,
        exchange: Arc<SplitKeyExchange>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            exchange,
            clock,
        }
    }

    /// Rotates every configured key set, isolating failures: one set's
    /// failure is logged and reported but does not block the others.
    pub fn rotate_all(&self, sets: &[KeySetConfig]) -> Vec<SetRotationOutcome> {
        sets.iter()
            .map(|set| {
                let result = self.rotate_set(set);
                match &result {
                    Ok(created) => {
                        info!(set = %set.name, created, "key set rotation complete");
                    }
                    Err(error) => {
                        warn!(set = %set.name, %error, "key set rotation failed");
                    }
                }
                SetRotationOutcome {
                    set_name: set.name.clone(),
                    result,
                }
            })
            .collect()
    }

    /// Brings one key set up to its desired coverage. Returns the number of
    /// keys created.
    ///
    /// Re-running an already-satisfied set creates nothing. The run is not
    /// transactionally atomic: a failure part-way leaves the keys already
    /// created in place, and the next run counts them as satisfying.
    pub fn rotate_set(&self, set: &KeySetConfig) -> Result<usize> {
        let now = self.clock.now();
        let active = self
            .store
            .get_active_keys(&set.name, None, now)?;

        // Top up to the desired number of immediately-active keys.
        let missing = set.count.saturating_sub(active.len());
        let new_keys = self.exchange.create_split_keys(
            &set.name,
            set.key_template,
            missing,
            set.validity_days,
            set.ttl_days,
            now,
        )?;
        let mut created = new_keys.len();

        // Schedule replacements for keys that expire within the refresh
        // window, activating each replacement one window before the expiry it
        // covers. Keys expiring at the same instant need one replacement
        // apiece.
        let window = refresh_window();
        let mut expiring: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
        for key in active.iter().chain(new_keys.iter()) {
            if key.expiration_time <= now + window {
                *expiring.entry(key.expiration_time).or_insert(0) += 1;
            }
        }
        if expiring.is_empty() {
            return Ok(created);
        }

        let all_keys: Vec<EncryptionKey> = self
            .store
            .get_all_keys()?
            .into_iter()
            .filter(|key| key.set_name == set.name)
            .collect();

        for (expiration, needed) in expiring {
            let target_activation = expiration - window;
            let scheduled = all_keys
                .iter()
                .filter(|key| {
                    key.activation_time == target_activation
                        && key.expiration_time > expiration
                })
                .count();
            let replacements = needed.saturating_sub(scheduled);
            self.exchange.create_split_keys(
                &set.name,
                set.key_template,
                replacements,
                set.validity_days,
                set.ttl_days,
                target_activation,
            )?;
            created += replacements;
        }

        Ok(created)
    }
}
