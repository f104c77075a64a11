//! In-memory key store used by tests and local deployments.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::EncryptionKey;
use crate::store::KeyStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// A concurrent map keyed by `(set_name, key_id)`.
pub struct MemoryKeyStore {
    keys: DashMap<(String, String), EncryptionKey>,
    clock: Arc<dyn Clock>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Recency queries use the injected clock, so tests can pin "now".
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            keys: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for MemoryKeyStore {
    fn create_key(&self, key: &EncryptionKey, overwrite: bool) -> Result<()> {
        let id = (key.set_name.clone(), key.key_id.clone());
        if overwrite {
            self.keys.insert(id, key.clone());
            return Ok(());
        }
        // Entry API keeps check-and-insert atomic under concurrent writers.
        use dashmap::mapref::entry::Entry;
        match self.keys.entry(id) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(format!(
                "key already exists: {}",
                key.key_id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(key.clone());
                Ok(())
            }
        }
    }

    fn create_keys(&self, keys: &[EncryptionKey]) -> Vec<Result<()>> {
        keys.iter().map(|key| self.create_key(key, false)).collect()
    }

    fn get_key(&self, set_name: &str, key_id: &str) -> Result<EncryptionKey> {
        self.keys
            .get(&(set_name.to_string(), key_id.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("key not found: {key_id}")))
    }

    fn get_active_keys(
        &self,
        set_name: &str,
        limit: Option<usize>,
        at: DateTime<Utc>,
    ) -> Result<Vec<EncryptionKey>> {
        let mut active: Vec<EncryptionKey> = self
            .keys
            .iter()
            .filter(|entry| entry.key().0 == set_name && entry.value().is_active_at(at))
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by(|a, b| b.expiration_time.cmp(&a.expiration_time));
        if let Some(limit) = limit {
            active.truncate(limit);
        }
        Ok(active)
    }

    fn list_recent_keys(&self, set_name: &str, max_age: Duration) -> Result<Vec<EncryptionKey>> {
        let cutoff = self.clock.now() - max_age;
        let mut recent: Vec<EncryptionKey> = self
            .keys
            .iter()
            .filter(|entry| entry.key().0 == set_name && entry.value().creation_time >= cutoff)
            .map(|entry| entry.value().clone())
            .collect();
        recent.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
        Ok(recent)
    }

    fn get_all_keys(&self) -> Result<Vec<EncryptionKey>> {
        Ok(self.keys.iter().map(|entry| entry.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    fn key(set: &str, id: &str, activation: DateTime<Utc>, expiration: DateTime<Utc>) -> EncryptionKey {
        EncryptionKey {
            key_id: id.to_string(),
            set_name: set.to_string(),
            public_key_material: format!("pk-{id}"),
            public_keyset: String::new(),
            private_keyset: None,
            key_encryption_key_uri: String::new(),
            creation_time: activation,
            activation_time: activation,
            expiration_time: expiration,
            ttl_days: 365,
            key_split_data: Vec::new(),
        }
    }

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn strict_create_rejects_collision_and_preserves_stored_value() {
        let store = MemoryKeyStore::new();
        let original = key("", "a", t(1), t(10));
        store.create_key(&original, false).unwrap();

        let mut replacement = key("", "a", t(2), t(20));
        replacement.public_key_material = "pk-other".to_string();
        let result = store.create_key(&replacement, false);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        assert_eq!(store.get_key("", "a").unwrap(), original);

        store.create_key(&replacement, true).unwrap();
        assert_eq!(store.get_key("", "a").unwrap(), replacement);
    }

    #[test]
    fn get_key_not_found() {
        let store = MemoryKeyStore::new();
        assert!(matches!(store.get_key("", "missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn active_keys_honor_half_open_window_and_set() {
        let store = MemoryKeyStore::new();
        store.create_key(&key("s", "a", t(1), t(3)), false).unwrap();
        store.create_key(&key("s", "b", t(2), t(4)), false).unwrap();
        store.create_key(&key("other", "c", t(1), t(4)), false).unwrap();

        let at_t1 = store.get_active_keys("s", None, t(1)).unwrap();
        assert_eq!(ids(&at_t1), vec!["a"]);

        let at_t2 = store.get_active_keys("s", None, t(2)).unwrap();
        assert_eq!(ids(&at_t2), vec!["b", "a"]); // expiration descending

        // "a" expires at t3 exclusive.
        let at_t3 = store.get_active_keys("s", None, t(3)).unwrap();
        assert_eq!(ids(&at_t3), vec!["b"]);

        let limited = store.get_active_keys("s", Some(1), t(2)).unwrap();
        assert_eq!(ids(&limited), vec!["b"]);
    }

    #[test]
    fn recent_keys_filter_by_creation_time() {
        let clock = Arc::new(FixedClock::new(t(10)));
        let store = MemoryKeyStore::with_clock(clock);
        store.create_key(&key("s", "old", t(1), t(20)), false).unwrap();
        store.create_key(&key("s", "new", t(9), t(20)), false).unwrap();

        let recent = store.list_recent_keys("s", Duration::days(2)).unwrap();
        assert_eq!(ids(&recent), vec!["new"]);
    }

    #[test]
    fn batch_create_is_best_effort() {
        let store = MemoryKeyStore::new();
        store.create_key(&key("s", "dup", t(1), t(2)), false).unwrap();

        let results = store.create_keys(&[
            key("s", "dup", t(1), t(2)),
            key("s", "fresh", t(1), t(2)),
        ]);
        assert!(matches!(results[0], Err(Error::AlreadyExists(_))));
        assert!(results[1].is_ok());
        assert!(store.get_key("s", "fresh").is_ok());
    }

    fn ids(keys: &[EncryptionKey]) -> Vec<&str> {
        keys.iter().map(|k| k.key_id.as_str()).collect()
    }
}
