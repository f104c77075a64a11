//! Key store abstraction.
//!
//! Everything above this trait (allocation, exchange, rotation) persists and
//! queries through it; cloud-backed implementations live outside this crate.

mod memory;

pub use memory::MemoryKeyStore;

use crate::error::Result;
use crate::model::EncryptionKey;
use chrono::{DateTime, Duration, Utc};

/// Persistence contract for [`EncryptionKey`] records.
pub trait KeyStore: Send + Sync {
    /// Persists a key. With `overwrite` set, an existing record under the
    /// same `(set_name, key_id)` is replaced (last write wins, used for
    /// idempotent retries); without it, a collision fails with
    /// `Error::AlreadyExists` and the stored record is left unchanged.
    fn create_key(&self, key: &EncryptionKey, overwrite: bool) -> Result<()>;

    /// Best-effort batch insert: each key is attempted independently and the
    /// per-key outcomes are returned in order.
    fn create_keys(&self, keys: &[EncryptionKey]) -> Vec<Result<()>>;

    /// Fetches one key, failing with `Error::NotFound` if absent.
    fn get_key(&self, set_name: &str, key_id: &str) -> Result<EncryptionKey>;

    /// Keys of `set_name` active at `at` (activation <= at < expiration),
    /// sorted by expiration time descending. `limit` caps the result when
    /// present.
    fn get_active_keys(
        &self,
        set_name: &str,
        limit: Option<usize>,
        at: DateTime<Utc>,
    ) -> Result<Vec<EncryptionKey>>;

    /// Keys of `set_name` created within `max_age` of now, newest first.
    fn list_recent_keys(&self, set_name: &str, max_age: Duration) -> Result<Vec<EncryptionKey>>;

    /// Every stored key, across all sets.
    fn get_all_keys(&self) -> Result<Vec<EncryptionKey>>;
}
