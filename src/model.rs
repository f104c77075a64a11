//! Persisted and wire-level data types of the key lifecycle.
//!
//! `EncryptionKey` is the unit the key store persists; `KeySplitData` is one
//! provenance attestation on it; `DataKey` is the transient envelope key used
//! during a single split exchange; `KeySetConfig` is a resolved per-tenant
//! rotation configuration.

use crate::template::KeyTemplate;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One provenance attestation: which KEK a coordinator used when it processed
/// the key, and optionally a signature over the key's canonical message.
///
/// Entries are append-only; existing entries are never mutated or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySplitData {
    pub key_encryption_key_uri: String,
    /// Base64 signature over `key_id|ISO-8601(creation_time)|public_key_material`.
    /// Empty when the coordinator holds no signing key.
    #[serde(default)]
    pub public_key_signature: String,
}

/// The serialized content of [`EncryptionKey::public_keyset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyset {
    pub template: KeyTemplate,
    /// Base64 public key material.
    pub public_key: String,
}

/// The persisted unit of the key lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionKey {
    /// Unique within a key set, immutable once created.
    pub key_id: String,
    /// The key set this key rotates under. Empty string is the default set.
    #[serde(default)]
    pub set_name: String,
    /// Base64 public key material. Always present.
    pub public_key_material: String,
    /// Serialized public keyset (template + public key), always present.
    pub public_keyset: String,
    /// This coordinator's own wrapped private share (base64). Present only on
    /// the record a coordinator stores for itself; never returned to external
    /// callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_keyset: Option<String>,
    /// URI of the KEK that wraps `private_keyset`.
    #[serde(default)]
    pub key_encryption_key_uri: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub activation_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expiration_time: DateTime<Utc>,
    /// Recorded for the external TTL garbage collector; not acted on here.
    #[serde(default)]
    pub ttl_days: i64,
    /// Ordered, append-only provenance attestations.
    #[serde(default)]
    pub key_split_data: Vec<KeySplitData>,
}

impl EncryptionKey {
    /// A key is active at `t` iff `activation_time <= t < expiration_time`.
    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        self.activation_time <= t && t < self.expiration_time
    }

    /// Serializes the public keyset field for a freshly generated key.
    pub fn public_keyset_for(template: KeyTemplate, public_key_material: &str) -> String {
        // Serialization of two strings cannot fail.
        serde_json::to_string(&PublicKeyset {
            template,
            public_key: public_key_material.to_string(),
        })
        .unwrap_or_default()
    }

    /// A copy safe to hand to external callers: the private share is dropped.
    pub fn without_private_keyset(&self) -> Self {
        Self {
            private_keyset: None,
            ..self.clone()
        }
    }
}

/// Ephemeral envelope key: a symmetric key wrapped under a KEK. Never
/// persisted standalone; lives for one exchange or data-encryption request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataKey {
    /// Base64 wrapped key material.
    pub encrypted_data_key: String,
    /// URI of the KEK that wraps `encrypted_data_key`.
    pub encrypted_data_key_kek_uri: String,
}

/// Resolved rotation parameters for one named key set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySetConfig {
    pub name: String,
    pub key_template: KeyTemplate,
    /// Number of keys that must be simultaneously active.
    pub count: usize,
    pub validity_days: i64,
    pub ttl_days: i64,
}

impl KeySetConfig {
    pub fn validity(&self) -> Duration {
        Duration::days(self.validity_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key_active_between(activation: DateTime<Utc>, expiration: DateTime<Utc>) -> EncryptionKey {
        EncryptionKey {
            key_id: "k".to_string(),
            set_name: String::new(),
            public_key_material: "pk".to_string(),
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

    #[test]
    fn active_window_is_half_open() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::days(1);
        let t2 = t0 + Duration::days(2);
        let t3 = t0 + Duration::days(3);

        let key = key_active_between(t1, t3);
        assert!(!key.is_active_at(t0));
        assert!(key.is_active_at(t1));
        assert!(key.is_active_at(t2));
        assert!(!key.is_active_at(t3));
    }

    #[test]
    fn timestamps_serialize_as_epoch_millis() {
        let t = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let key = key_active_between(t, t + Duration::days(1));

        let json: serde_json::Value = serde_json::to_value(&key).unwrap();
        assert_eq!(json["creation_time"], 1_700_000_000_123i64);
        assert_eq!(json["activation_time"], 1_700_000_000_123i64);
    }

    #[test]
    fn private_keyset_is_omitted_when_absent() {
        let t = Utc::now();
        let mut key = key_active_between(t, t + Duration::days(1));
        let json = serde_json::to_string(&key).unwrap();
        assert!(!json.contains("private_keyset"));

        key.private_keyset = Some("wrapped".to_string());
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains("private_keyset"));
        assert!(
            !serde_json::to_string(&key.without_private_keyset())
                .unwrap()
                .contains("private_keyset")
        );
    }

    #[test]
    fn public_keyset_roundtrips() {
        let serialized = EncryptionKey::public_keyset_for(KeyTemplate::default(), "material");
        let parsed: PublicKeyset = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed.template, KeyTemplate::default());
        assert_eq!(parsed.public_key, "material");
    }
}
