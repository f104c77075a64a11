//! Split-key exchange protocol.
//!
//! The originating coordinator generates a key pair, wraps the private half
//! under a data key both parties can unwrap, and hands the public key plus
//! the wrapped split to its peer. The peer validates that the split really is
//! the private half of the advertised public key, re-wraps it under its own
//! KEK, appends its own provenance attestation and persists its copy. Neither
//! side ever sees the other's KEK, and the unwrapped private key never leaves
//! the exchange.

use crate::allocator::KeyIdAllocator;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{DataKey, EncryptionKey};
use crate::provider::{KeyEncryptionProvider, SplitSigner};
use crate::provenance;
use crate::store::KeyStore;
use crate::template::{self, KeyTemplate};
use crate::wrapping;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Attempts at allocating a fresh identifier when strict-mode persistence
/// reports a collision (sequential allocation racing another rotation).
const MAX_ALLOCATION_ATTEMPTS: usize = 3;

/// The "create key" request a coordinator sends to its peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerCreateKeyRequest {
    /// The key record as known to the originator: public material, times and
    /// the originator's attestation. Never carries a private keyset.
    pub key: EncryptionKey,
    /// Base64 of the private key material encrypted under the data key.
    pub encrypted_private_split: String,
    /// The data key the split is wrapped under. Minted by the peer when it
    /// supports data-key fetch, by the originator otherwise.
    pub data_key: DataKey,
}

/// The peer coordinator's key-storage surface, as consumed by the
/// originator. A network client implements this against the remote
/// coordinator; [`InProcessPeer`] wires two coordinators in one process.
///
/// No retry happens behind this trait: a failed call surfaces to the caller
/// unchanged.
pub trait PeerKeyStorage: Send + Sync {
    /// Asks the peer to validate, re-wrap and persist its copy of the key.
    /// Returns the record as the peer stored it (without its private share).
    fn create_key(&self, request: PeerCreateKeyRequest) -> Result<EncryptionKey>;

    /// Fetches a fresh peer-minted data key, or `None` when the peer does not
    /// support data-key exchange.
    fn fetch_data_key(&self) -> Result<Option<DataKey>>;
}

/// Originator ("party A") side of the exchange.
pub struct SplitKeyExchange {
    store: Arc<dyn KeyStore>,
    provider: Arc<dyn KeyEncryptionProvider>,
    peer: Arc<dyn PeerKeyStorage>,
    allocator: KeyIdAllocator,
    kek_uri: String,
    signer: Option<Arc<dyn SplitSigner>>,
    clock: Arc<dyn Clock>,
}

impl SplitKeyExchange {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KeyStore>,
        provider: Arc<dyn KeyEncryptionProvider>,
        peer: Arc<dyn PeerKeyStorage>,
        allocator: KeyIdAllocator,
        kek_uri: impl Into<String>,
        signer: Option<Arc<dyn SplitSigner>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            peer,
            allocator,
            kek_uri: kek_uri.into(),
            signer,
            clock,
        }
    }

    /// Creates `count` keys for `set_name`, each activated at `activation`
    /// and expiring `validity_days` later, running the full exchange per key.
    ///
    /// Any failure aborts the batch; keys already created remain.
    pub fn create_split_keys(
        &self,
        set_name: &str,
        template: KeyTemplate,
        count: usize,
        validity_days: i64,
        ttl_days: i64,
        activation: DateTime<Utc>,
    ) -> Result<Vec<EncryptionKey>> {
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            created.push(self.create_split_key(
                set_name,
                template,
                validity_days,
                ttl_days,
                activation,
            )?);
        }
        Ok(created)
    }

    /// Creates one key through the full exchange.
    ///
    /// With the sequential allocator, a strict-mode collision on the final
    /// persist re-allocates and retries the whole exchange (bounded), per the
    /// documented caller responsibility for concurrent rotations.
    pub fn create_split_key(
        &self,
        set_name: &str,
        template: KeyTemplate,
        validity_days: i64,
        ttl_days: i64,
        activation: DateTime<Utc>,
    ) -> Result<EncryptionKey> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let key_id = self.allocator.next_id(self.store.as_ref())?;
            match self.exchange_one(&key_id, set_name, template, validity_days, ttl_days, activation)
            {
                Err(Error::AlreadyExists(_))
                    if self.allocator.needs_collision_retry()
                        && attempt < MAX_ALLOCATION_ATTEMPTS =>
                {
                    warn!(key_id = %key_id, attempt, "key id collision, re-allocating");
                    continue;
                }
                other => return other,
            }
        }
    }

    fn exchange_one(
        &self,
        key_id: &str,
        set_name: &str,
        template: KeyTemplate,
        validity_days: i64,
        ttl_days: i64,
        activation: DateTime<Utc>,
    ) -> Result<EncryptionKey> {
        let (public_key, private_key) = template.generate_key_pair()?;
        let public_key_material = BASE64.encode(&public_key);

        let key = EncryptionKey {
            key_id: key_id.to_string(),
            set_name: set_name.to_string(),
            public_keyset: EncryptionKey::public_keyset_for(template, &public_key_material),
            public_key_material,
            private_keyset: None,
            key_encryption_key_uri: self.kek_uri.clone(),
            creation_time: self.clock.now(),
            activation_time: activation,
            expiration_time: activation + Duration::days(validity_days),
            ttl_days,
            key_split_data: Vec::new(),
        };

        // Prefer a peer-minted data key so the split matches the peer's
        // envelope scheme; fall back to one wrapped under our own KEK.
        let data_key = match self.peer.fetch_data_key()? {
            Some(data_key) => data_key,
            None => wrapping::generate_data_key(self.provider.as_ref(), &self.kek_uri)?,
        };
        let encrypted_split = wrapping::encrypt_with_data_key(
            self.provider.as_ref(),
            &data_key,
            &private_key,
            key.key_id.as_bytes(),
        )?;

        let key = provenance::append_split_data(&key, &self.kek_uri, self.signer.as_deref())?;

        let peer_record = self.peer.create_key(PeerCreateKeyRequest {
            key: key.clone(),
            encrypted_private_split: BASE64.encode(&encrypted_split),
            data_key,
        })?;

        // Adopt the peer's echoed provenance chain when it extends ours.
        let mut stored = key;
        if peer_record.key_split_data.len() > stored.key_split_data.len()
            && peer_record.key_split_data[..stored.key_split_data.len()]
                == stored.key_split_data[..]
        {
            stored.key_split_data = peer_record.key_split_data;
        }

        stored.private_keyset = Some(
            BASE64.encode(self.provider.wrap(&self.kek_uri, &private_key)?),
        );

        self.store.create_key(&stored, false)?;
        debug!(key_id = %stored.key_id, set = set_name, "split key created");
        Ok(stored)
    }
}

/// Receiver ("party B") side of the exchange.
pub struct SplitKeyReceiver {
    store: Arc<dyn KeyStore>,
    provider: Arc<dyn KeyEncryptionProvider>,
    kek_uri: String,
    signer: Option<Arc<dyn SplitSigner>>,
}

impl SplitKeyReceiver {
    pub fn new(
        store: Arc<dyn KeyStore>,
        provider: Arc<dyn KeyEncryptionProvider>,
        kek_uri: impl Into<String>,
        signer: Option<Arc<dyn SplitSigner>>,
    ) -> Self {
        Self {
            store,
            provider,
            kek_uri: kek_uri.into(),
            signer,
        }
    }

    /// Validates an inbound split, re-wraps it under this coordinator's KEK,
    /// appends this coordinator's attestation and persists the copy.
    ///
    /// Nothing is persisted on validation failure. The persist overwrites, so
    /// a redelivered request converges on the same record.
    pub fn accept_split_key(&self, request: PeerCreateKeyRequest) -> Result<EncryptionKey> {
        let PeerCreateKeyRequest {
            key,
            encrypted_private_split,
            data_key,
        } = request;

        // Malformed input is rejected before any unwrap is attempted.
        if encrypted_private_split.is_empty() {
            return Err(Error::Validation(
                "key split validation failed: missing private key split".to_string(),
            ));
        }
        let encrypted_split = BASE64.decode(&encrypted_private_split).map_err(|e| {
            Error::Validation(format!("key split validation failed: {e}"))
        })?;

        let private_key = Zeroizing::new(
            wrapping::decrypt_with_data_key(
                self.provider.as_ref(),
                &data_key,
                &encrypted_split,
                key.key_id.as_bytes(),
            )
            .map_err(|e| Error::Validation(format!("key split validation failed: {e}")))?,
        );

        // The split must be the private half of the advertised public key.
        let derived_public = template::derive_public_key(&private_key)
            .map_err(|e| Error::Validation(format!("key split validation failed: {e}")))?;
        if BASE64.encode(&derived_public) != key.public_key_material {
            return Err(Error::Validation(
                "key split validation failed: public key mismatch".to_string(),
            ));
        }

        let rewrapped = self.provider.wrap(&self.kek_uri, &private_key)?;
        let key = provenance::append_split_data(&key, &self.kek_uri, self.signer.as_deref())?;

        let mut stored = key;
        stored.key_encryption_key_uri = self.kek_uri.clone();
        stored.private_keyset = Some(BASE64.encode(rewrapped));
        self.store.create_key(&stored, true)?;
        debug!(key_id = %stored.key_id, "split key accepted");

        Ok(stored.without_private_keyset())
    }
}

/// Wires a [`SplitKeyReceiver`] directly as the originator's peer, minting
/// data keys under a KEK both providers can resolve. Used by tests and local
/// two-coordinator deployments.
pub struct InProcessPeer {
    receiver: SplitKeyReceiver,
    provider: Arc<dyn KeyEncryptionProvider>,
    exchange_kek_uri: Option<String>,
}

impl InProcessPeer {
    pub fn new(
        receiver: SplitKeyReceiver,
        provider: Arc<dyn KeyEncryptionProvider>,
        exchange_kek_uri: Option<String>,
    ) -> Self {
        Self {
            receiver,
            provider,
            exchange_kek_uri,
        }
    }
}

impl PeerKeyStorage for InProcessPeer {
    fn create_key(&self, request: PeerCreateKeyRequest) -> Result<EncryptionKey> {
        self.receiver.accept_split_key(request)
    }

    fn fetch_data_key(&self) -> Result<Option<DataKey>> {
        self.exchange_kek_uri
            .as_deref()
            .map(|uri| wrapping::generate_data_key(self.provider.as_ref(), uri))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::provider::LocalKeyProvider;
    use crate::store::MemoryKeyStore;
    use chrono::TimeZone;

    fn as_signer(provider: &Arc<LocalKeyProvider>) -> Arc<dyn SplitSigner> {
        provider.clone()
    }

    const EXCHANGE_KEK: &str = "kms://shared/exchange";
    const KEK_A: &str = "kms://a/kek";
    const KEK_B: &str = "kms://b/kek";

    struct Coordinators {
        exchange: SplitKeyExchange,
        store_a: Arc<MemoryKeyStore>,
        store_b: Arc<MemoryKeyStore>,
        provider_a: Arc<LocalKeyProvider>,
    }

    fn coordinators(allocator: KeyIdAllocator) -> Coordinators {
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

        let store_a = Arc::new(MemoryKeyStore::new());
        let store_b = Arc::new(MemoryKeyStore::new());

        let receiver = SplitKeyReceiver::new(
            store_b.clone(),
            provider_b.clone(),
            KEK_B,
            Some(as_signer(&provider_b)),
        );
        let peer = Arc::new(InProcessPeer::new(
            receiver,
            provider_b,
            Some(EXCHANGE_KEK.to_string()),
        ));

        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        ));
        let exchange = SplitKeyExchange::new(
            store_a.clone(),
            provider_a.clone(),
            peer,
            allocator,
            KEK_A,
            Some(as_signer(&provider_a)),
            clock,
        );

        Coordinators {
            exchange,
            store_a,
            store_b,
            provider_a,
        }
    }

    fn activation() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn both_coordinators_persist_one_record_per_key() {
        let c = coordinators(KeyIdAllocator::Random);
        let created = c
            .exchange
            .create_split_keys("", KeyTemplate::default(), 2, 8, 365, activation())
            .unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(c.store_a.len(), 2);
        assert_eq!(c.store_b.len(), 2);

        for key in &created {
            let a_copy = c.store_a.get_key("", &key.key_id).unwrap();
            let b_copy = c.store_b.get_key("", &key.key_id).unwrap();
            assert_eq!(a_copy.public_key_material, b_copy.public_key_material);
            // Each side wraps its share under its own KEK.
            assert_eq!(a_copy.key_encryption_key_uri, KEK_A);
            assert_eq!(b_copy.key_encryption_key_uri, KEK_B);
            assert!(a_copy.private_keyset.is_some());
            assert!(b_copy.private_keyset.is_some());
            assert_ne!(a_copy.private_keyset, b_copy.private_keyset);
        }
    }

    #[test]
    fn provenance_chain_records_both_coordinators_in_order() {
        let c = coordinators(KeyIdAllocator::Random);
        let key = c
            .exchange
            .create_split_key("", KeyTemplate::default(), 8, 365, activation())
            .unwrap();

        let uris: Vec<&str> = key
            .key_split_data
            .iter()
            .map(|d| d.key_encryption_key_uri.as_str())
            .collect();
        assert_eq!(uris, vec![KEK_A, KEK_B]);
        assert!(key.key_split_data.iter().all(|d| !d.public_key_signature.is_empty()));
    }

    #[test]
    fn originator_share_unwraps_to_the_advertised_public_key() {
        let c = coordinators(KeyIdAllocator::Random);
        let key = c
            .exchange
            .create_split_key("", KeyTemplate::default(), 8, 365, activation())
            .unwrap();

        let wrapped = BASE64.decode(key.private_keyset.as_deref().unwrap()).unwrap();
        let private = KeyEncryptionProvider::unwrap(c.provider_a.as_ref(), KEK_A, &wrapped).unwrap();
        let derived = template::derive_public_key(&private).unwrap();
        assert_eq!(BASE64.encode(derived), key.public_key_material);
    }

    #[test]
    fn sequential_allocation_assigns_consecutive_ids() {
        let c = coordinators(KeyIdAllocator::Sequential);
        let created = c
            .exchange
            .create_split_keys("", KeyTemplate::default(), 3, 8, 365, activation())
            .unwrap();

        let ids: Vec<i64> = created
            .iter()
            .map(|k| crate::allocator::decode_sequential_id(&k.key_id).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn receiver_rejects_empty_split_before_any_crypto() {
        let c = coordinators(KeyIdAllocator::Random);
        let key = c
            .exchange
            .create_split_key("", KeyTemplate::default(), 8, 365, activation())
            .unwrap();

        // Provider with no KEKs at all: if validation touched crypto it
        // would fail differently.
        let receiver = SplitKeyReceiver::new(
            Arc::new(MemoryKeyStore::new()),
            Arc::new(LocalKeyProvider::new()),
            KEK_B,
            None,
        );
        let err = receiver
            .accept_split_key(PeerCreateKeyRequest {
                key: key.without_private_keyset(),
                encrypted_private_split: String::new(),
                data_key: DataKey {
                    encrypted_data_key: String::new(),
                    encrypted_data_key_kek_uri: EXCHANGE_KEK.to_string(),
                },
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("missing private key split"));
    }

    #[test]
    fn receiver_rejects_split_that_does_not_match_public_key() {
        let c = coordinators(KeyIdAllocator::Random);
        let provider_b = Arc::new(
            LocalKeyProvider::new()
                .with_generated_kek(KEK_B)
                .unwrap()
                .with_kek(EXCHANGE_KEK, c.provider_a.kek_bytes(EXCHANGE_KEK).unwrap()),
        );
        let store_b = Arc::new(MemoryKeyStore::new());
        let receiver =
            SplitKeyReceiver::new(store_b.clone(), provider_b.clone(), KEK_B, None);

        // A well-formed request whose split is a different key pair.
        let (public, _) = KeyTemplate::default().generate_key_pair().unwrap();
        let (_, other_private) = KeyTemplate::default().generate_key_pair().unwrap();
        let public_key_material = BASE64.encode(&public);
        let now = activation();
        let key = EncryptionKey {
            key_id: "mismatch".to_string(),
            set_name: String::new(),
            public_keyset: EncryptionKey::public_keyset_for(
                KeyTemplate::default(),
                &public_key_material,
            ),
            public_key_material,
            private_keyset: None,
            key_encryption_key_uri: KEK_A.to_string(),
            creation_time: now,
            activation_time: now,
            expiration_time: now + Duration::days(8),
            ttl_days: 365,
            key_split_data: Vec::new(),
        };
        let data_key =
            wrapping::generate_data_key(provider_b.as_ref(), EXCHANGE_KEK).unwrap();
        let split = wrapping::encrypt_with_data_key(
            provider_b.as_ref(),
            &data_key,
            &other_private,
            key.key_id.as_bytes(),
        )
        .unwrap();

        let err = receiver
            .accept_split_key(PeerCreateKeyRequest {
                key,
                encrypted_private_split: BASE64.encode(split),
                data_key,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("public key mismatch"));
        // Nothing persisted on validation failure.
        assert!(store_b.is_empty());
    }

    #[test]
    fn receiver_reports_undecryptable_split_as_validation_failure() {
        let c = coordinators(KeyIdAllocator::Random);
        let key = c
            .exchange
            .create_split_key("", KeyTemplate::default(), 8, 365, activation())
            .unwrap();

        let provider_b = Arc::new(
            LocalKeyProvider::new()
                .with_generated_kek(KEK_B)
                .unwrap()
                .with_kek(EXCHANGE_KEK, c.provider_a.kek_bytes(EXCHANGE_KEK).unwrap()),
        );
        let store_b = Arc::new(MemoryKeyStore::new());
        let receiver =
            SplitKeyReceiver::new(store_b.clone(), provider_b.clone(), KEK_B, None);

        // Garbage ciphertext under a valid data key.
        let data_key =
            wrapping::generate_data_key(provider_b.as_ref(), EXCHANGE_KEK).unwrap();
        let err = receiver
            .accept_split_key(PeerCreateKeyRequest {
                key: key.without_private_keyset(),
                encrypted_private_split: BASE64.encode([0u8; 64]),
                data_key,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store_b.is_empty());
    }

    #[test]
    fn peer_failure_leaves_originator_store_untouched() {
        struct FailingPeer;
        impl PeerKeyStorage for FailingPeer {
            fn create_key(&self, _request: PeerCreateKeyRequest) -> Result<EncryptionKey> {
                Err(Error::Store("peer unavailable".to_string()))
            }
            fn fetch_data_key(&self) -> Result<Option<DataKey>> {
                Ok(None)
            }
        }

        let provider = Arc::new(
            LocalKeyProvider::new().with_generated_kek(KEK_A).unwrap(),
        );
        let store = Arc::new(MemoryKeyStore::new());
        let exchange = SplitKeyExchange::new(
            store.clone(),
            provider,
            Arc::new(FailingPeer),
            KeyIdAllocator::Random,
            KEK_A,
            None,
            Arc::new(FixedClock::new(activation())),
        );

        let result =
            exchange.create_split_key("", KeyTemplate::default(), 8, 365, activation());
        assert!(matches!(result, Err(Error::Store(_))));
        assert!(store.is_empty());
    }
}
