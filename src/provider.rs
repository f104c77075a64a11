//! Key-encryption provider abstraction.
//!
//! A provider resolves KEK URIs to wrap/unwrap key material, and coordinators
//! that hold a signing key expose it through [`SplitSigner`] so provenance
//! attestations can be verified out-of-band with the matching
//! [`SplitVerifier`]. Cloud KMS adapters implement these traits outside this
//! crate; [`LocalKeyProvider`] is the in-process implementation used by tests
//! and local deployments.

use crate::error::{Error, Result};
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce, Tag};
use dashmap::DashMap;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

const KEK_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Wraps and unwraps key material under named key-encryption keys.
pub trait KeyEncryptionProvider: Send + Sync {
    /// Encrypts `plaintext` under the KEK identified by `kek_uri`.
    fn wrap(&self, kek_uri: &str, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts `ciphertext` under the KEK identified by `kek_uri`.
    fn unwrap(&self, kek_uri: &str, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Signs canonical attestation messages with this coordinator's private
/// signing key.
pub trait SplitSigner: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Verifies attestation signatures against a coordinator's published
/// verification key.
pub trait SplitVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool>;
}

/// An in-process provider backed by AES-256-GCM KEKs keyed by URI and an
/// optional Ed25519 signing key.
pub struct LocalKeyProvider {
    keks: DashMap<String, [u8; KEK_SIZE]>,
    signing_key: Option<SigningKey>,
}

impl LocalKeyProvider {
    pub fn new() -> Self {
        Self {
            keks: DashMap::new(),
            signing_key: None,
        }
    }

    /// Registers a fresh random KEK under `kek_uri` and returns the provider.
    pub fn with_generated_kek(self, kek_uri: &str) -> Result<Self> {
        let mut kek = [0u8; KEK_SIZE];
        use rand_core::{OsRng, TryRngCore};
        OsRng
            .try_fill_bytes(&mut kek)
            .map_err(|e| Error::crypto_with("random KEK generation failed", e))?;
        self.keks.insert(kek_uri.to_string(), kek);
        Ok(self)
    }

    /// Registers an existing KEK under `kek_uri`. Used to share an exchange
    /// KEK between two in-process coordinators.
    pub fn with_kek(self, kek_uri: &str, kek: [u8; KEK_SIZE]) -> Self {
        self.keks.insert(kek_uri.to_string(), kek);
        self
    }

    /// Attaches an Ed25519 signing key generated from fresh randomness.
    pub fn with_generated_signing_key(mut self) -> Result<Self> {
        let mut seed = [0u8; 32];
        use rand_core::{OsRng, TryRngCore};
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| Error::crypto_with("random signing key generation failed", e))?;
        self.signing_key = Some(SigningKey::from_bytes(&seed));
        Ok(self)
    }

    /// Raw bytes of a registered KEK, for sharing with a peer provider.
    pub fn kek_bytes(&self, kek_uri: &str) -> Option<[u8; KEK_SIZE]> {
        self.keks.get(kek_uri).map(|k| *k)
    }

    /// The published verification key for this provider's signing key.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        self.signing_key.as_ref().map(SigningKey::verifying_key)
    }

    fn cipher_for(&self, kek_uri: &str) -> Result<Aes256Gcm> {
        let kek = self
            .keks
            .get(kek_uri)
            .ok_or_else(|| Error::NotFound(format!("no KEK registered for URI: {kek_uri}")))?;
        Ok(Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(
            kek.as_slice(),
        )))
    }
}

impl Default for LocalKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyEncryptionProvider for LocalKeyProvider {
    fn wrap(&self, kek_uri: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher_for(kek_uri)?;
        let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(&nonce, kek_uri.as_bytes(), &mut buffer)
            .map_err(|_| Error::crypto("failed to wrap key material"))?;

        // Ciphertext layout: nonce | tag | body.
        let mut out = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + buffer.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&tag);
        out.extend_from_slice(&buffer);
        Ok(out)
    }

    fn unwrap(&self, kek_uri: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher_for(kek_uri)?;
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::crypto("failed to unwrap key material"));
        }
        let (nonce_slice, rest) = ciphertext.split_at(NONCE_SIZE);
        let (tag_slice, body) = rest.split_at(TAG_SIZE);

        let mut buffer = body.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce_slice),
                kek_uri.as_bytes(),
                &mut buffer,
                Tag::from_slice(tag_slice),
            )
            .map_err(|_| Error::crypto("failed to unwrap key material"))?;
        Ok(buffer)
    }
}

impl SplitSigner for LocalKeyProvider {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| Error::crypto("no signing key configured"))?;
        Ok(key.sign(message).to_bytes().to_vec())
    }
}

/// Verifies Ed25519 attestation signatures against a published key.
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }
}

impl SplitVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<bool> {
        let signature = Signature::from_slice(signature)
            .map_err(|e| Error::crypto_with("malformed signature", e))?;
        Ok(self.key.verify(message, &signature).is_ok())
    }
}
