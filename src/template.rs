//! HPKE key templates and key-pair generation.
//!
//! A template names the HPKE parameter set (KEM, KDF, AEAD) a key pair is
//! generated for. All supported templates share the X25519 KEM, so private
//! key material is always a 32-byte scalar and the matching public key can be
//! re-derived from it, which is what split validation relies on.

use crate::error::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

/// Length of X25519 public and private key material.
pub const KEY_MATERIAL_LEN: usize = 32;

/// The HPKE parameter sets a key set may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTemplate {
    DhkemX25519HkdfSha256Aes128Gcm,
    DhkemX25519HkdfSha256Aes256Gcm,
    DhkemX25519HkdfSha256ChaCha20Poly1305,
}

impl Default for KeyTemplate {
    fn default() -> Self {
        KeyTemplate::DhkemX25519HkdfSha256ChaCha20Poly1305
    }
}

impl KeyTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyTemplate::DhkemX25519HkdfSha256Aes128Gcm => {
                "DHKEM_X25519_HKDF_SHA256_HKDF_SHA256_AES_128_GCM"
            }
            KeyTemplate::DhkemX25519HkdfSha256Aes256Gcm => {
                "DHKEM_X25519_HKDF_SHA256_HKDF_SHA256_AES_256_GCM"
            }
            KeyTemplate::DhkemX25519HkdfSha256ChaCha20Poly1305 => {
                "DHKEM_X25519_HKDF_SHA256_HKDF_SHA256_CHACHA20_POLY1305"
            }
        }
    }

    /// Generates a fresh key pair for this template.
    ///
    /// Returns `(public_key, private_key)` as raw bytes; the private half is
    /// zeroized on drop.
    pub fn generate_key_pair(&self) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>)> {
        let mut seed = [0u8; KEY_MATERIAL_LEN];
        use rand_core::{OsRng, TryRngCore};
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| Error::crypto_with("random key generation failed", e))?;

        let secret = StaticSecret::from(seed);
        seed.zeroize();
        let public = PublicKey::from(&secret);

        Ok((
            public.as_bytes().to_vec(),
            Zeroizing::new(secret.to_bytes().to_vec()),
        ))
    }
}

/// Re-derives the public key matching the given private key material.
///
/// The KEM is X25519 for every supported template, so this does not need to
/// know which template produced the key pair.
pub fn derive_public_key(private_key: &[u8]) -> Result<Vec<u8>> {
    let bytes: [u8; KEY_MATERIAL_LEN] = private_key.try_into().map_err(|_| {
        Error::Validation(format!(
            "private key material must be {KEY_MATERIAL_LEN} bytes, got {}",
            private_key.len()
        ))
    })?;
    let secret = StaticSecret::from(bytes);
    Ok(PublicKey::from(&secret).as_bytes().to_vec())
}

impl FromStr for KeyTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DHKEM_X25519_HKDF_SHA256_HKDF_SHA256_AES_128_GCM" => {
                Ok(KeyTemplate::DhkemX25519HkdfSha256Aes128Gcm)
            }
            "DHKEM_X25519_HKDF_SHA256_HKDF_SHA256_AES_256_GCM" => {
                Ok(KeyTemplate::DhkemX25519HkdfSha256Aes256Gcm)
            }
            "DHKEM_X25519_HKDF_SHA256_HKDF_SHA256_CHACHA20_POLY1305" => {
                Ok(KeyTemplate::DhkemX25519HkdfSha256ChaCha20Poly1305)
            }
            other => Err(Error::Config(format!("unknown key template: {other}"))),
        }
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for KeyTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KeyTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
