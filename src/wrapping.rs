//! Data-key envelope encryption.
//!
//! A data key is a one-time symmetric key wrapped under a KEK. During a split
//! exchange, the private-key material travels wrapped under a data key both
//! coordinators can unwrap (the data key's KEK is resolvable by both
//! providers), and the key ID rides along as associated data so a ciphertext
//! cannot be replayed against a different key record.

use crate::error::{Error, Result};
use crate::model::DataKey;
use crate::provider::KeyEncryptionProvider;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce, Tag};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

const DATA_KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Domain separator for deriving the AEAD key from a data-key secret.
const DATA_KEY_INFO: &[u8] = b"shard-kit/data-key-aead";

/// Generates a fresh data key and wraps it under the KEK at `kek_uri`.
pub fn generate_data_key(
    provider: &dyn KeyEncryptionProvider,
    kek_uri: &str,
) -> Result<DataKey> {
    let mut secret = Zeroizing::new([0u8; DATA_KEY_SIZE]);
    use rand_core::{OsRng, TryRngCore};
    OsRng
        .try_fill_bytes(secret.as_mut())
        .map_err(|e| Error::crypto_with("random data key generation failed", e))?;

    let wrapped = provider.wrap(kek_uri, secret.as_ref())?;
    Ok(DataKey {
        encrypted_data_key: BASE64.encode(wrapped),
        encrypted_data_key_kek_uri: kek_uri.to_string(),
    })
}

/// Encrypts `plaintext` with the data key, binding `associated_data`.
pub fn encrypt_with_data_key(
    provider: &dyn KeyEncryptionProvider,
    data_key: &DataKey,
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher = aead_cipher_for(provider, data_key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, associated_data, &mut buffer)
        .map_err(|_| Error::crypto("encryption with data key failed"))?;

    // Ciphertext layout: nonce | tag | body.
    let mut out = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + buffer.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&tag);
    out.extend_from_slice(&buffer);
    Ok(out)
}

/// Decrypts a ciphertext produced by [`encrypt_with_data_key`].
pub fn decrypt_with_data_key(
    provider: &dyn KeyEncryptionProvider,
    data_key: &DataKey,
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher = aead_cipher_for(provider, data_key)?;
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::crypto("decryption with data key failed"));
    }
    let (nonce_slice, rest) = ciphertext.split_at(NONCE_SIZE);
    let (tag_slice, body) = rest.split_at(TAG_SIZE);

    let mut buffer = body.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce_slice),
            associated_data,
            &mut buffer,
            Tag::from_slice(tag_slice),
        )
        .map_err(|_| Error::crypto("decryption with data key failed"))?;
    Ok(buffer)
}

/// Unwraps the data key and derives the AEAD key from its secret.
///
/// Every unwrap failure (unknown KEK, wrong KEK, corrupted wrapping) is
/// reported as the same "failed to decrypt data key" so callers see one error
/// shape regardless of which check failed.
fn aead_cipher_for(
    provider: &dyn KeyEncryptionProvider,
    data_key: &DataKey,
) -> Result<Aes256Gcm> {
    let wrapped = BASE64
        .decode(&data_key.encrypted_data_key)
        .map_err(|e| Error::crypto_with("failed to decrypt data key", e))?;
    let secret = Zeroizing::new(
        provider
            .unwrap(&data_key.encrypted_data_key_kek_uri, &wrapped)
            .map_err(|e| Error::crypto_with("failed to decrypt data key", e))?,
    );

    // Both coordinators derive the same AEAD key from the shared secret, so
    // the envelope scheme matches on each side regardless of who minted the
    // data key.
    let mut aead_key = Zeroizing::new([0u8; DATA_KEY_SIZE]);
    Hkdf::<Sha256>::new(None, secret.as_slice())
        .expand(DATA_KEY_INFO, aead_key.as_mut())
        .map_err(|e| Error::crypto_with("failed to decrypt data key", e))?;

    Ok(Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(
        aead_key.as_ref(),
    )))
}
