//! Split-key provenance ledger.
//!
//! Each coordinator that processes a key appends one attestation recording
//! the KEK it used, optionally signed. The chain is append-only: appending
//! returns a new record and never touches existing entries. Verification
//! checks every signed entry against the verifier published for its KEK URI.

use crate::error::{Error, Result};
use crate::model::{EncryptionKey, KeySplitData};
use crate::provider::{SplitSigner, SplitVerifier};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::SecondsFormat;
use std::collections::BTreeMap;

/// The canonical message an attestation signature covers:
/// `key_id | ISO-8601(creation_time) | public_key_material`.
pub fn attestation_message(key: &EncryptionKey) -> String {
    format!(
        "{}|{}|{}",
        key.key_id,
        key.creation_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        key.public_key_material
    )
}

/// Returns a copy of `key` with one more attestation appended.
///
/// The signature is empty when the coordinator holds no signing key.
pub fn append_split_data(
    key: &EncryptionKey,
    kek_uri: &str,
    signer: Option<&dyn SplitSigner>,
) -> Result<EncryptionKey> {
    let public_key_signature = match signer {
        Some(signer) => BASE64.encode(signer.sign(attestation_message(key).as_bytes())?),
        None => String::new(),
    };

    let mut updated = key.clone();
    updated.key_split_data.push(KeySplitData {
        key_encryption_key_uri: kek_uri.to_string(),
        public_key_signature,
    });
    Ok(updated)
}

/// Verifies every attestation on `key` against the verifiers registered per
/// KEK URI.
///
/// Entries with an empty signature pass. A missing verifier for a signed
/// entry's URI and a verifier that rejects the signature are distinct
/// failures; both name the offending URI.
pub fn verify_split_data(
    key: &EncryptionKey,
    verifiers: &BTreeMap<String, Box<dyn SplitVerifier>>,
) -> Result<()> {
    let message = attestation_message(key);
    for entry in &key.key_split_data {
        if entry.public_key_signature.is_empty() {
            continue;
        }
        let uri = &entry.key_encryption_key_uri;
        let verifier = verifiers.get(uri).ok_or_else(|| {
            Error::NotFound(format!("no verifier registered for KEK URI: {uri}"))
        })?;
        let signature = BASE64.decode(&entry.public_key_signature).map_err(|e| {
            Error::Validation(format!("malformed signature for KEK URI {uri}: {e}"))
        })?;
        if !verifier.verify(message.as_bytes(), &signature)? {
            return Err(Error::crypto(format!(
                "signature verification failed for KEK URI: {uri}"
            )));
        }
    }
    Ok(())
}
