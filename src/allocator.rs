//! Key identifier allocation strategies.
//!
//! Selected once per deployment, not per key set. The sequential strategy
//! produces lexically ordered identifiers by reading the current maximum from
//! the store; it is only collision-safe when the caller persists in strict
//! mode and retries. The random strategy needs no store coordination at all.

use crate::error::{Error, Result};
use crate::store::KeyStore;
use uuid::Uuid;

/// Width of an encoded sequential identifier in hex digits.
const SEQUENTIAL_ID_WIDTH: usize = 16;

/// The two interchangeable identifier allocation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyIdAllocator {
    /// Signed 64-bit counter encoded as a fixed-width hex string.
    Sequential,
    /// UUID-v4; the store argument is ignored.
    #[default]
    Random,
}

impl KeyIdAllocator {
    /// Produces the identifier for the next key to create.
    ///
    /// Sequential reads the lexically greatest decodable identifier from the
    /// store and returns its successor. The encoding makes lexical order
    /// track the allocation sequence across the sign boundary, so a store
    /// holding `i64::MAX` allocates `i64::MIN` next (two's-complement
    /// wraparound) and continues from there. An empty store yields the zero
    /// value.
    pub fn next_id(&self, store: &dyn KeyStore) -> Result<String> {
        match self {
            KeyIdAllocator::Sequential => {
                let max = store
                    .get_all_keys()?
                    .iter()
                    .filter_map(|key| decode_sequential_id(&key.key_id).ok())
                    .map(|n| n as u64)
                    .max();
                Ok(encode_sequential_id(match max {
                    Some(n) => n.wrapping_add(1) as i64,
                    None => 0,
                }))
            }
            KeyIdAllocator::Random => Ok(Uuid::new_v4().to_string()),
        }
    }

    /// Whether this strategy can collide under concurrent allocation and
    /// therefore needs strict-mode persistence with retry.
    pub fn needs_collision_retry(&self) -> bool {
        matches!(self, KeyIdAllocator::Sequential)
    }
}

/// Encodes a signed 64-bit identifier as a fixed-width hex string of its
/// two's-complement bits. Lexical order of encodings equals unsigned numeric
/// order, which is the order identifiers are allocated in.
pub fn encode_sequential_id(n: i64) -> String {
    format!("{:016x}", n as u64)
}

/// Reverses [`encode_sequential_id`].
pub fn decode_sequential_id(s: &str) -> Result<i64> {
    if s.len() != SEQUENTIAL_ID_WIDTH {
        return Err(Error::Validation(format!(
            "sequential key id must be {SEQUENTIAL_ID_WIDTH} hex digits, got {s:?}"
        )));
    }
    let raw = u64::from_str_radix(s, 16)
        .map_err(|e| Error::Validation(format!("malformed sequential key id {s:?}: {e}")))?;
    Ok(raw as i64)
}
