//! # Shard-Kit: Split-Key Lifecycle Management
//!
//! `shard-kit` implements the key-lifecycle core of a two-coordinator
//! split-key management service: HPKE key pairs whose private halves are
//! exchanged as wrapped splits between two coordinators, each persisting its
//! own share under its own key-encryption key (KEK) and attesting to the
//! exchange in an append-only provenance chain.
//!
//! ## Core Concepts
//!
//! - **`SplitKeyExchange`**: originates a new key, hands the peer its wrapped
//!   private split, and persists the local share.
//! - **`SplitKeyReceiver`**: the peer side; validates, re-wraps and persists
//!   an incoming split.
//! - **`RotationPolicy`**: keeps each key set topped up and schedules
//!   replacements ahead of expiry.
//! - **`KeyStore`** / **`KeyEncryptionProvider`**: traits for persistence and
//!   KEK operations; in-memory and local implementations are provided.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shard_kit::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//!     let store = Arc::new(MemoryKeyStore::with_clock(clock.clone()));
//!     let provider = Arc::new(
//!         LocalKeyProvider::new().with_generated_kek("kms://local/kek")?,
//!     );
//!     let peer: Arc<dyn PeerKeyStorage> = connect_to_peer()?;
//!
//!     let exchange = SplitKeyExchange::new(
//!         store,
//!         provider,
//!         peer,
//!         KeyIdAllocator::Random,
//!         "kms://local/kek",
//!         None, // no split signer
//!         clock,
//!     );
//!     let keys = exchange.create_split_keys(
//!         "payments",
//!         KeyTemplate::default(),
//!         5,   // count
//!         8,   // validity_days
//!         365, // ttl_days
//!         SystemClock.now(),
//!     )?;
//!     println!("created {} keys", keys.len());
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod clock;
pub mod error;
pub mod exchange;
pub mod keyset;
pub mod model;
pub mod provenance;
pub mod provider;
pub mod rotation;
pub mod store;
pub mod template;
pub mod wrapping;

// A collection of the most commonly used traits, structs, and enums.
pub mod prelude {
    pub use crate::allocator::KeyIdAllocator;
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::error::{Error, Result};
    pub use crate::exchange::{
        PeerCreateKeyRequest, PeerKeyStorage, SplitKeyExchange, SplitKeyReceiver,
    };
    pub use crate::keyset::{CachedKeySetConfigs, ConfigSource, KeySetDefaults};
    pub use crate::model::{DataKey, EncryptionKey, KeySetConfig, KeySplitData};
    pub use crate::provider::{KeyEncryptionProvider, LocalKeyProvider, SplitSigner, SplitVerifier};
    pub use crate::rotation::RotationPolicy;
    pub use crate::store::{KeyStore, MemoryKeyStore};
    pub use crate::template::KeyTemplate;
}

/// The version of the `shard-kit` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
