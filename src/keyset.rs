//! Key-set configuration with a time-bounded snapshot cache.
//!
//! Rotation parameters per named key set come from a remote JSON document.
//! The document is fetched through [`ConfigSource`] and cached as an immutable
//! snapshot for a fixed interval to bound the remote read rate; refreshing
//! swaps in a new snapshot rather than mutating the old one, so concurrent
//! readers always see a consistent set list.
//!
//! Absence of a document (or an explicit JSON `null`) yields one default set.
//! An explicitly empty `key_sets` list yields zero sets, which makes rotation
//! a no-op. The two cases are deliberately distinct.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::KeySetConfig;
use crate::template::KeyTemplate;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// How long a fetched snapshot stays fresh unless overridden.
pub fn default_refresh_after() -> Duration {
    Duration::seconds(20)
}

/// Supplies the raw remote configuration document.
pub trait ConfigSource: Send + Sync {
    /// Returns the JSON document, or `None` when none is published.
    /// Transport failures are errors; an absent document is not.
    fn fetch(&self) -> Result<Option<String>>;
}

/// Statically configured fallback values. Used both to build the default set
/// when no document exists and to fill fields a parsed set leaves unset.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySetDefaults {
    pub key_template: KeyTemplate,
    pub count: usize,
    pub validity_days: i64,
    pub ttl_days: i64,
}

impl Default for KeySetDefaults {
    fn default() -> Self {
        Self {
            key_template: KeyTemplate::default(),
            count: 5,
            validity_days: 8,
            ttl_days: 365,
        }
    }
}

impl KeySetDefaults {
    /// The single set used when no configuration document exists. The empty
    /// name is the default set.
    fn default_set(&self) -> KeySetConfig {
        KeySetConfig {
            name: String::new(),
            key_template: self.key_template,
            count: self.count,
            validity_days: self.validity_days,
            ttl_days: self.ttl_days,
        }
    }

    fn resolve(&self, raw: RawKeySet) -> KeySetConfig {
        KeySetConfig {
            name: raw.name,
            key_template: raw.tink_template.unwrap_or(self.key_template),
            count: raw.count.unwrap_or(self.count),
            validity_days: raw.validity_in_days.unwrap_or(self.validity_days),
            ttl_days: raw.ttl_in_days.unwrap_or(self.ttl_days),
        }
    }
}

/// Wire shape of one entry in the remote document. Every field except the
/// name may be omitted.
#[derive(Debug, Deserialize)]
struct RawKeySet {
    name: String,
    tink_template: Option<KeyTemplate>,
    count: Option<usize>,
    validity_in_days: Option<i64>,
    ttl_in_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    key_sets: Option<Vec<RawKeySet>>,
}

/// Parses a fetched document into resolved set configs.
///
/// An unparseable document is a configuration error, never silently replaced
/// by the defaults; only a genuinely absent document falls back.
fn parse_document(document: Option<&str>, defaults: &KeySetDefaults) -> Result<Vec<KeySetConfig>> {
    let Some(text) = document else {
        return Ok(vec![defaults.default_set()]);
    };
    let parsed: Option<ConfigDocument> = serde_json::from_str(text)
        .map_err(|e| Error::Config(format!("unparseable key-set config document: {e}")))?;
    let Some(doc) = parsed else {
        // Explicit JSON null, same as no document.
        return Ok(vec![defaults.default_set()]);
    };
    match doc.key_sets {
        // An empty list means "rotate nothing", not "use the default set".
        Some(sets) => Ok(sets.into_iter().map(|raw| defaults.resolve(raw)).collect()),
        None => Ok(vec![defaults.default_set()]),
    }
}

struct Snapshot {
    fetched_at: DateTime<Utc>,
    sets: Vec<KeySetConfig>,
}

/// Get-or-refresh cache over a [`ConfigSource`].
///
/// Constructed once per process and shared by reference. Each refresh stores
/// a new snapshot; a failed fetch or parse is surfaced to the caller and
/// leaves the previous snapshot in place, so the next call retries.
pub struct CachedKeySetConfigs {
    source: Arc<dyn ConfigSource>,
    defaults: KeySetDefaults,
    refresh_after: Duration,
    clock: Arc<dyn Clock>,
    snapshot: ArcSwapOption<Snapshot>,
}

impl CachedKeySetConfigs {
    pub fn new(source: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            defaults: KeySetDefaults::default(),
            refresh_after: default_refresh_after(),
            clock,
            snapshot: ArcSwapOption::empty(),
        }
    }

    pub fn with_defaults(mut self, defaults: KeySetDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_refresh_after(mut self, refresh_after: Duration) -> Self {
        self.refresh_after = refresh_after;
        self
    }

    /// Returns the current set configs, refreshing from the source when the
    /// cached snapshot is older than `refresh_after`.
    pub fn get_configs(&self) -> Result<Vec<KeySetConfig>> {
        let now = self.clock.now();
        if let Some(snapshot) = self.snapshot.load_full() {
            if now - snapshot.fetched_at < self.refresh_after {
                return Ok(snapshot.sets.clone());
            }
        }

        let document = self.source.fetch()?;
        let sets = parse_document(document.as_deref(), &self.defaults)?;
        self.snapshot.store(Some(Arc::new(Snapshot {
            fetched_at: now,
            sets: sets.clone(),
        })));
        Ok(sets)
    }
}
