//! Fallback catalog: asset identifier -> ordered alternate source URLs.
//!
//! Pure lookup with no failure modes beyond "key not found". Entries may be
//! registered at runtime without restarting the coordinator; a new entry is
//! visible to the next fallback sequence.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// One candidate source for an asset, optionally pinned to an integrity hash
/// in SRI form (`sha256-<base64 digest>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackCandidate {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl FallbackCandidate {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            integrity: None,
        }
    }

    pub fn with_integrity(mut self, integrity: impl Into<String>) -> Self {
        self.integrity = Some(integrity.into());
        self
    }
}

/// Ordered candidate list for one fallback key. Immutable once registered;
/// re-registering a key replaces the whole entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub candidates: Vec<FallbackCandidate>,
}

impl FallbackEntry {
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: urls.into_iter().map(FallbackCandidate::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Static mapping from asset identifiers to their alternate sources.
#[derive(Debug, Default)]
pub struct FallbackCatalog {
    entries: RwLock<HashMap<String, FallbackEntry>>,
}

impl FallbackCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register plain candidate URLs for a key, replacing any previous entry.
    pub fn add_fallback<I, S>(&self, key: impl Into<String>, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_entry(key, FallbackEntry::from_urls(urls));
    }

    /// Register a full entry (candidates with integrity metadata).
    pub fn add_entry(&self, key: impl Into<String>, entry: FallbackEntry) {
        let key = key.into();
        tracing::debug!(key = %key, candidates = entry.candidates.len(), "fallback entry registered");
        self.entries
            .write()
            .expect("fallback catalog poisoned")
            .insert(key, entry);
    }

    /// Look up the entry for a key. `None` means the key was never registered;
    /// a present-but-empty entry exhausts immediately at the sequencer.
    pub fn lookup(&self, key: &str) -> Option<FallbackEntry> {
        self.entries
            .read()
            .expect("fallback catalog poisoned")
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .expect("fallback catalog poisoned")
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("fallback catalog poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
