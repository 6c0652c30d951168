//! Response cache shared by all methods of a gateway.
//!
//! Keys are chosen by the caller; encode the method into the key if two
//! methods must not share entries. Expiry is checked on read against whole
//! unix seconds, and expired entries are swept by the config sync tick.

use bytes::Bytes;
use dashmap::DashMap;

/// One cached payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Response bytes as produced by the successful call.
    pub data: Bytes,
    /// Unix second at which the entry stops being served.
    pub expire_at: u64,
}

impl CacheEntry {
    /// Valid iff `expire_at > now`.
    pub fn is_fresh(&self, now_secs: u64) -> bool {
        self.expire_at > now_secs
    }
}

/// Concurrent keyed store of [`CacheEntry`] values.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
}

impl ResponseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh payload for `key`, if any.
    pub fn get(&self, key: &str, now_secs: u64) -> Option<Bytes> {
        let entry = self.entries.get(key)?;
        entry.is_fresh(now_secs).then(|| entry.data.clone())
    }

    /// Store `data` under `key` until `expire_at`, replacing any previous entry.
    pub fn insert(&self, key: impl Into<String>, data: Bytes, expire_at: u64) {
        self.entries.insert(key.into(), CacheEntry { data, expire_at });
    }

    /// Drop the entry for `key`, returning it if present.
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Remove every entry that is no longer fresh; returns how many were removed.
    pub fn purge_expired(&self, now_secs: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now_secs));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
