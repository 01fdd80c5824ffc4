//! Local cache tier: TTL entries with byte accounting.
//!
//! `memory_usage` is adjusted on every insert, replace, and removal so it
//! always equals the sum of `size_bytes` over the live map.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// Longest lifetime an entry can get; larger TTLs are clamped to it.
pub(crate) const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Expiry instant for an entry stored at `now` with `ttl`.
pub(crate) fn expires_at(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}

/// A single local-tier entry.
struct CacheEntry {
    value: Value,
    expires_at: Instant,
    size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a local lookup.
pub(crate) enum Lookup {
    Hit(Value),
    Expired,
    Missing,
}

/// Approximate footprint of an entry: key bytes plus serialized value bytes.
pub(crate) fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}

#[derive(Default)]
pub(crate) struct LocalStore {
    entries: HashMap<String, CacheEntry>,
    memory_usage: usize,
}

impl LocalStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, purging it if its TTL has elapsed.
    pub(crate) fn get(&mut self, key: &str, now: Instant) -> Lookup {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.remove(key);
                Lookup::Expired
            }
            Some(entry) => Lookup::Hit(entry.value.clone()),
            None => Lookup::Missing,
        }
    }

    pub(crate) fn insert(&mut self, key: &str, value: Value, expires_at: Instant) {
        let size_bytes = entry_size(key, &value);
        let entry = CacheEntry {
            value,
            expires_at,
            size_bytes,
        };
        if let Some(old) = self.entries.insert(key.to_string(), entry) {
            self.memory_usage -= old.size_bytes;
        }
        self.memory_usage += size_bytes;
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.memory_usage -= old.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Whether a live entry exists; an expired one is purged.
    pub(crate) fn contains(&mut self, key: &str, now: Instant) -> bool {
        !matches!(self.get(key, now), Lookup::Missing | Lookup::Expired)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.memory_usage = 0;
    }

    /// Drop every entry whose TTL has elapsed. Returns the number removed.
    pub(crate) fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let mut freed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                freed += entry.size_bytes;
                false
            } else {
                true
            }
        });
        self.memory_usage -= freed;
        before - self.entries.len()
    }

    /// Evict soonest-to-expire entries until usage is at or below `target_bytes`.
    ///
    /// Returns the number of entries evicted.
    pub(crate) fn evict_to(&mut self, target_bytes: usize) -> usize {
        if self.memory_usage <= target_bytes {
            return 0;
        }
        let mut by_expiry: Vec<(Instant, String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.expires_at, key.clone()))
            .collect();
        by_expiry.sort_unstable();

        let mut evicted = 0;
        for (_, key) in by_expiry {
            if self.memory_usage <= target_bytes {
                break;
            }
            if self.remove(&key) {
                evicted += 1;
            }
        }
        evicted
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.memory_usage
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn tracked_bytes(&self) -> usize {
        self.entries.values().map(|e| e.size_bytes).sum()
    }
}
