// Analysis Cache - TTL key/value store
// Memoizes the combined analysis and the inference verdicts under independent
// freshness windows; expired entries are evicted lazily on read

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Statistics snapshot from the cache
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub entries: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cache(hits={}, misses={}, expired={}, entries={})",
            self.hits, self.misses, self.expirations, self.entries
        )
    }
}

/// TTL key/value cache over JSON values.
/// Concurrent set races for the same key resolve last-writer-wins, which is
/// acceptable: recomputation is idempotent.
pub struct AnalysisCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: RwLock<u64>,
    misses: RwLock<u64>,
    expirations: RwLock<u64>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: RwLock::new(0),
            misses: RwLock::new(0),
            expirations: RwLock::new(0),
        }
    }

    /// Fetch a live entry; an entry past its expiry is removed and reported
    /// as a miss.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if Instant::now() < entry.expires_at => {
                    *self.hits.write() += 1;
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            // Re-check under the write lock: a writer may have refreshed the
            // entry since the read
            let mut entries = self.entries.write();
            if entries.get(key).is_some_and(|e| Instant::now() >= e.expires_at) {
                entries.remove(key);
                *self.expirations.write() += 1;
            }
        }
        *self.misses.write() += 1;
        None
    }

    /// Insert or overwrite an entry with its freshness window
    pub fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get_stats(&self) -> CacheStats {
        CacheStats {
            hits: *self.hits.read(),
            misses: *self.misses.read(),
            expirations: *self.expirations.read(),
            entries: self.entries.read().len(),
        }
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnalysisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnalysisCache({})", self.get_stats())
    }
}
