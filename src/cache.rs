//! Bounded LRU cache for decoded media artifacts.
//!
//! Shared by the image loader and the thumbnail cache. Each owner wraps its
//! cache in a single mutex; nothing here locks on its own.

use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::Instant;

/// A cached artifact plus its last access time.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub artifact: T,
    pub last_accessed: Instant,
}

/// LRU cache keyed by normalized media path.
pub struct MediaCache<T> {
    /// Name used in log lines.
    label: &'static str,
    /// LRU tracking; the tail is always the least recently accessed key.
    lru: LruCache<String, CacheEntry<T>>,
    /// Keys whose load is in flight.
    loading: HashSet<String>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<T: Clone> MediaCache<T> {
    /// Create a cache holding at most `capacity` entries (minimum one).
    pub fn new(label: &'static str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            label,
            lru: LruCache::new(capacity),
            loading: HashSet::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up an artifact, marking it most recently used.
    pub fn get(&mut self, key: &str) -> Option<T> {
        match self.lru.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = Instant::now();
                self.hits += 1;
                Some(entry.artifact.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Check presence without touching recency or stats.
    pub fn contains(&self, key: &str) -> bool {
        self.lru.contains(key)
    }

    /// Insert an artifact, evicting the least recently used entry when full.
    pub fn insert(&mut self, key: String, artifact: T) {
        if !self.lru.contains(&key) && self.lru.len() >= self.lru.cap().get() {
            self.evict_lru();
        }

        self.loading.remove(&key);
        self.lru.put(
            key,
            CacheEntry {
                artifact,
                last_accessed: Instant::now(),
            },
        );
    }

    /// Evict the least recently used item.
    fn evict_lru(&mut self) -> bool {
        if let Some((key, _)) = self.lru.pop_lru() {
            tracing::debug!("{} cache evicting {}", self.label, key);
            self.evictions += 1;
            return true;
        }
        false
    }

    /// Mark a key as loading. Returns `false` if a load is already in flight.
    pub fn begin_load(&mut self, key: &str) -> bool {
        self.loading.insert(key.to_string())
    }

    /// Clear the loading mark without inserting anything.
    pub fn finish_load(&mut self, key: &str) {
        self.loading.remove(key);
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.loading.contains(key)
    }

    /// Drop every entry. In-flight marks are kept so their loads can finish.
    pub fn clear(&mut self) {
        tracing::debug!("{} cache cleared ({} entries)", self.label, self.lru.len());
        self.lru.clear();
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.lru.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            item_count: self.lru.len(),
            capacity: self.lru.cap().get(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub item_count: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}
