//! Content-hash-keyed embedding cache shared across backends.
//!
//! Entries are keyed by `(model_id, content_hash)` and immutable once
//! inserted; the only other mutation is FIFO eviction at capacity. Reads
//! and inserts are concurrency-safe.

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// SHA-256 hex digest of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest of text; the cache key component for chunk content.
pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model: String,
    content_hash: String,
}

struct CacheEntry {
    vector: Arc<[f32]>,
    #[allow(dead_code)]
    dimension: usize,
    #[allow(dead_code)]
    inserted_at: i64,
    hits: AtomicU64,
}

/// Cache usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent embedding cache with bounded capacity.
pub struct EmbeddingCache {
    entries: DashMap<CacheKey, CacheEntry>,
    /// Insertion order for FIFO eviction.
    order: Mutex<VecDeque<CacheKey>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached vector. Counts a hit or miss.
    pub fn get(&self, model: &str, content_hash: &str) -> Option<Arc<[f32]>> {
        let key = CacheKey {
            model: model.to_string(),
            content_hash: content_hash.to_string(),
        };

        match self.entries.get(&key) {
            Some(entry) => {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.vector.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a vector. A key already present is left untouched; entries
    /// are immutable once inserted.
    pub fn insert(&self, model: &str, content_hash: &str, vector: Vec<f32>) {
        let key = CacheKey {
            model: model.to_string(),
            content_hash: content_hash.to_string(),
        };

        if self.entries.contains_key(&key) {
            return;
        }

        let mut order = self.order.lock();
        while self.entries.len() >= self.capacity {
            match order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }

        let dimension = vector.len();
        let entry = CacheEntry {
            vector: vector.into(),
            dimension,
            inserted_at: crate::types::utc_now(),
            hits: AtomicU64::new(0),
        };
        self.entries.insert(key.clone(), entry);
        order.push_back(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_text("hello"), hash_text("hello"));
        assert_ne!(hash_text("hello"), hash_text("world"));
        assert_eq!(hash_text("hello").len(), 64);
    }

    #[test]
    fn test_get_insert_roundtrip() {
        let cache = EmbeddingCache::new(16);
        let hash = hash_text("some chunk");

        assert!(cache.get("model-a", &hash).is_none());
        cache.insert("model-a", &hash, vec![0.1, 0.2, 0.3]);

        let vector = cache.get("model-a", &hash).unwrap();
        assert_eq!(&*vector, &[0.1, 0.2, 0.3]);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_keys_scoped_by_model() {
        let cache = EmbeddingCache::new(16);
        let hash = hash_text("shared text");
        cache.insert("model-a", &hash, vec![1.0]);

        assert!(cache.get("model-b", &hash).is_none());
        assert!(cache.get("model-a", &hash).is_some());
    }

    #[test]
    fn test_insert_does_not_overwrite() {
        let cache = EmbeddingCache::new(16);
        let hash = hash_text("text");
        cache.insert("m", &hash, vec![1.0]);
        cache.insert("m", &hash, vec![2.0]);

        assert_eq!(&*cache.get("m", &hash).unwrap(), &[1.0]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let cache = EmbeddingCache::new(2);
        cache.insert("m", "h1", vec![1.0]);
        cache.insert("m", "h2", vec![2.0]);
        cache.insert("m", "h3", vec![3.0]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("m", "h1").is_none(), "oldest entry evicted");
        assert!(cache.get("m", "h2").is_some());
        assert!(cache.get("m", "h3").is_some());
    }
}
