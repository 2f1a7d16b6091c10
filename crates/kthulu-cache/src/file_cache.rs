// ABOUTME: Per-file analysis cache keyed by a fingerprint of (path, modtime)
// ABOUTME: Provides an always-miss variant and a bounded in-memory TTL variant

use crate::cache::{CacheStats, TtlStore};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Byte-level cache of serialized file analyses.
pub trait FileCache: Send + Sync {
    /// Returns the stored bytes, or `None` on a miss or after expiry.
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, bytes: Vec<u8>);
    /// Returns whether an entry was removed.
    fn delete(&self, key: &str) -> bool;
    fn clear(&self);
    fn stats(&self) -> CacheStats;
}

/// Hex SHA-256 of the path and its modification time. A changed modtime
/// yields a new key, which is how stale analyses fall out of use.
pub fn fingerprint(path: &str, modtime: SystemTime) -> String {
    let nanos = modtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(nanos.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Always misses. Used for deterministic runs and when caching is disabled.
#[derive(Debug, Default)]
pub struct NoopFileCache {
    misses: AtomicU64,
}

impl NoopFileCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileCache for NoopFileCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, _key: &str, _bytes: Vec<u8>) {}

    fn delete(&self, _key: &str) -> bool {
        false
    }

    fn clear(&self) {}

    fn stats(&self) -> CacheStats {
        CacheStats {
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

/// Bounded in-memory cache. Lookups share a read lock; inserts and evictions
/// take the write lock. Eviction is expired-first, then oldest insertion,
/// since lookups never refresh recency here.
#[derive(Debug)]
pub struct MemoryFileCache {
    store: RwLock<TtlStore<String, Vec<u8>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryFileCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            store: RwLock::new(TtlStore::new(max_entries, Some(ttl))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

impl FileCache for MemoryFileCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let found = self.store.read().peek(&key.to_string()).cloned();
        match found {
            Some(bytes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(bytes)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set(&self, key: &str, bytes: Vec<u8>) {
        let mut store = self.store.write();
        store.insert(key.to_string(), bytes);
        debug!(entries = store.len(), "File cache insert");
    }

    fn delete(&self, key: &str) -> bool {
        self.store.write().remove(&key.to_string()).is_some()
    }

    fn clear(&self) {
        self.store.write().clear();
    }

    fn stats(&self) -> CacheStats {
        let store = self.store.read();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: store.evictions(),
            entries: store.len(),
            capacity: store.capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn set_then_get_hits_within_ttl() {
        let cache = MemoryFileCache::new(16, Duration::from_secs(60));
        cache.set("k", b"payload".to_vec());
        assert_eq!(cache.get("k"), Some(b"payload".to_vec()));
        assert_eq!(cache.get("other"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn entries_miss_after_ttl() {
        let cache = MemoryFileCache::new(16, Duration::from_millis(25));
        cache.set("k", vec![1, 2, 3]);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn capacity_is_bounded() {
        let cache = MemoryFileCache::new(3, Duration::from_secs(60));
        for i in 0..5 {
            cache.set(&format!("k{i}"), vec![i]);
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("k0"), None);
        assert_eq!(cache.get("k4"), Some(vec![4]));
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn delete_and_clear() {
        let cache = MemoryFileCache::new(4, Duration::from_secs(60));
        cache.set("a", vec![1]);
        cache.set("b", vec![2]);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn noop_always_misses() {
        let cache = NoopFileCache::new();
        cache.set("k", vec![1]);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().misses, 1);
        approx::assert_abs_diff_eq!(cache.stats().hit_rate(), 0.0);
    }

    #[test]
    fn fingerprint_changes_with_modtime() {
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let t1 = t0 + Duration::from_nanos(1);
        assert_eq!(fingerprint("a.go", t0), fingerprint("a.go", t0));
        assert_ne!(fingerprint("a.go", t0), fingerprint("a.go", t1));
        assert_ne!(fingerprint("a.go", t0), fingerprint("b.go", t0));
        assert_eq!(fingerprint("a.go", t0).len(), 64);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let cache = Arc::new(MemoryFileCache::new(1024, Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{t}-{i}");
                        cache.set(&key, vec![t as u8]);
                        assert_eq!(cache.get(&key), Some(vec![t as u8]));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 400);
    }
}
