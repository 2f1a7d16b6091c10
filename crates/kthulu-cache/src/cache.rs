use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Cache entry metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) >= ttl,
            None => false,
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }
}

/// Bounded map with per-entry TTL. When full, expired entries go first,
/// then the least recently accessed one.
///
/// Not synchronised; owners wrap it in the lock that fits their access pattern.
#[derive(Debug)]
pub struct TtlStore<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    capacity: usize,
    default_ttl: Option<Duration>,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlStore<K, V> {
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            default_ttl,
            evictions: 0,
        }
    }

    /// Reads without refreshing recency. Expired entries read as absent.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| &e.value)
    }

    /// Reads and refreshes recency; an expired entry is dropped on the way.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = match self.entries.get_mut(key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                entry.touch();
                return Some(entry.value.clone());
            }
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&mut self, key: K, value: V) {
        let ttl = self.default_ttl;
        self.insert_with_ttl(key, value, ttl);
    }

    pub fn insert_with_ttl(&mut self, key: K, value: V, ttl: Option<Duration>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.make_room();
        }
        self.entries.insert(key, CacheEntry::new(value, ttl));
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Drops every entry the predicate selects; returns how many went.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&K, &V) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, e| !pred(k, &e.value));
        before - self.entries.len()
    }

    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired_at(now));
        let purged = before - self.entries.len();
        self.evictions += purged as u64;
        purged
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn make_room(&mut self) {
        if self.purge_expired() > 0 {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn values_expire_after_ttl() {
        let mut store = TtlStore::new(4, Some(Duration::from_millis(30)));
        store.insert("a", 1);
        assert_eq!(store.get(&"a"), Some(1));
        sleep(Duration::from_millis(40));
        assert_eq!(store.peek(&"a"), None);
        assert_eq!(store.get(&"a"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn full_store_evicts_expired_before_live() {
        let mut store = TtlStore::new(2, None);
        store.insert_with_ttl("short", 1, Some(Duration::from_millis(10)));
        store.insert("live", 2);
        sleep(Duration::from_millis(20));
        store.insert("new", 3);
        assert_eq!(store.peek(&"live"), Some(&2));
        assert_eq!(store.peek(&"new"), Some(&3));
        assert_eq!(store.len(), 2);
        assert_eq!(store.evictions(), 1);
    }

    #[test]
    fn full_store_evicts_least_recently_used() {
        let mut store = TtlStore::new(2, None);
        store.insert("a", 1);
        sleep(Duration::from_millis(2));
        store.insert("b", 2);
        sleep(Duration::from_millis(2));
        store.get(&"a");
        store.insert("c", 3);
        assert!(store.peek(&"a").is_some());
        assert!(store.peek(&"b").is_none());
        assert!(store.peek(&"c").is_some());
    }

    #[test]
    fn remove_where_filters_by_value() {
        let mut store = TtlStore::new(8, None);
        for i in 0..6 {
            store.insert(i, i * 10);
        }
        assert_eq!(store.remove_where(|_, v| *v >= 30), 3);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn stats_rates() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        approx::assert_abs_diff_eq!(stats.hit_rate(), 0.75);
        approx::assert_abs_diff_eq!(stats.miss_rate(), 0.25);
    }
}
