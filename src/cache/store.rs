//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with LRU tracking and TTL expiration.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, LruTracker, MAX_KEY_LENGTH};
use crate::error::{ResilienceError, Result};

// == Cache Store ==
/// Bounded key/value storage with LRU eviction and per-entry TTL.
///
/// Values handed out by [`get`](Self::get) are clones; callers treat them as
/// read-only snapshots.
#[derive(Debug)]
pub struct CacheStore<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance statistics
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// TTL for entries written without an explicit one
    default_ttl: Duration,
}

impl<V: Clone> CacheStore<V> {
    // == Constructor ==
    /// Creates a new CacheStore with specified capacity and default TTL.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }

    // == Set ==
    /// Stores a key-value pair with optional TTL.
    ///
    /// If the key already exists, the value, TTL and recency are refreshed.
    /// If the cache is at capacity, the least recently used entry is evicted first.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(ResilienceError::InvalidRequest(
                "Key cannot be empty".to_string(),
            ));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(ResilienceError::InvalidRequest(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            if let Some(evicted) = self.lru.evict_oldest() {
                debug!(key = %evicted, "evicting least recently used entry");
                self.entries.remove(&evicted);
                self.stats.record_eviction();
            }
        }

        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        self.entries.insert(key.clone(), entry);
        self.lru.touch(&key);

        self.stats.record_set();
        self.stats.set_total_entries(self.entries.len());
        Ok(())
    }

    // == Get ==
    /// Retrieves a live value by key.
    ///
    /// Missing and expired keys are absent; an expired entry is purged as a
    /// side effect. A hit refreshes recency.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            self.entries.remove(key);
            self.lru.remove(key);
            self.stats.record_expirations(1);
            self.stats.record_miss();
            self.stats.set_total_entries(self.entries.len());
            return None;
        }

        self.stats.record_hit();
        self.lru.touch(key);
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    // == Delete ==
    /// Removes an entry by key. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.lru.remove(key);
            self.stats.record_deletes(1);
            self.stats.set_total_entries(self.entries.len());
        }
        existed
    }

    // == Invalidate ==
    /// Clears everything, or only the keys matching a regular expression.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&mut self, pattern: Option<&str>) -> Result<usize> {
        let removed = match pattern {
            None => {
                let count = self.entries.len();
                self.entries.clear();
                self.lru.clear();
                count
            }
            Some(pattern) => {
                let re = Regex::new(pattern).map_err(|e| ResilienceError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
                let matching: Vec<String> = self
                    .entries
                    .keys()
                    .filter(|k| re.is_match(k))
                    .cloned()
                    .collect();
                for key in &matching {
                    self.entries.remove(key);
                    self.lru.remove(key);
                }
                matching.len()
            }
        };

        self.stats.record_deletes(removed);
        self.stats.set_total_entries(self.entries.len());
        debug!(?pattern, removed, "cache invalidated");
        Ok(removed)
    }

    // == Invalidate User ==
    /// Drops cached data for one user, optionally limited to a data type.
    ///
    /// Matches keys produced by [`CacheKey`](crate::cache::CacheKey) with a
    /// `user_data:<type>` prefix.
    pub fn invalidate_user(&mut self, user_id: &str, data_type: Option<&str>) -> Result<usize> {
        let data_type = data_type.map(regex::escape);
        let pattern = format!(
            "^user_data:{}:user:{}(:|$)",
            data_type.as_deref().unwrap_or("[^:]+"),
            regex::escape(user_id)
        );
        self.invalidate(Some(&pattern))
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.entries.remove(key);
            self.lru.remove(key);
        }

        self.stats.record_expirations(expired_keys.len());
        self.stats.set_total_entries(self.entries.len());
        expired_keys.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const TTL: Duration = Duration::from_secs(300);

    fn store(cap: usize) -> CacheStore<String> {
        CacheStore::new(cap, TTL)
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = store(100);

        store.set("key1", "value1".to_string(), None).unwrap();

        assert_eq!(store.get("key1"), Some("value1".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = store(100);
        assert_eq!(store.get("nonexistent"), None);
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_store_overwrite() {
        let mut store = store(100);

        store.set("key1", "value1".to_string(), None).unwrap();
        store.set("key1", "value2".to_string(), None).unwrap();

        assert_eq!(store.get("key1"), Some("value2".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_delete() {
        let mut store = store(100);

        store.set("key1", "value1".to_string(), None).unwrap();
        assert!(store.delete("key1"));
        assert!(!store.delete("key1"));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_ttl_expiration() {
        let mut store = store(100);

        store
            .set("key1", "value1".to_string(), Some(Duration::from_millis(100)))
            .unwrap();
        assert!(store.get("key1").is_some());

        advance(Duration::from_millis(150)).await;

        assert_eq!(store.get("key1"), None);
        // purged lazily on access
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_default_ttl_applies() {
        let mut store: CacheStore<u32> = CacheStore::new(10, Duration::from_millis(50));
        store.set("k", 7, None).unwrap();

        advance(Duration::from_millis(51)).await;
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_store_lru_eviction() {
        let mut store = store(3);

        store.set("key1", "value1".to_string(), None).unwrap();
        store.set("key2", "value2".to_string(), None).unwrap();
        store.set("key3", "value3".to_string(), None).unwrap();
        store.set("key4", "value4".to_string(), None).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get("key1"), None);
        assert!(store.get("key2").is_some());
        assert!(store.get("key4").is_some());
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let mut store = store(3);

        store.set("key1", "value1".to_string(), None).unwrap();
        store.set("key2", "value2".to_string(), None).unwrap();
        store.set("key3", "value3".to_string(), None).unwrap();

        store.get("key1").unwrap();
        store.set("key4", "value4".to_string(), None).unwrap();

        assert!(store.get("key1").is_some());
        assert_eq!(store.get("key2"), None);
    }

    #[test]
    fn test_store_overwrite_refreshes_recency() {
        let mut store = store(2);

        store.set("a", "1".to_string(), None).unwrap();
        store.set("b", "2".to_string(), None).unwrap();
        store.set("a", "3".to_string(), None).unwrap();
        store.set("c", "4".to_string(), None).unwrap();

        assert_eq!(store.get("a"), Some("3".to_string()));
        assert_eq!(store.get("b"), None);
    }

    #[test]
    fn test_invalidate_all() {
        let mut store = store(10);
        store.set("a", "1".to_string(), None).unwrap();
        store.set("b", "2".to_string(), None).unwrap();

        assert_eq!(store.invalidate(None).unwrap(), 2);
        assert!(store.is_empty());
        assert_eq!(store.stats().deletes, 2);
    }

    #[test]
    fn test_invalidate_pattern() {
        let mut store = store(10);
        store.set("section:tasks", "1".to_string(), None).unwrap();
        store.set("section:today", "2".to_string(), None).unwrap();
        store.set("section:journal", "3".to_string(), None).unwrap();

        assert_eq!(store.invalidate(Some("^section:t")).unwrap(), 2);
        assert_eq!(store.get("section:journal"), Some("3".to_string()));
        assert_eq!(store.get("section:tasks"), None);
    }

    #[test]
    fn test_invalidate_bad_pattern() {
        let mut store = store(10);
        store.set("a", "1".to_string(), None).unwrap();

        let result = store.invalidate(Some("(unclosed"));
        assert!(matches!(result, Err(ResilienceError::InvalidPattern { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalidate_user() {
        let mut store = store(10);
        store
            .set("user_data:projects:user:u1", "p".to_string(), None)
            .unwrap();
        store
            .set("user_data:areas:user:u1:archived:true", "a".to_string(), None)
            .unwrap();
        store
            .set("user_data:areas:user:u10", "other".to_string(), None)
            .unwrap();

        assert_eq!(store.invalidate_user("u1", Some("areas")).unwrap(), 1);
        assert_eq!(store.invalidate_user("u1", None).unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("user_data:areas:user:u10").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_cleanup_expired() {
        let mut store = store(100);

        store
            .set("key1", "value1".to_string(), Some(Duration::from_secs(1)))
            .unwrap();
        store
            .set("key2", "value2".to_string(), Some(Duration::from_secs(10)))
            .unwrap();

        advance(Duration::from_millis(1100)).await;

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("key2").is_some());
    }

    #[test]
    fn test_store_key_validation() {
        let mut store = store(100);

        let long_key = "x".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(
            store.set(long_key, "v".to_string(), None),
            Err(ResilienceError::InvalidRequest(_))
        ));
        assert!(matches!(
            store.set("", "v".to_string(), None),
            Err(ResilienceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let store: CacheStore<u8> = CacheStore::new(0, TTL);
        assert_eq!(store.capacity(), 1);
    }
}
