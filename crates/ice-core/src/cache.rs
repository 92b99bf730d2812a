//! Process-scoped feature cache with TTL eviction.
//!
//! Constructed explicitly at engine start-up and injected into the
//! components that need it — never referenced globally. Entries expire
//! after the configured TTL; expiry is enforced on read and by the
//! explicit [`FeatureCache::purge_expired`] sweep.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
}

/// TTL-evicting key/value cache for derived features.
pub struct FeatureCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl FeatureCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a live entry; expired entries are evicted on the spot.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace an entry, restarting its TTL.
    pub fn insert(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Live entry count (expired-but-unswept entries included).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Drop everything; used at engine shutdown.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_roundtrip() {
        let cache = FeatureCache::new(Duration::from_secs(60));
        cache.insert("entity:velocity", serde_json::json!({"tx_per_hour": 14}));
        let value = cache.get("entity:velocity").unwrap();
        assert_eq!(value["tx_per_hour"], 14);
    }

    #[test]
    fn expired_entry_evicted_on_read() {
        let cache = FeatureCache::new(Duration::from_millis(0));
        cache.insert("k", serde_json::json!(1));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_expired_sweeps_stale_entries() {
        let cache = FeatureCache::new(Duration::from_millis(0));
        cache.insert("a", serde_json::json!(1));
        cache.insert("b", serde_json::json!(2));
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn reinsert_restarts_ttl() {
        let cache = FeatureCache::new(Duration::from_secs(60));
        cache.insert("k", serde_json::json!("old"));
        cache.insert("k", serde_json::json!("new"));
        assert_eq!(cache.get("k").unwrap(), serde_json::json!("new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = FeatureCache::new(Duration::from_secs(60));
        cache.insert("k", serde_json::json!(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
