//! Namespaced TTL cache for query results with tag-based invalidation.
//!
//! Each namespace carries its own TTL. Keys are hashes of the operation
//! name plus canonicalized parameters. Every cached query is tagged
//! with `file:<relative_path>` for every file its results include, so
//! index writes can drop exactly the queries they staled. Cache
//! failures never fail a query; this layer is best effort.

use crate::config::CacheConfig;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub const NS_SYMBOL_LOOKUP: &str = "symbol_lookup";
pub const NS_SEARCH: &str = "search";
pub const NS_SEMANTIC_SEARCH: &str = "semantic_search";
pub const NS_DOCUMENTATION_SEARCH: &str = "documentation_search";
pub const NS_PROJECT_STATUS: &str = "project_status";

struct Entry {
    value: serde_json::Value,
    inserted_at: Instant,
    ttl: Duration,
    tags: Vec<String>,
}

/// In-process query result cache. Thread-safe.
pub struct QueryCache {
    entries: DashMap<String, Entry>,
    tags: DashMap<String, HashSet<String>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            tags: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn ttl_for(&self, namespace: &str) -> Duration {
        let secs = match namespace {
            NS_SYMBOL_LOOKUP => self.config.symbol_lookup_ttl_secs,
            NS_SEARCH => self.config.search_ttl_secs,
            NS_SEMANTIC_SEARCH => self.config.semantic_search_ttl_secs,
            NS_DOCUMENTATION_SEARCH => self.config.documentation_search_ttl_secs,
            NS_PROJECT_STATUS => self.config.project_status_ttl_secs,
            _ => self.config.search_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    /// Build a cache key from the operation name and its canonicalized
    /// parameters. serde_json serialization of a struct/map with fixed
    /// field order keeps this deterministic.
    pub fn key(namespace: &str, operation: &str, params: &serde_json::Value) -> String {
        let canonical = format!("{namespace}|{operation}|{params}");
        let digest = Sha256::digest(canonical.as_bytes());
        let mut key = String::with_capacity(namespace.len() + 1 + 32);
        key.push_str(namespace);
        key.push(':');
        for b in &digest[..16] {
            key.push_str(&format!("{b:02x}"));
        }
        key
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let hit = match self.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < entry.ttl => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match hit {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                // Expired: reclaim eagerly
                self.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Insert a value under a namespace-derived TTL with its tags.
    pub fn put(&self, namespace: &str, key: String, value: serde_json::Value, tags: &[String]) {
        let ttl = self.ttl_for(namespace);
        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
                tags: tags.to_vec(),
            },
        );
    }

    /// Drop every cached query tagged with any of the given tags.
    pub fn invalidate_tags(&self, tags: &[String]) -> usize {
        let mut removed = 0;
        for tag in tags {
            let Some((_, keys)) = self.tags.remove(tag) else {
                continue;
            };
            for key in keys {
                if self.entries.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Drop cached queries whose results touched the given file.
    pub fn invalidate_file_queries(&self, relative_path: &str) -> usize {
        self.invalidate_tags(&[file_tag(relative_path)])
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.tags.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "entries": self.entries.len(),
            "tags": self.tags.len(),
            "hits": self.hits.load(Ordering::Relaxed),
            "misses": self.misses.load(Ordering::Relaxed),
            "invalidations": self.invalidations.load(Ordering::Relaxed),
        })
    }

    fn remove(&self, key: &str) {
        let Some((_, entry)) = self.entries.remove(key) else {
            return;
        };
        for tag in entry.tags {
            if let Some(mut keys) = self.tags.get_mut(&tag) {
                keys.remove(key);
            }
        }
    }
}

/// Tag under which queries touching a file are registered.
pub fn file_tag(relative_path: &str) -> String {
    format!("file:{relative_path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> QueryCache {
        QueryCache::new(CacheConfig::default())
    }

    #[test]
    fn keys_are_deterministic_and_namespaced() {
        let params = serde_json::json!({"query": "install", "limit": 20});
        let a = QueryCache::key(NS_SEARCH, "search", &params);
        let b = QueryCache::key(NS_SEARCH, "search", &params);
        assert_eq!(a, b);
        assert!(a.starts_with("search:"));

        let c = QueryCache::key(NS_SEMANTIC_SEARCH, "search", &params);
        assert_ne!(a, c);

        let other = serde_json::json!({"query": "install", "limit": 10});
        assert_ne!(a, QueryCache::key(NS_SEARCH, "search", &other));
    }

    #[test]
    fn put_get_round_trip() {
        let cache = cache();
        let key = QueryCache::key(NS_SEARCH, "search", &serde_json::json!({"q": "x"}));
        assert!(cache.get(&key).is_none());

        cache.put(
            NS_SEARCH,
            key.clone(),
            serde_json::json!(["result"]),
            &[file_tag("src/app.py")],
        );
        assert_eq!(cache.get(&key), Some(serde_json::json!(["result"])));
        assert_eq!(cache.stats()["hits"], 1);
    }

    #[test]
    fn file_invalidation_drops_tagged_queries_only() {
        let cache = cache();
        let touched = QueryCache::key(NS_SEARCH, "search", &serde_json::json!({"q": "install"}));
        let untouched = QueryCache::key(NS_SEARCH, "search", &serde_json::json!({"q": "other"}));

        cache.put(
            NS_SEARCH,
            touched.clone(),
            serde_json::json!(1),
            &[file_tag("src/app.py"), file_tag("README.md")],
        );
        cache.put(
            NS_SEARCH,
            untouched.clone(),
            serde_json::json!(2),
            &[file_tag("lib/util.go")],
        );

        let removed = cache.invalidate_file_queries("src/app.py");
        assert_eq!(removed, 1);
        assert!(cache.get(&touched).is_none());
        assert!(cache.get(&untouched).is_some());

        // Unknown tags are a no-op
        assert_eq!(cache.invalidate_file_queries("missing.py"), 0);
    }

    #[test]
    fn expired_entries_miss_and_are_reclaimed() {
        let config = CacheConfig {
            search_ttl_secs: 0,
            ..CacheConfig::default()
        };
        let cache = QueryCache::new(config);
        let key = QueryCache::key(NS_SEARCH, "search", &serde_json::json!({"q": "x"}));
        cache.put(NS_SEARCH, key.clone(), serde_json::json!(1), &[]);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn namespace_ttls_come_from_config() {
        let cache = cache();
        assert_eq!(cache.ttl_for(NS_SYMBOL_LOOKUP), Duration::from_secs(1800));
        assert_eq!(cache.ttl_for(NS_SEMANTIC_SEARCH), Duration::from_secs(3600));
        assert_eq!(cache.ttl_for(NS_SEARCH), Duration::from_secs(600));
        assert_eq!(cache.ttl_for(NS_PROJECT_STATUS), Duration::from_secs(60));
    }
}
