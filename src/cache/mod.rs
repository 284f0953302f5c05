//! Cache manager with TTL classes
//!
//! Provides:
//! - A [`CacheBackend`] trait over string get/set/setex/del
//! - [`InMemoryCache`], a DashMap-backed backend with lazy TTL expiry and
//!   a periodic sweep on writes
//! - [`CacheManager`], typed JSON access and the `prep:` key scheme
//!
//! Read-through and write-through are driven by the agent; the manager
//! never fetches on a miss.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheTtlConfig;
use crate::error::{PrepError, Result};

/// Writes between sweeps of expired entries
const SWEEP_INTERVAL: u64 = 256;

/// String key-value cache with optional TTL
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store without expiry
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Store with expiry in seconds
    async fn setex(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()>;

    /// Returns whether a key was removed
    async fn del(&self, key: &str) -> Result<bool>;
}

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Instant::now() >= t)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    /// Hit rate as a fraction (0.0 - 1.0)
    pub hit_rate: f64,
}

/// In-process cache backend
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry
    pub fn remove_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        self.expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
    }

    fn insert(&self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.remove_expired();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries: self.entries.len(),
            hits,
            misses,
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
            // Remove expired entry
            drop(entry);
            self.entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.insert(
            key,
            CacheEntry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn setex(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
        self.insert(
            key,
            CacheEntry {
                value,
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// Typed access to the cache backend
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    ttl: CacheTtlConfig,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: CacheTtlConfig) -> Self {
        Self { backend, ttl }
    }

    /// Manager over a fresh in-process backend
    pub fn in_memory(ttl: CacheTtlConfig) -> Self {
        Self::new(Arc::new(InMemoryCache::new()), ttl)
    }

    /// Key scheme: `prep:{projectId}:{entityType}:{entityId}`
    pub fn key(project_id: &str, entity_type: &str, entity_id: &str) -> String {
        format!("prep:{}:{}:{}", project_id, entity_type, entity_id)
    }

    /// Key for a project's resolved context: `prep:{projectId}:_project`
    ///
    /// Two segments, so it cannot collide with any three-segment entity key.
    pub fn project_key(project_id: &str) -> String {
        format!("prep:{}:_project", project_id)
    }

    pub fn project_context_ttl(&self) -> u64 {
        self.ttl.project_context_ttl_secs
    }

    pub fn document_ttl(&self) -> u64 {
        self.ttl.document_ttl_secs
    }

    /// Read and decode a value; undecodable entries count as misses
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.backend.get(key).await? else {
            debug!(key, "Cache miss");
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                if let Err(e) = self.backend.del(key).await {
                    warn!(key, error = %e, "Failed to evict undecodable cache entry");
                }
                Ok(None)
            }
        }
    }

    /// Encode and store a value; `ttl_seconds == 0` stores without expiry
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| PrepError::Cache(format!("Failed to encode cache value: {}", e)))?;
        if ttl_seconds == 0 {
            self.backend.set(key, raw).await
        } else {
            self.backend.setex(key, raw, ttl_seconds).await
        }
    }

    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        self.backend.del(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_backend_basic_operations() {
        let cache = InMemoryCache::new();
        cache.set("a", "1".into()).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(cache.get("b").await.unwrap(), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        assert!(cache.del("a").await.unwrap());
        assert!(!cache.del("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = InMemoryCache::new();
        cache.setex("short", "x".into(), 0).await.unwrap();
        cache.setex("long", "y".into(), 3600).await.unwrap();

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap().as_deref(), Some("y"));
        assert_eq!(cache.stats().expirations, 1);

        cache.setex("short", "x".into(), 0).await.unwrap();
        cache.remove_expired();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_manager_typed_round_trip() {
        let manager = CacheManager::in_memory(CacheTtlConfig::default());
        let key = CacheManager::key("proj_x", "character", "char_1");
        assert_eq!(key, "prep:proj_x:character:char_1");

        manager
            .set(&key, &json!({"name": "Aladdin"}), manager.document_ttl())
            .await
            .unwrap();
        let value: Option<serde_json::Value> = manager.get(&key).await.unwrap();
        assert_eq!(value, Some(json!({"name": "Aladdin"})));

        assert!(manager.invalidate(&key).await.unwrap());
        let gone: Option<serde_json::Value> = manager.get(&key).await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let backend = Arc::new(InMemoryCache::new());
        backend.set("k", "not json".into()).await.unwrap();
        let manager = CacheManager::new(backend.clone(), CacheTtlConfig::default());

        let value: Option<Vec<u32>> = manager.get("k").await.unwrap();
        assert!(value.is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_writes_sweep_expired_entries() {
        let cache = InMemoryCache::new();
        cache.setex("stale", "x".into(), 0).await.unwrap();
        for i in 1..SWEEP_INTERVAL {
            cache.set(&format!("k{}", i), "v".into()).await.unwrap();
        }

        assert_eq!(cache.len(), (SWEEP_INTERVAL - 1) as usize);
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    /// Backend whose deletes always fail
    struct StuckBackend(InMemoryCache);

    #[async_trait]
    impl CacheBackend for StuckBackend {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> Result<()> {
            self.0.set(key, value).await
        }

        async fn setex(&self, key: &str, value: String, ttl_seconds: u64) -> Result<()> {
            self.0.setex(key, value, ttl_seconds).await
        }

        async fn del(&self, _key: &str) -> Result<bool> {
            Err(PrepError::Cache("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_eviction_is_still_a_miss() {
        let backend = Arc::new(StuckBackend(InMemoryCache::new()));
        backend.set("k", "not json".into()).await.unwrap();
        let manager = CacheManager::new(backend.clone(), CacheTtlConfig::default());

        let value: Option<Vec<u32>> = manager.get("k").await.unwrap();
        assert!(value.is_none());
        assert_eq!(backend.0.len(), 1);
    }

    #[test]
    fn test_ttl_classes_differ() {
        let manager = CacheManager::in_memory(CacheTtlConfig::default());
        assert!(manager.project_context_ttl() < manager.document_ttl());
    }

    #[test]
    fn test_project_key_is_disjoint_from_entity_keys() {
        assert_eq!(CacheManager::project_key("p"), "prep:p:_project");
        assert_ne!(
            CacheManager::project_key("p"),
            CacheManager::key("p", "project", "context")
        );
        assert_ne!(
            CacheManager::project_key("p"),
            CacheManager::key("p", "_project", "")
        );
    }
}
