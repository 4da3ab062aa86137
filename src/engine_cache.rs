//! Bounded per-tenant engine cache for database isolation.
//!
//! Maps a tenant to its lazily-created pooled engine. Two invariants hold
//! under any interleaving:
//!
//! - at most one engine is ever created per tenant, even under concurrent
//!   first access (per-tenant creation locks with a double check);
//! - an evicted engine's pool is disposed before the evicting call returns,
//!   so callers never observe a disposed-but-still-cached engine.
//!
//! Disposal errors are logged and swallowed: eviction always succeeds from
//! the caller's point of view.

use crate::engine::{EngineFactory, SqlEngine};
use crate::error::{Result, TenancyError};
use crate::tenant::TenantId;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Counters for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub creations: u64,
    pub evictions: u64,
}

/// LRU cache of per-tenant engines with exclusive creation.
pub struct EngineCache {
    entries: RwLock<LruCache<TenantId, Arc<dyn SqlEngine>>>,
    creation_locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
    factory: Arc<dyn EngineFactory>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    creations: AtomicU64,
    evictions: AtomicU64,
}

impl EngineCache {
    pub fn new(max_size: usize, factory: Arc<dyn EngineFactory>) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            creation_locks: Mutex::new(HashMap::new()),
            factory,
            max_size: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            creations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the cached engine for `tenant_id`, creating it from `url` on
    /// first access.
    pub async fn get_or_create(
        &self,
        tenant_id: &TenantId,
        url: &str,
    ) -> Result<Arc<dyn SqlEngine>> {
        // Fast path: cached engine, promoted to MRU.
        {
            let mut entries = self.entries.write().await;
            if let Some(engine) = entries.get(tenant_id) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(engine));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let creation_lock = {
            let mut locks = self.creation_locks.lock().await;
            Arc::clone(
                locks
                    .entry(tenant_id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = creation_lock.lock().await;

        // Double check: another task may have finished creation while we
        // waited on the tenant lock.
        {
            let mut entries = self.entries.write().await;
            if let Some(engine) = entries.get(tenant_id) {
                return Ok(Arc::clone(engine));
            }
        }

        let engine = self.factory.create(url).await.map_err(|e| {
            TenancyError::DatabaseConnection {
                tenant_id: tenant_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.creations.fetch_add(1, Ordering::Relaxed);
        debug!(tenant_id = %tenant_id, "created tenant engine");

        let evicted = {
            let mut entries = self.entries.write().await;
            entries.push(tenant_id.clone(), Arc::clone(&engine))
        };
        if let Some((evicted_id, evicted_engine)) = evicted {
            if evicted_id != *tenant_id {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                info!(tenant_id = %evicted_id, "evicting LRU tenant engine");
            }
            // Dispose before returning so no caller can race against a
            // cached-but-dead pool.
            if let Err(e) = evicted_engine.dispose().await {
                warn!(tenant_id = %evicted_id, error = %e, "disposal of evicted engine failed");
            }
        }

        // The lock entry only needs to exist while creation can race.
        {
            let mut locks = self.creation_locks.lock().await;
            locks.remove(tenant_id);
        }

        Ok(engine)
    }

    /// Remove and dispose the engine for `tenant_id`. Returns whether an
    /// engine was cached.
    pub async fn remove(&self, tenant_id: &TenantId) -> bool {
        let engine = {
            let mut entries = self.entries.write().await;
            entries.pop(tenant_id)
        };
        match engine {
            Some(engine) => {
                if let Err(e) = engine.dispose().await {
                    warn!(tenant_id = %tenant_id, error = %e, "engine disposal failed");
                }
                true
            }
            None => false,
        }
    }

    /// Dispose every cached engine. For shutdown.
    pub async fn dispose_all(&self) {
        let engines: Vec<(TenantId, Arc<dyn SqlEngine>)> = {
            let mut entries = self.entries.write().await;
            let mut drained = Vec::with_capacity(entries.len());
            while let Some(pair) = entries.pop_lru() {
                drained.push(pair);
            }
            drained
        };
        for (tenant_id, engine) in engines {
            if let Err(e) = engine.dispose().await {
                warn!(tenant_id = %tenant_id, error = %e, "engine disposal failed during shutdown");
            }
        }
    }

    pub async fn contains(&self, tenant_id: &TenantId) -> bool {
        self.entries.read().await.contains(tenant_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> EngineCacheStats {
        EngineCacheStats {
            size: self.len().await,
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            creations: self.creations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::MockEngineFactory;
    use futures::future::join_all;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_first_access_creates_one_engine() {
        let factory = Arc::new(MockEngineFactory::with_delay(Duration::from_millis(10)));
        let cache = Arc::new(EngineCache::new(8, factory.clone()));
        let tenant = TenantId::new("t-1");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let tenant = tenant.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_create(&tenant, "postgres://t-1")
                        .await
                        .map(|_| ())
                })
            })
            .collect();
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(factory.created_count(), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_eviction_disposes_before_return() {
        let factory = Arc::new(MockEngineFactory::new());
        let cache = EngineCache::new(1, factory.clone());

        cache
            .get_or_create(&TenantId::new("t-1"), "postgres://t-1")
            .await
            .unwrap();
        cache
            .get_or_create(&TenantId::new("t-2"), "postgres://t-2")
            .await
            .unwrap();

        // By the time the second call returned, t-1's pool was disposed.
        let engines = factory.engines.lock().await;
        let (_, first) = engines.iter().find(|(url, _)| url == "postgres://t-1").unwrap();
        assert!(first.is_disposed());
        drop(engines);

        assert!(!cache.contains(&TenantId::new("t-1")).await);
        assert!(cache.contains(&TenantId::new("t-2")).await);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_lru_order_for_eviction() {
        let factory = Arc::new(MockEngineFactory::new());
        let cache = EngineCache::new(2, factory.clone());
        let (t1, t2, t3) = (TenantId::new("t-1"), TenantId::new("t-2"), TenantId::new("t-3"));

        cache.get_or_create(&t1, "postgres://t-1").await.unwrap();
        cache.get_or_create(&t2, "postgres://t-2").await.unwrap();
        // Touch t-1 so t-2 is the LRU victim.
        cache.get_or_create(&t1, "postgres://t-1").await.unwrap();
        cache.get_or_create(&t3, "postgres://t-3").await.unwrap();

        assert!(cache.contains(&t1).await);
        assert!(!cache.contains(&t2).await);
        assert!(cache.contains(&t3).await);
    }

    #[tokio::test]
    async fn test_remove_disposes() {
        let factory = Arc::new(MockEngineFactory::new());
        let cache = EngineCache::new(4, factory.clone());
        let tenant = TenantId::new("t-1");

        cache.get_or_create(&tenant, "postgres://t-1").await.unwrap();
        assert!(cache.remove(&tenant).await);
        assert!(!cache.remove(&tenant).await);

        let engines = factory.engines.lock().await;
        assert!(engines[0].1.is_disposed());
    }

    #[tokio::test]
    async fn test_dispose_all() {
        let factory = Arc::new(MockEngineFactory::new());
        let cache = EngineCache::new(4, factory.clone());
        cache.get_or_create(&TenantId::new("t-1"), "u1").await.unwrap();
        cache.get_or_create(&TenantId::new("t-2"), "u2").await.unwrap();

        cache.dispose_all().await;
        assert!(cache.is_empty().await);
        for (_, engine) in factory.engines.lock().await.iter() {
            assert!(engine.is_disposed());
        }
    }

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let factory = Arc::new(MockEngineFactory::new());
        let cache = EngineCache::new(4, factory);
        let tenant = TenantId::new("t-1");

        cache.get_or_create(&tenant, "u").await.unwrap();
        cache.get_or_create(&tenant, "u").await.unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.creations, 1);
    }
}
