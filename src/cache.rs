//! In-process tenant cache with LRU eviction and per-entry TTL.
//!
//! [`TenantCache`] fronts the tenant record store for hot lookups. Entries
//! are indexed both by opaque ID and by slug; the two indexes are kept
//! consistent on every insert and invalidation. Expired entries are treated
//! as misses and removed lazily on access; [`TenantCache::purge_expired`]
//! offers proactive reclamation for low-traffic deployments.

use crate::tenant::{Tenant, TenantId};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    tenant: Tenant,
    stored_at: Instant,
}

struct Inner {
    by_id: LruCache<TenantId, Entry>,
    id_by_identifier: HashMap<String, TenantId>,
}

/// Snapshot of cache state for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    /// Rounded integer hit rate (0-100); 0 before any lookup.
    pub hit_rate_pct: u64,
}

/// Bounded LRU + TTL cache of tenant records, indexed by ID and by slug.
pub struct TenantCache {
    inner: RwLock<Inner>,
    max_size: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TenantCache {
    /// Create a cache holding up to `max_size` entries for `ttl` each.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(Inner {
                by_id: LruCache::new(capacity),
                id_by_identifier: HashMap::new(),
            }),
            max_size: capacity.get(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a tenant by ID. Expired entries count as misses and are
    /// removed; hits promote the entry to most-recently-used.
    pub async fn get(&self, id: &TenantId) -> Option<Tenant> {
        let mut inner = self.inner.write().await;
        match inner.by_id.get(id) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                let tenant = entry.tenant.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(tenant)
            }
            Some(_) => {
                if let Some(entry) = inner.by_id.pop(id) {
                    inner.id_by_identifier.remove(&entry.tenant.identifier);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up a tenant by slug via the secondary index.
    pub async fn get_by_identifier(&self, identifier: &str) -> Option<Tenant> {
        let id = {
            let inner = self.inner.read().await;
            inner.id_by_identifier.get(identifier).cloned()
        };
        match id {
            Some(id) => self.get(&id).await,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or refresh a tenant. At capacity the least-recently-used entry
    /// is evicted; both indexes stay consistent, including across slug
    /// renames.
    pub async fn insert(&self, tenant: Tenant) {
        let mut inner = self.inner.write().await;

        // The same ID may re-enter under a renamed slug.
        if let Some(old) = inner.by_id.peek(&tenant.id) {
            if old.tenant.identifier != tenant.identifier {
                let stale = old.tenant.identifier.clone();
                inner.id_by_identifier.remove(&stale);
            }
        }

        let id = tenant.id.clone();
        let identifier = tenant.identifier.clone();
        let evicted = inner.by_id.push(
            id.clone(),
            Entry {
                tenant,
                stored_at: Instant::now(),
            },
        );
        if let Some((evicted_id, evicted_entry)) = evicted {
            if evicted_id != id {
                inner
                    .id_by_identifier
                    .remove(&evicted_entry.tenant.identifier);
                debug!(tenant_id = %evicted_id, "tenant cache evicted LRU entry");
            }
        }
        inner.id_by_identifier.insert(identifier, id);
    }

    /// Remove the entry for `id`. Returns whether an entry was present.
    pub async fn invalidate(&self, id: &TenantId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.by_id.pop(id) {
            Some(entry) => {
                inner.id_by_identifier.remove(&entry.tenant.identifier);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `identifier`. Returns whether an entry was present.
    pub async fn invalidate_by_identifier(&self, identifier: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.id_by_identifier.remove(identifier) {
            Some(id) => inner.by_id.pop(&id).is_some(),
            None => false,
        }
    }

    /// Drop all entries. Returns the number evicted.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner.by_id.len();
        inner.by_id.clear();
        inner.id_by_identifier.clear();
        count
    }

    /// Eagerly remove all expired entries. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let expired: Vec<TenantId> = inner
            .by_id
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() >= self.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(entry) = inner.by_id.pop(id) {
                inner.id_by_identifier.remove(&entry.tenant.identifier);
            }
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Monitoring snapshot. Counters are cumulative since creation.
    pub async fn stats(&self) -> CacheStats {
        let size = self.len().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate_pct = if total > 0 {
            (hits * 100 + total / 2) / total
        } else {
            0
        };
        CacheStats {
            size,
            max_size: self.max_size,
            ttl_secs: self.ttl.as_secs(),
            hits,
            misses,
            hit_rate_pct,
        }
    }
}
