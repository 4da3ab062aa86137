//! Distributed tenant cache.
//!
//! Write-through layer between the engine and a durable [`TenantStore`],
//! backed by any external key-value service exposing get/set-with-TTL/delete
//! (Redis, memcached, a sidecar). Each tenant is stored under two keys, one
//! per lookup path:
//!
//! ```text
//! {prefix}:id:{tenant_id}
//! {prefix}:ident:{identifier}
//! ```
//!
//! Reads fall back to the inner store and repopulate both keys; every write
//! goes to the store first and then refreshes or drops both keys, so the
//! cached copy is never newer than the durable one. A backend failure on the
//! read path degrades to the inner store instead of failing the call.

use crate::error::{Result, TenancyError};
use crate::store::{ListFilter, TenantStore};
use crate::tenant::{Tenant, TenantId, TenantStatus};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Minimal surface of the external key-value service.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

pub struct DistributedTenantCache {
    store: Arc<dyn TenantStore>,
    backend: Arc<dyn KeyValueBackend>,
    prefix: String,
    ttl: Duration,
}

impl DistributedTenantCache {
    pub fn new(
        store: Arc<dyn TenantStore>,
        backend: Arc<dyn KeyValueBackend>,
        prefix: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn id_key(&self, id: &TenantId) -> String {
        format!("{}:id:{}", self.prefix, id)
    }

    fn ident_key(&self, identifier: &str) -> String {
        format!("{}:ident:{}", self.prefix, identifier)
    }

    async fn cached(&self, key: &str) -> Option<Tenant> {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(tenant) => Some(tenant),
                Err(e) => {
                    warn!(key, error = %e, "dropping undecodable cached tenant");
                    let _ = self.backend.delete(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                // Backend trouble must not fail reads; the store is the truth.
                warn!(key, error = %e, "tenant cache backend read failed");
                None
            }
        }
    }

    async fn fill(&self, tenant: &Tenant) {
        let raw = match serde_json::to_string(tenant) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(tenant_id = %tenant.id, error = %e, "tenant not cacheable");
                return;
            }
        };
        for key in [self.id_key(&tenant.id), self.ident_key(&tenant.identifier)] {
            if let Err(e) = self.backend.set_ex(&key, &raw, self.ttl).await {
                warn!(key, error = %e, "tenant cache backend write failed");
            }
        }
    }

    async fn evict(&self, id: &TenantId, identifier: &str) {
        for key in [self.id_key(id), self.ident_key(identifier)] {
            if let Err(e) = self.backend.delete(&key).await {
                warn!(key, error = %e, "tenant cache backend delete failed");
            }
        }
    }

    /// Evict using only the id, resolving the identifier from either cache
    /// tier so both keys go.
    async fn evict_by_id(&self, id: &TenantId) {
        let identifier = match self.cached(&self.id_key(id)).await {
            Some(t) => Some(t.identifier),
            None => self.store.get_by_id(id).await.ok().map(|t| t.identifier),
        };
        if let Err(e) = self.backend.delete(&self.id_key(id)).await {
            warn!(tenant_id = %id, error = %e, "tenant cache backend delete failed");
        }
        if let Some(identifier) = identifier {
            if let Err(e) = self.backend.delete(&self.ident_key(&identifier)).await {
                warn!(tenant_id = %id, error = %e, "tenant cache backend delete failed");
            }
        }
    }
}

#[async_trait]
impl TenantStore for DistributedTenantCache {
    async fn get_by_id(&self, id: &TenantId) -> Result<Tenant> {
        if let Some(tenant) = self.cached(&self.id_key(id)).await {
            debug!(tenant_id = %id, "distributed cache hit");
            return Ok(tenant);
        }
        let tenant = self.store.get_by_id(id).await?;
        self.fill(&tenant).await;
        Ok(tenant)
    }

    async fn get_by_identifier(&self, identifier: &str) -> Result<Tenant> {
        if let Some(tenant) = self.cached(&self.ident_key(identifier)).await {
            debug!(identifier, "distributed cache hit");
            return Ok(tenant);
        }
        let tenant = self.store.get_by_identifier(identifier).await?;
        self.fill(&tenant).await;
        Ok(tenant)
    }

    async fn create(&self, tenant: Tenant) -> Result<Tenant> {
        let created = self.store.create(tenant).await?;
        self.fill(&created).await;
        Ok(created)
    }

    async fn update(&self, tenant: Tenant) -> Result<Tenant> {
        // A renamed tenant leaves a key under the old slug; fetch it before
        // the store forgets it.
        let previous = self
            .store
            .get_by_id(&tenant.id)
            .await
            .ok()
            .map(|t| t.identifier);
        let updated = self.store.update(tenant).await?;
        if let Some(previous) = previous {
            if previous != updated.identifier {
                self.evict(&updated.id, &previous).await;
            }
        }
        self.fill(&updated).await;
        Ok(updated)
    }

    async fn delete(&self, id: &TenantId, soft: bool) -> Result<()> {
        self.evict_by_id(id).await;
        self.store.delete(id, soft).await
    }

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> Result<Tenant> {
        let updated = self.store.set_status(id, status).await?;
        self.fill(&updated).await;
        Ok(updated)
    }

    async fn update_metadata(&self, id: &TenantId, patch: Map<String, Value>) -> Result<Tenant> {
        let updated = self.store.update_metadata(id, patch).await?;
        self.fill(&updated).await;
        Ok(updated)
    }

    async fn list(&self, filter: ListFilter) -> Result<Vec<Tenant>> {
        self.store.list(filter).await
    }

    async fn count(&self, status: Option<TenantStatus>) -> Result<usize> {
        self.store.count(status).await
    }

    async fn exists(&self, identifier: &str) -> Result<bool> {
        if self.cached(&self.ident_key(identifier)).await.is_some() {
            return Ok(true);
        }
        self.store.exists(identifier).await
    }

    async fn search(&self, term: &str, limit: usize) -> Result<Vec<Tenant>> {
        self.store.search(term, limit).await
    }

    async fn get_by_ids(&self, ids: &[TenantId]) -> Result<Vec<Tenant>> {
        self.store.get_by_ids(ids).await
    }

    async fn bulk_update_status(&self, ids: &[TenantId], status: TenantStatus) -> Result<usize> {
        let changed = self.store.bulk_update_status(ids, status).await?;
        for tenant in self.store.get_by_ids(ids).await? {
            self.fill(&tenant).await;
        }
        Ok(changed)
    }
}

/// In-process [`KeyValueBackend`] with real TTL handling. For tests and
/// single-node setups without an external cache.
#[derive(Default)]
pub struct InMemoryKv {
    entries: tokio::sync::Mutex<std::collections::HashMap<String, (String, std::time::Instant)>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) keys.
    pub async fn len(&self) -> usize {
        let now = std::time::Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, deadline)| *deadline > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueBackend for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, deadline)) if *deadline > std::time::Instant::now() => {
                Ok(Some(value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let deadline = std::time::Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| TenancyError::Storage("ttl overflow".into()))?;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
