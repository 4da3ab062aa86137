//! In-memory tenant store.
//!
//! Both indexes (id and identifier) live under one `RwLock`, so every
//! operation observes and mutates them atomically. Suitable for tests and
//! single-process deployments; durable backends implement [`TenantStore`]
//! themselves.

use crate::error::{Result, TenancyError};
use crate::store::{ListFilter, TenantStore};
use crate::tenant::{Tenant, TenantId, TenantStatus};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    by_id: HashMap<TenantId, Tenant>,
    id_by_identifier: HashMap<String, TenantId>,
}

#[derive(Default)]
pub struct MemoryTenantStore {
    inner: RwLock<Inner>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn get_by_id(&self, id: &TenantId) -> Result<Tenant> {
        self.inner
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| TenancyError::TenantNotFound(id.to_string()))
    }

    async fn get_by_identifier(&self, identifier: &str) -> Result<Tenant> {
        let inner = self.inner.read().await;
        inner
            .id_by_identifier
            .get(identifier)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
            .ok_or_else(|| TenancyError::TenantNotFound(identifier.to_string()))
    }

    async fn create(&self, tenant: Tenant) -> Result<Tenant> {
        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&tenant.id) {
            return Err(TenancyError::AlreadyExists(tenant.id.to_string()));
        }
        if inner.id_by_identifier.contains_key(&tenant.identifier) {
            return Err(TenancyError::AlreadyExists(tenant.identifier.clone()));
        }
        inner
            .id_by_identifier
            .insert(tenant.identifier.clone(), tenant.id.clone());
        inner.by_id.insert(tenant.id.clone(), tenant.clone());
        Ok(tenant)
    }

    async fn update(&self, mut tenant: Tenant) -> Result<Tenant> {
        let mut inner = self.inner.write().await;
        let existing = inner
            .by_id
            .get(&tenant.id)
            .ok_or_else(|| TenancyError::TenantNotFound(tenant.id.to_string()))?;
        // The identifier may change; keep the slug index in step.
        if existing.identifier != tenant.identifier {
            if inner.id_by_identifier.contains_key(&tenant.identifier) {
                return Err(TenancyError::AlreadyExists(tenant.identifier.clone()));
            }
            let old = existing.identifier.clone();
            inner.id_by_identifier.remove(&old);
            inner
                .id_by_identifier
                .insert(tenant.identifier.clone(), tenant.id.clone());
        }
        tenant.touch();
        inner.by_id.insert(tenant.id.clone(), tenant.clone());
        Ok(tenant)
    }

    async fn delete(&self, id: &TenantId, soft: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        if soft {
            let tenant = inner
                .by_id
                .get_mut(id)
                .ok_or_else(|| TenancyError::TenantNotFound(id.to_string()))?;
            tenant.status = TenantStatus::Deleted;
            tenant.touch();
            return Ok(());
        }
        let tenant = inner
            .by_id
            .remove(id)
            .ok_or_else(|| TenancyError::TenantNotFound(id.to_string()))?;
        inner.id_by_identifier.remove(&tenant.identifier);
        Ok(())
    }

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> Result<Tenant> {
        let mut inner = self.inner.write().await;
        let tenant = inner
            .by_id
            .get_mut(id)
            .ok_or_else(|| TenancyError::TenantNotFound(id.to_string()))?;
        tenant.status = status;
        tenant.touch();
        Ok(tenant.clone())
    }

    async fn update_metadata(&self, id: &TenantId, patch: Map<String, Value>) -> Result<Tenant> {
        let mut inner = self.inner.write().await;
        let tenant = inner
            .by_id
            .get_mut(id)
            .ok_or_else(|| TenancyError::TenantNotFound(id.to_string()))?;
        for (key, value) in patch {
            if value.is_null() {
                tenant.settings.remove(&key);
            } else {
                tenant.settings.insert(key, value);
            }
        }
        tenant.touch();
        Ok(tenant.clone())
    }

    async fn list(&self, filter: ListFilter) -> Result<Vec<Tenant>> {
        let inner = self.inner.read().await;
        let mut tenants: Vec<Tenant> = inner
            .by_id
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tenants.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let page = tenants
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }

    async fn count(&self, status: Option<TenantStatus>) -> Result<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_id
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .count())
    }

    async fn exists(&self, identifier: &str) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .await
            .id_by_identifier
            .contains_key(identifier))
    }

    async fn search(&self, term: &str, limit: usize) -> Result<Vec<Tenant>> {
        let needle = term.to_lowercase();
        let inner = self.inner.read().await;
        let mut hits: Vec<Tenant> = inner
            .by_id
            .values()
            .filter(|t| {
                t.identifier.contains(&needle) || t.name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_by_ids(&self, ids: &[TenantId]) -> Result<Vec<Tenant>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect())
    }

    async fn bulk_update_status(&self, ids: &[TenantId], status: TenantStatus) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(tenant) = inner.by_id.get_mut(id) {
                tenant.status = status;
                tenant.touch();
                changed += 1;
            }
        }
        Ok(changed)
    }
}
