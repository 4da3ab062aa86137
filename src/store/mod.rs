//! Tenant metadata persistence.
//!
//! [`TenantStore`] is the storage seam: the in-memory implementation backs
//! tests and single-node deployments, and embedders plug their own database
//! behind the same trait. Lookups for a missing tenant fail with
//! [`TenancyError::TenantNotFound`] rather than returning an empty value, so
//! call sites cannot silently fall through to another tenant's data.

pub mod distributed;
pub mod memory;

pub use distributed::{DistributedTenantCache, InMemoryKv, KeyValueBackend};
pub use memory::MemoryTenantStore;

use crate::error::Result;
use crate::tenant::{Tenant, TenantId, TenantStatus};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Paging and filtering for [`TenantStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<TenantStatus>,
    pub offset: usize,
    /// `None` means no limit.
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn with_status(status: TenantStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get_by_id(&self, id: &TenantId) -> Result<Tenant>;

    async fn get_by_identifier(&self, identifier: &str) -> Result<Tenant>;

    /// Insert a new tenant. Fails with `AlreadyExists` when the id or the
    /// identifier is taken.
    async fn create(&self, tenant: Tenant) -> Result<Tenant>;

    /// Replace a tenant's record, bumping `updated_at`.
    async fn update(&self, tenant: Tenant) -> Result<Tenant>;

    /// Remove a tenant. With `soft` the record is kept and marked
    /// [`TenantStatus::Deleted`]; otherwise it is gone for good.
    async fn delete(&self, id: &TenantId, soft: bool) -> Result<()>;

    async fn set_status(&self, id: &TenantId, status: TenantStatus) -> Result<Tenant>;

    /// Merge `patch` into the tenant's settings atomically. Keys present in
    /// `patch` win; a `null` value removes the key.
    async fn update_metadata(&self, id: &TenantId, patch: Map<String, Value>) -> Result<Tenant>;

    /// Tenants ordered by creation time (oldest first), filtered and paged.
    async fn list(&self, filter: ListFilter) -> Result<Vec<Tenant>>;

    async fn count(&self, status: Option<TenantStatus>) -> Result<usize>;

    async fn exists(&self, identifier: &str) -> Result<bool>;

    /// Case-insensitive substring match over identifier and display name.
    async fn search(&self, term: &str, limit: usize) -> Result<Vec<Tenant>>;

    /// Fetch many tenants at once; ids with no record are skipped.
    async fn get_by_ids(&self, ids: &[TenantId]) -> Result<Vec<Tenant>>;

    /// Set the status of many tenants, returning how many records changed.
    /// Ids with no record are skipped.
    async fn bulk_update_status(&self, ids: &[TenantId], status: TenantStatus) -> Result<usize>;
}
