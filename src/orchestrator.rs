//! Top-level tenancy engine.
//!
//! [`TenancyOrchestrator`] wires the store, the in-process tenant cache, the
//! isolation provider, the rate limiter, and the audit log behind one
//! facade. It owns the tenant lifecycle (register, activate, suspend,
//! delete), hands out tenant-scoped database sessions, and records every
//! lifecycle and security event.
//!
//! Lifecycle rules enforced here rather than in the store:
//!
//! - registration respects `max_tenants` and provisions the isolation
//!   namespace before the tenant turns active;
//! - a failed provisioning leaves the record in `provisioning` after a
//!   best-effort namespace cleanup, so the operation can be retried;
//! - status changes follow the transition table in
//!   [`crate::tenant::TenantStatus::can_transition_to`].

use crate::audit::{AuditCategory, AuditEntry, AuditLog, AuditOutcome};
use crate::cache::{CacheStats, TenantCache};
use crate::config::TenancyConfig;
use crate::context::TenantContext;
use crate::engine::{EngineFactory, ScopedSession, SqlEngine};
use crate::error::{Result, TenancyError};
use crate::isolation::{build_provider, IsolationProvider};
use crate::ratelimit::{RateLimitDecision, RateLimiter};
use crate::store::{DistributedTenantCache, KeyValueBackend, ListFilter, TenantStore};
use crate::tenant::{Tenant, TenantId, TenantStatus};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

impl std::fmt::Debug for TenancyOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenancyOrchestrator").finish_non_exhaustive()
    }
}

pub struct TenancyOrchestrator {
    config: Arc<TenancyConfig>,
    store: Arc<dyn TenantStore>,
    provider: Arc<dyn IsolationProvider>,
    cache: Option<TenantCache>,
    limiter: Option<RateLimiter>,
    audit: Option<AuditLog>,
}

impl TenancyOrchestrator {
    /// Validate `config` and wire all components.
    ///
    /// Fails with [`TenancyError::InvalidConfig`] when
    /// `distributed_cache.enabled` is set; that mode needs a key-value
    /// backend, supplied through
    /// [`with_kv_backend`](Self::with_kv_backend).
    pub fn new(
        config: TenancyConfig,
        store: Arc<dyn TenantStore>,
        engine: Arc<dyn SqlEngine>,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        Self::with_kv_backend(config, store, None, engine, factory)
    }

    /// [`new`](Self::new) with an optional key-value backend for the
    /// write-through distributed cache.
    ///
    /// When `distributed_cache.enabled` is set the store is wrapped in a
    /// [`DistributedTenantCache`] keyed under `distributed_cache.key_prefix`
    /// with `distributed_cache.ttl` expiry; every store access made by the
    /// engine then goes through the cache.
    pub fn with_kv_backend(
        config: TenancyConfig,
        store: Arc<dyn TenantStore>,
        kv_backend: Option<Arc<dyn KeyValueBackend>>,
        engine: Arc<dyn SqlEngine>,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn TenantStore> = if config.distributed_cache.enabled {
            let Some(backend) = kv_backend else {
                return Err(TenancyError::InvalidConfig {
                    field: "distributed_cache.enabled".to_string(),
                    reason: "a key-value backend is required; construct the engine with \
                             with_kv_backend"
                        .to_string(),
                });
            };
            Arc::new(DistributedTenantCache::new(
                store,
                backend,
                config.distributed_cache.key_prefix.clone(),
                config.distributed_cache.ttl,
            ))
        } else {
            store
        };
        let config = Arc::new(config);
        let provider = build_provider(Arc::clone(&config), engine, factory)?;
        let cache = config
            .cache
            .enabled
            .then(|| TenantCache::new(config.cache.max_size, config.cache.ttl));
        let limiter = config
            .rate_limit
            .enabled
            .then(|| RateLimiter::new(config.rate_limit.limit, config.rate_limit.window));
        let audit = config
            .enable_audit_logging
            .then(|| AuditLog::new(config.audit_capacity));
        info!(strategy = %config.isolation_strategy, "tenancy engine initialized");
        Ok(Self {
            config,
            store,
            provider,
            cache,
            limiter,
            audit,
        })
    }

    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    async fn record(&self, entry: AuditEntry) {
        if let Some(audit) = &self.audit {
            audit.write(entry).await;
        }
    }

    /// Register and provision a new tenant.
    ///
    /// The record is created in the configured initial status, the isolation
    /// namespace is provisioned, and only then does the tenant turn active.
    /// When provisioning fails, the namespace is cleaned up best-effort and
    /// the record stays in `provisioning` for a retry.
    pub async fn register_tenant(
        &self,
        identifier: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Tenant> {
        self.register_tenant_with_settings(identifier, name, Map::new())
            .await
    }

    /// [`register_tenant`](Self::register_tenant) with initial settings.
    pub async fn register_tenant_with_settings(
        &self,
        identifier: impl Into<String>,
        name: impl Into<String>,
        settings: Map<String, Value>,
    ) -> Result<Tenant> {
        let identifier = identifier.into();
        if let Some(max) = self.config.max_tenants {
            let current = self.store.count(None).await?;
            if current >= max {
                self.record(
                    AuditEntry::new(
                        None,
                        AuditCategory::TenantLifecycle,
                        "register",
                        AuditOutcome::Denied,
                    )
                    .with_detail("identifier", json!(identifier)),
                )
                .await;
                return Err(TenancyError::QuotaExceeded {
                    tenant_id: identifier,
                    quota: "max_tenants".to_string(),
                    current: current as u64,
                    limit: max as u64,
                });
            }
        }

        let mut tenant =
            Tenant::new(identifier, name)?.with_status(self.config.default_tenant_status);
        tenant.settings = settings;
        let created = self.store.create(tenant).await?;

        if let Err(e) = self.provider.provision(&created).await {
            if let Err(cleanup) = self.provider.destroy(&created, true).await {
                warn!(tenant_id = %created.id, error = %cleanup,
                    "namespace cleanup after failed provisioning also failed");
            }
            self.record(
                AuditEntry::new(
                    Some(created.id.clone()),
                    AuditCategory::TenantLifecycle,
                    "register",
                    AuditOutcome::Failure,
                )
                .with_detail("error", json!(e.to_string())),
            )
            .await;
            return Err(e);
        }

        let active = if created.status == TenantStatus::Provisioning {
            self.store.set_status(&created.id, TenantStatus::Active).await?
        } else {
            created
        };
        if let Some(cache) = &self.cache {
            cache.insert(active.clone()).await;
        }
        self.record(AuditEntry::new(
            Some(active.id.clone()),
            AuditCategory::TenantLifecycle,
            "register",
            AuditOutcome::Success,
        ))
        .await;
        info!(tenant_id = %active.id, identifier = %active.identifier, "tenant registered");
        Ok(active)
    }

    /// Fetch a tenant, preferring the in-process cache.
    pub async fn get_tenant(&self, id: &TenantId) -> Result<Tenant> {
        if let Some(cache) = &self.cache {
            if let Some(tenant) = cache.get(id).await {
                return Ok(tenant);
            }
        }
        let tenant = self.store.get_by_id(id).await?;
        if let Some(cache) = &self.cache {
            cache.insert(tenant.clone()).await;
        }
        Ok(tenant)
    }

    /// Fetch a tenant by slug, preferring the in-process cache.
    pub async fn get_tenant_by_identifier(&self, identifier: &str) -> Result<Tenant> {
        if let Some(cache) = &self.cache {
            if let Some(tenant) = cache.get_by_identifier(identifier).await {
                return Ok(tenant);
            }
        }
        let tenant = self.store.get_by_identifier(identifier).await?;
        if let Some(cache) = &self.cache {
            cache.insert(tenant.clone()).await;
        }
        Ok(tenant)
    }

    async fn transition(&self, id: &TenantId, next: TenantStatus, action: &str) -> Result<Tenant> {
        // Always decide on the stored record, never a cached snapshot.
        let tenant = self.store.get_by_id(id).await?;
        if !tenant
            .status
            .can_transition_to(next, self.config.enable_soft_delete)
        {
            self.record(
                AuditEntry::new(
                    Some(id.clone()),
                    AuditCategory::TenantLifecycle,
                    action,
                    AuditOutcome::Denied,
                )
                .with_detail("from", json!(tenant.status.to_string()))
                .with_detail("to", json!(next.to_string())),
            )
            .await;
            return Err(TenancyError::InvalidState(format!(
                "tenant {} cannot go from {} to {}",
                id, tenant.status, next
            )));
        }
        let updated = self.store.set_status(id, next).await?;
        if let Some(cache) = &self.cache {
            cache.insert(updated.clone()).await;
        }
        self.record(AuditEntry::new(
            Some(id.clone()),
            AuditCategory::TenantLifecycle,
            action,
            AuditOutcome::Success,
        ))
        .await;
        Ok(updated)
    }

    /// Suspend an active tenant; its data stays in place.
    pub async fn suspend_tenant(&self, id: &TenantId) -> Result<Tenant> {
        self.transition(id, TenantStatus::Suspended, "suspend").await
    }

    /// Activate a provisioning or suspended tenant (or restore a
    /// soft-deleted one when soft delete is enabled).
    pub async fn activate_tenant(&self, id: &TenantId) -> Result<Tenant> {
        self.transition(id, TenantStatus::Active, "activate").await
    }

    /// Delete a tenant.
    ///
    /// With soft delete enabled the record is retained in `deleted` and the
    /// namespace kept; otherwise record and data are destroyed.
    pub async fn delete_tenant(&self, id: &TenantId) -> Result<()> {
        self.delete_tenant_with(id, !self.config.enable_soft_delete)
            .await
    }

    /// [`delete_tenant`](Self::delete_tenant) with explicit control over
    /// namespace destruction, e.g. to purge data while keeping the record.
    pub async fn delete_tenant_with(&self, id: &TenantId, destroy_data: bool) -> Result<()> {
        let tenant = self.store.get_by_id(id).await?;
        if !tenant
            .status
            .can_transition_to(TenantStatus::Deleted, self.config.enable_soft_delete)
        {
            return Err(TenancyError::InvalidState(format!(
                "tenant {} cannot go from {} to deleted",
                id, tenant.status
            )));
        }
        let soft = self.config.enable_soft_delete;
        self.provider.destroy(&tenant, destroy_data).await?;
        self.store.delete(id, soft).await?;

        if let Some(cache) = &self.cache {
            cache.invalidate(id).await;
        }
        if let Some(limiter) = &self.limiter {
            limiter.forget(id).await;
        }
        self.record(
            AuditEntry::new(
                Some(id.clone()),
                AuditCategory::TenantLifecycle,
                "delete",
                AuditOutcome::Success,
            )
            .with_detail("soft", json!(soft)),
        )
        .await;
        info!(tenant_id = %id, soft, "tenant deleted");
        Ok(())
    }

    /// Merge a settings patch into the tenant record (a `null` value removes
    /// the key).
    pub async fn update_tenant_metadata(
        &self,
        id: &TenantId,
        patch: Map<String, Value>,
    ) -> Result<Tenant> {
        let updated = self.store.update_metadata(id, patch).await?;
        if let Some(cache) = &self.cache {
            cache.insert(updated.clone()).await;
        }
        Ok(updated)
    }

    /// Admit or reject one request against the tenant's rate limit. `None`
    /// when rate limiting is disabled.
    pub async fn check_rate_limit(&self, id: &TenantId) -> Result<Option<RateLimitDecision>> {
        let Some(limiter) = &self.limiter else {
            return Ok(None);
        };
        match limiter.check(id).await {
            Ok(decision) => Ok(Some(decision)),
            Err(e) => {
                self.record(
                    AuditEntry::new(
                        Some(id.clone()),
                        AuditCategory::RateLimit,
                        "admit",
                        AuditOutcome::Denied,
                    )
                    .with_detail("limit", json!(limiter.limit())),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Open a tenant-scoped database session.
    ///
    /// The tenant must be active and within its rate limit. The returned
    /// session already carries the strategy's transaction-scoped isolation
    /// setting.
    pub async fn acquire_session(&self, id: &TenantId) -> Result<ScopedSession> {
        let tenant = self.get_tenant(id).await?;
        if let Err(e) = tenant.ensure_active() {
            self.record(
                AuditEntry::new(
                    Some(id.clone()),
                    AuditCategory::Session,
                    "acquire",
                    AuditOutcome::Denied,
                )
                .with_detail("status", json!(tenant.status.to_string())),
            )
            .await;
            return Err(e);
        }
        self.check_rate_limit(id).await?;

        match self.provider.acquire(&tenant).await {
            Ok(session) => Ok(session),
            Err(e) => {
                let (category, outcome) = if e.is_security_critical() {
                    (AuditCategory::Security, AuditOutcome::Denied)
                } else {
                    (AuditCategory::Session, AuditOutcome::Failure)
                };
                self.record(
                    AuditEntry::new(Some(id.clone()), category, "acquire", outcome)
                        .with_detail("error", json!(e.to_string())),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Run `f` with the tenant installed as the task-local context.
    ///
    /// The tenant must be active. Inside `f`, [`TenantContext::get`] returns
    /// this tenant and cross-tenant session use is detected.
    pub async fn scope<F, T>(&self, id: &TenantId, f: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let tenant = self.get_tenant(id).await?;
        tenant.ensure_active()?;
        TenantContext::scope(tenant, f).await
    }

    pub async fn list_tenants(&self, filter: ListFilter) -> Result<Vec<Tenant>> {
        self.store.list(filter).await
    }

    pub async fn search_tenants(&self, term: &str, limit: usize) -> Result<Vec<Tenant>> {
        self.store.search(term, limit).await
    }

    pub async fn count_tenants(&self, status: Option<TenantStatus>) -> Result<usize> {
        self.store.count(status).await
    }

    /// Most recent audit entries, newest first. Empty when auditing is off.
    pub async fn recent_audit(&self, n: usize) -> Vec<AuditEntry> {
        match &self.audit {
            Some(audit) => audit.recent(n).await,
            None => Vec::new(),
        }
    }

    /// Audit entries for one tenant, newest first.
    pub async fn tenant_audit(&self, id: &TenantId, n: usize) -> Vec<AuditEntry> {
        match &self.audit {
            Some(audit) => audit.for_tenant(id, n).await,
            None => Vec::new(),
        }
    }

    /// Record an audit entry built by application code. No-op when auditing
    /// is disabled.
    pub async fn write_audit(&self, entry: AuditEntry) {
        self.record(entry).await;
    }

    /// Record a security event from outside the engine (e.g. a
    /// [`TenancyError::DataLeakage`] caught in application code).
    pub async fn report_security_event(&self, id: Option<TenantId>, detail: &str) {
        self.write_audit(
            AuditEntry::new(id, AuditCategory::Security, "reported", AuditOutcome::Denied)
                .with_detail("detail", json!(detail)),
        )
        .await;
    }

    /// In-process tenant cache statistics, when the cache is enabled.
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    /// Release engines and pooled connections.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
        self.provider.close().await?;
        info!("tenancy engine shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{MockEngine, MockEngineFactory};
    use crate::isolation::IsolationStrategy;
    use crate::store::MemoryTenantStore;

    fn build(config: TenancyConfig) -> (Arc<MockEngine>, Arc<MemoryTenantStore>, TenancyOrchestrator) {
        let engine = Arc::new(MockEngine::new("postgres://localhost/app"));
        let store = Arc::new(MemoryTenantStore::new());
        let orchestrator = TenancyOrchestrator::new(
            config,
            store.clone(),
            engine.clone(),
            Arc::new(MockEngineFactory::new()),
        )
        .unwrap();
        (engine, store, orchestrator)
    }

    fn schema_config() -> TenancyConfig {
        TenancyConfig {
            database_url: "postgres://localhost/app".to_string(),
            ..TenancyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_register_provisions_then_activates() {
        let (engine, _, orchestrator) = build(schema_config());
        let tenant = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap();

        assert_eq!(tenant.status, TenantStatus::Active);
        let log = engine.statements().await;
        assert!(log
            .iter()
            .any(|s| s.contains("CREATE SCHEMA IF NOT EXISTS \"tenant_acme_corp\"")));

        let audit = orchestrator.recent_audit(10).await;
        assert_eq!(audit[0].action, "register");
        assert_eq!(audit[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn test_failed_provision_leaves_tenant_provisioning() {
        let engine = Arc::new(MockEngine::failing_on(
            "postgres://localhost/app",
            "CREATE SCHEMA",
        ));
        let store = Arc::new(MemoryTenantStore::new());
        let orchestrator = TenancyOrchestrator::new(
            schema_config(),
            store.clone(),
            engine,
            Arc::new(MockEngineFactory::new()),
        )
        .unwrap();

        let err = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap_err();
        assert!(matches!(err, TenancyError::Isolation { .. }));

        let stored = store.get_by_identifier("acme-corp").await.unwrap();
        assert_eq!(stored.status, TenantStatus::Provisioning);
    }

    #[tokio::test]
    async fn test_quota_is_enforced() {
        let config = TenancyConfig {
            max_tenants: Some(1),
            ..schema_config()
        };
        let (_, _, orchestrator) = build(config);
        orchestrator.register_tenant("first-co", "First").await.unwrap();

        let err = orchestrator
            .register_tenant("second-co", "Second")
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (_, _, orchestrator) = build(schema_config());
        let tenant = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap();

        let suspended = orchestrator.suspend_tenant(&tenant.id).await.unwrap();
        assert_eq!(suspended.status, TenantStatus::Suspended);

        // Suspended tenants cannot be suspended again.
        assert!(orchestrator.suspend_tenant(&tenant.id).await.is_err());

        let active = orchestrator.activate_tenant(&tenant.id).await.unwrap();
        assert_eq!(active.status, TenantStatus::Active);
    }

    #[tokio::test]
    async fn test_hard_delete_destroys_namespace_and_record() {
        let (engine, store, orchestrator) = build(schema_config());
        let tenant = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap();

        orchestrator.delete_tenant(&tenant.id).await.unwrap();

        assert!(store.get_by_id(&tenant.id).await.is_err());
        let log = engine.statements().await;
        assert!(log
            .iter()
            .any(|s| s.contains("DROP SCHEMA IF EXISTS \"tenant_acme_corp\" CASCADE")));
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_record_and_data() {
        let config = TenancyConfig {
            enable_soft_delete: true,
            ..schema_config()
        };
        let (engine, store, orchestrator) = build(config);
        let tenant = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap();

        orchestrator.delete_tenant(&tenant.id).await.unwrap();
        let stored = store.get_by_id(&tenant.id).await.unwrap();
        assert_eq!(stored.status, TenantStatus::Deleted);

        let log = engine.statements().await;
        assert!(!log.iter().any(|s| s.contains("DROP SCHEMA")));

        // Soft-deleted tenants can be restored.
        let restored = orchestrator.activate_tenant(&tenant.id).await.unwrap();
        assert_eq!(restored.status, TenantStatus::Active);
    }

    #[tokio::test]
    async fn test_acquire_session_requires_active_tenant() {
        let (_, _, orchestrator) = build(schema_config());
        let tenant = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap();
        orchestrator.suspend_tenant(&tenant.id).await.unwrap();

        let err = orchestrator.acquire_session(&tenant.id).await.unwrap_err();
        assert!(matches!(err, TenancyError::TenantInactive { .. }));

        let audit = orchestrator.tenant_audit(&tenant.id, 10).await;
        assert_eq!(audit[0].category, AuditCategory::Session);
        assert_eq!(audit[0].outcome, AuditOutcome::Denied);
    }

    #[tokio::test]
    async fn test_acquire_session_consumes_rate_limit() {
        let config = TenancyConfig {
            rate_limit: crate::config::RateLimitSettings {
                enabled: true,
                limit: 2,
                window: std::time::Duration::from_secs(60),
            },
            ..schema_config()
        };
        let (_, _, orchestrator) = build(config);
        let tenant = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap();

        orchestrator
            .acquire_session(&tenant.id)
            .await
            .unwrap()
            .rollback()
            .await
            .unwrap();
        orchestrator
            .acquire_session(&tenant.id)
            .await
            .unwrap()
            .rollback()
            .await
            .unwrap();
        let err = orchestrator.acquire_session(&tenant.id).await.unwrap_err();
        assert!(matches!(err, TenancyError::RateLimitExceeded { .. }));

        let audit = orchestrator.tenant_audit(&tenant.id, 10).await;
        assert_eq!(audit[0].category, AuditCategory::RateLimit);
    }

    #[tokio::test]
    async fn test_scoped_session_detects_cross_tenant_use() {
        let (_, _, orchestrator) = build(schema_config());
        let alpha = orchestrator.register_tenant("alpha-co", "Alpha").await.unwrap();
        let beta = orchestrator.register_tenant("beta-co", "Beta").await.unwrap();

        let mut session = orchestrator.acquire_session(&alpha.id).await.unwrap();
        let err = TenantContext::scope(beta.clone(), async move {
            session.execute("SELECT * FROM invoices", &[]).await
        })
        .await
        .unwrap_err();
        assert!(err.is_security_critical());
    }

    #[tokio::test]
    async fn test_scope_installs_context() {
        let (_, _, orchestrator) = build(schema_config());
        let tenant = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap();

        let seen = orchestrator
            .scope(&tenant.id, async {
                Ok(TenantContext::get()?.identifier)
            })
            .await
            .unwrap();
        assert_eq!(seen, "acme-corp");

        // Suspended tenants cannot establish a scope.
        orchestrator.suspend_tenant(&tenant.id).await.unwrap();
        assert!(orchestrator
            .scope(&tenant.id, async { Ok(()) })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_metadata_update_refreshes_cache() {
        let (_, _, orchestrator) = build(schema_config());
        let tenant = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap();

        let mut patch = Map::new();
        patch.insert("tier".to_string(), json!("gold"));
        orchestrator
            .update_tenant_metadata(&tenant.id, patch)
            .await
            .unwrap();

        let cached = orchestrator.get_tenant(&tenant.id).await.unwrap();
        assert_eq!(cached.settings["tier"], json!("gold"));
    }

    #[tokio::test]
    async fn test_distributed_cache_enabled_wraps_the_store() {
        let config = TenancyConfig {
            distributed_cache: crate::config::DistributedCacheSettings {
                enabled: true,
                key_prefix: "tenant".to_string(),
                ttl: std::time::Duration::from_secs(60),
            },
            ..schema_config()
        };
        let kv = Arc::new(crate::store::InMemoryKv::new());
        let orchestrator = TenancyOrchestrator::with_kv_backend(
            config,
            Arc::new(MemoryTenantStore::new()),
            Some(kv.clone()),
            Arc::new(MockEngine::new("postgres://localhost/app")),
            Arc::new(MockEngineFactory::new()),
        )
        .unwrap();

        let tenant = orchestrator.register_tenant("acme-corp", "Acme").await.unwrap();

        // Registration went through the write-through cache, so the backend
        // holds both keys for the record.
        assert!(kv
            .get(&format!("tenant:id:{}", tenant.id))
            .await
            .unwrap()
            .is_some());
        assert!(kv.get("tenant:ident:acme-corp").await.unwrap().is_some());

        orchestrator.delete_tenant(&tenant.id).await.unwrap();
        assert!(kv
            .get(&format!("tenant:id:{}", tenant.id))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_distributed_cache_requires_a_backend() {
        let config = TenancyConfig {
            distributed_cache: crate::config::DistributedCacheSettings {
                enabled: true,
                ..Default::default()
            },
            ..schema_config()
        };
        let err = TenancyOrchestrator::new(
            config,
            Arc::new(MemoryTenantStore::new()),
            Arc::new(MockEngine::new("postgres://localhost/app")),
            Arc::new(MockEngineFactory::new()),
        )
        .unwrap_err();
        assert!(matches!(err, TenancyError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_disposes_engine() {
        let (engine, _, orchestrator) = build(schema_config());
        orchestrator.shutdown().await.unwrap();
        assert!(engine.is_disposed());
    }
}
