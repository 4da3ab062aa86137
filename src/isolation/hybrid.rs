//! Two-tier hybrid isolation.
//!
//! Premium tenants get a stronger (and costlier) strategy, everyone else a
//! cheaper shared one; both inner providers are built at startup and share
//! the same administrative engine. Routing order per tenant:
//!
//! 1. an explicit per-tenant strategy override, which must name one of the
//!    two configured inner strategies;
//! 2. membership in `premium_tenants` (by slug or id);
//! 3. the standard tier.

use crate::config::TenancyConfig;
use crate::engine::{EngineFactory, Query, ScopedSession, SqlEngine};
use crate::error::{Result, TenancyError};
use crate::isolation::{build_inner, IsolationProvider, IsolationStrategy};
use crate::tenant::Tenant;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

impl std::fmt::Debug for HybridIsolationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridIsolationProvider")
            .field("premium_strategy", &self.premium_strategy)
            .field("standard_strategy", &self.standard_strategy)
            .finish_non_exhaustive()
    }
}

pub struct HybridIsolationProvider {
    premium_strategy: IsolationStrategy,
    standard_strategy: IsolationStrategy,
    premium: Arc<dyn IsolationProvider>,
    standard: Arc<dyn IsolationProvider>,
    config: Arc<TenancyConfig>,
}

impl HybridIsolationProvider {
    pub fn new(
        config: Arc<TenancyConfig>,
        engine: Arc<dyn SqlEngine>,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        let premium_strategy = config.premium_isolation_strategy;
        let standard_strategy = config.standard_isolation_strategy;
        if premium_strategy == standard_strategy {
            return Err(TenancyError::InvalidConfig {
                field: "premium_isolation_strategy".to_string(),
                reason: "hybrid tiers must use two different strategies".to_string(),
            });
        }
        // build_inner rejects Hybrid, so tiers cannot nest.
        let premium = build_inner(
            premium_strategy,
            Arc::clone(&config),
            Arc::clone(&engine),
            Arc::clone(&factory),
        )?;
        let standard = build_inner(standard_strategy, Arc::clone(&config), engine, factory)?;
        Ok(Self {
            premium_strategy,
            standard_strategy,
            premium,
            standard,
            config,
        })
    }

    /// Pick the inner provider serving this tenant.
    pub fn provider_for(&self, tenant: &Tenant) -> Result<&Arc<dyn IsolationProvider>> {
        if let Some(requested) = tenant.isolation_strategy {
            return if requested == self.premium_strategy {
                Ok(&self.premium)
            } else if requested == self.standard_strategy {
                Ok(&self.standard)
            } else {
                Err(TenancyError::isolation(
                    "route",
                    Some(tenant.id.as_str()),
                    format!(
                        "tenant requests {} isolation but hybrid tiers are {} and {}",
                        requested, self.premium_strategy, self.standard_strategy
                    ),
                ))
            };
        }
        if self.config.is_premium(tenant) {
            debug!(tenant_id = %tenant.id, strategy = %self.premium_strategy, "premium tier");
            Ok(&self.premium)
        } else {
            Ok(&self.standard)
        }
    }
}

#[async_trait]
impl IsolationProvider for HybridIsolationProvider {
    fn strategy(&self) -> IsolationStrategy {
        IsolationStrategy::Hybrid
    }

    async fn acquire(&self, tenant: &Tenant) -> Result<ScopedSession> {
        self.provider_for(tenant)?.acquire(tenant).await
    }

    async fn provision(&self, tenant: &Tenant) -> Result<()> {
        self.provider_for(tenant)?.provision(tenant).await
    }

    async fn destroy(&self, tenant: &Tenant, destroy_data: bool) -> Result<()> {
        self.provider_for(tenant)?.destroy(tenant, destroy_data).await
    }

    fn apply_filters(&self, query: Query, tenant: &Tenant) -> Result<Query> {
        self.provider_for(tenant)?.apply_filters(query, tenant)
    }

    async fn close(&self) -> Result<()> {
        // Both inners may share one engine; dispose is idempotent.
        self.premium.close().await?;
        self.standard.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{MockEngine, MockEngineFactory};
    use crate::tenant::TenantStatus;
    use serde_json::json;

    fn config(premium: Vec<&str>) -> Arc<TenancyConfig> {
        Arc::new(TenancyConfig {
            isolation_strategy: IsolationStrategy::Hybrid,
            database_url: "postgres://localhost/app".to_string(),
            premium_tenants: premium.into_iter().map(String::from).collect(),
            premium_isolation_strategy: IsolationStrategy::Schema,
            standard_isolation_strategy: IsolationStrategy::Rls,
            ..TenancyConfig::default()
        })
    }

    fn provider(premium: Vec<&str>) -> (Arc<MockEngine>, HybridIsolationProvider) {
        let engine = Arc::new(MockEngine::new("postgres://localhost/app"));
        let factory = Arc::new(MockEngineFactory::new());
        let provider =
            HybridIsolationProvider::new(config(premium), engine.clone(), factory).unwrap();
        (engine, provider)
    }

    fn tenant(identifier: &str) -> Tenant {
        Tenant::new(identifier, identifier)
            .unwrap()
            .with_status(TenantStatus::Active)
    }

    #[tokio::test]
    async fn test_premium_tenant_gets_schema_isolation() {
        let (engine, provider) = provider(vec!["acme-corp"]);
        let session = provider.acquire(&tenant("acme-corp")).await.unwrap();
        assert_eq!(session.namespace(), Some("tenant_acme_corp"));
        session.rollback().await.unwrap();

        let log = engine.statements().await;
        assert!(log[1].contains("SET LOCAL search_path"));
    }

    #[tokio::test]
    async fn test_standard_tenant_gets_rls_isolation() {
        let (engine, provider) = provider(vec!["acme-corp"]);
        let session = provider.acquire(&tenant("small-shop")).await.unwrap();
        assert_eq!(session.namespace(), None);
        session.rollback().await.unwrap();

        let log = engine.statements().await;
        assert!(log[1].contains("set_config"));
    }

    #[tokio::test]
    async fn test_per_tenant_override_takes_precedence() {
        let (_, provider) = provider(vec!["acme-corp"]);
        // Premium by list, but overridden down to the standard tier.
        let downgraded = tenant("acme-corp").with_isolation_strategy(IsolationStrategy::Rls);
        assert_eq!(
            provider.provider_for(&downgraded).unwrap().strategy(),
            IsolationStrategy::Rls
        );
    }

    #[tokio::test]
    async fn test_override_outside_tiers_is_rejected() {
        let (_, provider) = provider(vec![]);
        let odd = tenant("small-shop").with_isolation_strategy(IsolationStrategy::Database);
        let err = provider.provider_for(&odd).unwrap_err();
        assert!(matches!(err, TenancyError::Isolation { .. }));
    }

    #[tokio::test]
    async fn test_identical_tiers_are_rejected() {
        let config = Arc::new(TenancyConfig {
            isolation_strategy: IsolationStrategy::Hybrid,
            database_url: "postgres://localhost/app".to_string(),
            premium_isolation_strategy: IsolationStrategy::Rls,
            standard_isolation_strategy: IsolationStrategy::Rls,
            ..TenancyConfig::default()
        });
        let engine = Arc::new(MockEngine::new("postgres://localhost/app"));
        let factory = Arc::new(MockEngineFactory::new());
        let err = HybridIsolationProvider::new(config, engine, factory).unwrap_err();
        assert!(matches!(err, TenancyError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_apply_filters_follows_tier() {
        let (_, provider) = provider(vec!["acme-corp"]);

        let premium = tenant("acme-corp");
        let q = Query::new("SELECT * FROM documents");
        assert_eq!(
            provider.apply_filters(q.clone(), &premium).unwrap(),
            q,
            "schema tier passes queries through"
        );

        let standard = tenant("small-shop");
        let filtered = provider.apply_filters(q, &standard).unwrap();
        assert_eq!(
            filtered.predicates(),
            &[("tenant_id".to_string(), json!(standard.id.as_str()))]
        );
    }
}
