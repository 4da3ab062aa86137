//! Database-per-tenant isolation.
//!
//! Each tenant maps to a full connection target derived from the configured
//! URL template. Engines are created lazily and held in an [`EngineCache`]
//! bounded by `engine_cache_size`; provisioning issues `CREATE DATABASE`
//! against the administrative engine and bootstrap DDL against the tenant's
//! own engine. `destroy` disposes the cached engine before dropping the
//! database so no pooled connection pins it.

use crate::config::TenancyConfig;
use crate::engine::{EngineFactory, ScopedSession, SqlEngine};
use crate::engine_cache::EngineCache;
use crate::error::{Result, TenancyError};
use crate::isolation::{IsolationProvider, IsolationStrategy};
use crate::tenant::Tenant;
use crate::validation::assert_safe_namespace;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DatabaseIsolationProvider {
    config: Arc<TenancyConfig>,
    admin_engine: Arc<dyn SqlEngine>,
    engines: EngineCache,
}

impl DatabaseIsolationProvider {
    pub fn new(
        config: Arc<TenancyConfig>,
        admin_engine: Arc<dyn SqlEngine>,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        let engines = EngineCache::new(config.engine_cache_size, factory);
        Self {
            config,
            admin_engine,
            engines,
        }
    }

    /// The engine cache, exposed for monitoring.
    pub fn engine_cache(&self) -> &EngineCache {
        &self.engines
    }

    async fn tenant_engine(&self, tenant: &Tenant) -> Result<Arc<dyn SqlEngine>> {
        let url = self.config.database_url_for(tenant)?;
        self.engines.get_or_create(&tenant.id, &url).await
    }
}

#[async_trait]
impl IsolationProvider for DatabaseIsolationProvider {
    fn strategy(&self) -> IsolationStrategy {
        IsolationStrategy::Database
    }

    async fn acquire(&self, tenant: &Tenant) -> Result<ScopedSession> {
        let database = self.config.database_name_for(&tenant.identifier)?;
        let engine = self.tenant_engine(tenant).await?;
        let txn = engine.begin().await.map_err(|e| {
            TenancyError::DatabaseConnection {
                tenant_id: tenant.id.to_string(),
                reason: e.to_string(),
            }
        })?;
        debug!(tenant_id = %tenant.id, database = %database, "database session acquired");
        Ok(ScopedSession::new(txn, tenant.id.clone(), Some(database)))
    }

    async fn provision(&self, tenant: &Tenant) -> Result<()> {
        let database = self.config.database_name_for(&tenant.identifier)?;
        assert_safe_namespace(&database, "provision create database")?;

        self.admin_engine
            .execute(&format!("CREATE DATABASE \"{}\"", database), &[])
            .await
            .map_err(|e| {
                TenancyError::isolation("provision", Some(tenant.id.as_str()), e.to_string())
            })?;

        if !self.config.bootstrap_statements.is_empty() {
            if let Err(e) = self.bootstrap(tenant).await {
                // Drop the half-provisioned database so a retry starts clean.
                self.engines.remove(&tenant.id).await;
                assert_safe_namespace(&database, "provision cleanup")?;
                if let Err(cleanup) = self
                    .admin_engine
                    .execute(&format!("DROP DATABASE IF EXISTS \"{}\"", database), &[])
                    .await
                {
                    warn!(tenant_id = %tenant.id, database = %database, error = %cleanup,
                        "cleanup after failed provisioning also failed");
                }
                return Err(TenancyError::isolation(
                    "provision",
                    Some(tenant.id.as_str()),
                    e.to_string(),
                ));
            }
        }
        info!(tenant_id = %tenant.id, database = %database, "database provisioned");
        Ok(())
    }

    async fn destroy(&self, tenant: &Tenant, destroy_data: bool) -> Result<()> {
        // Dispose the cached engine first: dropping a database with live
        // pooled connections fails on most engines.
        self.engines.remove(&tenant.id).await;
        if !destroy_data {
            return Ok(());
        }
        let database = self.config.database_name_for(&tenant.identifier)?;
        assert_safe_namespace(&database, "destroy drop database")?;
        self.admin_engine
            .execute(&format!("DROP DATABASE IF EXISTS \"{}\"", database), &[])
            .await
            .map_err(|e| {
                TenancyError::isolation("destroy", Some(tenant.id.as_str()), e.to_string())
            })?;
        warn!(tenant_id = %tenant.id, database = %database, "database destroyed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.engines.dispose_all().await;
        self.admin_engine.dispose().await
    }
}

impl DatabaseIsolationProvider {
    async fn bootstrap(&self, tenant: &Tenant) -> Result<()> {
        let engine = self.tenant_engine(tenant).await?;
        let mut txn = engine.begin().await?;
        let run = async {
            for statement in &self.config.bootstrap_statements {
                txn.execute(statement, &[]).await?;
            }
            Ok::<_, TenancyError>(())
        };
        match run.await {
            Ok(()) => txn.commit().await,
            Err(e) => {
                let _ = txn.rollback().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{MockEngine, MockEngineFactory};
    use crate::tenant::TenantStatus;

    fn config() -> Arc<TenancyConfig> {
        Arc::new(TenancyConfig {
            isolation_strategy: IsolationStrategy::Database,
            database_url: "postgres://admin@db/postgres".to_string(),
            database_url_template: Some("postgres://db/{database_name}".to_string()),
            bootstrap_statements: vec!["CREATE TABLE items (id bigint)".to_string()],
            ..TenancyConfig::default()
        })
    }

    fn tenant() -> Tenant {
        Tenant::new("acme-corp", "Acme")
            .unwrap()
            .with_status(TenantStatus::Active)
    }

    #[tokio::test]
    async fn test_acquire_uses_cached_tenant_engine() {
        let admin = Arc::new(MockEngine::new("postgres://admin"));
        let factory = Arc::new(MockEngineFactory::new());
        let provider = DatabaseIsolationProvider::new(config(), admin, factory.clone());
        let tenant = tenant();

        let s1 = provider.acquire(&tenant).await.unwrap();
        assert_eq!(s1.namespace(), Some("tenant_acme_corp_db"));
        s1.rollback().await.unwrap();
        let s2 = provider.acquire(&tenant).await.unwrap();
        s2.rollback().await.unwrap();

        assert_eq!(factory.created_count(), 1);
        let engines = factory.engines.lock().await;
        assert_eq!(engines[0].0, "postgres://db/tenant_acme_corp_db");
    }

    #[tokio::test]
    async fn test_provision_creates_database_and_bootstraps() {
        let admin = Arc::new(MockEngine::new("postgres://admin"));
        let factory = Arc::new(MockEngineFactory::new());
        let provider = DatabaseIsolationProvider::new(config(), admin.clone(), factory.clone());

        provider.provision(&tenant()).await.unwrap();

        assert_eq!(
            admin.statements().await,
            vec!["admin: CREATE DATABASE \"tenant_acme_corp_db\""]
        );
        let engines = factory.engines.lock().await;
        let (_, tenant_engine) = &engines[0];
        let log = tenant_engine.statements().await;
        assert!(log.contains(&"txn: CREATE TABLE items (id bigint)".to_string()));
        assert!(log.contains(&"commit".to_string()));
    }

    #[tokio::test]
    async fn test_provision_failure_surfaces_isolation_error() {
        let admin = Arc::new(MockEngine::failing_on("postgres://admin", "CREATE DATABASE"));
        let factory = Arc::new(MockEngineFactory::new());
        let provider = DatabaseIsolationProvider::new(config(), admin, factory);

        let err = provider.provision(&tenant()).await.unwrap_err();
        assert!(matches!(err, TenancyError::Isolation { .. }));
    }

    #[tokio::test]
    async fn test_destroy_disposes_engine_before_drop() {
        let admin = Arc::new(MockEngine::new("postgres://admin"));
        let factory = Arc::new(MockEngineFactory::new());
        let provider = DatabaseIsolationProvider::new(config(), admin.clone(), factory.clone());
        let tenant = tenant();

        provider.acquire(&tenant).await.unwrap().rollback().await.unwrap();
        provider.destroy(&tenant, true).await.unwrap();

        let engines = factory.engines.lock().await;
        assert!(engines[0].1.is_disposed());
        assert_eq!(
            admin.statements().await,
            vec!["admin: DROP DATABASE IF EXISTS \"tenant_acme_corp_db\""]
        );
        assert!(!provider.engine_cache().contains(&tenant.id).await);
    }

    #[tokio::test]
    async fn test_destroy_without_data_only_releases_engine() {
        let admin = Arc::new(MockEngine::new("postgres://admin"));
        let factory = Arc::new(MockEngineFactory::new());
        let provider = DatabaseIsolationProvider::new(config(), admin.clone(), factory);
        let tenant = tenant();

        provider.acquire(&tenant).await.unwrap().rollback().await.unwrap();
        provider.destroy(&tenant, false).await.unwrap();

        assert!(admin.statements().await.is_empty());
        assert!(!provider.engine_cache().contains(&tenant.id).await);
    }
}
