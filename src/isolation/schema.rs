//! Schema-per-tenant isolation.
//!
//! Each tenant owns one schema named `<prefix><sanitized slug>`. Sessions
//! select it with `SET LOCAL search_path`, which is transaction-scoped: the
//! setting reverts at commit or rollback, so a pooled connection never
//! carries the previous tenant's search path.
//!
//! Schema names cannot be bound as statement parameters, so every statement
//! that interpolates one is preceded by [`assert_safe_namespace`]. The check
//! runs immediately before each statement, not just at provisioning time.

use crate::config::TenancyConfig;
use crate::engine::{ScopedSession, SqlEngine};
use crate::error::{Result, TenancyError};
use crate::isolation::{IsolationProvider, IsolationStrategy};
use crate::tenant::Tenant;
use crate::validation::assert_safe_namespace;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SchemaIsolationProvider {
    config: Arc<TenancyConfig>,
    engine: Arc<dyn SqlEngine>,
}

impl SchemaIsolationProvider {
    pub fn new(config: Arc<TenancyConfig>, engine: Arc<dyn SqlEngine>) -> Self {
        Self { config, engine }
    }

    fn schema_for(&self, tenant: &Tenant) -> Result<String> {
        self.config.schema_name_for(&tenant.identifier)
    }
}

#[async_trait]
impl IsolationProvider for SchemaIsolationProvider {
    fn strategy(&self) -> IsolationStrategy {
        IsolationStrategy::Schema
    }

    async fn acquire(&self, tenant: &Tenant) -> Result<ScopedSession> {
        let schema = self.schema_for(tenant)?;
        assert_safe_namespace(&schema, "acquire search_path")?;

        let mut txn = self.engine.begin().await.map_err(|e| {
            TenancyError::DatabaseConnection {
                tenant_id: tenant.id.to_string(),
                reason: e.to_string(),
            }
        })?;

        let statement = format!(
            "SET LOCAL search_path TO \"{}\", {}",
            schema, self.config.public_schema
        );
        if let Err(e) = txn.execute(&statement, &[]).await {
            let _ = txn.rollback().await;
            return Err(TenancyError::isolation(
                "acquire",
                Some(tenant.id.as_str()),
                e.to_string(),
            ));
        }
        debug!(tenant_id = %tenant.id, schema = %schema, "schema session acquired");
        Ok(ScopedSession::new(txn, tenant.id.clone(), Some(schema)))
    }

    async fn provision(&self, tenant: &Tenant) -> Result<()> {
        let schema = self.schema_for(tenant)?;
        assert_safe_namespace(&schema, "provision create schema")?;

        self.engine
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema), &[])
            .await
            .map_err(|e| {
                TenancyError::isolation("provision", Some(tenant.id.as_str()), e.to_string())
            })?;

        if !self.config.bootstrap_statements.is_empty() {
            if let Err(e) = self.bootstrap(&schema).await {
                // Half-provisioned schemas are dropped so a retry starts
                // clean; the tenant's row stays non-active either way.
                assert_safe_namespace(&schema, "provision cleanup")?;
                if let Err(cleanup) = self
                    .engine
                    .execute(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema), &[])
                    .await
                {
                    warn!(tenant_id = %tenant.id, schema = %schema, error = %cleanup,
                        "cleanup after failed provisioning also failed");
                }
                return Err(TenancyError::isolation(
                    "provision",
                    Some(tenant.id.as_str()),
                    e.to_string(),
                ));
            }
        }
        info!(tenant_id = %tenant.id, schema = %schema, "schema provisioned");
        Ok(())
    }

    async fn destroy(&self, tenant: &Tenant, destroy_data: bool) -> Result<()> {
        if !destroy_data {
            return Ok(());
        }
        let schema = self.schema_for(tenant)?;
        assert_safe_namespace(&schema, "destroy drop schema")?;
        self.engine
            .execute(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema), &[])
            .await
            .map_err(|e| {
                TenancyError::isolation("destroy", Some(tenant.id.as_str()), e.to_string())
            })?;
        warn!(tenant_id = %tenant.id, schema = %schema, "schema destroyed");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.engine.dispose().await
    }
}

impl SchemaIsolationProvider {
    /// Run the configured bootstrap DDL inside the fresh schema, in one
    /// transaction with the search path set locally.
    async fn bootstrap(&self, schema: &str) -> Result<()> {
        assert_safe_namespace(schema, "provision bootstrap search_path")?;
        let mut txn = self.engine.begin().await?;
        let set_path = format!(
            "SET LOCAL search_path TO \"{}\", {}",
            schema, self.config.public_schema
        );
        let run = async {
            txn.execute(&set_path, &[]).await?;
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
