//! Row-level security isolation.
//!
//! All tenants share the same tables; the database enforces visibility with
//! policies keyed on a session variable. Sessions set the variable with
//! `set_config(guc, tenant_id, true)`, where the final argument makes the
//! setting transaction-local, and the tenant id travels as a bound parameter
//! rather than interpolated text.
//!
//! Read queries built outside a session additionally get a `tenant_id`
//! predicate through [`IsolationProvider::apply_filters`], so application
//! code stays correct even against tables without a policy.

use crate::config::TenancyConfig;
use crate::engine::{Query, ScopedSession, SqlEngine};
use crate::error::{Result, TenancyError};
use crate::isolation::{IsolationProvider, IsolationStrategy};
use crate::tenant::Tenant;
use crate::validation::assert_safe_namespace;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RlsIsolationProvider {
    config: Arc<TenancyConfig>,
    engine: Arc<dyn SqlEngine>,
}

impl RlsIsolationProvider {
    pub fn new(config: Arc<TenancyConfig>, engine: Arc<dyn SqlEngine>) -> Self {
        Self { config, engine }
    }
}

#[async_trait]
impl IsolationProvider for RlsIsolationProvider {
    fn strategy(&self) -> IsolationStrategy {
        IsolationStrategy::Rls
    }

    async fn acquire(&self, tenant: &Tenant) -> Result<ScopedSession> {
        let mut txn = self.engine.begin().await.map_err(|e| {
            TenancyError::DatabaseConnection {
                tenant_id: tenant.id.to_string(),
                reason: e.to_string(),
            }
        })?;

        let result = txn
            .execute(
                "SELECT set_config($1, $2, true)",
                &[json!(self.config.rls_guc), json!(tenant.id.as_str())],
            )
            .await;
        if let Err(e) = result {
            let _ = txn.rollback().await;
            return Err(TenancyError::isolation(
                "acquire",
                Some(tenant.id.as_str()),
                e.to_string(),
            ));
        }
        debug!(tenant_id = %tenant.id, guc = %self.config.rls_guc, "rls session acquired");
        Ok(ScopedSession::new(txn, tenant.id.clone(), None))
    }

    /// Tables and policies are shared, so there is no per-tenant namespace to
    /// create. Configured bootstrap statements still run once, letting
    /// first-time deployments install tables and policies lazily.
    async fn provision(&self, tenant: &Tenant) -> Result<()> {
        for statement in &self.config.bootstrap_statements {
            self.engine.execute(statement, &[]).await.map_err(|e| {
                TenancyError::isolation("provision", Some(tenant.id.as_str()), e.to_string())
            })?;
        }
        info!(tenant_id = %tenant.id, "rls tenant provisioned (shared tables)");
        Ok(())
    }

    /// With `destroy_data` the tenant's rows are swept from every configured
    /// table in a single transaction. Table names come from operator config,
    /// not user input, but are still validated before interpolation.
    async fn destroy(&self, tenant: &Tenant, destroy_data: bool) -> Result<()> {
        if !destroy_data {
            return Ok(());
        }
        for table in &self.config.tenant_tables {
            assert_safe_namespace(table, "destroy delete rows")?;
        }

        let mut txn = self.engine.begin().await.map_err(|e| {
            TenancyError::DatabaseConnection {
                tenant_id: tenant.id.to_string(),
                reason: e.to_string(),
            }
        })?;
        let run = async {
            for table in &self.config.tenant_tables {
                txn.execute(
                    &format!("DELETE FROM {} WHERE tenant_id = $1", table),
                    &[json!(tenant.id.as_str())],
                )
                .await?;
            }
            Ok::<_, TenancyError>(())
        };
        match run.await {
            Ok(()) => txn.commit().await?,
            Err(e) => {
                let _ = txn.rollback().await;
                return Err(TenancyError::isolation(
                    "destroy",
                    Some(tenant.id.as_str()),
                    e.to_string(),
                ));
            }
        }
        warn!(tenant_id = %tenant.id, tables = self.config.tenant_tables.len(),
            "rls tenant rows destroyed");
        Ok(())
    }

    fn apply_filters(&self, query: Query, tenant: &Tenant) -> Result<Query> {
        Ok(query.with_predicate("tenant_id", json!(tenant.id.as_str())))
    }

    async fn close(&self) -> Result<()> {
        self.engine.dispose().await
    }
}
