//! Fleet-wide schema migrations.
//!
//! The runner walks every active tenant in pages, resolves where that
//! tenant's tables live (shared database, dedicated schema, or dedicated
//! database), and hands each target to a [`MigrationTool`] supplied by the
//! embedder. A semaphore caps how many tenants migrate at once. One tenant's
//! failure never aborts the sweep; it is recorded in that tenant's outcome
//! and the run continues.

use crate::config::TenancyConfig;
use crate::error::{Result, TenancyError};
use crate::isolation::IsolationStrategy;
use crate::store::{ListFilter, TenantStore};
use crate::tenant::{Tenant, TenantId, TenantStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Where one tenant's tables live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTarget {
    pub tenant_id: TenantId,
    /// Connection URL of the database holding the tenant's tables.
    pub url: String,
    /// Schema to migrate within the database, when the strategy uses one.
    pub namespace: Option<String>,
}

/// Embedder-supplied migration executor (alembic-style version table,
/// refinery, sqlx migrate, anything that can move a target to a revision).
#[async_trait]
pub trait MigrationTool: Send + Sync {
    async fn upgrade(&self, target: &MigrationTarget, revision: &str) -> Result<()>;

    async fn downgrade(&self, target: &MigrationTarget, revision: &str) -> Result<()>;
}

/// Per-tenant result of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub tenant_id: TenantId,
    pub identifier: String,
    pub success: bool,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Aggregate result of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub revision: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<MigrationOutcome>,
}

#[derive(Clone, Copy)]
enum Direction {
    Upgrade,
    Downgrade,
}

pub struct MigrationRunner {
    config: Arc<TenancyConfig>,
    store: Arc<dyn TenantStore>,
    tool: Arc<dyn MigrationTool>,
}

impl MigrationRunner {
    pub fn new(
        config: Arc<TenancyConfig>,
        store: Arc<dyn TenantStore>,
        tool: Arc<dyn MigrationTool>,
    ) -> Self {
        Self {
            config,
            store,
            tool,
        }
    }

    /// Resolve the migration target for one tenant from its effective
    /// isolation strategy.
    pub fn target_for(&self, tenant: &Tenant) -> Result<MigrationTarget> {
        let target = match self.config.strategy_for(tenant) {
            IsolationStrategy::Schema => MigrationTarget {
                tenant_id: tenant.id.clone(),
                url: self.config.database_url.clone(),
                namespace: Some(self.config.schema_name_for(&tenant.identifier)?),
            },
            IsolationStrategy::Database => MigrationTarget {
                tenant_id: tenant.id.clone(),
                url: self.config.database_url_for(tenant)?,
                namespace: None,
            },
            IsolationStrategy::Rls => MigrationTarget {
                tenant_id: tenant.id.clone(),
                url: self.config.database_url.clone(),
                namespace: None,
            },
            // strategy_for resolves hybrid tier routing; this is only
            // reachable through a bogus per-tenant override.
            IsolationStrategy::Hybrid => {
                return Err(TenancyError::isolation(
                    "migrate",
                    Some(tenant.id.as_str()),
                    "hybrid is not a concrete migration target".to_string(),
                ));
            }
        };
        Ok(target)
    }

    /// Migrate a single tenant to `revision`.
    pub async fn upgrade_one(&self, tenant: &Tenant, revision: &str) -> MigrationOutcome {
        self.run_one(tenant, revision, Direction::Upgrade).await
    }

    /// Migrate every active tenant to `revision`.
    pub async fn upgrade_all(&self, revision: &str) -> Result<MigrationReport> {
        self.run_all(revision, Direction::Upgrade).await
    }

    /// Roll every active tenant back to `revision`.
    pub async fn downgrade_all(&self, revision: &str) -> Result<MigrationReport> {
        self.run_all(revision, Direction::Downgrade).await
    }

    async fn run_one(
        &self,
        tenant: &Tenant,
        revision: &str,
        direction: Direction,
    ) -> MigrationOutcome {
        let result = match self.target_for(tenant) {
            Ok(target) => match direction {
                Direction::Upgrade => self.tool.upgrade(&target, revision).await,
                Direction::Downgrade => self.tool.downgrade(&target, revision).await,
            },
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                info!(tenant_id = %tenant.id, revision, "tenant migrated");
                MigrationOutcome {
                    tenant_id: tenant.id.clone(),
                    identifier: tenant.identifier.clone(),
                    success: true,
                    error: None,
                    finished_at: Utc::now(),
                }
            }
            Err(e) => {
                let wrapped = TenancyError::Migration {
                    tenant_id: tenant.id.to_string(),
                    operation: match direction {
                        Direction::Upgrade => "upgrade".to_string(),
                        Direction::Downgrade => "downgrade".to_string(),
                    },
                    reason: e.to_string(),
                };
                error!(tenant_id = %tenant.id, revision, error = %wrapped, "tenant migration failed");
                MigrationOutcome {
                    tenant_id: tenant.id.clone(),
                    identifier: tenant.identifier.clone(),
                    success: false,
                    error: Some(wrapped.to_string()),
                    finished_at: Utc::now(),
                }
            }
        }
    }

    async fn run_all(&self, revision: &str, direction: Direction) -> Result<MigrationReport> {
        let page_size = self.config.migration.page_size.max(1);
        let semaphore = Arc::new(Semaphore::new(self.config.migration.concurrency.max(1)));

        let mut outcomes = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .list(ListFilter::with_status(TenantStatus::Active).page(offset, page_size))
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();

            let batch = page.iter().map(|tenant| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    // Semaphore is never closed while we hold it.
                    let _permit = semaphore.acquire().await;
                    self.run_one(tenant, revision, direction).await
                }
            });
            outcomes.extend(join_all(batch).await);
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let failed = outcomes.len() - succeeded;
        if failed > 0 {
            warn!(revision, failed, total = outcomes.len(), "migration sweep finished with failures");
        } else {
            info!(revision, total = outcomes.len(), "migration sweep finished");
        }
        Ok(MigrationReport {
            revision: revision.to_string(),
            total: outcomes.len(),
            succeeded,
            failed,
            outcomes,
        })
    }
}
