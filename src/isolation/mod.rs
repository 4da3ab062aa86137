//! Data isolation strategies.
//!
//! Four strategies separate tenant data:
//!
//! - **Schema**: one schema per tenant in a shared database.
//! - **Database**: one database per tenant, engines cached per tenant.
//! - **Rls**: shared tables with row-level security on a session variable.
//! - **Hybrid**: routes each tenant to one of two inner strategies by tier.
//!
//! Every provider hands out a [`ScopedSession`] whose isolation setting is
//! transaction-scoped, never session-wide, so a pooled connection returned
//! after commit or rollback carries no tenant state.

pub mod database;
pub mod hybrid;
pub mod rls;
pub mod schema;

pub use database::DatabaseIsolationProvider;
pub use hybrid::HybridIsolationProvider;
pub use rls::RlsIsolationProvider;
pub use schema::SchemaIsolationProvider;

use crate::config::TenancyConfig;
use crate::engine::{EngineFactory, Query, ScopedSession, SqlEngine};
use crate::error::{Result, TenancyError};
use crate::tenant::Tenant;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Mechanism separating tenant data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// Dedicated schema per tenant.
    Schema,
    /// Dedicated database per tenant.
    Database,
    /// Shared tables, row-level security.
    Rls,
    /// Two-tier mix of the above.
    Hybrid,
}

impl fmt::Display for IsolationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IsolationStrategy::Schema => "schema",
            IsolationStrategy::Database => "database",
            IsolationStrategy::Rls => "rls",
            IsolationStrategy::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// A strategy's operational surface.
///
/// `acquire` yields a session scoped to the tenant's namespace; `provision`
/// and `destroy` manage the namespace lifecycle. A `provision` failure must
/// leave the tenant's metadata row non-active so callers can retry or alert.
/// Engine disposal performed by `close` must be idempotent: hybrid providers
/// share one engine between their inner providers.
#[async_trait]
pub trait IsolationProvider: Send + Sync {
    fn strategy(&self) -> IsolationStrategy;

    /// Open a transactional session scoped to the tenant's namespace.
    async fn acquire(&self, tenant: &Tenant) -> Result<ScopedSession>;

    /// Create the tenant's namespace and bootstrap its tables.
    async fn provision(&self, tenant: &Tenant) -> Result<()>;

    /// Tear down the tenant's namespace. With `destroy_data` false only
    /// cached resources are released; data is left in place.
    async fn destroy(&self, tenant: &Tenant, destroy_data: bool) -> Result<()>;

    /// Append tenant predicates to a read query. Identity for strategies
    /// whose namespace already separates data physically.
    fn apply_filters(&self, query: Query, _tenant: &Tenant) -> Result<Query> {
        Ok(query)
    }

    /// Release engines and pooled connections.
    async fn close(&self) -> Result<()>;
}

impl fmt::Debug for dyn IsolationProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationProvider")
            .field("strategy", &self.strategy())
            .finish()
    }
}

/// Build the provider for the configured global strategy.
///
/// `engine` is the shared/administrative engine; `factory` is consulted only
/// by database isolation for per-tenant engines.
pub fn build_provider(
    config: Arc<TenancyConfig>,
    engine: Arc<dyn SqlEngine>,
    factory: Arc<dyn EngineFactory>,
) -> Result<Arc<dyn IsolationProvider>> {
    match config.isolation_strategy {
        IsolationStrategy::Hybrid => Ok(Arc::new(HybridIsolationProvider::new(
            config, engine, factory,
        )?)),
        strategy => build_inner(strategy, config, engine, factory),
    }
}

/// Build a non-hybrid provider. Rejects `Hybrid` so hybrids cannot nest.
pub(crate) fn build_inner(
    strategy: IsolationStrategy,
    config: Arc<TenancyConfig>,
    engine: Arc<dyn SqlEngine>,
    factory: Arc<dyn EngineFactory>,
) -> Result<Arc<dyn IsolationProvider>> {
    match strategy {
        IsolationStrategy::Schema => Ok(Arc::new(SchemaIsolationProvider::new(config, engine))),
        IsolationStrategy::Rls => Ok(Arc::new(RlsIsolationProvider::new(config, engine))),
        IsolationStrategy::Database => Ok(Arc::new(DatabaseIsolationProvider::new(
            config, engine, factory,
        ))),
        IsolationStrategy::Hybrid => Err(TenancyError::InvalidConfig {
            field: "isolation_strategy".to_string(),
            reason: "hybrid cannot be used as an inner strategy".to_string(),
        }),
    }
}
