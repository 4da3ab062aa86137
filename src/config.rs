//! Configuration for the tenancy engine.
//!
//! [`TenancyConfig`] is an immutable value validated once at construction;
//! invalid combinations (hybrid with identical inner strategies, database
//! isolation without a URL template) are rejected before any component is
//! built.

use crate::error::{Result, TenancyError};
use crate::isolation::IsolationStrategy;
use crate::tenant::{Tenant, TenantStatus};
use crate::validation::{
    assert_safe_namespace, is_safe_namespace_name, sanitize_identifier,
    validate_tenant_identifier,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Global isolation strategy; tenants may carry an override.
    pub isolation_strategy: IsolationStrategy,
    /// Connection URL of the shared/administrative database.
    pub database_url: String,
    /// Per-tenant URL template for database isolation. Supports
    /// `{tenant_id}` and `{database_name}` placeholders.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub database_url_template: Option<String>,
    /// Prefix applied to tenant schema names.
    pub schema_prefix: String,
    /// Shared schema kept on the search path behind the tenant schema.
    pub public_schema: String,
    /// Session variable consulted by row-level-security policies.
    pub rls_guc: String,
    /// DDL executed inside a fresh namespace at provisioning time.
    #[serde(default)]
    pub bootstrap_statements: Vec<String>,
    /// Tenant-scoped tables swept on RLS destroy.
    #[serde(default)]
    pub tenant_tables: Vec<String>,

    pub cache: CacheSettings,
    pub distributed_cache: DistributedCacheSettings,
    /// Maximum number of concurrently cached tenant engines.
    pub engine_cache_size: usize,
    pub rate_limit: RateLimitSettings,
    pub migration: MigrationSettings,

    /// Tenants (by slug or ID) routed to the premium inner strategy under
    /// hybrid isolation.
    #[serde(default)]
    pub premium_tenants: Vec<String>,
    pub premium_isolation_strategy: IsolationStrategy,
    pub standard_isolation_strategy: IsolationStrategy,

    pub enable_soft_delete: bool,
    pub enable_audit_logging: bool,
    /// In-memory audit ring capacity.
    pub audit_capacity: usize,
    /// Status assigned to freshly registered tenants.
    pub default_tenant_status: TenantStatus,
    /// Registration quota; `None` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_tenants: Option<usize>,
}

/// In-process tenant cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_size: usize,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Write-through distributed cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedCacheSettings {
    pub enabled: bool,
    pub key_prefix: String,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for DistributedCacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            key_prefix: "tenant".to_string(),
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Sliding-window rate limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Admissions per window per tenant.
    pub limit: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Fleet migration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Maximum migrations in flight at once.
    pub concurrency: usize,
    /// Tenants fetched from the store per page.
    pub page_size: usize,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            page_size: 100,
        }
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            isolation_strategy: IsolationStrategy::Schema,
            database_url: String::new(),
            database_url_template: None,
            schema_prefix: "tenant_".to_string(),
            public_schema: "public".to_string(),
            rls_guc: "app.current_tenant".to_string(),
            bootstrap_statements: Vec::new(),
            tenant_tables: Vec::new(),
            cache: CacheSettings::default(),
            distributed_cache: DistributedCacheSettings::default(),
            engine_cache_size: 50,
            rate_limit: RateLimitSettings::default(),
            migration: MigrationSettings::default(),
            premium_tenants: Vec::new(),
            premium_isolation_strategy: IsolationStrategy::Schema,
            standard_isolation_strategy: IsolationStrategy::Rls,
            enable_soft_delete: false,
            enable_audit_logging: true,
            audit_capacity: 10_000,
            default_tenant_status: TenantStatus::Provisioning,
            max_tenants: None,
        }
    }
}

impl TenancyConfig {
    /// Load and validate configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TenancyError::Config(format!("failed to read config file: {}", e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| TenancyError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal local-development preset: schema isolation, small caches.
    pub fn development(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            cache: CacheSettings {
                enabled: true,
                max_size: 100,
                ttl: Duration::from_secs(30),
            },
            engine_cache_size: 10,
            ..Self::default()
        }
    }

    /// Hardened preset: hybrid isolation, soft delete, tight rate limit.
    pub fn strict(database_url: impl Into<String>) -> Self {
        Self {
            isolation_strategy: IsolationStrategy::Hybrid,
            database_url: database_url.into(),
            rate_limit: RateLimitSettings {
                enabled: true,
                limit: 60,
                window: Duration::from_secs(60),
            },
            enable_soft_delete: true,
            ..Self::default()
        }
    }

    /// Validate cross-field consistency. Must be called before wiring any
    /// component; [`crate::orchestrator::TenancyOrchestrator`] does so.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(TenancyError::InvalidConfig {
                field: "database_url".to_string(),
                reason: "database URL must not be empty".to_string(),
            });
        }
        if !is_safe_namespace_name(&self.schema_prefix) {
            return Err(TenancyError::InvalidConfig {
                field: "schema_prefix".to_string(),
                reason: format!(
                    "{:?} is not a safe identifier fragment (lowercase letters, digits, underscores)",
                    self.schema_prefix
                ),
            });
        }
        if self.isolation_strategy == IsolationStrategy::Hybrid {
            if self.premium_isolation_strategy == self.standard_isolation_strategy {
                return Err(TenancyError::InvalidConfig {
                    field: "standard_isolation_strategy".to_string(),
                    reason: "hybrid isolation requires two different inner strategies"
                        .to_string(),
                });
            }
            for (field, inner) in [
                ("premium_isolation_strategy", self.premium_isolation_strategy),
                ("standard_isolation_strategy", self.standard_isolation_strategy),
            ] {
                if inner == IsolationStrategy::Hybrid {
                    return Err(TenancyError::InvalidConfig {
                        field: field.to_string(),
                        reason: "hybrid cannot be nested inside hybrid".to_string(),
                    });
                }
            }
        }
        if self.requires_url_template() && self.database_url_template.is_none() {
            return Err(TenancyError::InvalidConfig {
                field: "database_url_template".to_string(),
                reason: "database isolation requires a per-tenant URL template".to_string(),
            });
        }
        if self.rate_limit.enabled && self.rate_limit.limit == 0 {
            return Err(TenancyError::InvalidConfig {
                field: "rate_limit.limit".to_string(),
                reason: "rate limit must be non-zero when enabled".to_string(),
            });
        }
        if self.engine_cache_size == 0 {
            return Err(TenancyError::InvalidConfig {
                field: "engine_cache_size".to_string(),
                reason: "engine cache size must be at least 1".to_string(),
            });
        }
        if self.migration.concurrency == 0 {
            return Err(TenancyError::InvalidConfig {
                field: "migration.concurrency".to_string(),
                reason: "migration concurrency must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn requires_url_template(&self) -> bool {
        self.isolation_strategy == IsolationStrategy::Database
            || (self.isolation_strategy == IsolationStrategy::Hybrid
                && (self.premium_isolation_strategy == IsolationStrategy::Database
                    || self.standard_isolation_strategy == IsolationStrategy::Database))
    }

    /// Derive the schema name for a tenant slug: `<prefix><sanitized slug>`.
    ///
    /// `"acme-corp"` with prefix `"tenant_"` yields `"tenant_acme_corp"`.
    pub fn schema_name_for(&self, identifier: &str) -> Result<String> {
        validate_tenant_identifier(identifier)?;
        let name = format!("{}{}", self.schema_prefix, sanitize_identifier(identifier));
        assert_safe_namespace(&name, "derived schema name")?;
        Ok(name)
    }

    /// Derive the database name for a tenant slug: `tenant_<slug>_db`.
    pub fn database_name_for(&self, identifier: &str) -> Result<String> {
        validate_tenant_identifier(identifier)?;
        let name = format!("tenant_{}_db", sanitize_identifier(identifier));
        assert_safe_namespace(&name, "derived database name")?;
        Ok(name)
    }

    /// Expand the URL template for a tenant.
    pub fn database_url_for(&self, tenant: &Tenant) -> Result<String> {
        let template = self.database_url_template.as_ref().ok_or_else(|| {
            TenancyError::InvalidConfig {
                field: "database_url_template".to_string(),
                reason: "no URL template configured".to_string(),
            }
        })?;
        let database_name = self.database_name_for(&tenant.identifier)?;
        Ok(template
            .replace("{tenant_id}", tenant.id.as_str())
            .replace("{database_name}", &database_name))
    }

    /// Whether a tenant belongs to the premium tier (matched by slug or ID).
    pub fn is_premium(&self, tenant: &Tenant) -> bool {
        self.premium_tenants
            .iter()
            .any(|p| p == &tenant.identifier || p == tenant.id.as_str())
    }

    /// Effective isolation strategy for a tenant: per-tenant override first,
    /// then hybrid tier routing, then the global strategy.
    pub fn strategy_for(&self, tenant: &Tenant) -> IsolationStrategy {
        if let Some(strategy) = tenant.isolation_strategy {
            return strategy;
        }
        if self.isolation_strategy == IsolationStrategy::Hybrid {
            if self.is_premium(tenant) {
                self.premium_isolation_strategy
            } else {
                self.standard_isolation_strategy
            }
        } else {
            self.isolation_strategy
        }
    }
}
