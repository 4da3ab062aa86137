//! Error types for the tenancy engine.
//!
//! This module provides a unified error type [`TenancyError`] for all tenancy
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Tenant lookup**: missing or inactive tenants
//! - **Isolation**: namespace provisioning, session acquisition, DDL failures
//! - **Configuration**: invalid strategy combinations, rejected at construction
//! - **Migration**: per-tenant migration failures (non-fatal to a batch)
//! - **Admission**: rate limits and quotas
//! - **Security**: detected cross-tenant leakage (always fatal, never retried)
//!
//! # Example
//!
//! ```rust
//! use tenancy::error::{Result, TenancyError};
//!
//! fn lookup(id: &str) -> Result<()> {
//!     if id.is_empty() {
//!         return Err(TenancyError::TenantNotFound("".into()));
//!     }
//!     Ok(())
//! }
//!
//! fn handle(err: &TenancyError) {
//!     if err.is_security_critical() {
//!         eprintln!("ALERT: {}", err);
//!     } else if err.is_retryable() {
//!         println!("retrying...");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Main error type for tenancy operations.
#[derive(Error, Debug)]
pub enum TenancyError {
    // Tenant lookup errors
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Tenant {tenant_id} is {status}")]
    TenantInactive { tenant_id: String, status: String },

    #[error("Tenant already exists: {0}")]
    AlreadyExists(String),

    // Context errors
    #[error("No tenant context is set for the current task")]
    ContextNotSet,

    // Isolation errors
    #[error("Isolation operation failed: {operation} (tenant: {tenant_id:?}): {reason}")]
    Isolation {
        operation: String,
        tenant_id: Option<String>,
        reason: String,
    },

    #[error(
        "SECURITY: potential data leakage in {operation}: expected tenant {expected_tenant}, got {actual_tenant}"
    )]
    DataLeakage {
        operation: String,
        expected_tenant: String,
        actual_tenant: String,
    },

    // Configuration errors
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // Migration errors
    #[error("Migration failed for tenant {tenant_id} during {operation}: {reason}")]
    Migration {
        tenant_id: String,
        operation: String,
        reason: String,
    },

    // Admission errors
    #[error("Rate limit exceeded for tenant {tenant_id}: {limit} requests per {window_secs}s")]
    RateLimitExceeded {
        tenant_id: String,
        limit: u32,
        window_secs: u64,
    },

    #[error("Quota exceeded for tenant {tenant_id}: {quota} usage {current} exceeds limit {limit}")]
    QuotaExceeded {
        tenant_id: String,
        quota: String,
        current: u64,
        limit: u64,
    },

    // Connection errors
    #[error("Database connection failed for tenant {tenant_id}: {reason}")]
    DatabaseConnection { tenant_id: String, reason: String },

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Storage and serialization
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TenancyError {
    /// Convenience constructor for isolation failures.
    pub fn isolation(
        operation: impl Into<String>,
        tenant_id: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        TenancyError::Isolation {
            operation: operation.into(),
            tenant_id: tenant_id.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Seconds a caller should wait before retrying a rate-limited request.
    ///
    /// Returns `None` for every other error kind.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            TenancyError::RateLimitExceeded { window_secs, .. } => Some(*window_secs),
            _ => None,
        }
    }

    /// Check if the error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TenancyError::DatabaseConnection { .. }
                | TenancyError::RateLimitExceeded { .. }
                | TenancyError::Storage(_)
        )
    }

    /// Check if the error indicates a violated isolation invariant.
    ///
    /// Security-critical errors must surface to operators immediately and are
    /// never retried automatically.
    pub fn is_security_critical(&self) -> bool {
        matches!(self, TenancyError::DataLeakage { .. })
    }
}

impl From<serde_json::Error> for TenancyError {
    fn from(e: serde_json::Error) -> Self {
        TenancyError::Serialization(e.to_string())
    }
}

/// Result type alias for tenancy operations.
pub type Result<T> = std::result::Result<T, TenancyError>;
