//! Tenancy - multi-tenant data isolation and context propagation.
//!
//! Tenancy turns a single-tenant database application into a multi-tenant
//! one: it keeps each tenant's data separated, carries the current tenant
//! through async call chains, and manages the tenant lifecycle from
//! registration to deletion.
//!
//! # Features
//!
//! - **Pluggable Isolation**: schema-per-tenant, database-per-tenant,
//!   row-level security, or a hybrid mix routed by tier.
//! - **Task-Local Context**: the current tenant follows the task, including
//!   across explicit spawns, and cross-tenant session use is rejected.
//! - **Tenant Lifecycle**: provisioning, activation, suspension, and soft or
//!   hard deletion behind one orchestrator.
//! - **Operational Guardrails**: per-tenant rate limiting, bounded caches,
//!   and an audit trail of every lifecycle and security event.
//! - **Fleet Migrations**: concurrency-capped schema migrations across all
//!   active tenants.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TenancyOrchestrator                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Context: task-local tenant | scoped spawns | leak checks   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Isolation: schema | database | RLS | hybrid routing        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  State: tenant store | LRU caches | engine cache            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Operations: rate limits | migrations | audit trail         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tenancy::config::TenancyConfig;
//! use tenancy::orchestrator::TenancyOrchestrator;
//! use tenancy::store::MemoryTenantStore;
//!
//! let config = TenancyConfig::development("postgres://localhost/app");
//! let orchestrator = TenancyOrchestrator::new(
//!     config,
//!     Arc::new(MemoryTenantStore::new()),
//!     engine,   // your SqlEngine implementation
//!     factory,  // your EngineFactory implementation
//! )?;
//!
//! let tenant = orchestrator.register_tenant("acme-corp", "Acme Corp").await?;
//! let mut session = orchestrator.acquire_session(&tenant.id).await?;
//! session.execute("SELECT * FROM invoices", &[]).await?;
//! session.commit().await?;
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod engine_cache;
pub mod error;
pub mod isolation;
pub mod migration;
pub mod orchestrator;
pub mod ratelimit;
pub mod store;
pub mod tenant;
pub mod validation;

pub use config::TenancyConfig;
pub use context::TenantContext;
pub use engine::{EngineFactory, Query, ScopedSession, SqlEngine, SqlTransaction};
pub use error::{Result, TenancyError};
pub use isolation::{IsolationProvider, IsolationStrategy};
pub use orchestrator::TenancyOrchestrator;
pub use store::{MemoryTenantStore, TenantStore};
pub use tenant::{Tenant, TenantId, TenantStatus};
