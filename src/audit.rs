//! Bounded in-memory audit trail.
//!
//! Every lifecycle transition, session acquisition failure, rate-limit
//! rejection, migration run, and security event lands here. Entries are kept
//! in a capacity-bounded ring (oldest dropped first) and simultaneously
//! emitted through `tracing`, so an external subscriber can ship them while
//! recent history stays queryable in process.

use crate::tenant::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    TenantLifecycle,
    Session,
    RateLimit,
    Migration,
    Security,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditCategory::TenantLifecycle => "tenant_lifecycle",
            AuditCategory::Session => "session",
            AuditCategory::RateLimit => "rate_limit",
            AuditCategory::Migration => "migration",
            AuditCategory::Security => "security",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Denied => "denied",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: Option<TenantId>,
    pub category: AuditCategory,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: Option<TenantId>,
        category: AuditCategory,
        action: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            tenant_id,
            category,
            action: action.into(),
            outcome,
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Capacity-bounded ring of audit entries.
pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Record an entry, evicting the oldest once full.
    pub async fn write(&self, entry: AuditEntry) {
        match (entry.category, entry.outcome) {
            (AuditCategory::Security, _) | (_, AuditOutcome::Denied) => {
                error!(
                    tenant_id = entry.tenant_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
                    category = %entry.category,
                    action = %entry.action,
                    outcome = %entry.outcome,
                    "audit"
                );
            }
            (_, AuditOutcome::Failure) => {
                warn!(
                    tenant_id = entry.tenant_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
                    category = %entry.category,
                    action = %entry.action,
                    "audit"
                );
            }
            _ => {
                info!(
                    tenant_id = entry.tenant_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
                    category = %entry.category,
                    action = %entry.action,
                    "audit"
                );
            }
        }

        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The most recent `n` entries, newest first.
    pub async fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(n).cloned().collect()
    }

    /// Entries for one tenant, newest first.
    pub async fn for_tenant(&self, tenant_id: &TenantId, n: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .filter(|e| e.tenant_id.as_ref() == Some(tenant_id))
            .take(n)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
