//! Tenant records and lifecycle.
//!
//! A [`Tenant`] pairs a human-readable slug (`identifier`) with an opaque,
//! immutable storage key (`id`). Status transitions follow an explicit table:
//! `provisioning -> active`, `active <-> suspended`, anything non-deleted
//! `-> deleted`. `deleted` is terminal; with soft delete enabled a deleted
//! tenant may be restored to `active`.

use crate::error::{Result, TenancyError};
use crate::isolation::IsolationStrategy;
use crate::validation::validate_tenant_identifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Opaque, immutable tenant primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Wrap an existing ID value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tenant lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Registered; isolation namespace not yet created.
    Provisioning,
    /// Fully operational.
    Active,
    /// Access denied, data retained.
    Suspended,
    /// Terminal. With soft delete the record survives in this state.
    Deleted,
}

impl TenantStatus {
    /// Whether a transition from `self` to `next` is allowed.
    ///
    /// `soft_delete` opens the single exception path out of `Deleted`
    /// (restore to `Active`).
    pub fn can_transition_to(self, next: TenantStatus, soft_delete: bool) -> bool {
        use TenantStatus::*;
        match (self, next) {
            (Provisioning, Active) | (Provisioning, Deleted) => true,
            (Active, Suspended) | (Suspended, Active) => true,
            (Active, Deleted) | (Suspended, Deleted) => true,
            (Deleted, Active) => soft_delete,
            _ => false,
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TenantStatus::Provisioning => "provisioning",
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A single tenant's metadata record.
///
/// Equality is defined by `id` alone: two snapshots of the same tenant at
/// different points in time compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Opaque storage key, immutable for the tenant's lifetime.
    pub id: TenantId,
    /// Human-readable slug, globally unique.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: TenantStatus,
    /// Per-tenant override of the global isolation strategy.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub isolation_strategy: Option<IsolationStrategy>,
    /// Free-form settings map.
    #[serde(default)]
    pub settings: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Create a new tenant record with a generated ID and validated slug.
    pub fn new(identifier: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into();
        validate_tenant_identifier(&identifier)?;
        let now = Utc::now();
        Ok(Self {
            id: TenantId::generate(),
            identifier,
            name: name.into(),
            status: TenantStatus::Provisioning,
            isolation_strategy: None,
            settings: Map::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Set the initial status.
    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = status;
        self
    }

    /// Set a per-tenant isolation strategy override.
    pub fn with_isolation_strategy(mut self, strategy: IsolationStrategy) -> Self {
        self.isolation_strategy = Some(strategy);
        self
    }

    /// Set a settings entry.
    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    /// Fail with [`TenancyError::TenantInactive`] unless the tenant is active.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TenancyError::TenantInactive {
                tenant_id: self.id.to_string(),
                status: self.status.to_string(),
            })
        }
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl PartialEq for Tenant {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Tenant {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_identifier() {
        assert!(Tenant::new("acme-corp", "Acme Corp").is_ok());
        assert!(Tenant::new("ab", "too short").is_err());
        assert!(Tenant::new("UPPER", "bad case").is_err());
    }

    #[test]
    fn test_status_transitions() {
        use TenantStatus::*;
        assert!(Provisioning.can_transition_to(Active, false));
        assert!(Provisioning.can_transition_to(Deleted, false));
        assert!(Active.can_transition_to(Suspended, false));
        assert!(Suspended.can_transition_to(Active, false));
        assert!(Suspended.can_transition_to(Deleted, false));

        // Deleted is terminal without soft delete.
        assert!(!Deleted.can_transition_to(Active, false));
        assert!(Deleted.can_transition_to(Active, true));
        assert!(!Deleted.can_transition_to(Suspended, true));

        // No skipping provisioning into suspension.
        assert!(!Provisioning.can_transition_to(Suspended, false));
    }

    #[test]
    fn test_equality_by_id() {
        let a = Tenant::new("acme-corp", "Acme").unwrap();
        let mut b = a.clone();
        b.name = "Renamed".into();
        b.status = TenantStatus::Active;
        assert_eq!(a, b);

        let c = Tenant::new("acme-corp", "Acme").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_ensure_active() {
        let tenant = Tenant::new("acme-corp", "Acme").unwrap();
        assert!(tenant.ensure_active().is_err());

        let tenant = tenant.with_status(TenantStatus::Active);
        assert!(tenant.ensure_active().is_ok());
    }

    #[test]
    fn test_serde_round_trip() {
        let tenant = Tenant::new("acme-corp", "Acme")
            .unwrap()
            .with_status(TenantStatus::Active)
            .with_setting("plan", serde_json::json!("enterprise"));
        let json = serde_json::to_string(&tenant).unwrap();
        let back: Tenant = serde_json::from_str(&json).unwrap();
        assert_eq!(tenant, back);
        assert_eq!(back.settings["plan"], "enterprise");
        assert_eq!(back.status, TenantStatus::Active);
    }
}
