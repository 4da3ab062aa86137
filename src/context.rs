//! Task-local tenant context propagation.
//!
//! Each logical task observes an independent context frame: mutations in one
//! task are invisible to siblings, and children spawned through
//! [`TenantContext::spawn_scoped`] capture the parent's frame at spawn time,
//! so a later reset in the parent never affects in-flight background work.
//!
//! A frame must be established before `set`/`get` are usable. Request
//! handlers typically wrap their work once:
//!
//! ```rust
//! use tenancy::context::TenantContext;
//! use tenancy::tenant::Tenant;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let tenant = Tenant::new("acme-corp", "Acme").unwrap();
//! TenantContext::scope(tenant, async {
//!     let current = TenantContext::get().unwrap();
//!     assert_eq!(current.identifier, "acme-corp");
//! })
//! .await;
//! # }
//! ```
//!
//! `set` returns a [`ContextToken`] that restores the exact prior value on
//! `reset`, so nested overrides unwind correctly on every exit path.

use crate::error::{Result, TenancyError};
use crate::tenant::Tenant;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::task_local;

#[derive(Debug, Clone, Default)]
struct Frame {
    tenant: Option<Tenant>,
    metadata: HashMap<String, Value>,
}

task_local! {
    static FRAME: RefCell<Frame>;
}

/// Restores the tenant value that was current before a [`TenantContext::set`].
///
/// Consumed by [`TenantContext::reset`]; dropping it without resetting leaves
/// the override in place for the rest of the frame.
#[must_use = "pass the token to TenantContext::reset to restore the prior tenant"]
#[derive(Debug)]
pub struct ContextToken {
    prior: Option<Tenant>,
}

/// Point-in-time copy of a context frame, used to propagate the current
/// tenant into spawned tasks.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    tenant: Option<Tenant>,
    metadata: HashMap<String, Value>,
}

impl ContextSnapshot {
    fn into_frame(self) -> Frame {
        Frame {
            tenant: self.tenant,
            metadata: self.metadata,
        }
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        self.tenant.as_ref()
    }
}

/// Task-local tenant context.
pub struct TenantContext;

impl TenantContext {
    /// Run `f` inside a frame holding `tenant`.
    ///
    /// The frame (tenant and metadata) is dropped when `f` completes on any
    /// exit path; an enclosing frame, if present, is restored unchanged.
    pub async fn scope<F>(tenant: Tenant, f: F) -> F::Output
    where
        F: Future,
    {
        let frame = Frame {
            tenant: Some(tenant),
            metadata: HashMap::new(),
        };
        FRAME.scope(RefCell::new(frame), f).await
    }

    /// Run `f` inside an empty frame, enabling later `set` calls.
    pub async fn empty_scope<F>(f: F) -> F::Output
    where
        F: Future,
    {
        FRAME.scope(RefCell::new(Frame::default()), f).await
    }

    /// Replace the current frame's tenant, returning a token that restores
    /// the exact prior value.
    ///
    /// Fails with [`TenancyError::ContextNotSet`] outside any frame: a frame
    /// must already exist, so request entry points have to establish one
    /// first, via [`scope`](Self::scope) when the tenant is known up front or
    /// [`empty_scope`](Self::empty_scope) when it is resolved mid-request.
    pub fn set(tenant: Tenant) -> Result<ContextToken> {
        FRAME
            .try_with(|cell| ContextToken {
                prior: cell.borrow_mut().tenant.replace(tenant),
            })
            .map_err(|_| TenancyError::ContextNotSet)
    }

    /// Restore the tenant value captured by `token`.
    pub fn reset(token: ContextToken) -> Result<()> {
        FRAME
            .try_with(|cell| {
                cell.borrow_mut().tenant = token.prior;
            })
            .map_err(|_| TenancyError::ContextNotSet)
    }

    /// Current tenant, failing with [`TenancyError::ContextNotSet`] when no
    /// tenant is set for this task.
    pub fn get() -> Result<Tenant> {
        Self::get_optional().ok_or(TenancyError::ContextNotSet)
    }

    /// Current tenant, or `None` when absent.
    pub fn get_optional() -> Option<Tenant> {
        FRAME
            .try_with(|cell| cell.borrow().tenant.clone())
            .ok()
            .flatten()
    }

    /// Clear the current frame's tenant without tearing down the frame.
    pub fn clear() {
        let _ = FRAME.try_with(|cell| {
            cell.borrow_mut().tenant = None;
        });
    }

    /// Attach a metadata entry to the current frame.
    pub fn set_metadata(key: impl Into<String>, value: Value) -> Result<()> {
        FRAME
            .try_with(|cell| {
                cell.borrow_mut().metadata.insert(key.into(), value);
            })
            .map_err(|_| TenancyError::ContextNotSet)
    }

    /// Read a metadata entry from the current frame.
    pub fn get_metadata(key: &str) -> Option<Value> {
        FRAME
            .try_with(|cell| cell.borrow().metadata.get(key).cloned())
            .ok()
            .flatten()
    }

    /// Copy of all metadata in the current frame.
    pub fn all_metadata() -> HashMap<String, Value> {
        FRAME
            .try_with(|cell| cell.borrow().metadata.clone())
            .unwrap_or_default()
    }

    /// Remove all metadata from the current frame.
    pub fn clear_metadata() {
        let _ = FRAME.try_with(|cell| {
            cell.borrow_mut().metadata.clear();
        });
    }

    /// Capture the current frame for propagation into another task.
    ///
    /// Returns `None` outside any frame.
    pub fn snapshot() -> Option<ContextSnapshot> {
        FRAME
            .try_with(|cell| {
                let frame = cell.borrow();
                ContextSnapshot {
                    tenant: frame.tenant.clone(),
                    metadata: frame.metadata.clone(),
                }
            })
            .ok()
    }

    /// Spawn `f` on the runtime with a copy of the current frame.
    ///
    /// The child observes the tenant that was current at spawn time, even if
    /// the parent resets or leaves its frame afterwards. Without a current
    /// frame, `f` runs context-free.
    pub fn spawn_scoped<F>(f: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match Self::snapshot() {
            Some(snapshot) => {
                tokio::spawn(FRAME.scope(RefCell::new(snapshot.into_frame()), f))
            }
            None => tokio::spawn(f),
        }
    }
}
