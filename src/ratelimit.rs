//! Per-tenant sliding-window rate limiting.
//!
//! Each tenant gets an independent window of request timestamps. A check
//! prunes expired timestamps, then either records the new request or rejects
//! it with a retry hint. Prune, count, and record happen under one per-tenant
//! lock so concurrent checks can never admit more than the limit.

use crate::error::{Result, TenancyError};
use crate::tenant::TenantId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Outcome of an admitted check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Requests still available in the current window, after this one.
    pub remaining: u32,
    pub limit: u32,
}

struct TenantWindow {
    timestamps: Mutex<VecDeque<Instant>>,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: RwLock<HashMap<TenantId, Arc<TenantWindow>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: RwLock::new(HashMap::new()),
        }
    }

    async fn window_for(&self, tenant_id: &TenantId) -> Arc<TenantWindow> {
        if let Some(w) = self.windows.read().await.get(tenant_id) {
            return Arc::clone(w);
        }
        let mut windows = self.windows.write().await;
        Arc::clone(windows.entry(tenant_id.clone()).or_insert_with(|| {
            Arc::new(TenantWindow {
                timestamps: Mutex::new(VecDeque::new()),
            })
        }))
    }

    /// Admit or reject one request for `tenant_id`.
    ///
    /// Rejections carry the full window length as the retry hint; the caller
    /// is guaranteed a free slot once the whole window has passed.
    pub async fn check(&self, tenant_id: &TenantId) -> Result<RateLimitDecision> {
        loop {
            let window = self.window_for(tenant_id).await;
            let mut timestamps = window.timestamps.lock().await;

            // purge_idle or forget may have dropped this window between the
            // map lookup and the mutex acquisition. An admission recorded
            // into an orphaned window would be invisible to later checks, so
            // re-validate membership and start over if it is gone.
            {
                let windows = self.windows.read().await;
                match windows.get(tenant_id) {
                    Some(current) if Arc::ptr_eq(current, &window) => {}
                    _ => continue,
                }
            }

            let now = Instant::now();
            while let Some(front) = timestamps.front() {
                if now.duration_since(*front) >= self.window {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }

            if timestamps.len() as u32 >= self.limit {
                debug!(tenant_id = %tenant_id, limit = self.limit, "rate limit exceeded");
                return Err(TenancyError::RateLimitExceeded {
                    tenant_id: tenant_id.to_string(),
                    limit: self.limit,
                    window_secs: self.window.as_secs(),
                });
            }
            timestamps.push_back(now);
            return Ok(RateLimitDecision {
                remaining: self.limit - timestamps.len() as u32,
                limit: self.limit,
            });
        }
    }

    /// Requests still available without consuming one.
    pub async fn remaining(&self, tenant_id: &TenantId) -> u32 {
        let window = self.window_for(tenant_id).await;
        let mut timestamps = window.timestamps.lock().await;
        let now = Instant::now();
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        self.limit.saturating_sub(timestamps.len() as u32)
    }

    /// Drop window state for tenants with no live timestamps. Run this
    /// periodically to keep memory proportional to active tenants.
    pub async fn purge_idle(&self) -> usize {
        let mut windows = self.windows.write().await;
        let now = Instant::now();
        let mut idle = Vec::new();
        for (tenant_id, window) in windows.iter() {
            // A held mutex means a check is in flight on this window; never
            // block on it here (checks take the map lock while holding the
            // window mutex, so awaiting would invert the lock order).
            let Ok(timestamps) = window.timestamps.try_lock() else {
                continue;
            };
            if timestamps
                .back()
                .is_none_or(|last| now.duration_since(*last) >= self.window)
            {
                idle.push(tenant_id.clone());
            }
        }
        for tenant_id in &idle {
            windows.remove(tenant_id);
        }
        idle.len()
    }

    /// Forget a tenant's window entirely, e.g. on deletion.
    pub async fn forget(&self, tenant_id: &TenantId) {
        self.windows.write().await.remove(tenant_id);
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
