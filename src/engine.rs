//! Trait seams for the external transactional engine.
//!
//! The crate never executes SQL itself. The embedding application supplies a
//! [`SqlEngine`] (a pooled connection handle able to begin transactions and
//! run administrative statements) and, for database isolation, an
//! [`EngineFactory`] that builds engines from connection URLs.
//!
//! [`ScopedSession`] wraps one live transaction acquired on behalf of one
//! tenant. Dropping an unfinished session rolls the transaction back on the
//! runtime, so a cancelled task never leaks a transaction-scoped isolation
//! setting onto a pooled connection reused by another tenant.

use crate::context::TenantContext;
use crate::error::{Result, TenancyError};
use crate::tenant::TenantId;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A single result row.
pub type Row = Vec<Value>;

/// A live transaction on one connection.
#[async_trait]
pub trait SqlTransaction: Send {
    /// Execute a statement with bound parameters, returning result rows.
    async fn execute(&mut self, statement: &str, params: &[Value]) -> Result<Vec<Row>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A pooled connection engine for one connection target.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Begin a transaction.
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>>;

    /// Execute an administrative statement outside any tenant transaction
    /// (namespace create/drop). Returns the affected row count.
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64>;

    /// Dispose the engine and release all pooled connections.
    async fn dispose(&self) -> Result<()>;
}

/// Builds engines from connection URLs. Used by database isolation to create
/// per-tenant engines lazily.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, url: &str) -> Result<Arc<dyn SqlEngine>>;
}

/// A read query plus tenant predicates appended by isolation providers.
///
/// Row-level-security isolation appends an explicit `tenant_id` equality as
/// defense in depth; the other strategies pass queries through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    statement: String,
    predicates: Vec<(String, Value)>,
}

impl Query {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            predicates: Vec::new(),
        }
    }

    /// Append a `column = value` predicate.
    pub fn with_predicate(mut self, column: impl Into<String>, value: Value) -> Self {
        self.predicates.push((column.into(), value));
        self
    }

    pub fn predicates(&self) -> &[(String, Value)] {
        &self.predicates
    }

    /// Render the statement with predicates appended.
    ///
    /// String values are single-quote escaped. Providers only ever append
    /// predicates on fixed column names with validated tenant IDs.
    pub fn render(&self) -> String {
        if self.predicates.is_empty() {
            return self.statement.clone();
        }
        let mut sql = self.statement.clone();
        let mut has_where = sql.to_ascii_lowercase().contains(" where ");
        for (column, value) in &self.predicates {
            let literal = match value {
                Value::String(s) => format!("'{}'", s.replace('\'', "''")),
                other => other.to_string(),
            };
            let keyword = if has_where { "AND" } else { "WHERE" };
            sql = format!("{} {} {} = {}", sql, keyword, column, literal);
            has_where = true;
        }
        sql
    }
}

/// A transactional session scoped to one tenant's namespace.
///
/// Obtained from an isolation provider's `acquire`. The transaction-scoped
/// isolation setting (search path or session variable) is already applied.
/// Call [`commit`](Self::commit) or [`rollback`](Self::rollback) explicitly;
/// dropping the session rolls back.
pub struct ScopedSession {
    txn: Option<Box<dyn SqlTransaction>>,
    tenant_id: TenantId,
    namespace: Option<String>,
}

impl std::fmt::Debug for ScopedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSession")
            .field("tenant_id", &self.tenant_id)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ScopedSession {
    pub(crate) fn new(
        txn: Box<dyn SqlTransaction>,
        tenant_id: TenantId,
        namespace: Option<String>,
    ) -> Self {
        Self {
            txn: Some(txn),
            tenant_id,
            namespace,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// The namespace this session is scoped to, when the strategy has one.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Execute a statement inside the session's transaction.
    ///
    /// When a task-local tenant context is set, it must match the session's
    /// tenant; a mismatch fails with [`TenancyError::DataLeakage`] before
    /// the statement reaches the engine.
    pub async fn execute(&mut self, statement: &str, params: &[Value]) -> Result<Vec<Row>> {
        if let Some(current) = TenantContext::get_optional() {
            if current.id != self.tenant_id {
                return Err(TenancyError::DataLeakage {
                    operation: "execute".to_string(),
                    expected_tenant: self.tenant_id.to_string(),
                    actual_tenant: current.id.to_string(),
                });
            }
        }
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| TenancyError::InvalidState("session already finished".into()))?;
        txn.execute(statement, params).await
    }

    pub async fn commit(mut self) -> Result<()> {
        match self.txn.take() {
            Some(txn) => txn.commit().await,
            None => Err(TenancyError::InvalidState("session already finished".into())),
        }
    }

    pub async fn rollback(mut self) -> Result<()> {
        match self.txn.take() {
            Some(txn) => txn.rollback().await,
            None => Err(TenancyError::InvalidState("session already finished".into())),
        }
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            let tenant_id = self.tenant_id.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = txn.rollback().await {
                            warn!(tenant_id = %tenant_id, error = %e, "rollback of abandoned session failed");
                        } else {
                            debug!(tenant_id = %tenant_id, "rolled back abandoned session");
                        }
                    });
                }
                Err(_) => {
                    warn!(tenant_id = %tenant_id, "abandoned session dropped outside runtime; transaction left to the pool");
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory engine doubles shared by the crate's unit tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Engine that records every statement and transaction outcome.
    pub struct MockEngine {
        pub url: String,
        pub log: Arc<Mutex<Vec<String>>>,
        pub disposed: Arc<AtomicBool>,
        /// Admin statements containing this substring fail.
        pub fail_admin_containing: Option<String>,
    }

    impl MockEngine {
        pub fn new(url: &str) -> Self {
            Self {
                url: url.to_string(),
                log: Arc::new(Mutex::new(Vec::new())),
                disposed: Arc::new(AtomicBool::new(false)),
                fail_admin_containing: None,
            }
        }

        pub fn failing_on(url: &str, pattern: &str) -> Self {
            Self {
                fail_admin_containing: Some(pattern.to_string()),
                ..Self::new(url)
            }
        }

        pub async fn statements(&self) -> Vec<String> {
            self.log.lock().await.clone()
        }

        pub fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::SeqCst)
        }
    }

    pub struct MockTransaction {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SqlTransaction for MockTransaction {
        async fn execute(&mut self, statement: &str, params: &[Value]) -> Result<Vec<Row>> {
            let rendered = if params.is_empty() {
                format!("txn: {}", statement)
            } else {
                format!("txn: {} {:?}", statement, params)
            };
            self.log.lock().await.push(rendered);
            Ok(Vec::new())
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.log.lock().await.push("commit".to_string());
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.log.lock().await.push("rollback".to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl SqlEngine for MockEngine {
        async fn begin(&self) -> Result<Box<dyn SqlTransaction>> {
            self.log.lock().await.push("begin".to_string());
            Ok(Box::new(MockTransaction {
                log: Arc::clone(&self.log),
            }))
        }

        async fn execute(&self, statement: &str, _params: &[Value]) -> Result<u64> {
            if let Some(pattern) = &self.fail_admin_containing {
                if statement.contains(pattern.as_str()) {
                    return Err(TenancyError::Storage(format!(
                        "injected failure for statement: {}",
                        statement
                    )));
                }
            }
            self.log.lock().await.push(format!("admin: {}", statement));
            Ok(0)
        }

        async fn dispose(&self) -> Result<()> {
            self.disposed.store(true, Ordering::SeqCst);
            self.log.lock().await.push("dispose".to_string());
            Ok(())
        }
    }

    /// Factory that counts creations and remembers every engine it built.
    pub struct MockEngineFactory {
        pub created: AtomicUsize,
        pub creation_delay: Duration,
        pub engines: Mutex<Vec<(String, Arc<MockEngine>)>>,
    }

    impl MockEngineFactory {
        pub fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                creation_delay: Duration::from_millis(0),
                engines: Mutex::new(Vec::new()),
            }
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                creation_delay: delay,
                ..Self::new()
            }
        }

        pub fn created_count(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EngineFactory for MockEngineFactory {
        async fn create(&self, url: &str) -> Result<Arc<dyn SqlEngine>> {
            if !self.creation_delay.is_zero() {
                tokio::time::sleep(self.creation_delay).await;
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            let engine = Arc::new(MockEngine::new(url));
            self.engines
                .lock()
                .await
                .push((url.to_string(), Arc::clone(&engine)));
            Ok(engine)
        }
    }
}
