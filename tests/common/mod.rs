//! Shared test fixtures: an in-memory engine recording every statement.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tenancy::engine::{EngineFactory, Row, SqlEngine, SqlTransaction};
use tenancy::error::Result;
use tokio::sync::Mutex;

static TRACING: Once = Once::new();

/// Route engine tracing through the test writer. Honors `RUST_LOG`; safe to
/// call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Engine double that records statements instead of executing them.
pub struct RecordingEngine {
    pub url: String,
    log: Arc<Mutex<Vec<String>>>,
    disposed: Arc<AtomicBool>,
}

impl RecordingEngine {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            log: Arc::new(Mutex::new(Vec::new())),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn statements(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

pub struct RecordingTransaction {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SqlTransaction for RecordingTransaction {
    async fn execute(&mut self, statement: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.log.lock().await.push(format!("txn: {}", statement));
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
impl SqlEngine for RecordingEngine {
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>> {
        self.log.lock().await.push("begin".to_string());
        Ok(Box::new(RecordingTransaction {
            log: Arc::clone(&self.log),
        }))
    }

    async fn execute(&self, statement: &str, _params: &[Value]) -> Result<u64> {
        self.log.lock().await.push(format!("admin: {}", statement));
        Ok(0)
    }

    async fn dispose(&self) -> Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing [`RecordingEngine`]s and counting creations.
#[derive(Default)]
pub struct RecordingFactory {
    created: AtomicUsize,
    pub engines: Mutex<Vec<Arc<RecordingEngine>>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for RecordingFactory {
    async fn create(&self, url: &str) -> Result<Arc<dyn SqlEngine>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::new(RecordingEngine::new(url));
        self.engines.lock().await.push(Arc::clone(&engine));
        Ok(engine)
    }
}
