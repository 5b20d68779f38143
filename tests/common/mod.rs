//! Common test utilities

#![allow(dead_code)]

use oi_archive::coordinator::{
    ClientConfig, Coordinator, CoordinatorClient, CoordinatorConfig, CoordinatorServer,
};
use oi_archive::protocol::{FileBatch, FileContent, PluginInfo};
use oi_archive::store::{
    ApplyOutcome, BatchStore, MemoryStore, Revision, SharedStore, StoreConfig, StoreError,
    StoreResult, StoreStats,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A coordinator serving on an ephemeral local port
pub struct TestCoordinator {
    pub url: String,
    pub coordinator: Arc<Coordinator>,
    pub store: SharedStore,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestCoordinator {
    /// Client pointed at this coordinator
    pub fn client(&self) -> CoordinatorClient {
        CoordinatorClient::new(ClientConfig::new(&self.url).with_timeout(Duration::from_secs(5)))
            .unwrap()
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Coordinator configuration backed by memory
pub fn memory_config() -> CoordinatorConfig {
    CoordinatorConfig::builder()
        .store(StoreConfig::Memory)
        .enable_request_logging(false)
        .build()
        .unwrap()
}

/// Start a coordinator with an in-memory store
pub async fn spawn_coordinator(config: CoordinatorConfig) -> TestCoordinator {
    spawn_with_store(config, Arc::new(MemoryStore::new())).await
}

/// Start a coordinator over the given store
pub async fn spawn_with_store(config: CoordinatorConfig, store: SharedStore) -> TestCoordinator {
    let server = CoordinatorServer::with_store(config, Arc::clone(&store)).unwrap();
    let coordinator = server.coordinator();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let _ = server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await;
    });

    TestCoordinator {
        url: format!("http://{addr}"),
        coordinator,
        store,
        shutdown: Some(tx),
    }
}

/// Plugin identity for tests
pub fn info(id: &str) -> PluginInfo {
    PluginInfo::new(id, format!("{id} OJ"))
}

/// Build a batch from `(path, content)` pairs
pub fn batch(files: &[(&str, &str)]) -> FileBatch {
    files
        .iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect()
}

// ============================================================================
// Store doubles
// ============================================================================

/// Fails the first `failures` applies, then delegates to memory
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failures: AtomicUsize,
    applies: AtomicUsize,
}

impl FailingStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(failures),
            applies: AtomicUsize::new(0),
        }
    }

    /// Apply attempts seen, failed ones included
    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }
}

impl BatchStore for FailingStore {
    fn apply(&self, plugin_id: &str, batch: &FileBatch) -> StoreResult<ApplyOutcome> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("disk detached".to_string()));
        }
        self.inner.apply(plugin_id, batch)
    }

    fn get(&self, plugin_id: &str, path: &str) -> StoreResult<Option<FileContent>> {
        self.inner.get(plugin_id, path)
    }

    fn list_paths(&self, plugin_id: &str) -> StoreResult<Vec<String>> {
        self.inner.list_paths(plugin_id)
    }

    fn revisions(&self, plugin_id: &str, limit: usize) -> StoreResult<Vec<Revision>> {
        self.inner.revisions(plugin_id, limit)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        self.inner.stats()
    }
}

/// Holds every apply for a fixed delay
#[derive(Debug, Default)]
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

impl BatchStore for SlowStore {
    fn apply(&self, plugin_id: &str, batch: &FileBatch) -> StoreResult<ApplyOutcome> {
        std::thread::sleep(self.delay);
        self.inner.apply(plugin_id, batch)
    }

    fn get(&self, plugin_id: &str, path: &str) -> StoreResult<Option<FileContent>> {
        self.inner.get(plugin_id, path)
    }

    fn list_paths(&self, plugin_id: &str) -> StoreResult<Vec<String>> {
        self.inner.list_paths(plugin_id)
    }

    fn revisions(&self, plugin_id: &str, limit: usize) -> StoreResult<Vec<Revision>> {
        self.inner.revisions(plugin_id, limit)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        self.inner.stats()
    }
}
