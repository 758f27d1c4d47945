use std::sync::Arc;
use std::time::Instant;

use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::Mutex;

/// Outcome of the most recent reconcile cycle, as shown by `/health`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub last_success: Option<Timestamp>,
    pub last_attempt: Option<Timestamp>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub cycles: u64,
}

/// Shared runtime state of the edge node.
pub struct EdgeState {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    sync: SyncStatus,
    commands_executed: u64,
    startup_time: Instant,
}

impl EdgeState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                sync: SyncStatus::default(),
                commands_executed: 0,
                startup_time: Instant::now(),
            })),
        }
    }

    pub async fn sync_succeeded(&self, at: Timestamp) {
        let mut inner = self.inner.lock().await;
        inner.sync.cycles += 1;
        inner.sync.last_attempt = Some(at);
        inner.sync.last_success = Some(at);
        inner.sync.last_error = None;
        inner.sync.consecutive_failures = 0;
    }

    pub async fn sync_failed(&self, at: Timestamp, error: String) {
        let mut inner = self.inner.lock().await;
        inner.sync.cycles += 1;
        inner.sync.last_attempt = Some(at);
        inner.sync.last_error = Some(error);
        inner.sync.consecutive_failures += 1;
    }

    pub async fn command_executed(&self) {
        self.inner.lock().await.commands_executed += 1;
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.inner.lock().await.sync.clone()
    }

    pub async fn commands_executed(&self) -> u64 {
        self.inner.lock().await.commands_executed
    }

    pub async fn uptime_secs(&self) -> u64 {
        self.inner.lock().await.startup_time.elapsed().as_secs()
    }
}

impl Default for EdgeState {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EdgeState {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
