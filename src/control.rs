//! Sync control surface.
//!
//! Enablement is a capability consulted at each scheduler tick and each job
//! submission, read through a trait rather than ambient mutable state. The
//! cancel registry carries per-job cancellation tokens so backoff and
//! throttle waits abort promptly when an operator cancels a running job.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;

/// Capability check for whether synchronization may proceed.
pub trait SyncControl: Send + Sync {
    fn sync_enabled(&self) -> bool;
}

/// Enablement backed by loaded configuration.
pub struct ConfigSyncControl {
    enabled: bool,
}

impl ConfigSyncControl {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            enabled: config.sync_enabled,
        }
    }
}

impl SyncControl for ConfigSyncControl {
    fn sync_enabled(&self) -> bool {
        self.enabled
    }
}

/// Per-job cancellation tokens, registered while a job runs.
///
/// The durable cancellation signal is the job row's `cancel_requested`
/// column; the token only exists to cut sleeps short in this process.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a job about to run. Replaces any stale entry.
    pub fn register(&self, job_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.insert(job_id, token.clone());
        token
    }

    /// Drop the token once the job reaches a terminal state.
    pub fn deregister(&self, job_id: Uuid) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&job_id);
    }

    /// Fire the token for a job, if it is running in this process.
    pub fn cancel(&self, job_id: Uuid) {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = tokens.get(&job_id) {
            token.cancel();
        }
    }
}
