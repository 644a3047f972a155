//! mbx-sync
//!
//! Sync job driver. One job walks every instance concurrently; inside an
//! instance workspaces go strictly one at a time through the instance's
//! [`mbx_upstream::CredentialSession`]. Progress is persisted and broadcast
//! after every workspace.

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use mbx_cache::StoreError;
use mbx_upstream::RetryPolicy;

mod orchestrator;
mod wiring;

pub use orchestrator::SyncOrchestrator;
pub use wiring::{build_sessions, session_settings};

/// `triggered_by` values used by the binaries.
pub mod trigger {
    pub const OPERATOR: &str = "operator";
    pub const SCHEDULE: &str = "schedule";
    pub const STALE_READ: &str = "stale_read";
    pub const CLI: &str = "cli";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub chunk_size: usize,
    /// Workspace failures in a row before an instance is abandoned.
    pub consecutive_failure_threshold: u32,
    /// Backoff for writing a job's terminal state.
    pub finish_retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: mbx_reconcile::DEFAULT_CHUNK_SIZE,
            consecutive_failure_threshold: 5,
            finish_retry: RetryPolicy::default(),
        }
    }
}

impl SyncSettings {
    pub fn from_config(sync: &mbx_config::SyncConfig) -> Self {
        Self {
            chunk_size: sync.chunk_size,
            consecutive_failure_threshold: sync.consecutive_failure_threshold.max(1),
            finish_retry: RetryPolicy::new(
                sync.retry.max_attempts,
                Duration::from_millis(sync.retry.base_delay_ms),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A job is already running; no new job was created.
    JobAlreadyRunning { running_job_id: Option<Uuid> },
    Config(String),
    Store(StoreError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::JobAlreadyRunning {
                running_job_id: Some(id),
            } => write!(f, "JOB_ALREADY_RUNNING: job {id} is running"),
            SyncError::JobAlreadyRunning {
                running_job_id: None,
            } => write!(f, "JOB_ALREADY_RUNNING"),
            SyncError::Config(msg) => write!(f, "sync config error: {msg}"),
            SyncError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::JobAlreadyRunning { running_job_id } => {
                SyncError::JobAlreadyRunning { running_job_id }
            }
            other => SyncError::Store(other),
        }
    }
}
