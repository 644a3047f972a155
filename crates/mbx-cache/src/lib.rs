//! mbx-cache
//!
//! Storage seams for the account cache and the sync job record. Backends
//! live elsewhere (`mbx-db` for Postgres, `mbx-testkit` in memory); this
//! crate owns the contracts plus the pure logic on top of them: freshness,
//! full-scan listing and the job state machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mbx_schemas::{AccountFilter, AccountKey, SenderAccount, SyncJob};

pub mod freshness;
pub mod listing;
pub mod progress;

pub use freshness::{assess_freshness, CacheFreshness, DEFAULT_TTL_MINUTES};
pub use listing::{list_accounts, AccountListing, LIST_PAGE_SIZE};
pub use progress::{recover_abandoned_jobs, JobProgress, TransitionError, ABANDONED_MESSAGE};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another job holds the single running slot.
    JobAlreadyRunning { running_job_id: Option<Uuid> },
    /// Progress or finish was written for a job that is no longer running.
    NotRunning(Uuid),
    NotFound(Uuid),
    /// Driver / IO failure.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::JobAlreadyRunning {
                running_job_id: Some(id),
            } => write!(f, "JOB_ALREADY_RUNNING: job {id} is running"),
            StoreError::JobAlreadyRunning {
                running_job_id: None,
            } => write!(f, "JOB_ALREADY_RUNNING"),
            StoreError::NotRunning(id) => write!(f, "job {id} is not running"),
            StoreError::NotFound(id) => write!(f, "job {id} not found"),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Account cache
// ---------------------------------------------------------------------------

/// Post-sync statistics over the whole cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSummary {
    pub total_accounts: i64,
    pub disconnected: i64,
    pub per_instance: BTreeMap<String, i64>,
    pub per_workspace: BTreeMap<String, i64>,
    pub latest_sync_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert or update each row by `(email_address, workspace_name)`.
    /// Rows must be unique by key within one call. Returns rows written.
    async fn upsert_accounts(&self, rows: &[SenderAccount]) -> Result<u64, StoreError>;

    /// One keyset page ordered by `(workspace_name, email_address)`,
    /// strictly after `after`.
    async fn fetch_accounts(
        &self,
        filter: &AccountFilter,
        after: Option<&AccountKey>,
        limit: i64,
    ) -> Result<Vec<SenderAccount>, StoreError>;

    /// Rows of one workspace whose watermark is not `job_id`.
    async fn count_absent_from_job(
        &self,
        instance_id: &str,
        workspace_name: &str,
        job_id: Uuid,
    ) -> Result<i64, StoreError>;

    /// Delete rows last synced before `cutoff`. Operator-only.
    async fn prune_unseen_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn summary(&self) -> Result<CacheSummary, StoreError>;
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `running` job. Fails with
    /// [`StoreError::JobAlreadyRunning`] while any other job is running.
    async fn create_running(&self, job: &SyncJob) -> Result<(), StoreError>;

    /// Overwrite the progress fields of a running job.
    async fn save_progress(&self, job: &SyncJob) -> Result<(), StoreError>;

    /// Write the terminal state. Fails with [`StoreError::NotRunning`] if
    /// the stored job is already terminal.
    async fn finish(&self, job: &SyncJob) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<SyncJob>, StoreError>;

    /// Most recently started job.
    async fn latest(&self) -> Result<Option<SyncJob>, StoreError>;

    async fn running(&self) -> Result<Option<SyncJob>, StoreError>;

    /// Fail every running job with `message`. Returns how many were failed.
    async fn fail_abandoned(&self, message: &str, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
