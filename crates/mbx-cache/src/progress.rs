//! Sync job state machine.
//!
//! `running -> completed | failed`. Nothing leaves a terminal state, and
//! `workspaces_completed` only grows, never past `total_workspaces`.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use mbx_schemas::{JobStatus, SyncJob};

use crate::{JobStore, StoreError};

pub const ABANDONED_MESSAGE: &str = "abandoned: process restarted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The job is already `completed` or `failed`.
    Terminal { job_id: Uuid, status: JobStatus },
    /// More workspaces reported than were discovered.
    ExceedsTotal { job_id: Uuid, total: i64 },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::Terminal { job_id, status } => {
                write!(f, "invalid transition: job {job_id} is already {status}")
            }
            TransitionError::ExceedsTotal { job_id, total } => write!(
                f,
                "invalid transition: job {job_id} would exceed total_workspaces={total}"
            ),
        }
    }
}

impl std::error::Error for TransitionError {}

/// In-memory owner of one job's record; every mutation goes through here.
#[derive(Debug, Clone)]
pub struct JobProgress {
    job: SyncJob,
}

impl JobProgress {
    pub fn start(job_id: Uuid, triggered_by: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job: SyncJob::started(job_id, triggered_by, now),
        }
    }

    pub fn job(&self) -> &SyncJob {
        &self.job
    }

    pub fn job_id(&self) -> Uuid {
        self.job.job_id
    }

    pub fn is_terminal(&self) -> bool {
        self.job.status.is_terminal()
    }

    fn ensure_running(&self) -> Result<(), TransitionError> {
        if self.job.status.is_terminal() {
            return Err(TransitionError::Terminal {
                job_id: self.job.job_id,
                status: self.job.status,
            });
        }
        Ok(())
    }

    /// Instances list their workspaces independently; each adds its count.
    pub fn add_workspaces(&mut self, n: i64, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_running()?;
        self.job.total_workspaces += n.max(0);
        self.job.updated_at = now;
        Ok(())
    }

    pub fn begin_workspace(
        &mut self,
        label: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_running()?;
        self.job.current_workspace = Some(label.into());
        self.job.updated_at = now;
        Ok(())
    }

    pub fn workspace_completed(
        &mut self,
        label: impl Into<String>,
        accounts: i64,
        rows_failed: i64,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_running()?;
        if self.job.workspaces_completed + self.job.workspaces_failed >= self.job.total_workspaces {
            return Err(TransitionError::ExceedsTotal {
                job_id: self.job.job_id,
                total: self.job.total_workspaces,
            });
        }
        self.job.workspaces_completed += 1;
        self.job.total_accounts += accounts.max(0);
        self.job.rows_failed += rows_failed.max(0);
        self.job.current_workspace = Some(label.into());
        self.job.updated_at = now;
        Ok(())
    }

    pub fn workspace_failed(
        &mut self,
        label: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_running()?;
        if self.job.workspaces_completed + self.job.workspaces_failed >= self.job.total_workspaces {
            return Err(TransitionError::ExceedsTotal {
                job_id: self.job.job_id,
                total: self.job.total_workspaces,
            });
        }
        let label = label.into();
        self.job.workspaces_failed += 1;
        self.job.current_workspace = Some(label.clone());
        self.job.failed_workspaces.push(label);
        self.job.updated_at = now;
        Ok(())
    }

    /// Terminal `failed` with exactly `message`.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_running()?;
        self.job.status = JobStatus::Failed;
        self.job.error_message = Some(message.into());
        self.close(now);
        Ok(())
    }

    /// Terminal state for a run with no fatal condition: `completed` when
    /// every discovered workspace completed, `failed` naming the rest.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<JobStatus, TransitionError> {
        self.ensure_running()?;
        if self.job.workspaces_completed == self.job.total_workspaces {
            self.job.status = JobStatus::Completed;
            self.job.error_message = None;
        } else {
            self.job.status = JobStatus::Failed;
            self.job.error_message = Some(self.incomplete_message());
        }
        self.close(now);
        Ok(self.job.status)
    }

    fn incomplete_message(&self) -> String {
        let missing = self.job.total_workspaces - self.job.workspaces_completed;
        if self.job.failed_workspaces.is_empty() {
            format!(
                "{missing} of {} workspaces not completed",
                self.job.total_workspaces
            )
        } else {
            format!(
                "{missing} of {} workspaces not completed; failed: {}",
                self.job.total_workspaces,
                self.job.failed_workspaces.join(", ")
            )
        }
    }

    fn close(&mut self, now: DateTime<Utc>) {
        self.job.current_workspace = None;
        self.job.updated_at = now;
        self.job.completed_at = Some(now);
    }
}

/// Fail jobs left `running` by a previous process so the single-running
/// guard does not stay held forever.
pub async fn recover_abandoned_jobs(
    store: &dyn JobStore,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let n = store.fail_abandoned(ABANDONED_MESSAGE, now).await?;
    if n > 0 {
        warn!(jobs = n, "failed abandoned running jobs");
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(total: i64) -> JobProgress {
        let now = Utc::now();
        let mut p = JobProgress::start(Uuid::new_v4(), "operator", now);
        p.add_workspaces(total, now).unwrap();
        p
    }

    #[test]
    fn all_workspaces_done_completes() {
        let now = Utc::now();
        let mut p = started(2);
        p.begin_workspace("maverick/A", now).unwrap();
        p.workspace_completed("maverick/A", 120, 0, now).unwrap();
        p.workspace_completed("maverick/B", 0, 0, now).unwrap();
        assert_eq!(p.finish(now).unwrap(), JobStatus::Completed);
        let j = p.job();
        assert_eq!(j.workspaces_completed, 2);
        assert_eq!(j.total_accounts, 120);
        assert!(j.completed_at.is_some());
        assert!(j.error_message.is_none());
        assert!(j.current_workspace.is_none());
    }

    #[test]
    fn missing_workspaces_fail_with_names() {
        let now = Utc::now();
        let mut p = started(3);
        p.workspace_completed("maverick/A", 5, 0, now).unwrap();
        p.workspace_failed("maverick/B", now).unwrap();
        assert_eq!(p.finish(now).unwrap(), JobStatus::Failed);
        let msg = p.job().error_message.clone().unwrap();
        assert!(msg.starts_with("2 of 3 workspaces not completed"), "{msg}");
        assert!(msg.contains("maverick/B"), "{msg}");
    }

    #[test]
    fn terminal_state_is_final() {
        let now = Utc::now();
        let mut p = started(1);
        p.fail("cancelled", now).unwrap();
        assert_eq!(p.job().error_message.as_deref(), Some("cancelled"));

        assert!(matches!(
            p.workspace_completed("x/y", 1, 0, now),
            Err(TransitionError::Terminal { .. })
        ));
        assert!(p.finish(now).is_err());
        assert!(p.fail("again", now).is_err());
        assert!(p.add_workspaces(1, now).is_err());
        assert_eq!(p.job().error_message.as_deref(), Some("cancelled"));
    }

    #[test]
    fn completed_never_exceeds_total() {
        let now = Utc::now();
        let mut p = started(1);
        p.workspace_completed("a/1", 1, 0, now).unwrap();
        let err = p.workspace_completed("a/2", 1, 0, now).unwrap_err();
        assert!(matches!(err, TransitionError::ExceedsTotal { total: 1, .. }));
        assert_eq!(p.job().workspaces_completed, 1);
    }

    #[test]
    fn empty_run_completes() {
        let now = Utc::now();
        let mut p = started(0);
        assert_eq!(p.finish(now).unwrap(), JobStatus::Completed);
    }
}
