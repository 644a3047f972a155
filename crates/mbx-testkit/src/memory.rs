use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mbx_cache::{AccountStore, CacheSummary, JobStore, StoreError};
use mbx_schemas::{AccountFilter, AccountKey, JobStatus, SenderAccount, SyncJob};

#[derive(Default)]
struct State {
    accounts: BTreeMap<AccountKey, SenderAccount>,
    /// Insertion order doubles as start order.
    jobs: Vec<SyncJob>,
    fail_workspaces: BTreeSet<String>,
    fail_emails: BTreeSet<String>,
    upsert_calls: usize,
    /// `finish` calls left to fail before writes go through again.
    failing_finishes: usize,
}

/// Both store traits over plain maps, with the same guards the Postgres
/// backend enforces (one running job, running-only updates).
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn lock(m: &Mutex<State>) -> MutexGuard<'_, State> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upsert touching `workspace_name` fails.
    pub fn fail_upserts_for_workspace(&self, workspace_name: &str) {
        lock(&self.state)
            .fail_workspaces
            .insert(workspace_name.to_string());
    }

    /// Any upsert chunk containing `email` fails.
    pub fn fail_upserts_containing(&self, email: &str) {
        lock(&self.state).fail_emails.insert(email.to_string());
    }

    /// The next `n` terminal job writes fail with a backend error.
    pub fn fail_finishes(&self, n: usize) {
        lock(&self.state).failing_finishes = n;
    }

    pub fn upsert_calls(&self) -> usize {
        lock(&self.state).upsert_calls
    }

    pub fn get_account(&self, workspace_name: &str, email: &str) -> Option<SenderAccount> {
        lock(&self.state)
            .accounts
            .get(&AccountKey {
                workspace_name: workspace_name.to_string(),
                email_address: email.to_string(),
            })
            .cloned()
    }

    pub fn all_accounts(&self) -> Vec<SenderAccount> {
        lock(&self.state).accounts.values().cloned().collect()
    }

    /// Seed a row directly, bypassing failure injection.
    pub fn insert_account(&self, row: SenderAccount) {
        lock(&self.state).accounts.insert(row.key(), row);
    }

    /// Seed a job directly, e.g. one left `running` by a dead process.
    pub fn insert_job(&self, job: SyncJob) {
        lock(&self.state).jobs.push(job);
    }

    pub fn jobs(&self) -> Vec<SyncJob> {
        lock(&self.state).jobs.clone()
    }
}

#[async_trait::async_trait]
impl AccountStore for MemoryStore {
    async fn upsert_accounts(&self, rows: &[SenderAccount]) -> Result<u64, StoreError> {
        let mut s = lock(&self.state);
        s.upsert_calls += 1;
        if rows
            .iter()
            .any(|r| s.fail_workspaces.contains(&r.workspace_name) || s.fail_emails.contains(&r.email_address))
        {
            return Err(StoreError::Backend("injected upsert failure".to_string()));
        }
        for r in rows {
            s.accounts.insert(r.key(), r.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn fetch_accounts(
        &self,
        filter: &AccountFilter,
        after: Option<&AccountKey>,
        limit: i64,
    ) -> Result<Vec<SenderAccount>, StoreError> {
        let s = lock(&self.state);
        Ok(s.accounts
            .iter()
            .filter(|(k, _)| after.map_or(true, |a| *k > a))
            .map(|(_, v)| v)
            .filter(|v| filter.matches(v))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_absent_from_job(
        &self,
        instance_id: &str,
        workspace_name: &str,
        job_id: Uuid,
    ) -> Result<i64, StoreError> {
        let s = lock(&self.state);
        Ok(s.accounts
            .values()
            .filter(|v| {
                v.instance_id == instance_id
                    && v.workspace_name == workspace_name
                    && v.last_seen_job_id != job_id
            })
            .count() as i64)
    }

    async fn prune_unseen_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut s = lock(&self.state);
        let before = s.accounts.len();
        s.accounts.retain(|_, v| v.last_synced_at >= cutoff);
        Ok((before - s.accounts.len()) as u64)
    }

    async fn summary(&self) -> Result<CacheSummary, StoreError> {
        let s = lock(&self.state);
        let mut out = CacheSummary::default();
        for v in s.accounts.values() {
            out.total_accounts += 1;
            if v.is_disconnected {
                out.disconnected += 1;
            }
            *out.per_instance.entry(v.instance_id.clone()).or_default() += 1;
            *out.per_workspace.entry(v.workspace_name.clone()).or_default() += 1;
            out.latest_sync_at = out.latest_sync_at.max(Some(v.last_synced_at));
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryStore {
    async fn create_running(&self, job: &SyncJob) -> Result<(), StoreError> {
        let mut s = lock(&self.state);
        if let Some(running) = s.jobs.iter().find(|j| j.status == JobStatus::Running) {
            return Err(StoreError::JobAlreadyRunning {
                running_job_id: Some(running.job_id),
            });
        }
        let mut job = job.clone();
        job.status = JobStatus::Running;
        s.jobs.push(job);
        Ok(())
    }

    async fn save_progress(&self, job: &SyncJob) -> Result<(), StoreError> {
        let mut s = lock(&self.state);
        let stored = s
            .jobs
            .iter_mut()
            .find(|j| j.job_id == job.job_id)
            .ok_or(StoreError::NotFound(job.job_id))?;
        if stored.status != JobStatus::Running {
            return Err(StoreError::NotRunning(job.job_id));
        }
        let status = stored.status;
        *stored = job.clone();
        stored.status = status;
        stored.completed_at = None;
        stored.error_message = None;
        Ok(())
    }

    async fn finish(&self, job: &SyncJob) -> Result<(), StoreError> {
        if !job.status.is_terminal() {
            return Err(StoreError::Backend(format!(
                "finish called with non-terminal status for job {}",
                job.job_id
            )));
        }
        let mut s = lock(&self.state);
        if s.failing_finishes > 0 {
            s.failing_finishes -= 1;
            return Err(StoreError::Backend("injected finish failure".to_string()));
        }
        let stored = s
            .jobs
            .iter_mut()
            .find(|j| j.job_id == job.job_id)
            .ok_or(StoreError::NotFound(job.job_id))?;
        if stored.status != JobStatus::Running {
            return Err(StoreError::NotRunning(job.job_id));
        }
        *stored = job.clone();
        if stored.completed_at.is_none() {
            stored.completed_at = Some(stored.updated_at);
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<SyncJob>, StoreError> {
        let s = lock(&self.state);
        Ok(s.jobs.iter().find(|j| j.job_id == job_id).cloned())
    }

    async fn latest(&self) -> Result<Option<SyncJob>, StoreError> {
        let s = lock(&self.state);
        Ok(s.jobs.iter().max_by_key(|j| j.started_at).cloned())
    }

    async fn running(&self) -> Result<Option<SyncJob>, StoreError> {
        let s = lock(&self.state);
        Ok(s.jobs
            .iter()
            .find(|j| j.status == JobStatus::Running)
            .cloned())
    }

    async fn fail_abandoned(&self, message: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut s = lock(&self.state);
        let mut n = 0;
        for j in s.jobs.iter_mut().filter(|j| j.status == JobStatus::Running) {
            j.status = JobStatus::Failed;
            j.error_message = Some(message.to_string());
            j.current_workspace = None;
            j.updated_at = now;
            j.completed_at = Some(now);
            n += 1;
        }
        Ok(n)
    }
}
