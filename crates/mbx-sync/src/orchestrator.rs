use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use mbx_cache::{AccountStore, JobProgress, JobStore, StoreError};
use mbx_reconcile::{ReconcileReport, Reconciler};
use mbx_schemas::{SyncJob, Workspace};
use mbx_upstream::{CredentialSession, UpstreamError};

use crate::{SyncError, SyncSettings};

const CANCELLED: &str = "cancelled";
const UPDATE_BUFFER: usize = 256;

struct ActiveJob {
    job_id: Uuid,
    cancel: CancellationToken,
    /// Terminal state the store refused; written before the next job starts.
    unpersisted: Option<SyncJob>,
}

/// Drives sync jobs. Cheap to share behind an `Arc`; at most one job runs
/// at a time, enforced by the job store.
pub struct SyncOrchestrator {
    sessions: Vec<Arc<CredentialSession>>,
    jobs: Arc<dyn JobStore>,
    reconciler: Reconciler,
    settings: SyncSettings,
    updates: broadcast::Sender<SyncJob>,
    active: StdMutex<Option<ActiveJob>>,
}

/// How one instance's workspace loop ended.
enum InstanceEnd {
    Finished,
    /// Stopped at a workspace boundary with workspaces left.
    Cancelled,
    Fatal(String),
}

enum WorkspaceOutcome {
    Done(ReconcileReport),
    Failed(String),
    Fatal(String),
}

impl SyncOrchestrator {
    pub fn new(
        sessions: Vec<Arc<CredentialSession>>,
        accounts: Arc<dyn AccountStore>,
        jobs: Arc<dyn JobStore>,
        settings: SyncSettings,
    ) -> Result<Self, SyncError> {
        let reconciler = Reconciler::new(accounts, settings.chunk_size)
            .map_err(|e| SyncError::Config(e.to_string()))?;
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Ok(Self {
            sessions,
            jobs,
            reconciler,
            settings,
            updates,
            active: StdMutex::new(None),
        })
    }

    /// Every persisted progress update, terminal state included.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncJob> {
        self.updates.subscribe()
    }

    /// Create a running job and drive it on a spawned task.
    pub async fn start_sync(self: &Arc<Self>, triggered_by: &str) -> Result<Uuid, SyncError> {
        let (progress, cancel) = self.create_job(triggered_by).await?;
        let job_id = progress.job_id();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.drive(progress, cancel).await;
        });
        Ok(job_id)
    }

    /// Create a running job and drive it on the current task. Fails with
    /// [`SyncError::Store`] when the terminal state could not be persisted.
    pub async fn run_to_completion(&self, triggered_by: &str) -> Result<SyncJob, SyncError> {
        let (progress, cancel) = self.create_job(triggered_by).await?;
        Ok(self.drive(progress, cancel).await?)
    }

    pub async fn get_job_progress(&self, job_id: Uuid) -> Result<Option<SyncJob>, SyncError> {
        Ok(self.jobs.get(job_id).await?)
    }

    pub async fn latest_job(&self) -> Result<Option<SyncJob>, SyncError> {
        Ok(self.jobs.latest().await?)
    }

    /// Job currently driven by this process, if any.
    pub fn active_job_id(&self) -> Option<Uuid> {
        self.lock_active().as_ref().map(|a| a.job_id)
    }

    /// Ask the active job to stop at the next workspace boundary.
    pub fn cancel(&self) -> bool {
        match self.lock_active().as_ref() {
            Some(a) if a.unpersisted.is_none() => {
                info!(job_id = %a.job_id, "cancellation requested");
                a.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveJob>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn create_job(
        &self,
        triggered_by: &str,
    ) -> Result<(JobProgress, CancellationToken), SyncError> {
        self.flush_unpersisted().await?;

        let progress = JobProgress::start(Uuid::new_v4(), triggered_by, Utc::now());
        self.jobs.create_running(progress.job()).await?;

        let cancel = CancellationToken::new();
        *self.lock_active() = Some(ActiveJob {
            job_id: progress.job_id(),
            cancel: cancel.clone(),
            unpersisted: None,
        });
        info!(job_id = %progress.job_id(), triggered_by, "sync job started");
        let _ = self.updates.send(progress.job().clone());
        Ok((progress, cancel))
    }

    async fn drive(
        &self,
        progress: JobProgress,
        cancel: CancellationToken,
    ) -> Result<SyncJob, StoreError> {
        let job_id = progress.job_id();
        let progress = Mutex::new(progress);

        // Every instance lists before any workspace runs, so
        // `total_workspaces` is final by the first completion.
        let listed: Vec<Result<Vec<Workspace>, String>> =
            join_all(self.sessions.iter().map(|s| self.list_instance(s, job_id))).await;
        {
            let total: usize = listed.iter().flatten().map(Vec::len).sum();
            let mut p = progress.lock().await;
            if let Err(e) = p.add_workspaces(total as i64, Utc::now()) {
                warn!(%job_id, error = %e, "progress update rejected");
            }
            self.persist(&p).await;
        }

        let (progress_ref, cancel_ref) = (&progress, &cancel);
        let ends: Vec<InstanceEnd> = join_all(self.sessions.iter().zip(listed).map(
            |(session, listed)| async move {
                match listed {
                    Ok(workspaces) => {
                        self.run_instance(session, &workspaces, job_id, progress_ref, cancel_ref)
                            .await
                    }
                    Err(msg) => InstanceEnd::Fatal(msg),
                }
            },
        ))
        .await;

        let cancelled = ends.iter().any(|e| matches!(e, InstanceEnd::Cancelled));
        let fatals: Vec<String> = ends
            .into_iter()
            .filter_map(|e| match e {
                InstanceEnd::Fatal(msg) => Some(msg),
                _ => None,
            })
            .collect();

        let mut p = progress.lock().await;
        let now = Utc::now();
        let outcome = if cancelled {
            p.fail(CANCELLED, now)
        } else if !fatals.is_empty() {
            let mut msg = fatals.join("; ");
            if !p.job().failed_workspaces.is_empty() {
                msg.push_str("; failed workspaces: ");
                msg.push_str(&p.job().failed_workspaces.join(", "));
            }
            p.fail(msg, now)
        } else {
            p.finish(now).map(|_| ())
        };
        if let Err(e) = outcome {
            error!(%job_id, error = %e, "job finalization rejected");
        }

        let job = p.job().clone();
        let persisted = self.persist_terminal(&job).await;
        match &persisted {
            Ok(()) => self.clear_active(job_id),
            Err(e) => {
                error!(
                    %job_id,
                    error = %e,
                    "terminal job state not persisted, retrying before the next job"
                );
                self.park_unpersisted(&job);
            }
        }
        let _ = self.updates.send(job.clone());

        info!(
            %job_id,
            status = %job.status,
            workspaces_completed = job.workspaces_completed,
            total_workspaces = job.total_workspaces,
            total_accounts = job.total_accounts,
            "sync job finished"
        );
        persisted.map(|()| job)
    }

    /// `finish` with backoff on backend errors. A job the store already
    /// holds as terminal counts as written.
    async fn persist_terminal(&self, job: &SyncJob) -> Result<(), StoreError> {
        let policy = self.settings.finish_retry;
        let mut attempt = 1;
        loop {
            match self.jobs.finish(job).await {
                Ok(()) => return Ok(()),
                Err(StoreError::NotRunning(_)) => {
                    warn!(job_id = %job.job_id, "job already terminal in store");
                    return Ok(());
                }
                Err(e @ StoreError::Backend(_)) if attempt < policy.max_attempts => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        job_id = %job.job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "terminal job write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn park_unpersisted(&self, job: &SyncJob) {
        if let Some(a) = self.lock_active().as_mut() {
            if a.job_id == job.job_id {
                a.unpersisted = Some(job.clone());
            }
        }
    }

    /// Write a parked terminal state so the store releases the running slot.
    async fn flush_unpersisted(&self) -> Result<(), SyncError> {
        let parked = self
            .lock_active()
            .as_ref()
            .and_then(|a| a.unpersisted.clone());
        let Some(job) = parked else {
            return Ok(());
        };
        self.persist_terminal(&job).await?;
        info!(job_id = %job.job_id, status = %job.status, "persisted parked terminal job state");
        self.clear_active(job.job_id);
        Ok(())
    }

    fn clear_active(&self, job_id: Uuid) {
        let mut active = self.lock_active();
        if active.as_ref().map(|a| a.job_id) == Some(job_id) {
            *active = None;
        }
    }

    async fn persist(&self, progress: &JobProgress) {
        if let Err(e) = self.jobs.save_progress(progress.job()).await {
            warn!(job_id = %progress.job_id(), error = %e, "failed to persist job progress");
        }
        let _ = self.updates.send(progress.job().clone());
    }

    /// Workspaces of one instance, or the fatal message when listing failed.
    async fn list_instance(
        &self,
        session: &CredentialSession,
        job_id: Uuid,
    ) -> Result<Vec<Workspace>, String> {
        let instance = session.instance_id();
        session.list_workspaces().await.map_err(|e| {
            error!(%job_id, instance, error = %e, "workspace list failed");
            format!("instance {instance}: workspace list failed: {e}")
        })
    }

    async fn run_instance(
        &self,
        session: &CredentialSession,
        workspaces: &[Workspace],
        job_id: Uuid,
        progress: &Mutex<JobProgress>,
        cancel: &CancellationToken,
    ) -> InstanceEnd {
        let instance = session.instance_id();
        let threshold = self.settings.consecutive_failure_threshold;
        let mut consecutive = 0u32;

        for ws in workspaces {
            if cancel.is_cancelled() {
                info!(%job_id, instance, "cancelled at workspace boundary");
                return InstanceEnd::Cancelled;
            }
            let label = ws.to_string();
            {
                let mut p = progress.lock().await;
                if p.begin_workspace(label.clone(), Utc::now()).is_ok() {
                    self.persist(&p).await;
                }
            }

            let outcome = self.sync_workspace(session, ws, job_id).await;

            let mut p = progress.lock().await;
            let now = Utc::now();
            let fatal = match outcome {
                WorkspaceOutcome::Done(report) => {
                    consecutive = 0;
                    if let Err(e) = p.workspace_completed(
                        label.clone(),
                        report.upserted as i64,
                        report.rows_failed as i64,
                        now,
                    ) {
                        warn!(%job_id, workspace = %label, error = %e, "progress update rejected");
                    }
                    None
                }
                WorkspaceOutcome::Failed(reason) => {
                    consecutive += 1;
                    warn!(
                        %job_id,
                        instance,
                        workspace = %label,
                        consecutive,
                        reason = %reason,
                        "workspace failed, continuing"
                    );
                    let _ = p.workspace_failed(label.clone(), now);
                    (consecutive >= threshold).then(|| {
                        format!("instance {instance}: {consecutive} consecutive workspace failures")
                    })
                }
                WorkspaceOutcome::Fatal(reason) => {
                    error!(%job_id, instance, workspace = %label, reason = %reason, "fatal upstream error");
                    let _ = p.workspace_failed(label.clone(), now);
                    Some(format!("instance {instance}: {reason}"))
                }
            };
            self.persist(&p).await;
            if let Some(msg) = fatal {
                return InstanceEnd::Fatal(msg);
            }
        }
        InstanceEnd::Finished
    }

    async fn sync_workspace(
        &self,
        session: &CredentialSession,
        ws: &Workspace,
        job_id: Uuid,
    ) -> WorkspaceOutcome {
        let fetched: Result<_, UpstreamError> = async {
            let scope = session.enter(ws).await?;
            scope.fetch_all().await
        }
        .await;

        let accounts = match fetched {
            Ok(a) => a,
            Err(e) if e.is_fatal() => return WorkspaceOutcome::Fatal(e.to_string()),
            Err(e) => return WorkspaceOutcome::Failed(e.to_string()),
        };

        let report = self
            .reconciler
            .reconcile(ws, &accounts, job_id, Utc::now())
            .await;
        if report.all_chunks_failed() {
            return WorkspaceOutcome::Failed(format!(
                "all {} chunk writes failed",
                report.chunks_total
            ));
        }
        WorkspaceOutcome::Done(report)
    }
}
