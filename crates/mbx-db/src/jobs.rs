use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use mbx_cache::{JobStore, StoreError};
use mbx_schemas::{JobStatus, SyncJob};

use crate::{backend, is_unique_constraint_violation, PgStore, ONE_RUNNING_INDEX};

const JOB_COLUMNS: &str = "job_id, status, total_workspaces, workspaces_completed, \
     workspaces_failed, failed_workspaces, current_workspace, total_accounts, rows_failed, \
     triggered_by, started_at, updated_at, completed_at, error_message";

fn job_from_row(row: &PgRow) -> Result<SyncJob, StoreError> {
    let status_s: String = row.try_get("status").map_err(backend)?;
    let status = JobStatus::parse(&status_s)
        .ok_or_else(|| StoreError::Backend(format!("unknown job status in db: {status_s}")))?;
    let failed: Json<Vec<String>> = row.try_get("failed_workspaces").map_err(backend)?;

    Ok(SyncJob {
        job_id: row.try_get("job_id").map_err(backend)?,
        status,
        total_workspaces: row.try_get("total_workspaces").map_err(backend)?,
        workspaces_completed: row.try_get("workspaces_completed").map_err(backend)?,
        workspaces_failed: row.try_get("workspaces_failed").map_err(backend)?,
        failed_workspaces: failed.0,
        current_workspace: row.try_get("current_workspace").map_err(backend)?,
        total_accounts: row.try_get("total_accounts").map_err(backend)?,
        rows_failed: row.try_get("rows_failed").map_err(backend)?,
        triggered_by: row.try_get("triggered_by").map_err(backend)?,
        started_at: row.try_get("started_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
        completed_at: row.try_get("completed_at").map_err(backend)?,
        error_message: row.try_get("error_message").map_err(backend)?,
    })
}

impl PgStore {
    async fn fetch_job(&self, sql: &str, job_id: Option<Uuid>) -> Result<Option<SyncJob>, StoreError> {
        let mut q = sqlx::query(sql);
        if let Some(id) = job_id {
            q = q.bind(id);
        }
        let row = q.fetch_optional(&self.pool).await.map_err(backend)?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Zero rows touched by a guarded update: tell missing from terminal.
    async fn not_updated(&self, job_id: Uuid) -> StoreError {
        match self.get(job_id).await {
            Ok(Some(_)) => StoreError::NotRunning(job_id),
            Ok(None) => StoreError::NotFound(job_id),
            Err(e) => e,
        }
    }
}

#[async_trait::async_trait]
impl JobStore for PgStore {
    async fn create_running(&self, job: &SyncJob) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            insert into sync_jobs (
                job_id, status, total_workspaces, workspaces_completed, workspaces_failed,
                failed_workspaces, current_workspace, total_accounts, rows_failed,
                triggered_by, started_at, updated_at
            ) values ($1, 'running', $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.job_id)
        .bind(job.total_workspaces)
        .bind(job.workspaces_completed)
        .bind(job.workspaces_failed)
        .bind(Json(job.failed_workspaces.clone()))
        .bind(job.current_workspace.clone())
        .bind(job.total_accounts)
        .bind(job.rows_failed)
        .bind(job.triggered_by.clone())
        .bind(job.started_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_constraint_violation(&e, ONE_RUNNING_INDEX) => {
                let running = self.running().await?.map(|j| j.job_id);
                Err(StoreError::JobAlreadyRunning {
                    running_job_id: running,
                })
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn save_progress(&self, job: &SyncJob) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            update sync_jobs
            set total_workspaces = $2,
                workspaces_completed = $3,
                workspaces_failed = $4,
                failed_workspaces = $5,
                current_workspace = $6,
                total_accounts = $7,
                rows_failed = $8,
                updated_at = $9
            where job_id = $1 and status = 'running'
            "#,
        )
        .bind(job.job_id)
        .bind(job.total_workspaces)
        .bind(job.workspaces_completed)
        .bind(job.workspaces_failed)
        .bind(Json(job.failed_workspaces.clone()))
        .bind(job.current_workspace.clone())
        .bind(job.total_accounts)
        .bind(job.rows_failed)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if res.rows_affected() == 0 {
            return Err(self.not_updated(job.job_id).await);
        }
        Ok(())
    }

    async fn finish(&self, job: &SyncJob) -> Result<(), StoreError> {
        if !job.status.is_terminal() {
            return Err(StoreError::Backend(format!(
                "finish called with non-terminal status for job {}",
                job.job_id
            )));
        }
        let res = sqlx::query(
            r#"
            update sync_jobs
            set status = $2,
                total_workspaces = $3,
                workspaces_completed = $4,
                workspaces_failed = $5,
                failed_workspaces = $6,
                current_workspace = $7,
                total_accounts = $8,
                rows_failed = $9,
                updated_at = $10,
                completed_at = $11,
                error_message = $12
            where job_id = $1 and status = 'running'
            "#,
        )
        .bind(job.job_id)
        .bind(job.status.as_str())
        .bind(job.total_workspaces)
        .bind(job.workspaces_completed)
        .bind(job.workspaces_failed)
        .bind(Json(job.failed_workspaces.clone()))
        .bind(job.current_workspace.clone())
        .bind(job.total_accounts)
        .bind(job.rows_failed)
        .bind(job.updated_at)
        .bind(job.completed_at.unwrap_or(job.updated_at))
        .bind(job.error_message.clone())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if res.rows_affected() == 0 {
            return Err(self.not_updated(job.job_id).await);
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<SyncJob>, StoreError> {
        self.fetch_job(
            &format!("select {JOB_COLUMNS} from sync_jobs where job_id = $1"),
            Some(job_id),
        )
        .await
    }

    async fn latest(&self) -> Result<Option<SyncJob>, StoreError> {
        self.fetch_job(
            &format!("select {JOB_COLUMNS} from sync_jobs order by started_at desc limit 1"),
            None,
        )
        .await
    }

    async fn running(&self) -> Result<Option<SyncJob>, StoreError> {
        self.fetch_job(
            &format!("select {JOB_COLUMNS} from sync_jobs where status = 'running' limit 1"),
            None,
        )
        .await
    }

    async fn fail_abandoned(&self, message: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            update sync_jobs
            set status = 'failed',
                error_message = $1,
                current_workspace = null,
                updated_at = $2,
                completed_at = $2
            where status = 'running'
            "#,
        )
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(res.rows_affected())
    }
}
