use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use mbx_cache::AccountStore;
use mbx_schemas::{AccountKey, SenderAccount, UpstreamAccount, Workspace};

use crate::normalize::to_sender_account;
use crate::{InvalidChunkSize, ReconcileReport, MAX_CHUNK_SIZE};

/// Collapse duplicate keys, keeping the values of the last occurrence at the
/// position of the first. Returns the rows and how many were dropped.
pub fn dedup_latest(rows: Vec<SenderAccount>) -> (Vec<SenderAccount>, usize) {
    let mut index: HashMap<AccountKey, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<SenderAccount> = Vec::with_capacity(rows.len());
    let mut dropped = 0usize;

    for row in rows {
        match index.get(&row.key()) {
            Some(&i) => {
                out[i] = row;
                dropped += 1;
            }
            None => {
                index.insert(row.key(), out.len());
                out.push(row);
            }
        }
    }
    (out, dropped)
}

/// Applies one workspace's fetched batch to the cache.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn AccountStore>,
    chunk_size: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn AccountStore>, chunk_size: usize) -> Result<Self, InvalidChunkSize> {
        if !(1..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(InvalidChunkSize(chunk_size));
        }
        Ok(Self { store, chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Upsert `accounts` as the authoritative list for `workspace`.
    ///
    /// Rows cached for the workspace but missing from `accounts` are left in
    /// place and only counted. A failing chunk is logged and skipped.
    pub async fn reconcile(
        &self,
        workspace: &Workspace,
        accounts: &[UpstreamAccount],
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            fetched: accounts.len(),
            ..ReconcileReport::default()
        };

        let mut rows = Vec::with_capacity(accounts.len());
        for a in accounts {
            match to_sender_account(workspace, a, job_id, now) {
                Ok(row) => rows.push(row),
                Err(reason) => {
                    report.rejected += 1;
                    warn!(
                        instance = %workspace.instance_id,
                        workspace = %workspace.name,
                        upstream_id = ?a.id,
                        ?reason,
                        "rejected upstream account"
                    );
                }
            }
        }

        let (rows, dropped) = dedup_latest(rows);
        report.duplicates_dropped = dropped;

        for (i, chunk) in rows.chunks(self.chunk_size).enumerate() {
            report.chunks_total += 1;
            match self.store.upsert_accounts(chunk).await {
                Ok(n) => report.upserted += n as usize,
                Err(e) => {
                    report.chunks_failed += 1;
                    report.rows_failed += chunk.len();
                    warn!(
                        instance = %workspace.instance_id,
                        workspace = %workspace.name,
                        chunk = i,
                        rows = chunk.len(),
                        error = %e,
                        "chunk upsert failed"
                    );
                }
            }
        }

        match self
            .store
            .count_absent_from_job(&workspace.instance_id, &workspace.name, job_id)
            .await
        {
            Ok(n) => report.absent_retained = n.max(0) as usize,
            Err(e) => warn!(
                workspace = %workspace.name,
                error = %e,
                "absent row count failed"
            ),
        }

        info!(
            instance = %workspace.instance_id,
            workspace = %workspace.name,
            fetched = report.fetched,
            upserted = report.upserted,
            rejected = report.rejected,
            duplicates = report.duplicates_dropped,
            rows_failed = report.rows_failed,
            absent_retained = report.absent_retained,
            "reconciled workspace"
        );
        report
    }
}
