//! A failed write chunk is counted and skipped; the rest of the workspace
//! still lands. A workspace whose every chunk fails is a failed workspace.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use mbx_reconcile::Reconciler;
use mbx_schemas::{JobStatus, Workspace};
use mbx_sync::{trigger, SyncOrchestrator, SyncSettings};
use mbx_testkit::{accounts, session, MemoryStore, ScriptedUpstream};

#[tokio::test]
async fn one_bad_chunk_does_not_sink_the_workspace() {
    let store = Arc::new(MemoryStore::new());
    store.fail_upserts_containing("a3@acme.test");
    let reconciler = Reconciler::new(store.clone(), 2).unwrap();
    let ws = Workspace {
        instance_id: "maverick".into(),
        external_workspace_id: 11,
        name: "Acme".into(),
    };

    let report = reconciler
        .reconcile(&ws, &accounts(1, 7, "a", "acme.test"), Uuid::new_v4(), Utc::now())
        .await;

    assert_eq!(report.chunks_total, 4);
    assert_eq!(report.chunks_failed, 1);
    assert_eq!(report.rows_failed, 2);
    assert_eq!(report.upserted, 5);
    assert!(!report.all_chunks_failed());
    assert!(store.get_account("Acme", "a2@acme.test").is_none());
    assert!(store.get_account("Acme", "a6@acme.test").is_some());
}

#[tokio::test]
async fn partial_chunk_failure_counts_rows_on_the_job() {
    let upstream = Arc::new(
        ScriptedUpstream::new("maverick").with_workspace(11, "Acme", accounts(1, 7, "a", "acme.test")),
    );
    let store = Arc::new(MemoryStore::new());
    store.fail_upserts_containing("a0@acme.test");
    let settings = SyncSettings {
        chunk_size: 2,
        ..SyncSettings::default()
    };
    let orch =
        SyncOrchestrator::new(vec![session(upstream)], store.clone(), store.clone(), settings)
            .unwrap();

    let job = orch.run_to_completion(trigger::OPERATOR).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.rows_failed, 2);
    assert_eq!(job.total_accounts, 5);
}

#[tokio::test]
async fn every_chunk_failing_fails_the_workspace() {
    let upstream = Arc::new(
        ScriptedUpstream::new("maverick")
            .with_workspace(11, "Acme", accounts(1, 4, "a", "acme.test"))
            .with_workspace(12, "Globex", accounts(100, 4, "g", "globex.test")),
    );
    let store = Arc::new(MemoryStore::new());
    store.fail_upserts_for_workspace("Acme");
    let orch = SyncOrchestrator::new(
        vec![session(upstream)],
        store.clone(),
        store.clone(),
        SyncSettings::default(),
    )
    .unwrap();

    let job = orch.run_to_completion(trigger::OPERATOR).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_workspaces, vec!["maverick/Acme".to_string()]);
    assert_eq!(job.workspaces_completed, 1);
}

#[test]
fn invalid_chunk_size_is_a_config_error() {
    let store = Arc::new(MemoryStore::new());
    let settings = SyncSettings {
        chunk_size: 0,
        ..SyncSettings::default()
    };
    assert!(SyncOrchestrator::new(Vec::new(), store.clone(), store, settings).is_err());
}
