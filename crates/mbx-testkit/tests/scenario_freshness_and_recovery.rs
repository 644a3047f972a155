//! Cache freshness follows the newest row's sync time; jobs left running
//! by a dead process are failed on the next boot.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use mbx_cache::{
    assess_freshness, list_accounts, recover_abandoned_jobs, AccountStore, ABANDONED_MESSAGE,
};
use mbx_schemas::{AccountFilter, JobStatus, SyncJob};
use mbx_sync::{trigger, SyncOrchestrator, SyncSettings};
use mbx_testkit::{accounts, session, MemoryStore, ScriptedUpstream};

#[tokio::test]
async fn listing_goes_stale_after_ttl() {
    let upstream = Arc::new(
        ScriptedUpstream::new("maverick").with_workspace(11, "Acme", accounts(1, 3, "a", "acme.test")),
    );
    let store = Arc::new(MemoryStore::new());
    let orch = SyncOrchestrator::new(
        vec![session(upstream)],
        store.clone(),
        store.clone(),
        SyncSettings::default(),
    )
    .unwrap();
    orch.run_to_completion(trigger::OPERATOR).await.unwrap();

    let ttl = Duration::minutes(30);
    let now = Utc::now();
    let fresh = list_accounts(store.as_ref(), &AccountFilter::all(), ttl, now, 2)
        .await
        .unwrap();
    assert!(fresh.cached);
    assert_eq!(fresh.total, 3);
    assert_eq!(fresh.cache_age_minutes, Some(0));

    let later = now + Duration::minutes(45);
    let stale = list_accounts(store.as_ref(), &AccountFilter::all(), ttl, later, 2)
        .await
        .unwrap();
    assert!(!stale.cached);
    assert_eq!(stale.cache_age_minutes, Some(45));
    assert_eq!(stale.accounts.len(), 3);
}

#[tokio::test]
async fn empty_cache_is_not_fresh() {
    let store = MemoryStore::new();
    let summary = store.summary().await.unwrap();
    let f = assess_freshness(summary.latest_sync_at, Utc::now(), Duration::minutes(30));
    assert!(!f.cached);
    assert_eq!(f.cache_age_minutes, None);
}

#[tokio::test]
async fn abandoned_running_job_is_failed_and_slot_freed() {
    let store = Arc::new(MemoryStore::new());
    let stuck = SyncJob::started(Uuid::new_v4(), trigger::SCHEDULE, Utc::now() - Duration::hours(2));
    store.insert_job(stuck.clone());

    let upstream = Arc::new(ScriptedUpstream::new("maverick"));
    let orch = SyncOrchestrator::new(
        vec![session(upstream)],
        store.clone(),
        store.clone(),
        SyncSettings::default(),
    )
    .unwrap();
    assert!(orch.run_to_completion(trigger::OPERATOR).await.is_err());

    assert_eq!(recover_abandoned_jobs(store.as_ref(), Utc::now()).await.unwrap(), 1);
    let old = orch.get_job_progress(stuck.job_id).await.unwrap().unwrap();
    assert_eq!(old.status, JobStatus::Failed);
    assert_eq!(old.error_message.as_deref(), Some(ABANDONED_MESSAGE));
    assert!(old.completed_at.is_some());

    let job = orch.run_to_completion(trigger::OPERATOR).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_workspaces, 0);
}

#[tokio::test]
async fn prune_removes_only_rows_older_than_cutoff() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let upstream_rows = accounts(1, 4, "a", "acme.test");
    let ws = mbx_schemas::Workspace {
        instance_id: "maverick".into(),
        external_workspace_id: 11,
        name: "Acme".into(),
    };
    for (i, a) in upstream_rows.iter().enumerate() {
        let synced = now - Duration::days(i as i64 * 10);
        let row = mbx_reconcile::normalize::to_sender_account(&ws, a, Uuid::new_v4(), synced).unwrap();
        store.insert_account(row);
    }

    let removed = store
        .prune_unseen_before(now - Duration::days(15))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.all_accounts().len(), 2);
}
