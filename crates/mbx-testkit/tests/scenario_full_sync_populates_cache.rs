//! Two workspaces of 120 accounts behind 50-row pages plus an empty
//! workspace: every account lands in the cache and the job completes.

use std::sync::Arc;

use chrono::{Duration, Utc};

use mbx_cache::{list_accounts, AccountStore, LIST_PAGE_SIZE};
use mbx_schemas::{AccountFilter, JobStatus};
use mbx_sync::{trigger, SyncOrchestrator, SyncSettings};
use mbx_testkit::{accounts, session, Call, MemoryStore, ScriptedUpstream};

#[tokio::test]
async fn all_accounts_across_pages_are_cached() {
    let upstream = Arc::new(
        ScriptedUpstream::new("maverick")
            .with_page_size(50)
            .with_workspace(11, "Acme", accounts(1, 120, "a", "acme.test"))
            .with_workspace(12, "Globex", accounts(1000, 120, "g", "globex.test"))
            .with_workspace(13, "Initech", Vec::new()),
    );
    let store = Arc::new(MemoryStore::new());
    let orch = SyncOrchestrator::new(
        vec![session(upstream.clone())],
        store.clone(),
        store.clone(),
        SyncSettings::default(),
    )
    .unwrap();

    let job = orch.run_to_completion(trigger::OPERATOR).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    assert_eq!(job.total_workspaces, 3);
    assert_eq!(job.workspaces_completed, 3);
    assert_eq!(job.total_accounts, 240);
    assert!(job.completed_at.is_some());
    assert!(job.current_workspace.is_none());

    let summary = store.summary().await.unwrap();
    assert_eq!(summary.total_accounts, 240);
    assert_eq!(summary.per_workspace.get("Acme"), Some(&120));
    assert_eq!(summary.per_workspace.get("Globex"), Some(&120));
    assert_eq!(summary.per_workspace.get("Initech"), None);

    // 120 rows at 50 per page is three pages per populated workspace.
    let acme_fetches = upstream
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Fetch { workspace_id: Some(11), .. }))
        .count();
    assert_eq!(acme_fetches, 3);

    let listing = list_accounts(
        store.as_ref(),
        &AccountFilter::workspace("Acme"),
        Duration::minutes(30),
        Utc::now(),
        LIST_PAGE_SIZE,
    )
    .await
    .unwrap();
    assert_eq!(listing.total, 120);
    assert_eq!(listing.accounts.len(), 120);
    assert!(listing.cached);
}

#[tokio::test]
async fn rows_carry_normalized_fields() {
    let mut accts = accounts(1, 1, "x", "acme.test");
    accts[0].email = "  Mixed.Case@Acme.Test ".to_string();
    let upstream = Arc::new(ScriptedUpstream::new("maverick").with_workspace(11, "Acme", accts));
    let store = Arc::new(MemoryStore::new());
    let orch = SyncOrchestrator::new(
        vec![session(upstream)],
        store.clone(),
        store.clone(),
        SyncSettings::default(),
    )
    .unwrap();

    let job = orch.run_to_completion(trigger::CLI).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let row = store.get_account("Acme", "mixed.case@acme.test").unwrap();
    assert_eq!(row.instance_id, "maverick");
    assert_eq!(row.external_workspace_id, 11);
    assert_eq!(row.domain.as_deref(), Some("acme.test"));
    assert_eq!(row.email_provider.as_deref(), Some("Google"));
    assert_eq!(row.reseller.as_deref(), Some("Acme"));
    assert_eq!(row.last_seen_job_id, job.job_id);
}
