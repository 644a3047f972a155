//! Upsert-by-key and keyset listing against Postgres.
//!
//! DB-backed test, skipped if MBX_DATABASE_URL is not set. Each run uses a
//! fresh workspace name so runs never see each other's rows.

use chrono::{Duration, Utc};
use uuid::Uuid;

use mbx_cache::{list_accounts, AccountStore};
use mbx_db::PgStore;
use mbx_schemas::{AccountCounters, AccountFilter, SenderAccount};

fn row(ws: &str, email: &str, sent: i64, job: Uuid) -> SenderAccount {
    SenderAccount {
        email_address: email.into(),
        workspace_name: ws.into(),
        instance_id: "pgtest".into(),
        external_workspace_id: 1,
        upstream_account_id: None,
        account_name: Some("Name".into()),
        status: "Connected".into(),
        account_type: Some("google".into()),
        daily_limit: 30,
        tags: vec!["Gmail".into()],
        email_provider: Some("Gmail".into()),
        reseller: None,
        domain: email.split_once('@').map(|(_, d)| d.to_string()),
        counters: AccountCounters {
            sent,
            ..AccountCounters::default()
        },
        is_disconnected: false,
        last_synced_at: Utc::now(),
        last_seen_job_id: job,
    }
}

async fn store() -> anyhow::Result<Option<PgStore>> {
    let url = match std::env::var(mbx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: MBX_DATABASE_URL not set");
            return Ok(None);
        }
    };
    let pool = mbx_db::connect(&url).await?;
    mbx_db::migrate(&pool).await?;
    Ok(Some(PgStore::new(pool)))
}

#[tokio::test]
async fn upsert_updates_in_place() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let ws = format!("ws-{}", Uuid::new_v4());
    let job1 = Uuid::new_v4();
    let job2 = Uuid::new_v4();

    store
        .upsert_accounts(&[row(&ws, "a@x.io", 1, job1), row(&ws, "b@x.io", 1, job1)])
        .await?;
    store.upsert_accounts(&[row(&ws, "a@x.io", 7, job2)]).await?;

    let filter = AccountFilter::workspace(ws.clone());
    let rows = store.fetch_accounts(&filter, None, 10).await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].email_address, "a@x.io");
    assert_eq!(rows[0].counters.sent, 7);
    assert_eq!(rows[0].last_seen_job_id, job2);
    assert_eq!(rows[0].tags, vec!["Gmail".to_string()]);

    // b was not seen by job2 and is retained.
    assert_eq!(store.count_absent_from_job("pgtest", &ws, job2).await?, 1);
    Ok(())
}

#[tokio::test]
async fn keyset_listing_returns_every_row() -> anyhow::Result<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let ws = format!("ws-{}", Uuid::new_v4());
    let job = Uuid::new_v4();
    let rows: Vec<_> = (0..25)
        .map(|i| row(&ws, &format!("user{i:02}@x.io"), i, job))
        .collect();
    store.upsert_accounts(&rows).await?;

    let listing = list_accounts(
        &store,
        &AccountFilter::workspace(ws.clone()),
        Duration::minutes(30),
        Utc::now(),
        7,
    )
    .await?;
    assert_eq!(listing.total, 25);
    assert_eq!(listing.accounts.len(), 25);
    assert!(listing.cached);
    Ok(())
}
