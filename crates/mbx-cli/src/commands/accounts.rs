use anyhow::{bail, Result};
use chrono::{Duration, Utc};

use mbx_cache::{list_accounts, AccountStore, LIST_PAGE_SIZE};
use mbx_db::PgStore;
use mbx_schemas::AccountFilter;

use super::{print_json, require_yes};

pub async fn list(workspace: Option<String>, ttl_minutes: i64) -> Result<()> {
    let filter = workspace
        .map(AccountFilter::workspace)
        .unwrap_or_else(AccountFilter::all);
    let store = PgStore::new(mbx_db::connect_from_env().await?);
    let listing = list_accounts(
        &store,
        &filter,
        Duration::minutes(ttl_minutes),
        Utc::now(),
        LIST_PAGE_SIZE,
    )
    .await?;
    print_json(&listing)
}

pub async fn summary() -> Result<()> {
    let store = PgStore::new(mbx_db::connect_from_env().await?);
    print_json(&store.summary().await?)
}

/// Hard-delete rows whose last sync is older than the cutoff. The guard runs
/// before any connection is opened.
pub async fn prune(older_than_days: i64, yes: bool) -> Result<()> {
    if older_than_days < 1 {
        bail!("--older-than-days must be at least 1 (got {older_than_days})");
    }
    require_yes(yes, "PRUNE", &format!("mbx cache prune --older-than-days {older_than_days}"))?;

    let cutoff = Utc::now() - Duration::days(older_than_days);
    let store = PgStore::new(mbx_db::connect_from_env().await?);
    let removed = store.prune_unseen_before(cutoff).await?;
    println!("pruned={removed} cutoff={}", cutoff.to_rfc3339());
    Ok(())
}
