//! Full-scan account listing.
//!
//! The reported `total` is the number of rows actually materialized, never a
//! separate count query, so the two cannot disagree.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mbx_schemas::{AccountFilter, SenderAccount};

use crate::{assess_freshness, AccountStore, StoreError};

/// Rows requested per keyset page.
pub const LIST_PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountListing {
    pub accounts: Vec<SenderAccount>,
    pub total: i64,
    pub cached: bool,
    pub cache_age_minutes: Option<i64>,
}

/// Cursor through every row matching `filter` and assess staleness over
/// the rows returned.
pub async fn list_accounts(
    store: &dyn AccountStore,
    filter: &AccountFilter,
    ttl: Duration,
    now: DateTime<Utc>,
    page_size: i64,
) -> Result<AccountListing, StoreError> {
    let page_size = page_size.max(1);
    let mut accounts: Vec<SenderAccount> = Vec::new();
    let mut pages = 0u32;

    loop {
        let after = accounts.last().map(SenderAccount::key);
        let page = store.fetch_accounts(filter, after.as_ref(), page_size).await?;
        pages += 1;
        let short = (page.len() as i64) < page_size;
        accounts.extend(page);
        if short {
            break;
        }
    }

    let latest = accounts.iter().map(|a| a.last_synced_at).max();
    let freshness = assess_freshness(latest, now, ttl);
    debug!(
        rows = accounts.len(),
        pages,
        cached = freshness.cached,
        "listed accounts"
    );

    Ok(AccountListing {
        total: accounts.len() as i64,
        accounts,
        cached: freshness.cached,
        cache_age_minutes: freshness.cache_age_minutes,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mbx_schemas::{AccountCounters, AccountKey};
    use uuid::Uuid;

    use super::*;
    use crate::CacheSummary;

    /// Sorted rows served by keyset; counts page requests.
    struct Rows {
        rows: Vec<SenderAccount>,
        fetches: AtomicUsize,
    }

    fn row(ws: &str, email: &str, synced: DateTime<Utc>) -> SenderAccount {
        SenderAccount {
            email_address: email.to_string(),
            workspace_name: ws.to_string(),
            instance_id: "maverick".to_string(),
            external_workspace_id: 1,
            upstream_account_id: None,
            account_name: None,
            status: "Connected".to_string(),
            account_type: None,
            daily_limit: 0,
            tags: Vec::new(),
            email_provider: None,
            reseller: None,
            domain: None,
            counters: AccountCounters::default(),
            is_disconnected: false,
            last_synced_at: synced,
            last_seen_job_id: Uuid::nil(),
        }
    }

    impl Rows {
        fn new(mut rows: Vec<SenderAccount>) -> Self {
            rows.sort_by_key(SenderAccount::key);
            Self {
                rows,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl AccountStore for Rows {
        async fn upsert_accounts(&self, _rows: &[SenderAccount]) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn fetch_accounts(
            &self,
            filter: &AccountFilter,
            after: Option<&AccountKey>,
            limit: i64,
        ) -> Result<Vec<SenderAccount>, StoreError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rows
                .iter()
                .filter(|r| after.map_or(true, |a| &r.key() > a) && filter.matches(r))
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn count_absent_from_job(
            &self,
            _instance_id: &str,
            _workspace_name: &str,
            _job_id: Uuid,
        ) -> Result<i64, StoreError> {
            Ok(0)
        }

        async fn prune_unseen_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn summary(&self) -> Result<CacheSummary, StoreError> {
            Ok(CacheSummary::default())
        }
    }

    #[tokio::test]
    async fn total_counts_every_page_past_the_page_size() {
        let now = Utc::now();
        let store = Rows::new(
            (0..5)
                .map(|i| row("maverick/A", &format!("s{i}@x.io"), now))
                .collect(),
        );

        let l = list_accounts(&store, &AccountFilter::all(), Duration::minutes(30), now, 2)
            .await
            .unwrap();
        assert_eq!(l.total, 5);
        assert_eq!(l.accounts.len(), 5);
        // 2 + 2 + 1: the short page ends the scan.
        assert_eq!(store.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_empty_page() {
        let now = Utc::now();
        let store = Rows::new(
            (0..4)
                .map(|i| row("maverick/A", &format!("s{i}@x.io"), now))
                .collect(),
        );
        let l = list_accounts(&store, &AccountFilter::all(), Duration::minutes(30), now, 2)
            .await
            .unwrap();
        assert_eq!(l.total, 4);
        assert_eq!(store.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn freshness_is_assessed_over_the_filtered_rows() {
        let now = Utc::now();
        let store = Rows::new(vec![
            row("maverick/A", "a@x.io", now - Duration::minutes(5)),
            row("maverick/B", "b@x.io", now - Duration::minutes(90)),
        ]);
        let ttl = Duration::minutes(30);

        let a = list_accounts(&store, &AccountFilter::workspace("maverick/A"), ttl, now, 10)
            .await
            .unwrap();
        assert!(a.cached);
        assert_eq!(a.cache_age_minutes, Some(5));

        let b = list_accounts(&store, &AccountFilter::workspace("maverick/B"), ttl, now, 10)
            .await
            .unwrap();
        assert!(!b.cached);
        assert_eq!(b.total, 1);

        let none = list_accounts(&store, &AccountFilter::workspace("nope"), ttl, now, 10)
            .await
            .unwrap();
        assert_eq!(none.total, 0);
        assert!(!none.cached);
        assert_eq!(none.cache_age_minutes, None);
    }
}
