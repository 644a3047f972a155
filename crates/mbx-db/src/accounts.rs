use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use mbx_cache::{AccountStore, CacheSummary, StoreError};
use mbx_schemas::{AccountCounters, AccountFilter, AccountKey, SenderAccount};

use crate::{backend, PgStore};

const COLUMNS: &str = "email_address, workspace_name, instance_id, external_workspace_id, \
     upstream_account_id, account_name, status, account_type, daily_limit, tags, \
     email_provider, reseller, domain, sent_count, total_replied_count, \
     unique_replied_count, bounced_count, unsubscribed_count, interested_count, \
     leads_contacted_count, is_disconnected, last_synced_at, last_seen_job_id";

const UPDATE_ON_CONFLICT: &str = " on conflict (workspace_name, email_address) do update set \
     instance_id = excluded.instance_id, \
     external_workspace_id = excluded.external_workspace_id, \
     upstream_account_id = excluded.upstream_account_id, \
     account_name = excluded.account_name, \
     status = excluded.status, \
     account_type = excluded.account_type, \
     daily_limit = excluded.daily_limit, \
     tags = excluded.tags, \
     email_provider = excluded.email_provider, \
     reseller = excluded.reseller, \
     domain = excluded.domain, \
     sent_count = excluded.sent_count, \
     total_replied_count = excluded.total_replied_count, \
     unique_replied_count = excluded.unique_replied_count, \
     bounced_count = excluded.bounced_count, \
     unsubscribed_count = excluded.unsubscribed_count, \
     interested_count = excluded.interested_count, \
     leads_contacted_count = excluded.leads_contacted_count, \
     is_disconnected = excluded.is_disconnected, \
     last_synced_at = excluded.last_synced_at, \
     last_seen_job_id = excluded.last_seen_job_id";

fn account_from_row(row: &PgRow) -> Result<SenderAccount, sqlx::Error> {
    let tags: Json<Vec<String>> = row.try_get("tags")?;
    Ok(SenderAccount {
        email_address: row.try_get("email_address")?,
        workspace_name: row.try_get("workspace_name")?,
        instance_id: row.try_get("instance_id")?,
        external_workspace_id: row.try_get("external_workspace_id")?,
        upstream_account_id: row.try_get("upstream_account_id")?,
        account_name: row.try_get("account_name")?,
        status: row.try_get("status")?,
        account_type: row.try_get("account_type")?,
        daily_limit: row.try_get("daily_limit")?,
        tags: tags.0,
        email_provider: row.try_get("email_provider")?,
        reseller: row.try_get("reseller")?,
        domain: row.try_get("domain")?,
        counters: AccountCounters {
            sent: row.try_get("sent_count")?,
            total_replied: row.try_get("total_replied_count")?,
            unique_replied: row.try_get("unique_replied_count")?,
            bounced: row.try_get("bounced_count")?,
            unsubscribed: row.try_get("unsubscribed_count")?,
            interested: row.try_get("interested_count")?,
            leads_contacted: row.try_get("leads_contacted_count")?,
        },
        is_disconnected: row.try_get("is_disconnected")?,
        last_synced_at: row.try_get("last_synced_at")?,
        last_seen_job_id: row.try_get("last_seen_job_id")?,
    })
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &AccountFilter) {
    if let Some(ws) = &filter.workspace {
        qb.push(" and workspace_name = ").push_bind(ws.clone());
    }
    if let Some(inst) = &filter.instance_id {
        qb.push(" and instance_id = ").push_bind(inst.clone());
    }
}

#[async_trait::async_trait]
impl AccountStore for PgStore {
    async fn upsert_accounts(&self, rows: &[SenderAccount]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("insert into sender_accounts ({COLUMNS}) "));
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.email_address.clone())
                .push_bind(r.workspace_name.clone())
                .push_bind(r.instance_id.clone())
                .push_bind(r.external_workspace_id)
                .push_bind(r.upstream_account_id)
                .push_bind(r.account_name.clone())
                .push_bind(r.status.clone())
                .push_bind(r.account_type.clone())
                .push_bind(r.daily_limit)
                .push_bind(Json(r.tags.clone()))
                .push_bind(r.email_provider.clone())
                .push_bind(r.reseller.clone())
                .push_bind(r.domain.clone())
                .push_bind(r.counters.sent)
                .push_bind(r.counters.total_replied)
                .push_bind(r.counters.unique_replied)
                .push_bind(r.counters.bounced)
                .push_bind(r.counters.unsubscribed)
                .push_bind(r.counters.interested)
                .push_bind(r.counters.leads_contacted)
                .push_bind(r.is_disconnected)
                .push_bind(r.last_synced_at)
                .push_bind(r.last_seen_job_id);
        });
        qb.push(UPDATE_ON_CONFLICT);

        let res = qb.build().execute(&self.pool).await.map_err(backend)?;
        Ok(res.rows_affected())
    }

    async fn fetch_accounts(
        &self,
        filter: &AccountFilter,
        after: Option<&AccountKey>,
        limit: i64,
    ) -> Result<Vec<SenderAccount>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("select {COLUMNS} from sender_accounts where true"));
        push_filter(&mut qb, filter);
        if let Some(k) = after {
            qb.push(" and (workspace_name, email_address) > (")
                .push_bind(k.workspace_name.clone())
                .push(", ")
                .push_bind(k.email_address.clone())
                .push(")");
        }
        qb.push(" order by workspace_name, email_address limit ")
            .push_bind(limit);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(backend)?;
        rows.iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)
    }

    async fn count_absent_from_job(
        &self,
        instance_id: &str,
        workspace_name: &str,
        job_id: Uuid,
    ) -> Result<i64, StoreError> {
        let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
            r#"
            select count(*)
            from sender_accounts
            where instance_id = $1
              and workspace_name = $2
              and last_seen_job_id <> $3
            "#,
        )
        .bind(instance_id)
        .bind(workspace_name)
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(n)
    }

    async fn prune_unseen_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let res = sqlx::query("delete from sender_accounts where last_synced_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(res.rows_affected())
    }

    async fn summary(&self) -> Result<CacheSummary, StoreError> {
        let (total_accounts, disconnected, latest_sync_at): (i64, i64, Option<DateTime<Utc>>) =
            sqlx::query_as(
                r#"
                select count(*),
                       count(*) filter (where is_disconnected),
                       max(last_synced_at)
                from sender_accounts
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let per_instance: Vec<(String, i64)> = sqlx::query_as(
            "select instance_id, count(*) from sender_accounts group by instance_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let per_workspace: Vec<(String, i64)> = sqlx::query_as(
            "select workspace_name, count(*) from sender_accounts group by workspace_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(CacheSummary {
            total_accounts,
            disconnected,
            per_instance: per_instance.into_iter().collect::<BTreeMap<_, _>>(),
            per_workspace: per_workspace.into_iter().collect::<BTreeMap<_, _>>(),
            latest_sync_at,
        })
    }
}
