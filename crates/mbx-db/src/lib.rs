//! mbx-db
//!
//! Postgres backend for the account cache and the sync job record.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use mbx_cache::StoreError;

mod accounts;
mod jobs;

pub const ENV_DB_URL: &str = "MBX_DATABASE_URL";

/// Name of the partial unique index that allows one running job.
pub const ONE_RUNNING_INDEX: &str = "sync_jobs_one_running";

/// Connect to Postgres using MBX_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_accounts_table: bool,
    pub has_jobs_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let has_accounts_table = table_exists(pool, "sender_accounts").await?;
    let has_jobs_table = table_exists(pool, "sync_jobs").await?;

    Ok(DbStatus {
        ok: one == 1,
        has_accounts_table,
        has_jobs_table,
    })
}

async fn table_exists(pool: &PgPool, name: &str) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = $1
        )
        "#,
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .with_context(|| format!("status table-exists query failed: {name}"))?;
    Ok(exists)
}

/// Implements both [`mbx_cache::AccountStore`] and [`mbx_cache::JobStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                && db_err.code().as_deref() == Some("23505")
        }
        _ => false,
    }
}
