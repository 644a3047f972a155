/// Migrating twice must be idempotent, and status must see both tables.
///
/// DB-backed test, skipped if MBX_DATABASE_URL is not set.
#[tokio::test]
async fn migrate_idempotent_on_clean_db() -> anyhow::Result<()> {
    let url = match std::env::var(mbx_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: MBX_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;

    mbx_db::migrate(&pool).await?;
    mbx_db::migrate(&pool).await?;

    let st = mbx_db::status(&pool).await?;
    assert!(st.ok);
    assert!(st.has_accounts_table);
    assert!(st.has_jobs_table);
    Ok(())
}
