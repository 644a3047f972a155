use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;

use mbx_cache::JobStore;
use mbx_config::secrets::resolve_secrets;
use mbx_db::PgStore;
use mbx_schemas::JobStatus;
use mbx_sync::{build_sessions, trigger, SyncOrchestrator, SyncSettings};

use super::{load_config, parse_job_id, print_json};

/// Foreground sync. Secrets are resolved before the DB is touched so a
/// missing key fails fast.
pub async fn run(config_paths: &[String]) -> Result<()> {
    let loaded = load_config(config_paths)?;
    let cfg = loaded.app_config()?;
    let secrets = resolve_secrets(&cfg)?;
    let sessions = build_sessions(&cfg, &secrets)?;

    let pool = mbx_db::connect_from_env().await?;
    let store = Arc::new(PgStore::new(pool));
    let orch = SyncOrchestrator::new(
        sessions,
        store.clone(),
        store,
        SyncSettings::from_config(&cfg.sync),
    )?;

    let started = Utc::now();
    let job = orch.run_to_completion(trigger::CLI).await?;
    eprintln!(
        "sync finished in {}s (config_hash={})",
        (Utc::now() - started).num_seconds(),
        loaded.config_hash
    );
    print_json(&job)?;

    if job.status == JobStatus::Failed {
        bail!(
            "sync job {} failed: {}",
            job.job_id,
            job.error_message.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

pub async fn status(job_id: &str) -> Result<()> {
    let id = parse_job_id(job_id)?;
    let store = PgStore::new(mbx_db::connect_from_env().await?);
    let job = store
        .get(id)
        .await?
        .with_context(|| format!("job {id} not found"))?;
    print_json(&job)
}

pub async fn latest() -> Result<()> {
    let store = PgStore::new(mbx_db::connect_from_env().await?);
    let job = store.latest().await?.context("no sync jobs recorded")?;
    print_json(&job)
}
