use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use mbx_config::secrets::ResolvedSecrets;
use mbx_config::{AppConfig, SyncConfig};
use mbx_upstream::{
    CredentialSession, HttpClientConfig, HttpUpstreamClient, RetryPolicy, SessionSettings,
    WorkspaceFilter,
};

pub fn session_settings(sync: &SyncConfig) -> SessionSettings {
    SessionSettings {
        retry: RetryPolicy::new(
            sync.retry.max_attempts,
            Duration::from_millis(sync.retry.base_delay_ms),
        ),
        max_pages_per_workspace: sync.max_pages_per_workspace,
        page_delay: Duration::from_millis(sync.page_delay_ms),
    }
}

/// One HTTP-backed session per configured instance.
///
/// Each session owns its credential's lock, so two instances resolving to
/// the same key on the same upstream are refused: they would switch
/// workspaces under each other.
pub fn build_sessions(
    cfg: &AppConfig,
    secrets: &ResolvedSecrets,
) -> Result<Vec<Arc<CredentialSession>>> {
    let settings = session_settings(&cfg.sync);
    let mut owners: BTreeMap<(String, &str), &str> = BTreeMap::new();
    cfg.instances
        .iter()
        .map(|inst| {
            let api_key = secrets
                .api_key(&inst.id)
                .with_context(|| format!("no resolved api key for instance '{}'", inst.id))?;
            if let Some(other) = owners.insert((inst.upstream_root(), api_key), &inst.id) {
                bail!(
                    "instances '{}' and '{}' share one credential on the same upstream",
                    other,
                    inst.id
                );
            }
            let client = HttpUpstreamClient::new(HttpClientConfig {
                instance_id: inst.id.clone(),
                base_url: inst.base_url.clone(),
                api_key: api_key.to_string(),
                page_size: cfg.sync.page_size,
                timeout: Duration::from_secs(cfg.sync.http_timeout_secs),
            })?;
            let filter =
                WorkspaceFilter::new(&inst.include_workspaces, &inst.exclude_workspaces);
            Ok(Arc::new(
                CredentialSession::new(Arc::new(client), settings).with_filter(filter),
            ))
        })
        .collect()
}
