//! Typed view of the merged config tree.
//!
//! Every section except `instances` is optional and falls back to the
//! defaults below. [`AppConfig::validate`] runs on every load.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub instances: Vec<InstanceConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// One upstream platform. `api_key_env` is the NAME of the environment
/// variable holding the credential, never the credential itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,
    pub base_url: String,
    pub api_key_env: String,
    /// Workspace names to sync. Empty means every listed workspace.
    #[serde(default)]
    pub include_workspaces: Vec<String>,
    #[serde(default)]
    pub exclude_workspaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// `per_page` sent on every account page request.
    pub page_size: u32,
    pub max_pages_per_workspace: u32,
    pub page_delay_ms: u64,
    /// Rows per upsert statement.
    pub chunk_size: usize,
    /// Workspace failures in a row before the instance is abandoned.
    pub consecutive_failure_threshold: u32,
    pub http_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages_per_workspace: 500,
            page_delay_ms: 100,
            chunk_size: 250,
            consecutive_failure_threshold: 5,
            http_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_minutes: i64,
    /// A stale read kicks off a background sync when true.
    pub refresh_on_stale: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 30,
            refresh_on_stale: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 30,
        }
    }
}

impl InstanceConfig {
    /// `base_url` compared case-insensitively and without trailing slashes.
    pub fn upstream_root(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_ascii_lowercase()
    }
}

impl AppConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let cfg: AppConfig = serde_json::from_value(config_json.clone())
            .context("CONFIG_INVALID: config does not match the expected shape")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instances.is_empty() {
            bail!("CONFIG_INVALID: at least one instance is required");
        }

        let mut seen = BTreeSet::new();
        let mut credentials = BTreeSet::new();
        for inst in &self.instances {
            if inst.id.trim().is_empty() {
                bail!("CONFIG_INVALID: instance id must not be blank");
            }
            if !seen.insert(inst.id.as_str()) {
                bail!("CONFIG_INVALID: duplicate instance id '{}'", inst.id);
            }
            if !(inst.base_url.starts_with("http://") || inst.base_url.starts_with("https://")) {
                bail!(
                    "CONFIG_INVALID: instance '{}' base_url must be http(s)",
                    inst.id
                );
            }
            if inst.api_key_env.trim().is_empty() {
                bail!(
                    "CONFIG_INVALID: instance '{}' api_key_env must name an env var",
                    inst.id
                );
            }
            let names = inst.include_workspaces.iter().chain(&inst.exclude_workspaces);
            if names.into_iter().any(|n| n.trim().is_empty()) {
                bail!(
                    "CONFIG_INVALID: instance '{}' workspace filter contains a blank name",
                    inst.id
                );
            }
            // One credential owns one "current workspace" upstream.
            if !credentials.insert((inst.upstream_root(), inst.api_key_env.trim())) {
                bail!(
                    "CONFIG_INVALID: instance '{}' reuses the base_url and api_key_env of another instance",
                    inst.id
                );
            }
        }

        let s = &self.sync;
        if !(1..=1000).contains(&s.page_size) {
            bail!("CONFIG_INVALID: sync.page_size must be in 1..=1000");
        }
        if s.max_pages_per_workspace == 0 {
            bail!("CONFIG_INVALID: sync.max_pages_per_workspace must be >= 1");
        }
        if !(1..=1000).contains(&s.chunk_size) {
            bail!("CONFIG_INVALID: sync.chunk_size must be in 1..=1000");
        }
        if s.consecutive_failure_threshold == 0 {
            bail!("CONFIG_INVALID: sync.consecutive_failure_threshold must be >= 1");
        }
        if s.http_timeout_secs == 0 {
            bail!("CONFIG_INVALID: sync.http_timeout_secs must be >= 1");
        }
        if s.retry.max_attempts == 0 {
            bail!("CONFIG_INVALID: sync.retry.max_attempts must be >= 1");
        }
        if self.cache.ttl_minutes <= 0 {
            bail!("CONFIG_INVALID: cache.ttl_minutes must be > 0");
        }
        if self.schedule.interval_minutes == 0 {
            bail!("CONFIG_INVALID: schedule.interval_minutes must be > 0");
        }
        Ok(())
    }
}
