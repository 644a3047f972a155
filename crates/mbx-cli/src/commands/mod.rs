//! Command handler modules for mbx-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod accounts;
pub mod sync;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use uuid::Uuid;

use mbx_config::{report_unused_keys, LoadedConfig, UnusedKeyPolicy};

/// Load layered config from `--config` paths, or from `MBX_CONFIG` when none
/// are given. Unused keys are reported on stderr.
pub fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    let loaded = if paths.is_empty() {
        mbx_config::load_from_env()?
    } else {
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        mbx_config::load_layered_yaml(&refs)?
    };
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for p in &report.unused_leaf_pointers {
        eprintln!("warning: unused config key {p}");
    }
    Ok(loaded)
}

pub fn parse_job_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid job_id uuid: {raw}"))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Refuse destructive commands that were not acknowledged with `--yes`.
pub fn require_yes(yes: bool, what: &str, rerun: &str) -> Result<()> {
    if !yes {
        bail!("REFUSING {what}: this deletes cached data. Re-run with: `{rerun} --yes`");
    }
    Ok(())
}
