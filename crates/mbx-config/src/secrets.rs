//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (`api_key_env` per instance).
//! - Callers invoke [`resolve_secrets`] once at startup and pass the returned
//!   [`ResolvedSecrets`] into constructors.
//! - `Debug` output is redacted.
//! - Error messages reference the env var **NAME**, never the value.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::AppConfig;

/// API keys keyed by instance id. **Values are redacted in `Debug` output.**
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    api_keys: BTreeMap<String, String>,
}

impl ResolvedSecrets {
    pub fn api_key(&self, instance_id: &str) -> Option<&str> {
        self.api_keys.get(instance_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.api_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.api_keys.is_empty()
    }
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut m = f.debug_map();
        for k in self.api_keys.keys() {
            m.entry(k, &"<REDACTED>");
        }
        m.finish()
    }
}

/// Resolve every instance's API key from the process environment.
///
/// # Errors
/// Fails closed with the **env var NAME** of the first instance whose key is
/// unset or blank.
pub fn resolve_secrets(cfg: &AppConfig) -> Result<ResolvedSecrets> {
    resolve_secrets_with(cfg, |name| std::env::var(name).ok())
}

/// Same as [`resolve_secrets`] with an injectable lookup.
pub fn resolve_secrets_with<F>(cfg: &AppConfig, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let mut api_keys = BTreeMap::new();
    for inst in &cfg.instances {
        let var = inst.api_key_env.trim();
        match lookup(var) {
            Some(v) if !v.trim().is_empty() => {
                api_keys.insert(inst.id.clone(), v.trim().to_string());
            }
            _ => bail!(
                "SECRETS_MISSING instance={}: required env var '{}' is not set or empty",
                inst.id,
                var,
            ),
        }
    }
    Ok(ResolvedSecrets { api_keys })
}
