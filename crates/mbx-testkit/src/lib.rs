//! mbx-testkit
//!
//! Test doubles shared by scenario tests: an in-memory [`MemoryStore`]
//! implementing both store traits, and a [`ScriptedUpstream`] that behaves
//! like one upstream instance (stateful current workspace, pagination,
//! injectable failures).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use uuid::Uuid;

use mbx_schemas::{SyncJob, UpstreamAccount, UpstreamTag};
use mbx_sync::SyncOrchestrator;
use mbx_upstream::{CredentialSession, RetryPolicy, SessionSettings};

mod memory;
mod upstream;

pub use memory::MemoryStore;
pub use upstream::{Call, ScriptedUpstream};

/// Session settings for tests: no page delay, near-instant retries.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        retry: RetryPolicy::new(3, Duration::from_millis(1)),
        max_pages_per_workspace: 500,
        page_delay: Duration::ZERO,
    }
}

pub fn session(upstream: Arc<ScriptedUpstream>) -> Arc<CredentialSession> {
    Arc::new(CredentialSession::new(upstream, fast_settings()))
}

/// A minimal connected account.
pub fn account(id: i64, email: &str) -> UpstreamAccount {
    UpstreamAccount {
        id: Some(id),
        email: email.to_string(),
        name: Some(format!("Sender {id}")),
        status: Some("Connected".to_string()),
        account_type: Some("google".to_string()),
        daily_limit: Some(30),
        emails_sent_count: Some(id * 3),
        total_replied_count: Some(id % 7),
        unique_replied_count: Some(id % 5),
        bounced_count: Some(0),
        unsubscribed_count: Some(0),
        interested_leads_count: Some(0),
        total_leads_contacted_count: Some(id * 2),
        tags: vec![
            UpstreamTag {
                id: Some(1),
                name: "Provider: Google".to_string(),
            },
            UpstreamTag {
                id: Some(2),
                name: "Reseller: Acme".to_string(),
            },
        ],
    }
}

/// `n` distinct accounts `{prefix}{i}@{domain}` with ids starting at `first_id`.
pub fn accounts(first_id: i64, n: usize, prefix: &str, domain: &str) -> Vec<UpstreamAccount> {
    (0..n as i64)
        .map(|i| account(first_id + i, &format!("{prefix}{i}@{domain}")))
        .collect()
}

/// Poll until the job leaves `running`.
pub async fn wait_for_terminal(
    orch: &SyncOrchestrator,
    job_id: Uuid,
    timeout: Duration,
) -> Result<SyncJob> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(job) = orch.get_job_progress(job_id).await? {
            if job.status.is_terminal() {
                return Ok(job);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("job {job_id} still running after {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
