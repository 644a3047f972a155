//! mbx-schemas
//!
//! Shared domain types for the mailbox-inventory sync. No IO, no business
//! rules beyond trivial derivations; every other crate speaks these types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Upstream topology
// ---------------------------------------------------------------------------

/// One upstream email-sending platform.
///
/// The credential is deliberately absent: it is resolved from the environment
/// at startup and owned by the HTTP client for that instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub base_url: String,
}

/// A client tenant on an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Workspace {
    pub instance_id: String,
    pub external_workspace_id: i64,
    pub name: String,
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance_id, self.name)
    }
}

// ---------------------------------------------------------------------------
// Upstream payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTag {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
}

/// One record of `GET /sender-emails`, as the upstream sends it.
///
/// Counters the upstream omits are treated as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamAccount {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
    #[serde(default)]
    pub daily_limit: Option<i64>,
    #[serde(default)]
    pub emails_sent_count: Option<i64>,
    #[serde(default)]
    pub total_replied_count: Option<i64>,
    #[serde(default)]
    pub unique_replied_count: Option<i64>,
    #[serde(default)]
    pub bounced_count: Option<i64>,
    #[serde(default)]
    pub unsubscribed_count: Option<i64>,
    #[serde(default)]
    pub interested_leads_count: Option<i64>,
    #[serde(default)]
    pub total_leads_contacted_count: Option<i64>,
    #[serde(default)]
    pub tags: Vec<UpstreamTag>,
}

// ---------------------------------------------------------------------------
// Cache rows
// ---------------------------------------------------------------------------

/// Identity of a cache row. The same address under two workspaces is two rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub workspace_name: String,
    pub email_address: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCounters {
    pub sent: i64,
    pub total_replied: i64,
    pub unique_replied: i64,
    pub bounced: i64,
    pub unsubscribed: i64,
    pub interested: i64,
    pub leads_contacted: i64,
}

/// A cached sender account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderAccount {
    pub email_address: String,
    pub workspace_name: String,
    pub instance_id: String,
    pub external_workspace_id: i64,
    pub upstream_account_id: Option<i64>,
    pub account_name: Option<String>,
    pub status: String,
    pub account_type: Option<String>,
    pub daily_limit: i64,
    pub tags: Vec<String>,
    pub email_provider: Option<String>,
    pub reseller: Option<String>,
    pub domain: Option<String>,
    pub counters: AccountCounters,
    pub is_disconnected: bool,
    pub last_synced_at: DateTime<Utc>,
    /// Soft-retention watermark: the job that last saw this row upstream.
    pub last_seen_job_id: Uuid,
}

impl SenderAccount {
    pub fn key(&self) -> AccountKey {
        AccountKey {
            workspace_name: self.workspace_name.clone(),
            email_address: self.email_address.clone(),
        }
    }
}

/// Row filter shared by every cache read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFilter {
    pub workspace: Option<String>,
    pub instance_id: Option<String>,
}

impl AccountFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn workspace(name: impl Into<String>) -> Self {
        Self {
            workspace: Some(name.into()),
            instance_id: None,
        }
    }

    pub fn matches(&self, row: &SenderAccount) -> bool {
        if let Some(ws) = &self.workspace {
            if &row.workspace_name != ws {
                return false;
            }
        }
        if let Some(inst) = &self.instance_id {
            if &row.instance_id != inst {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Sync jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted, pollable record of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_workspaces: i64,
    pub workspaces_completed: i64,
    pub workspaces_failed: i64,
    pub failed_workspaces: Vec<String>,
    pub current_workspace: Option<String>,
    pub total_accounts: i64,
    pub rows_failed: i64,
    /// "schedule" | "operator" | "stale_read" | "cli"
    pub triggered_by: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SyncJob {
    /// A fresh `running` job with no workspaces discovered yet.
    pub fn started(job_id: Uuid, triggered_by: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            status: JobStatus::Running,
            total_workspaces: 0,
            workspaces_completed: 0,
            workspaces_failed: 0,
            failed_workspaces: Vec::new(),
            current_workspace: None,
            total_accounts: 0,
            rows_failed: 0,
            triggered_by: triggered_by.into(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_str() {
        for s in [JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("partial"), None);
    }

    #[test]
    fn upstream_account_tolerates_missing_fields() {
        let a: UpstreamAccount =
            serde_json::from_str(r#"{"email":"a@x.io","type":"imap"}"#).unwrap();
        assert_eq!(a.email, "a@x.io");
        assert_eq!(a.account_type.as_deref(), Some("imap"));
        assert!(a.emails_sent_count.is_none());
        assert!(a.tags.is_empty());
    }

    #[test]
    fn filter_matches_workspace_and_instance() {
        let row = SenderAccount {
            email_address: "a@x.io".into(),
            workspace_name: "Acme".into(),
            instance_id: "maverick".into(),
            external_workspace_id: 1,
            upstream_account_id: None,
            account_name: None,
            status: "Connected".into(),
            account_type: None,
            daily_limit: 0,
            tags: vec![],
            email_provider: None,
            reseller: None,
            domain: Some("x.io".into()),
            counters: AccountCounters::default(),
            is_disconnected: false,
            last_synced_at: Utc::now(),
            last_seen_job_id: Uuid::nil(),
        };
        assert!(AccountFilter::all().matches(&row));
        assert!(AccountFilter::workspace("Acme").matches(&row));
        assert!(!AccountFilter::workspace("Other").matches(&row));
        let f = AccountFilter {
            workspace: None,
            instance_id: Some("longrun".into()),
        };
        assert!(!f.matches(&row));
    }
}
