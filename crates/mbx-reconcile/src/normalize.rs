//! Upstream record -> cache row.
//!
//! Pure, no IO. Derivations:
//! - `email_address`: trimmed, lower-cased; must have a non-empty local part
//!   and domain around a single `@`.
//! - `domain`: the part after `@`.
//! - `email_provider`: first tag naming a known mailbox provider.
//! - `reseller`: first tag naming a known inbox reseller.
//! - `is_disconnected`: status is anything but `Connected`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mbx_schemas::{AccountCounters, SenderAccount, UpstreamAccount, UpstreamTag, Workspace};

/// Stored when the upstream omits `status`.
pub const DEFAULT_STATUS: &str = "Not connected";

const PROVIDER_TAGS: &[&str] = &[
    "Gmail",
    "Outlook",
    "Microsoft",
    "Google",
    "Yahoo",
    "iCloud",
    "AOL",
];

const RESELLER_MARKERS: &[&str] = &["CheapInboxes", "Zapmail", "ScaledMail", "Mailr", "Reseller"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyEmail,
    MalformedEmail,
}

pub fn normalize_email(raw: &str) -> Result<String, RejectReason> {
    let e = raw.trim().to_lowercase();
    if e.is_empty() {
        return Err(RejectReason::EmptyEmail);
    }
    match e.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(e)
        }
        _ => Err(RejectReason::MalformedEmail),
    }
}

/// `Prefix: Value` tags carry their meaning after the colon.
fn tag_value(name: &str) -> &str {
    match name.split_once(':') {
        Some((_, v)) if !v.trim().is_empty() => v.trim(),
        _ => name.trim(),
    }
}

pub fn extract_provider(tags: &[UpstreamTag]) -> Option<String> {
    tags.iter().find_map(|t| {
        let v = tag_value(&t.name);
        PROVIDER_TAGS
            .iter()
            .find(|p| p.eq_ignore_ascii_case(v))
            .map(|p| p.to_string())
    })
}

pub fn extract_reseller(tags: &[UpstreamTag]) -> Option<String> {
    tags.iter().find_map(|t| {
        let lower = t.name.to_lowercase();
        RESELLER_MARKERS
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()))
            .then(|| tag_value(&t.name).to_string())
    })
}

pub fn is_disconnected(status: Option<&str>) -> bool {
    !status
        .map(|s| s.trim().eq_ignore_ascii_case("connected"))
        .unwrap_or(false)
}

/// Build the cache row for one upstream record seen by `job_id` at `now`.
pub fn to_sender_account(
    workspace: &Workspace,
    account: &UpstreamAccount,
    job_id: Uuid,
    now: DateTime<Utc>,
) -> Result<SenderAccount, RejectReason> {
    let email_address = normalize_email(&account.email)?;
    let domain = email_address
        .split_once('@')
        .map(|(_, d)| d.to_string());
    let status = account
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_STATUS)
        .to_string();

    Ok(SenderAccount {
        email_address,
        workspace_name: workspace.name.clone(),
        instance_id: workspace.instance_id.clone(),
        external_workspace_id: workspace.external_workspace_id,
        upstream_account_id: account.id,
        account_name: account.name.clone(),
        is_disconnected: is_disconnected(Some(&status)),
        status,
        account_type: account.account_type.clone(),
        daily_limit: account.daily_limit.unwrap_or(0),
        tags: account
            .tags
            .iter()
            .map(|t| t.name.clone())
            .filter(|n| !n.is_empty())
            .collect(),
        email_provider: extract_provider(&account.tags),
        reseller: extract_reseller(&account.tags),
        domain,
        counters: AccountCounters {
            sent: account.emails_sent_count.unwrap_or(0),
            total_replied: account.total_replied_count.unwrap_or(0),
            unique_replied: account.unique_replied_count.unwrap_or(0),
            bounced: account.bounced_count.unwrap_or(0),
            unsubscribed: account.unsubscribed_count.unwrap_or(0),
            interested: account.interested_leads_count.unwrap_or(0),
            leads_contacted: account.total_leads_contacted_count.unwrap_or(0),
        },
        last_synced_at: now,
        last_seen_job_id: job_id,
    })
}
