//! Request and response types for all mbx-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mbx_schemas::SenderAccount;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub daemon_uptime_secs: u64,
    pub active_job_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable code: "JOB_ALREADY_RUNNING" | "NOT_FOUND" | "STORE_ERROR" | "CONFIG_ERROR"
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_job_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// /v1/sync/*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSyncResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// /v1/accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsQuery {
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsResponse {
    pub accounts: Vec<SenderAccount>,
    pub total: i64,
    pub cached: bool,
    pub cache_age_minutes: Option<i64>,
    /// Set when this read found the cache stale and a sync is now running.
    pub refresh_job_id: Option<Uuid>,
}
