//! Shared runtime state for mbx-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The background tasks
//! spawned here (heartbeat, job forwarder, scheduler) only hold clones of
//! the shared handles.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use mbx_cache::AccountStore;
use mbx_config::CacheConfig;
use mbx_schemas::SyncJob;
use mbx_sync::{trigger, SyncError, SyncOrchestrator};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Job(SyncJob),
    LogLine { level: String, msg: String },
}

impl BusMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Job(_) => "job",
            BusMsg::LogLine { .. } => "log",
        }
    }

    pub fn log(level: &str, msg: impl Into<String>) -> Self {
        BusMsg::LogLine {
            level: level.to_string(),
            msg: msg.into(),
        }
    }
}

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub accounts: Arc<dyn AccountStore>,
    pub cache: CacheConfig,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        accounts: Arc<dyn AccountStore>,
        cache: CacheConfig,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "mbx-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            orchestrator,
            accounts,
            cache,
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache.ttl_minutes)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Relay every job progress update from the orchestrator onto the bus.
pub fn spawn_job_forwarder(state: Arc<AppState>) {
    let mut rx = state.orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(job) => {
                    if job.status.is_terminal() {
                        let level = if job.error_message.is_some() { "WARN" } else { "INFO" };
                        let _ = state.bus.send(BusMsg::log(
                            level,
                            format!(
                                "sync job {} {}: {}/{} workspaces, {} accounts",
                                job.job_id,
                                job.status,
                                job.workspaces_completed,
                                job.total_workspaces,
                                job.total_accounts
                            ),
                        ));
                    }
                    let _ = state.bus.send(BusMsg::Job(job));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "job forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Start a sync on every tick. A tick that finds a job running is skipped.
pub fn spawn_schedule(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let first = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(first, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match state.orchestrator.start_sync(trigger::SCHEDULE).await {
                Ok(job_id) => info!(%job_id, "scheduled sync started"),
                Err(SyncError::JobAlreadyRunning { running_job_id }) => {
                    info!(?running_job_id, "scheduled sync skipped: job already running");
                }
                Err(e) => {
                    warn!(error = %e, "scheduled sync failed to start");
                    let _ = state
                        .bus
                        .send(BusMsg::log("ERROR", format!("scheduled sync failed to start: {e}")));
                }
            }
        }
    });
}
