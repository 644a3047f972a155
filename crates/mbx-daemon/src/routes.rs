//! Axum router and all HTTP handlers for mbx-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use mbx_cache::{list_accounts, StoreError, LIST_PAGE_SIZE};
use mbx_schemas::{AccountFilter, SyncJob};
use mbx_sync::{trigger, SyncError};

use crate::{
    api_types::{
        AccountsQuery, AccountsResponse, CancelResponse, ErrorResponse, HealthResponse,
        StartSyncResponse,
    },
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/sync/start", post(sync_start))
        .route("/v1/sync/cancel", post(sync_cancel))
        .route("/v1/sync/latest", get(sync_latest))
        .route("/v1/sync/jobs/:job_id", get(sync_job))
        .route("/v1/accounts", get(accounts))
        .route("/v1/accounts/summary", get(accounts_summary))
        .with_state(state)
}

fn error_response(status: StatusCode, error: &str, message: Option<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            running_job_id: None,
            message,
        }),
    )
        .into_response()
}

fn store_error(e: StoreError) -> Response {
    warn!(error = %e, "store error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "STORE_ERROR",
        Some(e.to_string()),
    )
}

fn sync_error(e: SyncError) -> Response {
    match e {
        SyncError::JobAlreadyRunning { running_job_id } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "JOB_ALREADY_RUNNING".to_string(),
                running_job_id,
                message: None,
            }),
        )
            .into_response(),
        SyncError::Config(msg) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", Some(msg))
        }
        SyncError::Store(e) => store_error(e),
    }
}

fn job_or_404(job: Option<SyncJob>) -> Response {
    match job {
        Some(j) => (StatusCode::OK, Json(j)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "NOT_FOUND", None),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            daemon_uptime_secs: uptime_secs(),
            active_job_id: st.orchestrator.active_job_id(),
        }),
    )
}

// ---------------------------------------------------------------------------
// /v1/sync/*
// ---------------------------------------------------------------------------

pub(crate) async fn sync_start(State(st): State<Arc<AppState>>) -> Response {
    match st.orchestrator.start_sync(trigger::OPERATOR).await {
        Ok(job_id) => {
            info!(%job_id, "sync/start");
            let _ = st
                .bus
                .send(BusMsg::log("INFO", format!("sync job {job_id} started")));
            (StatusCode::ACCEPTED, Json(StartSyncResponse { job_id })).into_response()
        }
        Err(e) => sync_error(e),
    }
}

pub(crate) async fn sync_cancel(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let cancelled = st.orchestrator.cancel();
    info!(cancelled, "sync/cancel");
    if cancelled {
        let _ = st.bus.send(BusMsg::log("WARN", "sync cancellation requested"));
    }
    (StatusCode::OK, Json(CancelResponse { cancelled }))
}

pub(crate) async fn sync_job(
    State(st): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Response {
    match st.orchestrator.get_job_progress(job_id).await {
        Ok(job) => job_or_404(job),
        Err(e) => sync_error(e),
    }
}

pub(crate) async fn sync_latest(State(st): State<Arc<AppState>>) -> Response {
    match st.orchestrator.latest_job().await {
        Ok(job) => job_or_404(job),
        Err(e) => sync_error(e),
    }
}

// ---------------------------------------------------------------------------
// /v1/accounts
// ---------------------------------------------------------------------------

pub(crate) async fn accounts(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AccountsQuery>,
) -> Response {
    let filter = match q.workspace {
        Some(ws) if !ws.trim().is_empty() => AccountFilter::workspace(ws.trim()),
        _ => AccountFilter::all(),
    };

    let listing = match list_accounts(
        st.accounts.as_ref(),
        &filter,
        st.ttl(),
        Utc::now(),
        LIST_PAGE_SIZE,
    )
    .await
    {
        Ok(l) => l,
        Err(e) => return store_error(e),
    };

    let refresh_job_id = if !listing.cached && st.cache.refresh_on_stale {
        match st.orchestrator.start_sync(trigger::STALE_READ).await {
            Ok(job_id) => {
                info!(%job_id, cache_age_minutes = ?listing.cache_age_minutes, "stale read started sync");
                Some(job_id)
            }
            Err(SyncError::JobAlreadyRunning { running_job_id }) => running_job_id,
            Err(e) => {
                warn!(error = %e, "stale read could not start sync");
                None
            }
        }
    } else {
        None
    };

    (
        StatusCode::OK,
        Json(AccountsResponse {
            total: listing.total,
            accounts: listing.accounts,
            cached: listing.cached,
            cache_age_minutes: listing.cache_age_minutes,
            refresh_job_id,
        }),
    )
        .into_response()
}

pub(crate) async fn accounts_summary(State(st): State<Arc<AppState>>) -> Response {
    match st.accounts.summary().await {
        Ok(s) => (StatusCode::OK, Json(s)).into_response(),
        Err(e) => store_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
