//! mbx-daemon entry point.
//!
//! This file is intentionally thin: it loads config and secrets, connects
//! and migrates the DB, recovers abandoned jobs, builds the orchestrator and
//! starts the HTTP server. Route handlers live in `routes.rs`; shared state
//! and background tasks live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use chrono::Utc;
use mbx_cache::recover_abandoned_jobs;
use mbx_config::{report_unused_keys, secrets::resolve_secrets, UnusedKeyPolicy, ENV_DAEMON_ADDR};
use mbx_daemon::{routes, state};
use mbx_db::PgStore;
use mbx_sync::{build_sessions, SyncOrchestrator, SyncSettings};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = mbx_config::load_from_env().context("load config")?;
    let unused = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "unused config keys");
    }
    let cfg = loaded.app_config()?;
    let secrets = resolve_secrets(&cfg)?;
    info!(
        config_hash = %loaded.config_hash,
        instances = cfg.instances.len(),
        "config loaded"
    );

    let pool = mbx_db::connect_from_env().await?;
    mbx_db::migrate(&pool).await?;
    let store = Arc::new(PgStore::new(pool));

    let recovered = recover_abandoned_jobs(store.as_ref(), Utc::now())
        .await
        .context("recover abandoned jobs")?;
    if recovered > 0 {
        info!(jobs = recovered, "recovered abandoned jobs");
    }

    let sessions = build_sessions(&cfg, &secrets)?;
    let orchestrator = Arc::new(
        SyncOrchestrator::new(
            sessions,
            store.clone(),
            store.clone(),
            SyncSettings::from_config(&cfg.sync),
        )
        .context("build orchestrator")?,
    );

    let shared = Arc::new(state::AppState::new(
        orchestrator,
        store.clone(),
        cfg.cache.clone(),
    ));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_job_forwarder(Arc::clone(&shared));
    if cfg.schedule.enabled {
        let every = Duration::from_secs(cfg.schedule.interval_minutes * 60);
        info!(interval_minutes = cfg.schedule.interval_minutes, "sync schedule enabled");
        state::spawn_schedule(Arc::clone(&shared), every);
    }

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("mbx-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var(ENV_DAEMON_ADDR).ok()?.parse().ok()
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
