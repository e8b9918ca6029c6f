//! # hookrelay: webhook relay and fan-out engine
//!
//! `hookrelay` accepts HTTP webhooks on behalf of named *sources*, records
//! every delivery durably in PostgreSQL, and asynchronously fans each one
//! out to the source's *actions* — outbound HTTP endpoints or sandboxed
//! JavaScript handlers. It guarantees at-least-once delivery, idempotent
//! ingest, bounded retries with exponential backoff and jitter, optional
//! HMAC signing of outbound payloads, and optional per-source payload
//! transformation via a sandboxed script.
//!
//! ## Architecture
//!
//! The HTTP layer is built on [Axum](https://github.com/tokio-rs/axum);
//! PostgreSQL holds all authoritative state and a Redis stream carries
//! delivery ids from ingest to the workers.
//!
//! ### Data flow
//!
//! ```text
//! producer ── POST /webhooks/{slug} ──▶ ingest
//!    ingest: validate JSON, dedupe on (source, idempotency key),
//!            persist delivery, best-effort XADD to the stream
//!                                   │
//!                deliveries stream  ▼          catch-up: pending poller
//!                        fan-out worker ◀───── retry poller
//!    worker: claim pending → transform → dispatch per action
//!            → record attempts → schedule retries → roll up status
//! ```
//!
//! The stream is an optimization, not a source of truth: ingest persists
//! first, and the pending poller re-injects anything the stream loses. Two
//! workers racing on the same delivery serialize on a conditional
//! `pending → processing` update.
//!
//! The admin JSON API under `/api` manages sources and actions and exposes
//! deliveries and their attempt history for inspection.

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod queue;
pub mod script;
pub mod signing;
pub mod telemetry;
pub mod worker;

use std::future::IntoFuture;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use config::Config;
use queue::Queue;
use worker::FanoutWorker;

/// Ingest body size cap.
const MAX_INGEST_BODY: usize = 1024 * 1024;

/// Bound on graceful teardown after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Queue,
    pub config: Config,
}

/// Get the hookrelay database migrator.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Which pieces of the system this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// HTTP server only (ingest + admin API).
    Api,
    /// Fan-out worker only, with a bare health endpoint.
    Worker,
    /// Everything in one process.
    All,
}

/// Build the application router: health, webhook ingest, and the admin API.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/sources",
            get(api::handlers::sources::list_sources).post(api::handlers::sources::create_source),
        )
        .route(
            "/sources/{slug}",
            get(api::handlers::sources::get_source)
                .patch(api::handlers::sources::update_source)
                .delete(api::handlers::sources::delete_source),
        )
        .route(
            "/sources/{slug}/actions",
            get(api::handlers::actions::list_actions).post(api::handlers::actions::create_action),
        )
        .route(
            "/sources/{slug}/actions/{id}",
            get(api::handlers::actions::get_action)
                .patch(api::handlers::actions::update_action)
                .delete(api::handlers::actions::delete_action),
        )
        .route("/deliveries", get(api::handlers::deliveries::list_deliveries))
        .route("/deliveries/{id}", get(api::handlers::deliveries::get_delivery))
        .route("/deliveries/{id}/attempts", get(api::handlers::deliveries::list_attempts));

    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route(
            "/webhooks/{slug}",
            post(api::handlers::ingest::ingest).layer(DefaultBodyLimit::max(MAX_INGEST_BODY)),
        )
        .nest("/api", api_routes)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
}

/// Run the relay until SIGINT/SIGTERM: connect to Postgres and Redis, run
/// migrations, start the requested components, and tear everything down
/// within the shutdown grace period.
pub async fn run(config: Config, mode: RunMode) -> anyhow::Result<()> {
    let pool = db::connect(&config.database_url).await?;
    migrator().run(&pool).await?;
    tracing::info!("connected to postgres");

    let queue = Queue::connect(&config.redis_url)?;

    let shutdown = CancellationToken::new();
    let mut background: JoinSet<anyhow::Result<()>> = JoinSet::new();

    if matches!(mode, RunMode::Worker | RunMode::All) {
        let fanout = FanoutWorker::new(pool.clone(), queue.clone(), &config)?;
        fanout.start(&mut background, shutdown.clone()).await?;
        tracing::info!(concurrency = config.worker_concurrency, "fan-out worker started");
    }

    let router = match mode {
        RunMode::Worker => Router::new().route("/healthz", get(|| async { "OK" })),
        RunMode::Api | RunMode::All => build_router(AppState {
            db: pool.clone(),
            queue: queue.clone(),
            config: config.clone(),
        }),
    };

    let listener = TcpListener::bind(config.bind_address()).await?;
    tracing::info!(address = %config.bind_address(), "server listening");

    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            token.cancel();
        });
    }

    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    let forced_stop = {
        let token = shutdown.clone();
        async move {
            token.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }
    };

    tokio::select! {
        result = server => result?,
        _ = forced_stop => {
            tracing::warn!("connections did not drain in time, forcing stop");
        }
    }

    // Stop the pollers and consumers; in-flight dispatches are cancelled
    // with them and reconciled by the pollers on the next run.
    shutdown.cancel();
    let drain = async {
        while let Some(result) = background.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Background task failed"),
                Err(e) => tracing::error!(error = %e, "Background task panicked"),
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("background tasks did not stop in time, aborting");
        background.abort_all();
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
