use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::ServerConfig,
    handlers::{create_secret, get_secret, health, metrics, track_metrics},
    lifecycle::Lifecycle,
    metrics::Metrics,
    store::{Cipher, Store},
    AppState,
};

/// Build the HTTP router around an already-assembled state.
pub fn router(state: AppState, allowed_origins: &str) -> Router {
    let tracked = state.metrics.clone();

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/secrets", post(create_secret))
        .route("/api/secrets/{id}", get(get_secret))
        .with_state(state)
        .layer(middleware::from_fn_with_state(tracked, track_metrics))
        .layer(build_cors(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    info!(database = %cfg.database_path.display(), "opening secret store");
    let store = Store::open(&cfg.database_path).context("open store")?;
    let cipher = Cipher::new(cfg.encryption_key.as_bytes()).context("build cipher")?;
    let metrics = Arc::new(Metrics::new().context("register metrics")?);

    let lifecycle = Arc::new(
        Lifecycle::new(store, cipher, metrics.clone()).with_store_timeout(cfg.store_timeout),
    );
    let reaper = lifecycle.clone().spawn_reaper(cfg.reaper_interval);
    info!(interval = ?cfg.reaper_interval, "reaper started");

    let state = AppState {
        lifecycle,
        metrics,
        base_url: cfg.base_url.clone(),
    };
    let app = router(state, &cfg.allowed_origins);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, base_url = %cfg.base_url, "ares server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reaper.abort();
    info!("server stopped");
    Ok(())
}

fn build_cors(origins: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    if origins.trim() == "*" {
        return cors.allow_origin(Any);
    }
    let origins: Vec<http::HeaderValue> = origins
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            let parsed = s.parse().ok();
            if parsed.is_none() && !s.is_empty() {
                warn!(origin = %s, "ignoring unparseable CORS origin");
            }
            parsed
        })
        .collect();
    cors.allow_origin(origins)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
