use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use setagaya_core::config::Config;
use setagaya_core::testing::{InMemoryClusterDriver, InMemoryMetadataStore, InMemoryObjectStore};
use setagaya_core::ControllerFacade;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

/// Setagaya controller daemon: loads configuration, builds the facade, and
/// serves `/healthz` + `/metrics` for an external collector.
#[derive(Parser, Debug)]
#[command(name = "setagaya-controller")]
struct Cli {
    /// Path to a TOML config file; environment overrides (`SETAGAYA_` prefix)
    /// always take precedence over it.
    #[arg(long, env = "SETAGAYA_CONFIG")]
    config: Option<String>,

    /// Address the `/healthz` and `/metrics` HTTP surface binds to.
    #[arg(long, env = "SETAGAYA_LISTEN_ADDR", default_value = "0.0.0.0:9090")]
    listen_addr: SocketAddr,
}

#[derive(Clone)]
struct AppState {
    facade: Arc<RwLock<ControllerFacade>>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_from_env(),
    }
    .unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to load configuration, falling back to defaults");
        Config::default()
    });

    tracing::info!(context = %config.context, distributed_mode = config.distributed_mode, "starting setagaya-controller");

    // Standalone/demo mode: no real Postgres/Kubernetes/object-store backend
    // is wired in here, so the daemon runs against the in-memory reference
    // implementations. A deployment with real backends constructs the
    // facade the same way, supplying its own trait objects instead.
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let cluster = Arc::new(InMemoryClusterDriver::new());
    let object_store = Arc::new(InMemoryObjectStore::new());

    let mut facade = ControllerFacade::new(config.clone(), metadata, cluster, object_store)
        .expect("failed to construct controller facade");

    if config.distributed_mode {
        facade.start_background_loops();
    }

    let state = AppState { facade: Arc::new(RwLock::new(facade)) };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(cli.listen_addr)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {}: {err}", cli.listen_addr));
    tracing::info!(addr = %cli.listen_addr, "listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        tracing::error!(error = %err, "http server exited with an error");
    }

    facade_shutdown(&state).await;
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let families = state.facade.read().await.gather_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buffer).into_owned())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
    tracing::info!("shutdown signal received");
}

async fn facade_shutdown(state: &AppState) {
    state.facade.write().await.shutdown().await;
}
