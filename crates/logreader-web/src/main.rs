use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod error;
mod handlers;
mod state;
mod template;
mod upload;

use logreader_core::{GoogleCloudBackend, config_file};
use state::AppState;

pub(crate) fn router(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/", axum::routing::get(handlers::index::index))
        .route("/health", axum::routing::get(handlers::index::health))
        .route(
            "/api/extract-info",
            axum::routing::post(handlers::extract::extract_info),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Request body cap in bytes for a limit configured in MiB.
fn body_limit_bytes(max_upload_mb: usize) -> usize {
    max_upload_mb.saturating_mul(1024 * 1024)
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let config = config_file::resolve()?;
    tracing::debug!(?config, "resolved configuration");

    let body_limit = body_limit_bytes(config.max_upload_mb);
    let port = config.port;
    let factory = Arc::new(GoogleCloudBackend::new(config));
    let state = Arc::new(AppState::new(factory));

    let app = router(state.clone(), body_limit);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let queued background uploads finish before exiting.
    state.shutdown().await;
    Ok(())
}
