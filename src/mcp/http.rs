//! HTTP transport for the approval control plane.
//!
//! Mounts the streamable-HTTP MCP service at `/mcp` — a GET opens the SSE
//! stream, a POST delivers client messages — alongside a `/healthz` probe.
//! The agent child reaches this endpoint through the URL written into its
//! per-session MCP configuration file.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Json;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::server::{AppState, RelayServer};
use crate::{AppError, Result};

/// Start the HTTP control plane on `config.http_port`.
///
/// Each inbound MCP session gets its own [`RelayServer`] sharing the same
/// [`AppState`].
///
/// # Errors
///
/// Returns `AppError::Config` if the server fails to bind or serve.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let port = state.config.http_port;
    let bind = SocketAddr::from(([0, 0, 0, 0], port));

    let service_state = Arc::clone(&state);
    let mcp_service = StreamableHttpService::new(
        move || Ok(RelayServer::new(Arc::clone(&service_state))),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig {
            sse_keep_alive: Some(Duration::from_secs(15)),
            stateful_mode: true,
            ..Default::default()
        },
    );

    let router = axum::Router::new()
        .route("/healthz", get(healthz))
        .nest_service("/mcp", mcp_service);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind control plane on {bind}: {err}")))?;

    info!(%bind, "starting HTTP control plane");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Config(format!("control plane server error: {err}")))?;

    info!("HTTP control plane shut down");
    Ok(())
}

/// Liveness probe.
async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
