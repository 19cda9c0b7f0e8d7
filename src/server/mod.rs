//! HTTP surface: `/chat` and `/health`

pub mod http;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::lifecycle::heartbeat::{Heartbeat, HeartbeatConfig};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
}

/// Build the router with CORS and request tracing.
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", get(http::chat_query_handler).post(http::chat_body_handler))
        .route("/health", get(http::health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C. The heartbeat, when given, runs alongside and is
/// stopped on the same signal.
pub async fn start(
    engine: Arc<Engine>,
    server: &ServerConfig,
    heartbeat: Option<HeartbeatConfig>,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .context("Invalid server address")?;

    let (shutdown_tx, _) = broadcast::channel(1);

    if let Some(config) = heartbeat {
        let mut heartbeat = Heartbeat::new(config, Arc::clone(&engine));
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { heartbeat.run(shutdown_rx).await });
    }

    let app = router(ServerState { engine });
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    println!("Listening on http://{}", addr);
    info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
    })
    .await?;

    let _ = shutdown_tx.send(());
    info!("Server stopped");
    Ok(())
}
