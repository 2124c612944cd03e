//! HTTP and WebSocket surface over the session registry, store, and event hub.
//!
//! REST routes live in [`api`], the live event stream in [`ws`]. There is no
//! authentication layer; bind to loopback unless a proxy sits in front.

pub mod api;
pub mod ws;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

use crate::agent::ConnectionMonitor;
use crate::config::GatewayConfig;
use crate::events::SessionEventHub;
use crate::persistence::SessionStore;
use crate::relay::SessionRelay;
use crate::sessions::SessionRegistry;
use crate::tools::ToolRegistry;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<SessionRelay>,
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<dyn SessionStore>,
    pub hub: Arc<SessionEventHub>,
    pub connection: Arc<dyn ConnectionMonitor>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    /// State whose registry and hub are the ones `relay` drives.
    pub fn new(
        relay: Arc<SessionRelay>,
        store: Arc<dyn SessionStore>,
        connection: Arc<dyn ConnectionMonitor>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            registry: relay.registry().clone(),
            hub: relay.hub().clone(),
            relay,
            store,
            connection,
            tools,
        }
    }
}

/// Build the router with the request timeout and body limit from `config`.
pub fn router(state: AppState, config: &GatewayConfig) -> Router {
    let api = Router::new()
        .route("/api/status", get(api::handle_status))
        .route(
            "/api/client-config",
            get(api::handle_client_config_get).put(api::handle_client_config_put),
        )
        .route("/api/tools", get(api::handle_tools))
        .route("/api/sessions", get(api::handle_sessions_list))
        .route(
            "/api/sessions/{id}",
            get(api::handle_session_get).delete(api::handle_session_delete),
        )
        .route(
            "/api/sessions/{id}/messages",
            get(api::handle_messages_get).post(api::handle_prompt_send),
        )
        .route("/api/sessions/{id}/summary", put(api::handle_summary_put))
        .route("/api/sessions/{id}/abort", post(api::handle_abort))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )));

    // The WebSocket route is long-lived and stays outside the timeout.
    Router::new()
        .merge(api)
        .route("/ws/sessions/{id}", get(ws::handle_session_socket))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .with_state(state)
}

/// Bind `config.host:config.port` and serve until `shutdown` fires.
pub async fn run_gateway(
    state: AppState,
    config: &GatewayConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway on {addr}"))?;
    let local = listener
        .local_addr()
        .context("Failed to read gateway listen address")?;
    tracing::info!(addr = %local, "Gateway listening");

    axum::serve(listener, router(state, config))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Gateway server failed")?;

    tracing::info!("Gateway stopped");
    Ok(())
}
