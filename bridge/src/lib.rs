//! Front door for the tool hub.
//!
//! One HTTP listener exposes every aggregated backend tool behind a single
//! JSON-RPC 2.0 endpoint (`/mcp`), with optional event-stream delivery, a
//! liveness probe and pass-through auth stubs for clients that insist on an
//! OAuth dance before talking to a local server.

pub mod mcp;
pub mod rpc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use toolhub_core::Aggregator;

/// Path of the JSON-RPC endpoint, also announced by the event-stream probe
pub const MCP_PATH: &str = "/mcp";

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serve: {0}")]
    Serve(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    /// Idle heartbeat period on the event-stream probe
    pub heartbeat: Duration,
    pub endpoint: String,
    /// Flips to true when the server starts shutting down; ends open probes
    pub closing: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        aggregator: Arc<Aggregator>,
        heartbeat: Duration,
        closing: watch::Receiver<bool>,
    ) -> Self {
        Self {
            aggregator,
            heartbeat,
            endpoint: MCP_PATH.to_string(),
            closing,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            MCP_PATH,
            get(mcp::mcp_get).post(mcp::mcp_post).fallback(mcp::post_only),
        )
        .route("/register", any(register_stub))
        .route("/authorize", any(authorize_stub))
        .route("/oauth/*rest", any(oauth_stub))
        .route("/token", any(token_stub))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "tools": state.aggregator.tool_count(),
        "ts": chrono::Utc::now().timestamp(),
    }))
}

async fn register_stub() -> impl IntoResponse {
    Json(json!({"status": "ok", "message": "registration successful"}))
}

async fn authorize_stub() -> impl IntoResponse {
    Json(json!({"status": "ok", "message": "auth skipped for localhost"}))
}

async fn oauth_stub() -> impl IntoResponse {
    Json(json!({"status": "ok", "message": "oauth skipped for localhost"}))
}

async fn token_stub() -> impl IntoResponse {
    Json(json!({"access_token": "dummy", "token_type": "Bearer"}))
}

/// Bind the listener
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|source| BridgeError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Serve until `shutdown` resolves, then drain in-flight requests
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(target: "front_door", addr = %addr, "Front door listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(BridgeError::Serve)?;
    info!(target: "front_door", "Front door stopped");
    Ok(())
}

/// Install SIGINT and SIGTERM listeners immediately; the returned future
/// resolves on the first of them.
///
/// Must be called inside the runtime. Signals arriving after this call are
/// never lost to the default disposition, even before the future is polled.
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    let received = install_listeners();
    async move {
        received.await;
        info!(target: "front_door", "Shutdown signal received");
    }
}

#[cfg(unix)]
fn install_listeners() -> impl Future<Output = ()> + Send + 'static {
    use tokio::signal::unix::SignalKind;

    let interrupt = listen(SignalKind::interrupt(), "SIGINT");
    let terminate = listen(SignalKind::terminate(), "SIGTERM");
    async move {
        tokio::select! {
            _ = next_signal(interrupt) => {},
            _ = next_signal(terminate) => {},
        }
    }
}

#[cfg(not(unix))]
fn install_listeners() -> impl Future<Output = ()> + Send + 'static {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(target: "front_door", error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
fn listen(
    kind: tokio::signal::unix::SignalKind,
    label: &'static str,
) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(listener) => Some(listener),
        Err(e) => {
            warn!(target: "front_door", signal = label, error = %e, "Cannot listen for signal");
            None
        }
    }
}

#[cfg(unix)]
async fn next_signal(listener: Option<tokio::signal::unix::Signal>) {
    match listener {
        Some(mut listener) => {
            listener.recv().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves once `closing` flips to true (or its sender is gone)
pub async fn closed(mut closing: watch::Receiver<bool>) {
    let _ = closing.wait_for(|closing| *closing).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_resolves_on_flip() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(closed(rx));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_before_first_poll_is_not_lost() {
        let signal = shutdown_signal();
        // Delivered to ourselves before anything awaits the listener
        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();
        tokio::time::timeout(Duration::from_secs(2), signal)
            .await
            .expect("SIGTERM must resolve the shutdown future");
    }
}
