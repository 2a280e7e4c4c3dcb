//! HTTP + SSE transport
//!
//! Three endpoints on a configured bind address: `GET /health` for
//! liveness, `GET /sse` for the event stream (connection event with a
//! per-client id, forwarded server messages, keepalive pings), and
//! `POST /rpc` for synchronous JSON-RPC. This transport carries no
//! authentication; non-localhost binds require an explicit override at the
//! CLI layer.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::BridgeError;
use crate::mcp::{JsonRpcRequest, JsonRpcResponse, McpServer};
use crate::transport::Transport;

pub struct HttpTransport {
    addr: String,
}

impl HttpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[derive(Clone)]
struct AppState {
    server: Arc<McpServer>,
    clients: Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
}

impl AppState {
    /// Forward a message to every connected SSE client, pruning the dead.
    async fn broadcast(&self, data: &str) {
        let mut dead = Vec::new();
        {
            let clients = self.clients.read().await;
            for (id, sender) in clients.iter() {
                if sender.send(data.to_string()).await.is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut clients = self.clients.write().await;
            for id in dead {
                clients.remove(&id);
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn serve(self: Box<Self>, server: Arc<McpServer>) -> Result<(), BridgeError> {
        let state = AppState {
            server,
            clients: Arc::new(RwLock::new(HashMap::new())),
        };

        let app = Router::new()
            .route("/health", get(handle_health))
            .route("/sse", get(handle_sse))
            .route("/rpc", post(handle_rpc))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| BridgeError::Transport(format!("could not bind {}: {}", self.addr, e)))?;
        tracing::info!("HTTP/SSE transport listening on http://{}", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Interrupt received, shutting down");
            })
            .await
            .map_err(|e| BridgeError::Transport(format!("HTTP server failed: {}", e)))
    }
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let clients = state.clients.read().await.len();
    Json(json!({
        "status": "healthy",
        "transport": "http/sse",
        "clients": clients,
    }))
}

async fn handle_sse(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let client_id = Uuid::new_v4();
    let (sender, receiver) = mpsc::channel::<String>(32);
    state.clients.write().await.insert(client_id, sender);
    tracing::debug!("SSE client connected: {}", client_id);

    let connection = Event::default().event("connection").data(
        json!({
            "type": "connection",
            "clientId": client_id.to_string(),
        })
        .to_string(),
    );

    let stream = tokio_stream::once(connection)
        .chain(
            ReceiverStream::new(receiver)
                .map(|data| Event::default().event("message").data(data)),
        )
        .map(Ok);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}

async fn handle_rpc(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    match state.server.handle(request).await {
        Some(response) => {
            forward_to_sse(&state, &response).await;
            Json(response).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn forward_to_sse(state: &AppState, response: &JsonRpcResponse) {
    if state.clients.read().await.is_empty() {
        return;
    }
    if let Ok(json) = serde_json::to_string(response) {
        state.broadcast(&json).await;
    }
}

/// Whether a `host:port` bind address stays on this machine.
pub fn is_localhost_addr(addr: &str) -> bool {
    // ":8080" binds every interface.
    if addr.starts_with(':') && !addr.starts_with("::") {
        return false;
    }
    if addr == "::1" {
        return true;
    }

    let host = if let Some(rest) = addr.strip_prefix('[') {
        // [::1]:8080
        match rest.split_once(']') {
            Some((host, _)) => host.to_string(),
            None => addr.to_string(),
        }
    } else if addr.matches(':').count() == 1 {
        addr.split(':').next().unwrap_or(addr).to_string()
    } else if addr.matches(':').count() > 1 {
        // Bare IPv6, possibly with a trailing port.
        match addr.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
            _ => addr.to_string(),
        }
    } else {
        addr.to_string()
    };

    matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1" | "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_addresses() {
        assert!(is_localhost_addr("localhost:8080"));
        assert!(is_localhost_addr("127.0.0.1:8080"));
        assert!(is_localhost_addr("[::1]:8080"));
        assert!(is_localhost_addr("::1"));
    }

    #[test]
    fn test_non_localhost_addresses() {
        assert!(!is_localhost_addr("0.0.0.0:8080"));
        assert!(!is_localhost_addr(":8080"));
        assert!(!is_localhost_addr("192.168.1.10:8080"));
        assert!(!is_localhost_addr("myhost.example.com:8080"));
    }
}
