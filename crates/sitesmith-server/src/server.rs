use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use sitesmith_core::ids::SessionId;
use sitesmith_engine::WorkspaceError;

use crate::client::{self, ClientId, ClientRegistry};
use crate::handlers::{self, HandlerState};
use crate::rpc::{RpcRequest, RpcResponse};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
}

impl AppState {
    pub fn new(handler_state: Arc<HandlerState>) -> Self {
        let client_registry = Arc::clone(&handler_state.clients);
        Self {
            handler_state,
            client_registry,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/command", post(command_handler))
        .route("/api/clear", post(clear_handler))
        .route("/workspace/{session_id}/index.html", get(preview_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, state: Arc<HandlerState>) -> Result<ServerHandle, std::io::Error> {
    let app_state = AppState::new(state);

    let cleanup = client::start_cleanup_task(
        Arc::clone(&app_state.client_registry),
        Duration::from_secs(60),
    );

    let router = build_router(app_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "sitesmith server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
        cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.cleanup.abort();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task ended abnormally");
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "websocket client connected");

    let (msg_tx, msg_rx) = mpsc::channel(state.client_registry.max_send_queue());
    tokio::spawn(process_client_messages(
        client_id.clone(),
        msg_rx,
        Arc::clone(&state.handler_state),
    ));

    client::handle_ws_connection(
        socket,
        client_id.clone(),
        rx,
        state.client_registry,
        msg_tx,
    )
    .await;
    tracing::info!(client_id = %client_id, "websocket client disconnected");
}

/// Handle one connection's requests strictly in the order they arrived.
async fn process_client_messages(
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    state: Arc<HandlerState>,
) {
    while let Some(raw_message) = rx.recv().await {
        let response = match serde_json::from_str::<RpcRequest>(&raw_message) {
            Ok(request) => {
                let params = request.params.unwrap_or_else(|| serde_json::json!({}));
                handlers::dispatch(&state, &request.method, &params, request.id, Some(&client_id))
                    .await
            }
            Err(_) => RpcResponse::parse_error(),
        };

        if let Ok(json) = serde_json::to_string(&response) {
            state.clients.send_to(&client_id, json);
        }
    }
}

// ── HTTP routes ──

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandBody {
    session_id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearBody {
    session_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct HealthParams {
    #[serde(default)]
    ping: bool,
}

fn status_for(err: &WorkspaceError) -> StatusCode {
    match err {
        WorkspaceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        WorkspaceError::Generation(_) => StatusCode::BAD_GATEWAY,
        WorkspaceError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        WorkspaceError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
        WorkspaceError::SessionClosed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn reply(result: Result<serde_json::Value, WorkspaceError>) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(RpcResponse::success(None, value))).into_response(),
        Err(e) => (status_for(&e), Json(RpcResponse::workspace_error(None, &e))).into_response(),
    }
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(RpcResponse::invalid_params(None, message)),
    )
        .into_response()
}

async fn command_handler(State(state): State<AppState>, Json(body): Json<CommandBody>) -> Response {
    let session_id = match SessionId::parse(&body.session_id) {
        Ok(id) => id,
        Err(e) => return bad_request(format!("Invalid sessionId: {e}")),
    };
    reply(handlers::run_command(&state.handler_state, &session_id, &body.text, None).await)
}

async fn clear_handler(State(state): State<AppState>, Json(body): Json<ClearBody>) -> Response {
    let session_id = match SessionId::parse(&body.session_id) {
        Ok(id) => id,
        Err(e) => return bad_request(format!("Invalid sessionId: {e}")),
    };
    reply(handlers::run_clear(&state.handler_state, &session_id, None).await)
}

/// Serves the session's current document.
async fn preview_handler(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    let Ok(session_id) = SessionId::parse(&session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.handler_state.registry.preview(&session_id).await {
        Ok(Some(document)) => Html(document).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "preview lookup failed");
            (status_for(&e), e.to_string()).into_response()
        }
    }
}

async fn health_handler(
    State(state): State<AppState>,
    Query(params): Query<HealthParams>,
) -> impl IntoResponse {
    let handler_state = &state.handler_state;
    let provider = handler_state.registry.provider();

    let mut body = serde_json::json!({
        "status": "running",
        "provider": provider.name(),
        "model": provider.model(),
        "activeWorkspaces": handler_state.registry.active_count(),
        "connectedClients": state.client_registry.count(),
        "uptimeSecs": handler_state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    if params.ping {
        let upstream = match provider.ping().await {
            Ok(reply) => serde_json::json!({"status": "connected", "response": reply.trim()}),
            Err(e) => serde_json::json!({"status": "error", "kind": e.error_kind(), "message": e.to_string()}),
        };
        body["upstream"] = upstream;
    }

    Json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitesmith_engine::{GenerationConfig, IntentClassifier, SessionRegistry};
    use sitesmith_llm::{MockProvider, MockResponse};
    use sitesmith_store::{Database, DocumentRepo};

    fn state(responses: Vec<MockResponse>) -> Arc<HandlerState> {
        let registry = SessionRegistry::new(
            Arc::new(MockProvider::new(responses)),
            Arc::new(DocumentRepo::new(Database::in_memory().unwrap())),
            IntentClassifier::default(),
            GenerationConfig::default(),
        );
        Arc::new(HandlerState::new(
            Arc::new(registry),
            Arc::new(ClientRegistry::new(32)),
            "http://localhost:3002",
        ))
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let handle = start(config, state(vec![MockResponse::text("ready")])).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health?ping=true", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "running");
        assert_eq!(body["model"], "mock-model");
        assert_eq!(body["upstream"]["status"], "connected");
        assert_eq!(body["upstream"]["response"], "ready");

        handle.shutdown().await;
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            status_for(&WorkspaceError::RateLimited {
                retry_after: Duration::from_secs(1)
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&WorkspaceError::InvalidCommand("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&WorkspaceError::SessionClosed),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
