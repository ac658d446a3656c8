//! RPC method handlers and the operations shared with the HTTP routes.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument};

use sitesmith_core::ids::SessionId;
use sitesmith_engine::{CommandOutcome, SessionRegistry, WorkspaceError};
use sitesmith_telemetry::{LogQuery, TelemetryGuard};

use crate::client::{ClientId, ClientRegistry};
use crate::rpc::{self, RpcResponse};

/// Shared state available to all handlers.
pub struct HandlerState {
    pub registry: Arc<SessionRegistry>,
    pub clients: Arc<ClientRegistry>,
    pub telemetry: Option<Arc<TelemetryGuard>>,
    /// Absolute origin used to build live preview URLs.
    pub public_base_url: String,
    pub started_at: Instant,
}

impl HandlerState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        clients: Arc<ClientRegistry>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            clients,
            telemetry: None,
            public_base_url: public_base_url.into(),
            started_at: Instant::now(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryGuard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn live_preview_url(&self, preview_path: &str) -> String {
        format!("{}{preview_path}", self.public_base_url)
    }
}

/// Dispatch an RPC method to the appropriate handler.
///
/// `client` is the calling WebSocket connection, if any; its id is the
/// default session when the params name none.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
    client: Option<&ClientId>,
) -> RpcResponse {
    match method {
        "workspace.command" => workspace_command(state, params, id, client).await,
        "workspace.clear" => workspace_clear(state, params, id, client).await,
        "workspace.get" => workspace_get(state, params, id, client).await,
        "workspace.history" => workspace_history(state, params, id, client).await,
        "system.ping" => system_ping(state, id),
        "logs.recent" => logs_recent(state, params, id),
        _ => RpcResponse::method_not_found(id, method),
    }
}

/// Resolve the target session from `sessionId` (or `session_id`), falling back
/// to the calling connection.
fn resolve_session(
    params: &serde_json::Value,
    client: Option<&ClientId>,
) -> Result<SessionId, String> {
    let named = rpc::optional_str(params, "sessionId").or_else(|| rpc::optional_str(params, "session_id"));
    match named {
        Some(raw) => SessionId::parse(raw).map_err(|e| format!("Invalid sessionId: {e}")),
        None => client
            .and_then(ClientId::default_session)
            .ok_or_else(|| "Missing required parameter: sessionId".to_string()),
    }
}

// ── Shared operations ──

/// Run a command and tell other watchers of the session about the new document.
#[instrument(skip(state, text), fields(session_id = %session_id))]
pub async fn run_command(
    state: &HandlerState,
    session_id: &SessionId,
    text: &str,
    origin: Option<&ClientId>,
) -> Result<serde_json::Value, WorkspaceError> {
    let outcome = state.registry.command(session_id, text).await?;
    let result = outcome_json(state, &outcome);

    notify_watchers(
        state,
        session_id,
        "workspace.updated",
        json!({
            "action": outcome.action,
            "historyLength": outcome.history_length,
            "previewUrl": outcome.preview_url,
        }),
        origin,
    );
    Ok(result)
}

#[instrument(skip(state), fields(session_id = %session_id))]
pub async fn run_clear(
    state: &HandlerState,
    session_id: &SessionId,
    origin: Option<&ClientId>,
) -> Result<serde_json::Value, WorkspaceError> {
    state.registry.clear(session_id).await?;
    info!("workspace cleared on request");
    notify_watchers(state, session_id, "workspace.cleared", json!({}), origin);
    Ok(json!({ "sessionId": session_id, "cleared": true }))
}

fn outcome_json(state: &HandlerState, outcome: &CommandOutcome) -> serde_json::Value {
    let mut value = serde_json::to_value(outcome).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "livePreviewUrl".into(),
            json!(state.live_preview_url(&outcome.preview_url)),
        );
    }
    value
}

/// Push a `{type, sessionId, timestamp, data}` event to clients watching the session.
fn notify_watchers(
    state: &HandlerState,
    session_id: &SessionId,
    event_type: &str,
    data: serde_json::Value,
    skip: Option<&ClientId>,
) {
    let event = json!({
        "type": event_type,
        "sessionId": session_id,
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
    });
    let sent = state
        .clients
        .broadcast_to_session(session_id, &event.to_string(), skip);
    if sent > 0 {
        tracing::debug!(event_type, sent, "notified session watchers");
    }
}

// ── Workspace handlers ──

async fn workspace_command(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
    client: Option<&ClientId>,
) -> RpcResponse {
    let text = match rpc::require_str(params, "text") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let session_id = match resolve_session(params, client) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    if let Some(client) = client {
        state.clients.watch_session(client, session_id.clone());
    }

    match run_command(state, &session_id, text, client).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(e) => RpcResponse::workspace_error(id, &e),
    }
}

async fn workspace_clear(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
    client: Option<&ClientId>,
) -> RpcResponse {
    let session_id = match resolve_session(params, client) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match run_clear(state, &session_id, client).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(e) => RpcResponse::workspace_error(id, &e),
    }
}

async fn workspace_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
    client: Option<&ClientId>,
) -> RpcResponse {
    let session_id = match resolve_session(params, client) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    if let Some(client) = client {
        state.clients.watch_session(client, session_id.clone());
    }

    match state.registry.snapshot(&session_id).await {
        Ok(snapshot) => {
            let live = state.live_preview_url(&snapshot.preview_url);
            let mut value = serde_json::to_value(&snapshot).unwrap_or_else(|_| json!({}));
            if let Some(obj) = value.as_object_mut() {
                obj.insert("historyLength".into(), json!(snapshot.history.len()));
                obj.insert("livePreviewUrl".into(), json!(live));
            }
            RpcResponse::success(id, value)
        }
        Err(e) => RpcResponse::workspace_error(id, &e),
    }
}

async fn workspace_history(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
    client: Option<&ClientId>,
) -> RpcResponse {
    let session_id = match resolve_session(params, client) {
        Ok(s) => s,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.registry.snapshot(&session_id).await {
        Ok(snapshot) => RpcResponse::success(
            id,
            json!({
                "sessionId": snapshot.session_id,
                "history": snapshot.history,
                "historyLength": snapshot.history.len(),
            }),
        ),
        Err(e) => RpcResponse::workspace_error(id, &e),
    }
}

// ── System handlers ──

fn system_ping(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        json!({
            "pong": true,
            "timestamp": Utc::now().to_rfc3339(),
            "activeWorkspaces": state.registry.active_count(),
            "uptimeSecs": state.started_at.elapsed().as_secs(),
        }),
    )
}

fn logs_recent(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(log_sink) = state.telemetry.as_deref().and_then(TelemetryGuard::logs) else {
        return RpcResponse::success(
            id,
            json!({
                "logs": [],
                "totalCount": 0,
                "enabled": false,
            }),
        );
    };

    let query = LogQuery {
        level: rpc::optional_str(params, "level").map(str::to_uppercase),
        session_id: rpc::optional_str(params, "sessionId")
            .or_else(|| rpc::optional_str(params, "session_id"))
            .map(str::to_string),
        limit: rpc::optional_i64(params, "limit").map(|v| v.clamp(1, 1000) as u32),
    };

    match log_sink.query(&query) {
        Ok(records) => RpcResponse::success(
            id,
            json!({
                "totalCount": records.len(),
                "logs": records,
                "enabled": true,
            }),
        ),
        Err(e) => RpcResponse::internal_error(id, format!("Failed to query logs: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitesmith_core::errors::GenerationError;
    use sitesmith_engine::{GenerationConfig, IntentClassifier};
    use sitesmith_llm::{MockProvider, MockResponse};
    use sitesmith_store::{Database, DocumentRepo};
    use sitesmith_telemetry::SqliteLogSink;

    const PAGE: &str = "<!DOCTYPE html><html><head><title>Bakery</title></head><body><h1>Bakery</h1></body></html>";

    fn setup(responses: Vec<MockResponse>) -> Arc<HandlerState> {
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

    async fn call(
        state: &Arc<HandlerState>,
        method: &str,
        params: serde_json::Value,
        client: Option<&ClientId>,
    ) -> RpcResponse {
        dispatch(state, method, &params, Some(json!(1)), client).await
    }

    #[tokio::test]
    async fn dispatch_unknown_method() {
        let state = setup(vec![]);
        let resp = call(&state, "foo.bar", json!({}), None).await;
        assert_eq!(resp.error.unwrap().code, "METHOD_NOT_FOUND");
    }

    #[tokio::test]
    async fn command_returns_result_descriptor() {
        let state = setup(vec![MockResponse::text(PAGE)]);
        let resp = call(
            &state,
            "workspace.command",
            json!({"sessionId": "site-1", "text": "build a bakery site"}),
            None,
        )
        .await;

        assert!(resp.success);
        let result = resp.result.unwrap();
        assert_eq!(result["action"], "created");
        assert_eq!(result["historyLength"], 1);
        assert_eq!(result["apiCallsUsed"], 1);
        assert_eq!(result["text"], "build a bakery site");
        assert_eq!(result["previewUrl"], "/workspace/site-1/index.html");
        assert_eq!(
            result["livePreviewUrl"],
            "http://localhost:3002/workspace/site-1/index.html"
        );
        assert!(result["document"].as_str().unwrap().contains("particles-js"));
    }

    #[tokio::test]
    async fn command_without_text_is_invalid() {
        let state = setup(vec![]);
        let resp = call(&state, "workspace.command", json!({"sessionId": "site-1"}), None).await;
        assert_eq!(resp.error.unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn command_without_session_or_client_is_invalid() {
        let state = setup(vec![]);
        let resp = call(&state, "workspace.command", json!({"text": "build"}), None).await;
        let error = resp.error.unwrap();
        assert_eq!(error.code, "INVALID_PARAMS");
        assert!(error.message.contains("sessionId"));
    }

    #[tokio::test]
    async fn invalid_session_id_rejected() {
        let state = setup(vec![]);
        let resp = call(
            &state,
            "workspace.command",
            json!({"sessionId": "../etc", "text": "build"}),
            None,
        )
        .await;
        assert_eq!(resp.error.unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn connection_is_default_session() {
        let state = setup(vec![MockResponse::text(PAGE)]);
        let (client, _rx) = state.clients.register();

        let resp = call(&state, "workspace.command", json!({"text": "build a bakery site"}), Some(&client)).await;
        assert!(resp.success);
        assert_eq!(resp.result.unwrap()["sessionId"], client.0.as_str());
    }

    #[tokio::test]
    async fn generation_failure_maps_to_code() {
        let state = setup(vec![MockResponse::Error(GenerationError::AuthenticationFailed(
            "bad key".into(),
        ))]);
        let resp = call(
            &state,
            "workspace.command",
            json!({"sessionId": "site-1", "text": "build a bakery site"}),
            None,
        )
        .await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().code, "GENERATION_FAILED");
    }

    #[tokio::test]
    async fn second_command_too_soon_is_rate_limited() {
        let state = setup(vec![MockResponse::text(PAGE), MockResponse::text(PAGE)]);
        let params = json!({"sessionId": "site-1", "text": "build a bakery site"});
        assert!(call(&state, "workspace.command", params.clone(), None).await.success);

        let resp = call(&state, "workspace.command", params, None).await;
        assert_eq!(resp.error.unwrap().code, "RATE_LIMITED");
    }

    #[tokio::test]
    async fn watchers_are_notified_of_updates() {
        let state = setup(vec![MockResponse::text(PAGE)]);
        let (watcher, mut watcher_rx) = state.clients.register();
        let (sender, mut sender_rx) = state.clients.register();

        let get = call(&state, "workspace.get", json!({"sessionId": "site-1"}), Some(&watcher)).await;
        assert!(get.success);

        call(
            &state,
            "workspace.command",
            json!({"sessionId": "site-1", "text": "build a bakery site"}),
            Some(&sender),
        )
        .await;

        let event: serde_json::Value = serde_json::from_str(&watcher_rx.try_recv().unwrap()).unwrap();
        assert_eq!(event["type"], "workspace.updated");
        assert_eq!(event["sessionId"], "site-1");
        assert_eq!(event["data"]["historyLength"], 1);
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn get_history_and_clear() {
        let state = setup(vec![MockResponse::text(PAGE)]);
        call(
            &state,
            "workspace.command",
            json!({"sessionId": "site-1", "text": "build a bakery site"}),
            None,
        )
        .await;

        let get = call(&state, "workspace.get", json!({"sessionId": "site-1"}), None).await;
        let snapshot = get.result.unwrap();
        assert_eq!(snapshot["state"], "ready");
        assert_eq!(snapshot["historyLength"], 1);

        let history = call(&state, "workspace.history", json!({"session_id": "site-1"}), None).await;
        let history = history.result.unwrap();
        assert_eq!(history["history"][0]["command"], "build a bakery site");
        assert_eq!(history["history"][0]["action"], "created");

        let cleared = call(&state, "workspace.clear", json!({"sessionId": "site-1"}), None).await;
        assert_eq!(cleared.result.unwrap()["cleared"], true);

        let get = call(&state, "workspace.get", json!({"sessionId": "site-1"}), None).await;
        let snapshot = get.result.unwrap();
        assert_eq!(snapshot["state"], "empty");
        assert_eq!(snapshot["historyLength"], 0);
    }

    #[tokio::test]
    async fn ping_reports_counts() {
        let state = setup(vec![]);
        let resp = call(&state, "system.ping", json!({}), None).await;
        let result = resp.result.unwrap();
        assert_eq!(result["pong"], true);
        assert_eq!(result["activeWorkspaces"], 0);
    }

    #[tokio::test]
    async fn logs_disabled_without_sink() {
        let state = setup(vec![]);
        let resp = call(&state, "logs.recent", json!({}), None).await;
        assert_eq!(resp.result.unwrap()["enabled"], false);
    }

    #[tokio::test]
    async fn logs_enabled_with_sink() {
        let registry = SessionRegistry::new(
            Arc::new(MockProvider::new(vec![])),
            Arc::new(DocumentRepo::new(Database::in_memory().unwrap())),
            IntentClassifier::default(),
            GenerationConfig::default(),
        );
        let guard = TelemetryGuard::with_sink(Arc::new(SqliteLogSink::in_memory().unwrap()));
        let state = Arc::new(
            HandlerState::new(Arc::new(registry), Arc::new(ClientRegistry::new(8)), "http://x")
                .with_telemetry(Arc::new(guard)),
        );

        let resp = call(&state, "logs.recent", json!({"level": "warn", "limit": 5}), None).await;
        let result = resp.result.unwrap();
        assert_eq!(result["enabled"], true);
        assert_eq!(result["totalCount"], 0);
    }
}
