use serde::{Deserialize, Serialize};

use sitesmith_engine::WorkspaceError;

/// Request frame received over the WebSocket.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response frame: `{ id, success, result?, error?: { code, message } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    /// Failure of a workspace operation, carrying the workspace error code.
    pub fn workspace_error(id: Option<serde_json::Value>, err: &WorkspaceError) -> Self {
        Self::error(id, err.code(), err.to_string())
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn internal_error(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INTERNAL_ERROR, msg)
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }
}

/// Extract a required string param from the RPC params object.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract an optional string param.
pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Extract an optional i64 param.
pub fn optional_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_rpc_request() {
        let json = r#"{"method":"workspace.command","params":{"sessionId":"site-1","text":"build a bakery site"},"id":1}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "workspace.command");
        assert_eq!(req.params.unwrap()["text"], "build a bakery site");
        assert_eq!(req.id, Some(serde_json::json!(1)));
    }

    #[test]
    fn success_response_serializes() {
        let resp = RpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"success\":true"));
    }

    #[test]
    fn error_response_serializes() {
        let resp = RpcResponse::method_not_found(Some(serde_json::json!(1)), "foo.bar");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "METHOD_NOT_FOUND");
        assert!(json["error"]["message"].as_str().unwrap().contains("foo.bar"));
        assert!(json.get("result").is_none());
    }

    #[test]
    fn workspace_error_keeps_code() {
        let err = WorkspaceError::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        let resp = RpcResponse::workspace_error(Some(serde_json::json!("a")), &err);
        let error = resp.error.unwrap();
        assert_eq!(error.code, "RATE_LIMITED");
        assert!(error.message.contains("1500ms"));
    }

    #[test]
    fn param_helpers() {
        let params = serde_json::json!({"text": "hi", "limit": 5});
        assert_eq!(require_str(&params, "text").unwrap(), "hi");
        assert!(require_str(&params, "limit").is_err());
        assert_eq!(optional_str(&params, "missing"), None);
        assert_eq!(optional_i64(&params, "limit"), Some(5));
    }

    #[test]
    fn parse_error_has_no_id() {
        let resp = RpcResponse::parse_error();
        assert!(resp.id.is_none());
        assert_eq!(resp.error.as_ref().unwrap().code, "PARSE_ERROR");
        assert!(!resp.success);
    }
}
