use std::time::Duration;

/// Failure talking to the external generation service.
///
/// Every variant means the upstream call did not produce usable text; callers
/// surface it as a failed command and leave workspace state untouched.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upstream rate limit: {0}")]
    UpstreamRateLimited(String),
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("generation service not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UpstreamRateLimited(_) => "upstream_rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::UnexpectedResponse(_) => "unexpected_response",
            Self::Timeout(_) => "timeout",
            Self::NotConfigured(_) => "not_configured",
        }
    }

    /// Classify a non-success HTTP status into the appropriate variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 413 | 422 => Self::InvalidRequest(body),
            429 => Self::UpstreamRateLimited(body),
            500..=599 => Self::ServerError { status, body },
            _ => Self::UnexpectedResponse(format!("status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            GenerationError::from_status(401, "nope".into()),
            GenerationError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            GenerationError::from_status(400, "bad".into()),
            GenerationError::InvalidRequest(_)
        ));
        assert!(matches!(
            GenerationError::from_status(429, "slow down".into()),
            GenerationError::UpstreamRateLimited(_)
        ));
        assert!(matches!(
            GenerationError::from_status(503, "busy".into()),
            GenerationError::ServerError { status: 503, .. }
        ));
        assert!(matches!(
            GenerationError::from_status(302, "moved".into()),
            GenerationError::UnexpectedResponse(_)
        ));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(
            GenerationError::Timeout(Duration::from_secs(1)).error_kind(),
            "timeout"
        );
        assert_eq!(
            GenerationError::UpstreamRateLimited(String::new()).error_kind(),
            "upstream_rate_limited"
        );
    }

    #[test]
    fn display_includes_status() {
        let err = GenerationError::ServerError {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "server error 502: bad gateway");
    }
}
