use std::time::Duration;

use sitesmith_core::errors::GenerationError;
use sitesmith_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("rate limited: wait {}ms before the next command", .retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("session closed")]
    SessionClosed,
}

impl WorkspaceError {
    /// Stable error code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Generation(_) => "GENERATION_FAILED",
            Self::Persistence(_) => "PERSISTENCE_FAILED",
            Self::InvalidCommand(_) => "INVALID_COMMAND",
            Self::SessionClosed => "SESSION_CLOSED",
        }
    }
}
