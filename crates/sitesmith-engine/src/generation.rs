use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use sitesmith_core::errors::GenerationError;
use sitesmith_core::provider::{GenerationProvider, GenerationRequest};
use sitesmith_llm::prompts;

use crate::error::WorkspaceError;

#[derive(Clone, Debug)]
pub struct GenerationConfig {
    /// Minimum interval between successful calls from one workspace.
    pub cooldown: Duration,
    /// Upper bound on a single upstream call.
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Characters of the current document embedded in a modify prompt.
    pub modify_context_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(3000),
            timeout: Duration::from_secs(60),
            max_tokens: 6000,
            temperature: 0.7,
            modify_context_chars: 1500,
        }
    }
}

/// Per-workspace gateway to the generation service.
///
/// Owns the workspace's call bookkeeping: a call issued before the cool-down
/// has elapsed since the last successful one fails with `RateLimited` and
/// never reaches the provider. Failed calls leave the bookkeeping untouched.
pub struct GenerationClient {
    provider: Arc<dyn GenerationProvider>,
    config: GenerationConfig,
    last_call_at: Option<Instant>,
    last_call_wall: Option<DateTime<Utc>>,
    api_call_count: u64,
}

impl GenerationClient {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: GenerationConfig) -> Self {
        Self {
            provider,
            config,
            last_call_at: None,
            last_call_wall: None,
            api_call_count: 0,
        }
    }

    /// Generate a new document for `command`. Returns the raw service text.
    pub async fn create(&mut self, command: &str) -> Result<String, WorkspaceError> {
        self.call(prompts::create_prompt(command)).await
    }

    /// Regenerate `current_document` with `command` applied.
    pub async fn modify(
        &mut self,
        command: &str,
        current_document: &str,
    ) -> Result<String, WorkspaceError> {
        let prompt =
            prompts::modify_prompt(command, current_document, self.config.modify_context_chars);
        self.call(prompt).await
    }

    /// Time left until the next call is allowed, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        let last = self.last_call_at?;
        let elapsed = Instant::now().saturating_duration_since(last);
        (elapsed < self.config.cooldown).then(|| self.config.cooldown - elapsed)
    }

    pub fn api_call_count(&self) -> u64 {
        self.api_call_count
    }

    pub fn last_call_at(&self) -> Option<DateTime<Utc>> {
        self.last_call_wall
    }

    /// Forget all call bookkeeping, lifting any pending cool-down.
    pub fn reset(&mut self) {
        self.last_call_at = None;
        self.last_call_wall = None;
        self.api_call_count = 0;
    }

    #[instrument(skip_all, fields(provider = self.provider.name(), model = self.provider.model()))]
    async fn call(&mut self, user: String) -> Result<String, WorkspaceError> {
        if let Some(retry_after) = self.retry_after() {
            return Err(WorkspaceError::RateLimited { retry_after });
        }

        let request = GenerationRequest {
            system: prompts::SYSTEM_PROMPT.to_string(),
            user,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let started = Instant::now();
        let raw = match tokio::time::timeout(self.config.timeout, self.provider.complete(&request))
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(kind = e.error_kind(), error = %e, "generation call failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(timeout_ms = self.config.timeout.as_millis() as u64, "generation call timed out");
                return Err(GenerationError::Timeout(self.config.timeout).into());
            }
        };

        self.last_call_at = Some(Instant::now());
        self.last_call_wall = Some(Utc::now());
        self.api_call_count += 1;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            raw_len = raw.len(),
            calls = self.api_call_count,
            "generation call completed"
        );
        Ok(raw)
    }
}
