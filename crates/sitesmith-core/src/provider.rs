use async_trait::async_trait;

use crate::errors::GenerationError;

/// A single completion request sent to the generation service.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Boundary to the external generative text service.
///
/// Implementations return the raw text of the first completion choice; they
/// do not clean it up. Normalization happens in the workspace pipeline.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Cheap round trip used by health checks.
    async fn ping(&self) -> Result<String, GenerationError> {
        self.complete(&GenerationRequest {
            system: String::new(),
            user: "Reply with the single word: ready".to_string(),
            max_tokens: 20,
            temperature: 0.0,
        })
        .await
    }
}
