use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sitesmith_core::errors::GenerationError;
use sitesmith_core::provider::{GenerationProvider, GenerationRequest};

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Return this text as the completion.
    Text(String),
    /// Fail the call.
    Error(GenerationError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in order and records
/// every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another response behind the existing ones.
    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let idx = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };

        let mut next = self.responses.lock().pop_front().ok_or_else(|| {
            GenerationError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            ))
        })?;

        loop {
            match next {
                MockResponse::Text(text) => return Ok(text),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    next = *inner;
                }
            }
        }
    }
}
