use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sitesmith_core::errors::GenerationError;
use sitesmith_core::provider::{GenerationProvider, GenerationRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider for OpenAI-compatible `/chat/completions` endpoints (Groq by default).
pub struct ChatCompletionsProvider {
    client: Client,
    api_url: String,
    model: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn new(
        api_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GenerationError::NotConfigured(format!("http client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            model: model.into(),
            api_key,
        })
    }

    fn build_body<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user,
        });

        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        }
    }
}

#[async_trait]
impl GenerationProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "chat_completions"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let Some(api_key) = &self.api_key else {
            return Err(GenerationError::NotConfigured("missing API key".into()));
        };

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key.expose_secret())
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| GenerationError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::from_status(status, body));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::UnexpectedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::UnexpectedResponse("no completion choices".into()))?;

        debug!(raw_len = content.len(), "completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "system prompt".into(),
            user: "build a bakery site".into(),
            max_tokens: 100,
            temperature: 0.7,
        }
    }

    fn provider(server: &MockServer, key: Option<&str>) -> ChatCompletionsProvider {
        ChatCompletionsProvider::new(
            format!("{}/openai/v1/chat/completions", server.uri()),
            "llama-3.3-70b-versatile",
            key.map(|k| SecretString::from(k.to_string())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama-3.3-70b-versatile",
                "stream": false,
                "messages": [
                    {"role": "system", "content": "system prompt"},
                    {"role": "user", "content": "build a bakery site"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "<!DOCTYPE html><html></html>"}}]
            })))
            .mount(&server)
            .await;

        let text = provider(&server, Some("test-key"))
            .complete(&request())
            .await
            .unwrap();
        assert_eq!(text, "<!DOCTYPE html><html></html>");
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = provider(&server, Some("bad"))
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::AuthenticationFailed(ref b) if b == "invalid api key"));
    }

    #[tokio::test]
    async fn server_error_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(&server, Some("k"))
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ServerError { status: 503, .. }));
    }

    #[tokio::test]
    async fn empty_choices_is_unexpected_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = provider(&server, Some("k"))
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn missing_key_fails_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = provider(&server, None).complete(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn ping_omits_empty_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "messages": [{"role": "user", "content": "Reply with the single word: ready"}],
                "max_tokens": 20
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ready"}}]
            })))
            .mount(&server)
            .await;

        let reply = provider(&server, Some("k")).ping().await.unwrap();
        assert_eq!(reply, "ready");
    }
}
