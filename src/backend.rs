//! Text-generation backend access. The only module that knows the wire protocol.

use crate::circuit_breaker::{create_backend_circuit_breaker, BackendBreaker};
use crate::errors::AppError;
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Turns a prompt into raw generated text.
///
/// Implementations return the text exactly as produced: no trimming, no
/// parsing. Failures are `BackendError`s. Retrying is up to the caller.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, AppError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct HttpCompletionBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    breaker: BackendBreaker,
}

impl HttpCompletionBackend {
    /// Creates a new `HttpCompletionBackend`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://llm.internal/v1`.
    /// * `api_key` - Optional bearer token.
    /// * `timeout` - Per-request timeout; expiry surfaces as a `BackendError`.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::BackendError(format!("Failed to create completion client: {}", e))
        })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            breaker: create_backend_circuit_breaker(),
        })
    }

    async fn send(&self, model: &str, prompt: &str) -> Result<String, AppError> {
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::BackendError(format!("Completion request timed out: {}", e))
            } else {
                AppError::BackendError(format!("Completion request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::BackendError(format!(
                "Completion backend returned {}: {}",
                status, error_text
            )));
        }

        let data: ChatResponse = response.json().await.map_err(|e| {
            AppError::BackendError(format!("Failed to read completion response: {}", e))
        })?;

        data.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::BackendError("Completion response had no content".to_string()))
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, AppError> {
        tracing::debug!("Completion request to {} ({} chars, model {})", self.endpoint, prompt.len(), model);

        match self.breaker.call(self.send(model, prompt)).await {
            Ok(text) => Ok(text),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Completion backend circuit open, rejecting request");
                Err(AppError::BackendError(
                    "Completion backend unavailable (circuit open)".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpCompletionBackend::new("https://example.com/v1/", None, Duration::from_secs(5));
        assert!(client.is_ok());
        assert_eq!(client.unwrap().endpoint, "https://example.com/v1/chat/completions");
    }

    #[test]
    fn test_request_shape() {
        let body = ChatRequest {
            model: "mistral-large2",
            messages: vec![ChatMessage {
                role: "user",
                content: "hello",
            }],
            temperature: 0.0,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "mistral-large2");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
    }
}
