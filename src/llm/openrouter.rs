//! OpenRouter API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::InferenceError;
use super::{ChatMessage, InferenceBackend, InferenceOptions, Role};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// OpenRouter chat-completions backend. One HTTP request per `infer` call.
pub struct OpenRouterBackend {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenRouterBackend {
    /// Create a backend for `model` using the public OpenRouter endpoint.
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            endpoint: OPENROUTER_API_URL.to_string(),
        }
    }

    /// Point the backend at another OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn build_request(&self, prompt: &str, options: &InferenceOptions) -> OpenRouterRequest {
        OpenRouterRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::new(Role::System, options.role.system_prompt()),
                ChatMessage::new(Role::User, prompt),
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }
}

#[async_trait]
impl InferenceBackend for OpenRouterBackend {
    async fn infer(
        &self,
        prompt: &str,
        options: &InferenceOptions,
    ) -> Result<String, InferenceError> {
        let request = self.build_request(prompt, options);

        tracing::debug!(model = %self.model, role = %options.role, "Sending inference request");

        let response = match self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Title", "adaptive-automation")
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(InferenceError::timeout(format!("Request timeout: {}", e)));
                } else if e.is_connect() {
                    return Err(InferenceError::unavailable(format!(
                        "Connection failed: {}",
                        e
                    )));
                } else {
                    return Err(InferenceError::unavailable(format!("Request failed: {}", e)));
                }
            }
        };

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| InferenceError::unavailable(format!("Failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(InferenceError::http_status(
                status.as_u16(),
                crate::util::truncate_chars(&body, 500),
                retry_after,
            ));
        }

        let parsed: OpenRouterResponse = serde_json::from_str(&body).map_err(|e| {
            InferenceError::unavailable(format!(
                "Failed to parse response: {}, body: {}",
                e,
                crate::util::truncate_chars(&body, 500)
            ))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(InferenceError::empty_response(format!(
                "Model {} returned no content",
                self.model
            )));
        }

        Ok(content)
    }
}

/// OpenRouter API request format.
#[derive(Debug, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

/// OpenRouter API response format.
#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<OpenRouterChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    content: Option<String>,
}
