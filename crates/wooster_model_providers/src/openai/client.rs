//! OpenAI-compatible HTTP client.

use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::time::Duration;
use wooster_models::{EmbeddingError, GenerationError};

/// Timeout for the health probe's model-listing call.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP client for one OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Creates a new client for `base_url` (e.g. `https://api.openai.com/v1`
    /// or `http://localhost:11434/v1`). An empty API key sends no
    /// authorization header, which local servers accept.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Sends a chat-completions request.
    pub async fn chat_completions(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self
            .headers()
            .map_err(|err| GenerationError::Auth(format!("invalid API key header: {err}")))?;

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|err| GenerationError::Http(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| GenerationError::Http(err.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::Provider {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|err| {
            GenerationError::InvalidResponse(format!("failed to parse response: {err}"))
        })
    }

    /// Sends an embeddings request.
    pub async fn embeddings(
        &self,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let headers = self.headers().map_err(|err| EmbeddingError::Provider {
            status: None,
            message: format!("invalid API key header: {err}"),
        })?;

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|err| EmbeddingError::Http(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| EmbeddingError::Http(err.to_string()))?;

        if !status.is_success() {
            return Err(EmbeddingError::Provider {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|err| {
            EmbeddingError::InvalidResponse(format!("failed to parse response: {err}"))
        })
    }

    /// Lightweight liveness check: lists models with a short timeout.
    pub async fn list_models(&self) -> Result<(), GenerationError> {
        let url = format!("{}/models", self.base_url);
        let headers = self
            .headers()
            .map_err(|err| GenerationError::Auth(format!("invalid API key header: {err}")))?;

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|err| GenerationError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Provider {
                status: Some(status.as_u16()),
                message: "model listing failed".to_string(),
            });
        }
        Ok(())
    }

    fn headers(&self) -> Result<HeaderMap, reqwest::header::InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
            );
        }
        Ok(headers)
    }
}

impl core::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
