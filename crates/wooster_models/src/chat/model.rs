//! Chat model handle.

use super::provider::ChatProvider;
use super::types::{ChatRequest, ChatResponse};
use crate::error::GenerationError;
use std::sync::Arc;

/// A handle to one model on one provider, with profile parameters applied.
///
/// Created by the [`ProviderRegistry`](crate::ProviderRegistry) or the
/// [`ModelRouter`](crate::router::ModelRouter); cheap to clone.
#[derive(Clone)]
pub struct ChatModel {
    provider_name: String,
    provider: Arc<dyn ChatProvider>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ChatModel {
    pub(crate) fn new(
        provider_name: impl Into<String>,
        provider: Arc<dyn ChatProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Returns a handle with profile defaults for temperature and token cap.
    ///
    /// Per-request values on a [`ChatRequest`] still win over these.
    #[must_use]
    pub fn with_params(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = Some(temperature);
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sends a chat request, filling unset sampling parameters from the
    /// profile defaults attached to this handle.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationError`] if the request fails.
    pub async fn generate(
        &self,
        mut request: ChatRequest,
    ) -> Result<ChatResponse, GenerationError> {
        if request.temperature.is_none() {
            request.temperature = self.temperature;
        }
        if request.max_tokens.is_none() {
            request.max_tokens = self.max_tokens;
        }
        self.provider.generate(&self.model, request).await
    }

    /// Returns the provider name (the prefix of the model identifier).
    #[must_use]
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Returns the model name (without provider prefix).
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Returns the full `provider/model` identifier.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}/{}", self.provider_name, self.model)
    }
}

impl core::fmt::Debug for ChatModel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChatModel")
            .field("provider", &self.provider_name)
            .field("model", &self.model)
            .finish()
    }
}
