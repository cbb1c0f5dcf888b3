//! The [`ChatProvider`] trait implemented by chat model backends.

use super::types::{ChatRequest, ChatResponse};
use crate::error::GenerationError;
use async_trait::async_trait;

/// Trait implemented by chat providers.
///
/// A provider owns the transport to one backend (one API endpoint) and may
/// serve many models. Health probe semantics are provider-specific; for
/// OpenAI-compatible servers the probe is a lightweight model-listing call
/// with a short timeout.
#[async_trait]
pub trait ChatProvider: Send + Sync + 'static {
    /// Sends a chat request to the provider.
    ///
    /// # Arguments
    ///
    /// * `model` - The model name on which to perform generation
    /// * `request` - The chat request
    async fn generate(
        &self,
        model: &str,
        request: ChatRequest,
    ) -> Result<ChatResponse, GenerationError>;

    /// Cheap liveness probe used by the health monitor.
    async fn probe(&self) -> Result<(), GenerationError>;
}
