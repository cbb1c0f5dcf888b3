//! Provider registry.

use crate::chat::{ChatModel, ChatProvider};
use crate::embedding::{Embedder, EmbeddingProvider};
use crate::error::CreateModelError;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of model provider implementations.
///
/// Providers register under the name used as the prefix of
/// `provider/model` identifiers (e.g. `"openai"` for `"openai/gpt-4o"`).
/// Registration happens once during startup; afterwards the registry is
/// shared immutably behind an `Arc`.
#[derive(Default)]
pub struct ProviderRegistry {
    chat_providers: HashMap<String, Arc<dyn ChatProvider>>,
    embedding_providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
}

impl core::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("chat_providers", &self.chat_provider_names())
            .field("embedding_providers", &self.embedding_provider_names())
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a chat provider.
    ///
    /// # Panics
    ///
    /// Panics if a chat provider with the same name is already registered;
    /// provider names are startup configuration, so a duplicate is a bug.
    pub fn register_chat_provider<P: ChatProvider>(
        &mut self,
        name: impl Into<String>,
        provider: Arc<P>,
    ) {
        let name = name.into();
        assert!(
            !self.chat_providers.contains_key(&name),
            "chat provider '{name}' is already registered"
        );
        self.chat_providers
            .insert(name, provider as Arc<dyn ChatProvider>);
    }

    /// Registers an embedding provider.
    ///
    /// # Panics
    ///
    /// Panics if an embedding provider with the same name is already
    /// registered.
    pub fn register_embedding_provider<P: EmbeddingProvider>(
        &mut self,
        name: impl Into<String>,
        provider: Arc<P>,
    ) {
        let name = name.into();
        assert!(
            !self.embedding_providers.contains_key(&name),
            "embedding provider '{name}' is already registered"
        );
        self.embedding_providers
            .insert(name, provider as Arc<dyn EmbeddingProvider>);
    }

    /// Creates a [`ChatModel`] handle from a `provider/model` identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is malformed or the provider is
    /// not registered.
    pub fn chat_model(&self, model_id: impl AsRef<str>) -> Result<ChatModel, CreateModelError> {
        let model_id = model_id.as_ref();
        let (provider_name, model_name) = split_model_id(model_id)?;
        let provider = self
            .chat_providers
            .get(provider_name)
            .cloned()
            .ok_or_else(|| CreateModelError::UnknownProvider(provider_name.to_string()))?;
        Ok(ChatModel::new(provider_name, provider, model_name))
    }

    /// Creates an [`Embedder`] handle from a `provider/model` identifier and
    /// an expected dimension.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is malformed or the provider is
    /// not registered.
    pub fn embedder(
        &self,
        model_id: impl AsRef<str>,
        dims: usize,
    ) -> Result<Embedder, CreateModelError> {
        let model_id = model_id.as_ref();
        let (provider_name, model_name) = split_model_id(model_id)?;
        let provider = self
            .embedding_providers
            .get(provider_name)
            .cloned()
            .ok_or_else(|| CreateModelError::UnknownProvider(provider_name.to_string()))?;
        Ok(Embedder::new(provider_name, provider, model_name, dims))
    }

    /// Returns a chat provider by name.
    #[must_use]
    pub fn chat_provider(&self, name: &str) -> Option<Arc<dyn ChatProvider>> {
        self.chat_providers.get(name).cloned()
    }

    /// Lists registered chat provider names, sorted.
    #[must_use]
    pub fn chat_provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chat_providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Lists registered embedding provider names, sorted.
    #[must_use]
    pub fn embedding_provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.embedding_providers.keys().cloned().collect();
        names.sort();
        names
    }
}

fn split_model_id(model_id: &str) -> Result<(&str, &str), CreateModelError> {
    model_id
        .split_once('/')
        .filter(|(provider, model)| !provider.is_empty() && !model.is_empty())
        .ok_or_else(|| CreateModelError::InvalidModelId(model_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatRequest, ChatResponse, Usage};
    use crate::error::{EmbeddingError, GenerationError};
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait]
    impl ChatProvider for EchoProvider {
        async fn generate(
            &self,
            _model: &str,
            request: ChatRequest,
        ) -> Result<ChatResponse, GenerationError> {
            Ok(ChatResponse {
                content: vec![crate::chat::AssistantBlock::text(
                    request.system.unwrap_or_default(),
                )],
                usage: Usage::default(),
            })
        }

        async fn probe(&self) -> Result<(), GenerationError> {
            Ok(())
        }
    }

    #[async_trait]
    impl EmbeddingProvider for EchoProvider {
        async fn embed(
            &self,
            _model: &str,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
        }

        async fn probe(&self) -> Result<(), EmbeddingError> {
            Ok(())
        }
    }

    #[test]
    fn chat_model_requires_known_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register_chat_provider("local", Arc::new(EchoProvider));

        assert!(registry.chat_model("local/llama3").is_ok());
        assert!(matches!(
            registry.chat_model("remote/gpt-4o"),
            Err(CreateModelError::UnknownProvider(_))
        ));
    }

    #[test]
    fn malformed_model_id_is_rejected() {
        let registry = ProviderRegistry::new();
        for bad in ["gpt-4o", "/gpt-4o", "openai/"] {
            assert!(matches!(
                registry.chat_model(bad),
                Err(CreateModelError::InvalidModelId(_))
            ));
        }
    }

    #[tokio::test]
    async fn handles_route_to_their_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register_chat_provider("local", Arc::new(EchoProvider));
        registry.register_embedding_provider("local", Arc::new(EchoProvider));

        let chat = registry.chat_model("local/llama3").unwrap();
        let response = chat
            .generate(ChatRequest::with_system("sys", "hi"))
            .await
            .unwrap();
        assert_eq!(response.text(), "sys");

        let embedder = registry.embedder("local/mini", 3).unwrap();
        assert_eq!(embedder.embed(&["x".to_string()]).await.unwrap()[0].len(), 3);
    }
}
