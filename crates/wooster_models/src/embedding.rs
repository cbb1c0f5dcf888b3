//! Embedding provider trait and handle.

use crate::error::EmbeddingError;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait implemented by embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embeds a batch of texts with the given model.
    ///
    /// The returned vectors are in input order and all share one dimension.
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Cheap liveness probe used by the health monitor.
    async fn probe(&self) -> Result<(), EmbeddingError>;
}

/// A handle to one embedding model on one provider.
///
/// Carries the expected dimension so consumers (the knowledge base) can
/// detect a misconfigured backend before vectors reach the index.
#[derive(Clone)]
pub struct Embedder {
    provider_name: String,
    provider: Arc<dyn EmbeddingProvider>,
    model: String,
    dims: usize,
}

impl Embedder {
    pub(crate) fn new(
        provider_name: impl Into<String>,
        provider: Arc<dyn EmbeddingProvider>,
        model: impl Into<String>,
        dims: usize,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            provider,
            model: model.into(),
            dims,
        }
    }

    /// Embeds a batch of texts.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::InvalidResponse`] when the provider returns
    /// the wrong number of vectors or a vector of the wrong dimension, in
    /// addition to transport and provider errors.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = self.provider.embed(&self.model, texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected dimension {}, got {}",
                self.dims,
                bad.len()
            )));
        }
        Ok(vectors)
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

    /// Returns the embedding dimension this handle produces.
    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }
}

impl core::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Embedder")
            .field("provider", &self.provider_name)
            .field("model", &self.model)
            .field("dims", &self.dims)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(
            &self,
            _model: &str,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.5; self.dims]).collect())
        }

        async fn probe(&self) -> Result<(), EmbeddingError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn embed_checks_dimension() {
        let provider = Arc::new(FixedEmbedder { dims: 4 });
        let good = Embedder::new("local", provider.clone(), "mini", 4);
        let bad = Embedder::new("local", provider, "mini", 8);

        let texts = vec!["a".to_string(), "b".to_string()];
        assert_eq!(good.embed(&texts).await.unwrap().len(), 2);
        assert!(matches!(
            bad.embed(&texts).await,
            Err(EmbeddingError::InvalidResponse(_))
        ));
    }
}
