//! Background embedding worker.

use crate::error::KbError;
use crate::store::KbStore;
use crate::vector::VectorIndex;
use std::sync::Arc;
use std::time::Duration;
use wooster_models::embedding::Embedder;
use wooster_models::router::ModelRouter;

/// Attempts per batch before the blocks are left pending for a later pass.
const EMBED_ATTEMPTS: u32 = 3;

/// Base delay of the per-batch exponential backoff.
const EMBED_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Batches pending blocks through the router-selected embedder.
///
/// Vector rows and the embedded flag land in one transaction per batch; a
/// failed batch leaves its blocks pending (and any previous vectors
/// untouched), so the next pass retries them.
pub struct EmbeddingWorker {
    store: Arc<KbStore>,
    index: Arc<dyn VectorIndex>,
    router: Arc<ModelRouter>,
    batch_size: usize,
}

impl EmbeddingWorker {
    /// Creates a worker with the given batch size (64 is a good default).
    #[must_use]
    pub fn new(
        store: Arc<KbStore>,
        index: Arc<dyn VectorIndex>,
        router: Arc<ModelRouter>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            index,
            router,
            batch_size: batch_size.max(1),
        }
    }

    /// Embeds every pending block, batch by batch.
    ///
    /// Returns the number of blocks embedded.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::EmbedderUnavailable`] when no embedder can be
    /// selected or a batch exhausts its retries; earlier batches of the
    /// same pass remain committed.
    pub async fn run_pending(&self) -> Result<usize, KbError> {
        let mut total = 0usize;
        loop {
            let pending = self.store.pending_blocks(self.batch_size)?;
            if pending.is_empty() {
                break;
            }
            let embedder = self
                .router
                .select_embedding_model()
                .map_err(|err| KbError::EmbedderUnavailable(err.to_string()))?;

            let texts: Vec<String> = pending.iter().map(|block| block.text.clone()).collect();
            let vectors = self.embed_with_backoff(&embedder, &texts).await?;

            let entries: Vec<(String, Vec<f32>)> = pending
                .iter()
                .map(|block| block.id.clone())
                .zip(vectors)
                .collect();
            self.store.store_vectors(&entries)?;
            for (block_id, vector) in entries {
                self.index.insert(block_id, vector);
            }
            total += pending.len();
        }
        if total > 0 {
            tracing::debug!(embedded = total, "embedding pass complete");
        }
        Ok(total)
    }

    /// Spawns a periodic embedding loop on the current runtime.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(err) = self.run_pending().await {
                    tracing::warn!(%err, "embedding pass failed, will retry next cycle");
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    async fn embed_with_backoff(
        &self,
        embedder: &Embedder,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, KbError> {
        let mut attempt = 0u32;
        loop {
            match embedder.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if attempt + 1 < EMBED_ATTEMPTS => {
                    let delay = EMBED_BACKOFF_BASE * 2u32.pow(attempt);
                    tracing::debug!(%err, ?delay, "embedding batch failed, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(KbError::EmbedderUnavailable(err.to_string())),
            }
        }
    }
}

impl core::fmt::Debug for EmbeddingWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EmbeddingWorker")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
