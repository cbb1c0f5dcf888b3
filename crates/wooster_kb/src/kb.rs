//! The knowledge base facade.

use crate::embed::EmbeddingWorker;
use crate::error::KbError;
use crate::ingest::{IngestReport, IngestionService};
use crate::query::{QueryEngine, QueryRequest, QueryResponse};
use crate::store::KbStore;
use crate::types::{Block, Document, LinkRecord, RetrievalTrace};
use crate::vector::{FlatIndex, VectorIndex};
use crate::watcher::{DEFAULT_DEBOUNCE, WatchHandle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wooster_config::KnowledgeBaseConfig;
use wooster_models::router::ModelRouter;

/// Embedding batch size for the background worker.
const EMBED_BATCH_SIZE: usize = 64;

/// Sidecar recording which embedder produced the on-disk vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbedderSidecar {
    model: String,
    dims: usize,
}

/// The assembled knowledge base: metadata + FTS store, vector index,
/// ingestion, embedding worker, and the hybrid query engine.
pub struct KnowledgeBase {
    store: Arc<KbStore>,
    index: Arc<FlatIndex>,
    router: Arc<ModelRouter>,
    ingestion: Arc<IngestionService>,
    worker: Arc<EmbeddingWorker>,
    engine: QueryEngine,
    sidecar_path: PathBuf,
    config: KnowledgeBaseConfig,
}

impl KnowledgeBase {
    /// Opens the knowledge base described by `config`.
    ///
    /// Loads stored vectors into the in-process index and verifies the
    /// embedder sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::EmbedderMismatch`] when the sidecar disagrees
    /// with the configured embedder: the vectors were produced under
    /// different assumptions, and only an explicit
    /// [`rebuild_vectors`](Self::rebuild_vectors) may touch them.
    pub fn open(config: KnowledgeBaseConfig, router: Arc<ModelRouter>) -> Result<Self, KbError> {
        let store = Arc::new(KbStore::open(&config.db_path)?);
        let index = Arc::new(FlatIndex::new());

        std::fs::create_dir_all(&config.vector.path)
            .map_err(|err| KbError::io(&config.vector.path, err))?;
        let sidecar_path = config.vector.path.join("embedder.json");
        let configured_model = router
            .select_embedding_model()
            .map(|embedder| embedder.id())
            .unwrap_or_else(|_| "unconfigured".to_string());
        check_sidecar(&sidecar_path, &configured_model, config.vector.dims)?;

        index.load(store.all_vectors()?);

        let default_namespace = config
            .namespaces
            .first()
            .cloned()
            .unwrap_or_else(|| "notes".to_string());
        let ingestion = Arc::new(IngestionService::new(
            store.clone(),
            index.clone() as Arc<dyn VectorIndex>,
            default_namespace,
        ));
        let worker = Arc::new(EmbeddingWorker::new(
            store.clone(),
            index.clone() as Arc<dyn VectorIndex>,
            router.clone(),
            EMBED_BATCH_SIZE,
        ));
        let engine = QueryEngine::new(
            store.clone(),
            index.clone() as Arc<dyn VectorIndex>,
            router.clone(),
            config.privacy_excluded_tags.clone(),
        );

        Ok(Self {
            store,
            index,
            router,
            ingestion,
            worker,
            engine,
            sidecar_path,
            config,
        })
    }

    /// Ingests paths or glob patterns.
    ///
    /// # Errors
    ///
    /// Infrastructure errors only; per-document failures are recorded and
    /// counted in the report.
    pub fn ingest(&self, paths_or_globs: &[String]) -> Result<IngestReport, KbError> {
        self.ingestion.ingest(paths_or_globs)
    }

    /// Full reconciliation over the watched roots (run at startup).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the document list cannot be read.
    pub fn reconcile(&self, roots: &[PathBuf]) -> Result<IngestReport, KbError> {
        self.ingestion.reconcile(roots)
    }

    /// Starts watching `roots` for Markdown changes.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Watch`] when the native watcher cannot start.
    pub fn watch(&self, roots: &[PathBuf]) -> Result<WatchHandle, KbError> {
        crate::watcher::watch(roots, self.ingestion.clone(), DEFAULT_DEBOUNCE)
    }

    /// Embeds every pending block now.
    ///
    /// # Errors
    ///
    /// See [`EmbeddingWorker::run_pending`].
    pub async fn run_embedding_pass(&self) -> Result<usize, KbError> {
        self.worker.run_pending().await
    }

    /// Spawns the periodic embedding worker.
    pub fn spawn_embedding_worker(
        &self,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        self.worker.clone().spawn(interval)
    }

    /// Runs a hybrid query.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the trace or candidates cannot be read;
    /// embedder unavailability degrades instead of failing.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse, KbError> {
        self.engine.query(request).await
    }

    /// Links resolving to `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::DocumentNotFound`] for an unknown document.
    pub fn backlinks(&self, doc_id: &str) -> Result<Vec<LinkRecord>, KbError> {
        self.require_document(doc_id)?;
        self.store.backlinks(doc_id)
    }

    /// Blocks mentioning `doc_id`'s title or aliases without linking to it.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::DocumentNotFound`] for an unknown document.
    pub fn unlinked_mentions(&self, doc_id: &str) -> Result<Vec<Block>, KbError> {
        let document = self.require_document(doc_id)?;
        self.store.unlinked_mentions(&document)
    }

    /// Copies every document of a namespace into `destination`.
    ///
    /// Returns the number of documents exported.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a source cannot be read or the destination
    /// cannot be written.
    pub fn export_namespace(
        &self,
        namespace: &str,
        destination: &Path,
    ) -> Result<usize, KbError> {
        std::fs::create_dir_all(destination).map_err(|err| KbError::io(destination, err))?;
        let documents = self.store.documents(Some(namespace))?;
        let mut exported = 0usize;
        for document in &documents {
            let source = Path::new(&document.path);
            let file_name = source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.md", document.id));
            let target = destination.join(file_name);
            std::fs::copy(source, &target).map_err(|err| KbError::io(source, err))?;
            exported += 1;
        }
        tracing::info!(namespace, exported, destination = %destination.display(), "namespace exported");
        Ok(exported)
    }

    /// Drops every stored vector and resets the sidecar to the currently
    /// configured embedder. Blocks re-embed on the next worker pass.
    ///
    /// # Errors
    ///
    /// Returns a storage or I/O error if the reset fails.
    pub fn rebuild_vectors(&self) -> Result<(), KbError> {
        self.store.clear_vectors()?;
        self.index.clear();
        let configured_model = self
            .router
            .select_embedding_model()
            .map(|embedder| embedder.id())
            .unwrap_or_else(|_| "unconfigured".to_string());
        write_sidecar(&self.sidecar_path, &configured_model, self.config.vector.dims)?;
        tracing::info!(model = %configured_model, "vector index reset for rebuild");
        Ok(())
    }

    /// Fetches a persisted retrieval trace.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub fn trace(&self, trace_id: &str) -> Result<Option<RetrievalTrace>, KbError> {
        self.store.trace(trace_id)
    }

    /// Returns the backing store, for diagnostics.
    #[must_use]
    pub fn store(&self) -> &Arc<KbStore> {
        &self.store
    }

    fn require_document(&self, doc_id: &str) -> Result<Document, KbError> {
        self.store
            .document(doc_id)?
            .ok_or_else(|| KbError::DocumentNotFound(doc_id.to_string()))
    }
}

impl core::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("db_path", &self.config.db_path)
            .field("vectors", &self.index.len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sidecar handling
// ─────────────────────────────────────────────────────────────────────────────

/// Verifies (or initializes) the embedder sidecar.
///
/// A dimension mismatch is always fatal; a model mismatch is fatal unless
/// one side is still `unconfigured` (no embedder selectable yet).
fn check_sidecar(path: &Path, configured_model: &str, dims: usize) -> Result<(), KbError> {
    if path.exists() {
        let text = std::fs::read_to_string(path).map_err(|err| KbError::io(path, err))?;
        let sidecar: EmbedderSidecar = serde_json::from_str(&text)?;
        let model_mismatch = sidecar.model != configured_model
            && sidecar.model != "unconfigured"
            && configured_model != "unconfigured";
        if sidecar.dims != dims || model_mismatch {
            return Err(KbError::EmbedderMismatch {
                stored_model: sidecar.model,
                stored_dims: sidecar.dims,
                configured_model: configured_model.to_string(),
                configured_dims: dims,
            });
        }
        // An embedder became selectable; pin it.
        if sidecar.model == "unconfigured" && configured_model != "unconfigured" {
            write_sidecar(path, configured_model, dims)?;
        }
        return Ok(());
    }
    write_sidecar(path, configured_model, dims)
}

fn write_sidecar(path: &Path, model: &str, dims: usize) -> Result<(), KbError> {
    let sidecar = EmbedderSidecar {
        model: model.to_string(),
        dims,
    };
    std::fs::write(path, serde_json::to_string_pretty(&sidecar)?)
        .map_err(|err| KbError::io(path, err))
}
