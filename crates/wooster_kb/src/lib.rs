//! Markdown knowledge base with hybrid retrieval.
//!
//! The knowledge base ingests a user's Markdown notes into two coupled
//! stores — a relational metadata + full-text store and a vector index —
//! and answers queries by fusing lexical and dense similarity signals.
//!
//! # Pipeline
//!
//! Ingestion: file events (debounced) → content-hash gate → Markdown block
//! partitioning → metadata/FTS/link upsert in one transaction → changed
//! blocks queue for the embedding worker → vectors land in the index.
//!
//! Query: optional retrieval gate → FTS top-N and ANN top-N → merge and
//! deduplicate → weighted rerank → optional link-graph expansion → contexts
//! with stable citations. Every hybrid query persists a retrieval trace.
//!
//! # Degraded mode
//!
//! When the embedder is down, queries fall back to FTS-only and the trace
//! marks the degradation; stale vector results are never returned for a
//! query that could not be embedded.

mod embed;
mod error;
mod ingest;
mod kb;
mod markdown;
mod query;
mod store;
mod types;
mod vector;
mod watcher;

pub use embed::EmbeddingWorker;
pub use error::KbError;
pub use ingest::{IngestReport, IngestionService};
pub use kb::KnowledgeBase;
pub use markdown::{ParsedBlock, ParsedDocument, ParsedLink, partition_markdown};
pub use query::{QueryRequest, QueryResponse, RetrievedContext};
pub use store::KbStore;
pub use types::{
    Block, BlockKind, Citation, Document, LinkRecord, RefKind, RetrievalTrace,
};
pub use vector::{FlatIndex, VectorIndex};
pub use watcher::WatchHandle;
