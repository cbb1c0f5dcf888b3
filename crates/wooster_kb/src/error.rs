//! Knowledge base error type.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by knowledge base operations.
#[derive(Debug, Error)]
pub enum KbError {
    /// Underlying storage error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Filesystem error while reading or exporting documents.
    #[error("io error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A single document failed to parse or embed.
    ///
    /// Ingestion records the failure and continues with other documents;
    /// this variant surfaces only when the caller targeted the document
    /// directly.
    #[error("ingestion failed for {path}: {reason}")]
    Ingestion {
        /// The document path.
        path: PathBuf,
        /// Why ingestion failed.
        reason: String,
    },

    /// The on-disk vectors were produced by a different embedder.
    ///
    /// No silent reinterpretation: the caller must invoke an explicit
    /// rebuild before the vector side is usable again.
    #[error(
        "embedder mismatch: index built with {stored_model} ({stored_dims} dims), \
         configured {configured_model} ({configured_dims} dims); explicit rebuild required"
    )]
    EmbedderMismatch {
        /// Model recorded in the sidecar.
        stored_model: String,
        /// Dimension recorded in the sidecar.
        stored_dims: usize,
        /// Currently configured model.
        configured_model: String,
        /// Currently configured dimension.
        configured_dims: usize,
    },

    /// The embedding backend is unavailable.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watch(String),

    /// JSON (de)serialization error for stored metadata.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An unknown document id was referenced.
    #[error("no document with id {0}")]
    DocumentNotFound(String),
}

impl KbError {
    /// Creates an [`Io`](Self::Io) error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an [`Ingestion`](Self::Ingestion) error.
    pub fn ingestion(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Ingestion {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
