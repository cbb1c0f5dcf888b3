//! Error types for model operations and routing.

use thiserror::Error;

/// Errors for chat generation operations.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Http error (connection error, timeout, etc.).
    #[error("http error: {0}")]
    Http(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request exceeded its profile timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Error parsing the request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Error parsing the response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Error returned by the model provider.
    #[error("provider error: {message}")]
    Provider {
        /// HTTP status code if available.
        status: Option<u16>,
        /// Error message.
        message: String,
    },
}

impl GenerationError {
    /// Whether retrying the same candidate could plausibly succeed.
    ///
    /// Transport failures and 5xx/429 responses are transient; everything
    /// else (auth, malformed request, 4xx) is not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Provider { status, .. } => {
                matches!(status, Some(429) | Some(500..=599) | None)
            }
            _ => false,
        }
    }
}

/// Errors for embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Http error (connection error, timeout, etc.).
    #[error("http error: {0}")]
    Http(String),

    /// Error returned by the embedding provider.
    #[error("provider error: {message}")]
    Provider {
        /// HTTP status code if available.
        status: Option<u16>,
        /// Error message.
        message: String,
    },

    /// The provider returned a vector count or dimension that does not match
    /// the request.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Error creating a model handle from an identifier.
#[derive(Debug, Error)]
pub enum CreateModelError {
    /// Invalid model ID format.
    #[error("invalid model id '{0}': expected format 'provider/model'")]
    InvalidModelId(String),

    /// The specified provider was not found in the registry.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Errors for router selection.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Every candidate in the profile and the global fallback chain is
    /// unhealthy or unregistered.
    #[error("no healthy model candidate for task {task}: tried {tried:?}")]
    Unavailable {
        /// The task tag that was being routed.
        task: String,
        /// Candidate identifiers that were considered and rejected.
        tried: Vec<String>,
    },

    /// No embedding provider is configured.
    #[error("no embedding model configured")]
    NoEmbedder,

    /// A candidate identifier in a profile could not be resolved.
    #[error(transparent)]
    CreateModel(#[from] CreateModelError),

    /// All fallback attempts failed at request time; the last error is kept.
    #[error("all {attempts} attempts failed, last error: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt's error.
        #[source]
        last: GenerationError,
    },
}
