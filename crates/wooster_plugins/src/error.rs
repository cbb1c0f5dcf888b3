//! Plugin error type.

use thiserror::Error;

/// Errors raised by plugin validation, initialization, and shutdown.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Required metadata is missing or empty.
    #[error("invalid plugin metadata: {0}")]
    InvalidMetadata(String),

    /// A plugin with the same canonical name was already loaded.
    #[error("duplicate plugin name '{0}'")]
    DuplicateName(String),

    /// The plugin's own initialization failed.
    #[error("initialization failed: {0}")]
    Initialize(String),

    /// The plugin's shutdown failed.
    #[error("shutdown failed: {0}")]
    Shutdown(String),
}

impl PluginError {
    /// Creates an [`Initialize`](Self::Initialize) error.
    pub fn initialize(msg: impl Into<String>) -> Self {
        Self::Initialize(msg.into())
    }

    /// Creates a [`Shutdown`](Self::Shutdown) error.
    pub fn shutdown(msg: impl Into<String>) -> Self {
        Self::Shutdown(msg.into())
    }
}
