//! Error types for tool execution.

use thiserror::Error;

/// Errors that can occur during tool execution.
///
/// The taxonomy keeps *absent capability* ([`Unavailable`](Self::Unavailable))
/// distinguishable from *present capability that failed*
/// ([`Invocation`](Self::Invocation)). Both are returned to the agent as
/// structured observations; neither is ever thrown across the sandbox
/// boundary.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The capability behind this tool is not installed or enabled.
    #[error("tool unavailable: {0}")]
    Unavailable(String),

    /// No tool with this name is registered.
    #[error("unknown tool: {0}")]
    Unknown(String),

    /// Arguments failed schema validation or deserialization.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The tool ran and failed.
    #[error("execution error: {0}")]
    Invocation(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ToolError {
    /// Creates an [`Unavailable`](Self::Unavailable) error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates an [`InvalidParams`](Self::InvalidParams) error.
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Creates an [`Invocation`](Self::Invocation) error.
    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    /// Renders this error as the observation text shown to the model.
    #[must_use]
    pub fn observation(&self) -> String {
        format!("error: {self}")
    }
}
