//! Configuration error type.

use thiserror::Error;

/// Errors raised while binding or validating configuration.
///
/// All variants carry enough context to be printed directly at startup;
/// configuration failures are terminal and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A key is present but its value cannot be parsed as the expected type.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// The offending configuration key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// No chat provider is configured anywhere.
    ///
    /// At least one of `WOOSTER_OPENAI_API_KEY` or a `routing` provider entry
    /// must be present for the agent to function.
    #[error(
        "no chat provider configured: set WOOSTER_OPENAI_API_KEY or provide \
         WOOSTER_ROUTING_PROVIDERS"
    )]
    MissingChatProvider,
}

impl ConfigError {
    /// Creates an [`InvalidValue`](Self::InvalidValue) error.
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
