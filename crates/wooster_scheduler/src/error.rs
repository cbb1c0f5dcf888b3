//! Scheduler error type.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the scheduler and its store.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A schedule with this task key already exists.
    ///
    /// The caller must decide whether to update the existing schedule
    /// instead; creation never silently overwrites.
    #[error("a schedule with task key '{0}' already exists")]
    DuplicateTaskKey(String),

    /// No schedule with this id exists.
    #[error("no schedule with id {0}")]
    NotFound(Uuid),

    /// The schedule expression is neither a cron expression nor an RFC 3339
    /// instant.
    #[error("invalid schedule expression '{expression}': {reason}")]
    InvalidExpression {
        /// The rejected expression.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Underlying storage error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Payload serialization error.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ScheduleError {
    /// Creates an [`InvalidExpression`](Self::InvalidExpression) error.
    pub fn invalid_expression(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}
