//! Agent executor error types.

use thiserror::Error;

/// Infrastructure errors for a turn.
///
/// Deadline expiry and routing exhaustion are *not* errors at this level:
/// they end the turn with a graceful message in the
/// [`TurnOutcome`](crate::TurnOutcome) instead, so callers always have
/// something to show the user.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The base prompt or a supplemental prompt file could not be read.
    #[error("prompt assembly failed: {0}")]
    PromptAssembly(String),
}

/// Violations and terminations inside the script sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The program called a function outside the Tool API.
    ///
    /// This is the shape any attempted filesystem, network, or environment
    /// access takes: those capabilities simply do not exist inside the
    /// sandbox.
    #[error("sandbox violation: unknown function '{0}'")]
    UnknownFunction(String),

    /// A `$ref` pointed at a binding or path that does not exist.
    #[error("sandbox violation: unresolvable reference '{0}'")]
    BadReference(String),

    /// The cumulative size of bound values exceeded the memory cap.
    #[error("sandbox violation: output budget exceeded")]
    BudgetExceeded,

    /// A single step exceeded the step deadline.
    #[error("sandbox step exceeded its {0} ms deadline")]
    StepTimeout(u64),

    /// The program exceeded the total deadline.
    #[error("sandbox program exceeded its total deadline")]
    TotalTimeout,

    /// The program finished without calling `finalAnswer`.
    #[error("program finished without calling finalAnswer")]
    NoFinalAnswer,

    /// The program text is not a valid step list.
    #[error("invalid program: {0}")]
    InvalidProgram(String),
}
