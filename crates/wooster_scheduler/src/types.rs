//! Schedule and execution-log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a firing is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerType {
    /// Call the registered direct handler for the schedule's task key.
    DirectHandler,
    /// Run the payload as a prompt through the agent executor.
    AgentPrompt,
}

impl HandlerType {
    /// Database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerType::DirectHandler => "DIRECT_HANDLER",
            HandlerType::AgentPrompt => "AGENT_PROMPT",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DIRECT_HANDLER" => Some(HandlerType::DirectHandler),
            "AGENT_PROMPT" => Some(HandlerType::AgentPrompt),
            _ => None,
        }
    }
}

/// What happens to firings missed while the process was down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPolicy {
    /// Ignore missed firings; arm only the next future one.
    SkipMissed,
    /// Run the most recent missed firing once, immediately at startup.
    RunImmediatelyIfMissed,
    /// At most one successful run per period, deduplicated via the
    /// execution log; idempotent across restarts within the same period.
    RunOncePerPeriodCatchUp,
}

impl ExecutionPolicy {
    /// Database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionPolicy::SkipMissed => "SKIP_MISSED",
            ExecutionPolicy::RunImmediatelyIfMissed => "RUN_IMMEDIATELY_IF_MISSED",
            ExecutionPolicy::RunOncePerPeriodCatchUp => "RUN_ONCE_PER_PERIOD_CATCH_UP",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SKIP_MISSED" => Some(ExecutionPolicy::SkipMissed),
            "RUN_IMMEDIATELY_IF_MISSED" => Some(ExecutionPolicy::RunImmediatelyIfMissed),
            "RUN_ONCE_PER_PERIOD_CATCH_UP" => Some(ExecutionPolicy::RunOncePerPeriodCatchUp),
            _ => None,
        }
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// The handler completed successfully.
    Success,
    /// The handler failed or was abandoned.
    Failure,
    /// A success was already recorded for this period.
    SkippedDuplicate,
}

impl ExecutionStatus {
    /// Database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failure => "FAILURE",
            ExecutionStatus::SkippedDuplicate => "SKIPPED_DUPLICATE",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESS" => Some(ExecutionStatus::Success),
            "FAILURE" => Some(ExecutionStatus::Failure),
            "SKIPPED_DUPLICATE" => Some(ExecutionStatus::SkippedDuplicate),
            _ => None,
        }
    }
}

/// A persisted schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleItem {
    /// Stable identifier.
    pub id: Uuid,
    /// Human-readable description.
    pub description: String,
    /// Cron expression or RFC 3339 instant, as created.
    pub schedule_expression: String,
    /// Opaque payload: a prompt string or JSON handler arguments.
    pub payload: Vec<u8>,
    /// Unique key mapping to a registered handler or agent task.
    pub task_key: String,
    /// Dispatch mode.
    pub handler_type: HandlerType,
    /// Missed-firing policy.
    pub execution_policy: ExecutionPolicy,
    /// Whether timers are armed for this schedule.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Advisory record of the last dispatch; never used for correctness.
    pub last_invocation: Option<DateTime<Utc>>,
}

impl ScheduleItem {
    /// The payload interpreted as UTF-8, for `AGENT_PROMPT` dispatch.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// The payload deserialized as JSON for direct handlers; non-JSON
    /// payloads are passed through as a JSON string.
    #[must_use]
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload)
            .unwrap_or_else(|_| serde_json::Value::String(self.payload_text()))
    }
}

/// A schedule as submitted for creation (no id yet).
#[derive(Debug, Clone)]
pub struct NewSchedule {
    /// Human-readable description.
    pub description: String,
    /// Cron expression or RFC 3339 instant.
    pub schedule_expression: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Unique task key.
    pub task_key: String,
    /// Dispatch mode.
    pub handler_type: HandlerType,
    /// Missed-firing policy.
    pub execution_policy: ExecutionPolicy,
}

/// One row of the append-only execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Row identifier.
    pub id: Uuid,
    /// The schedule this execution belongs to.
    pub schedule_id: Uuid,
    /// Canonical dedup key for the firing's period.
    pub period_identifier: String,
    /// Outcome.
    pub status: ExecutionStatus,
    /// When the outcome was recorded.
    pub executed_at: DateTime<Utc>,
    /// Truncated error summary or context notes.
    pub notes: Option<String>,
}
