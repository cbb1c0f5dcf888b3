//! Routing decision records and counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One routing decision, recorded for every successful selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// The task tag that was routed.
    pub task_tag: String,
    /// Provider of the selected model.
    pub selected_provider: String,
    /// Name of the selected model.
    pub selected_model: String,
    /// Why this candidate won.
    pub reasoning: String,
    /// Candidates that were skipped or failed before the winner.
    pub fallbacks_tried: Vec<String>,
    /// Selection latency (including request time for request-level routing).
    pub latency_ms: u64,
}

/// Routing counters, cumulative since process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    /// Successful selections.
    pub selections: u64,
    /// Selections that succeeded only after skipping or failing candidates.
    pub fallbacks: u64,
    /// Selections that exhausted every candidate.
    pub routing_failures: u64,
}
