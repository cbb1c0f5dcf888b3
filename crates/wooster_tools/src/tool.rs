//! The core [`Tool`] trait for executable tools.

use crate::error::ToolError;
use std::future::Future;
use std::pin::Pin;
use wooster_models::chat::ToolDefinition;

/// Boxed future returned by tool execution.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + 'a>>;

/// A capability invocable by the agent.
///
/// Tools expose a [`ToolDefinition`] (name, description, JSON schema) for
/// the model, and an async [`execute`](Tool::execute) method that runs with
/// the tool's captured environment. Backing services should be resolved
/// just-in-time inside `execute`, not captured at construction, so tools
/// stay resilient to plugin load order.
pub trait Tool: Send + Sync + 'static {
    /// Returns the model-facing tool definition with JSON schema.
    fn definition(&self) -> ToolDefinition;

    /// Executes the tool with JSON arguments.
    fn execute(&self, args: serde_json::Value) -> ToolFuture<'_>;
}
