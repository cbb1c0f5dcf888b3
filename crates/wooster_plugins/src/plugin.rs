//! The plugin contract.

use crate::error::PluginError;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use wooster_config::ConfigView;
use wooster_registry::ServiceRegistry;
use wooster_scheduler::{ExecutionPolicy, Scheduler};
use wooster_tools::Tool;

/// Lifecycle state of a loaded plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Registered with the manager but not (yet) initialized.
    Discovered,
    /// `initialize` returned successfully.
    Initialized,
    /// `initialize` failed; the plugin contributes nothing.
    Failed,
    /// `shutdown` has run.
    ShutDown,
}

/// Capability bundle handed to plugins.
///
/// Everything here is a cheap shared handle. Plugins must resolve peer
/// services from [`ServiceRegistry`] at call sites, not during
/// initialization.
#[derive(Clone)]
pub struct PluginContext {
    /// The process configuration view.
    pub config: Arc<ConfigView>,
    /// The process-wide service registry.
    pub services: ServiceRegistry,
    /// The scheduler, for ad-hoc schedule management.
    pub scheduler: Arc<Scheduler>,
}

impl core::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginContext").finish_non_exhaustive()
    }
}

/// Boxed async handler for a scheduled task.
pub type TaskHandler = Arc<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        + Send
        + Sync,
>;

/// A plugin's declaration of a scheduled task.
///
/// On first encounter of the task key the manager creates the schedule;
/// on later runs only the in-memory handler registration is refreshed, so
/// user edits to the stored schedule survive restarts.
#[derive(Clone)]
pub struct ScheduledTaskSetup {
    /// Unique task key (e.g. `system.dailyReview`).
    pub task_key: String,
    /// Human-readable description.
    pub description: String,
    /// Schedule used when the task is first created.
    pub default_schedule_expression: String,
    /// Override of the default, when the plugin's configuration says so.
    pub effective_schedule_expression: Option<String>,
    /// Whether the plugin wants this task active at all.
    pub enabled: bool,
    /// The direct handler to register for the task key.
    pub handler: Option<TaskHandler>,
    /// Missed-firing policy for the schedule.
    pub execution_policy: ExecutionPolicy,
    /// Payload stored on the schedule row.
    pub initial_payload: Vec<u8>,
}

impl ScheduledTaskSetup {
    /// The expression to use when creating the schedule.
    #[must_use]
    pub fn expression(&self) -> &str {
        self.effective_schedule_expression
            .as_deref()
            .unwrap_or(&self.default_schedule_expression)
    }
}

impl core::fmt::Debug for ScheduledTaskSetup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScheduledTaskSetup")
            .field("task_key", &self.task_key)
            .field("expression", &self.expression())
            .field("enabled", &self.enabled)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// The capability interface every Wooster plugin implements.
///
/// All methods beyond the metadata accessors are optional; the defaults
/// contribute nothing.
#[async_trait]
pub trait WoosterPlugin: Send + Sync + 'static {
    /// Canonical, unique, lower-camel-case name (e.g. `dailyReview`).
    fn name(&self) -> &str;

    /// Version string.
    fn version(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// One-time initialization; called at most once per process.
    async fn initialize(&self, context: &PluginContext) -> Result<(), PluginError> {
        let _ = context;
        Ok(())
    }

    /// Graceful teardown; called only when `initialize` succeeded.
    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Tools this plugin contributes to the agent.
    fn agent_tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Scheduled tasks this plugin wants managed.
    fn scheduled_task_setups(&self) -> Vec<ScheduledTaskSetup> {
        Vec::new()
    }
}
