//! # Wooster Internal Library
//!
//! Re-exports the core Wooster crates for convenience.

/// Typed configuration view and logging bootstrap.
pub use wooster_config;

/// Process-wide service registry.
pub use wooster_registry;

/// Model provider interface, registry, and router.
pub use wooster_models;

/// OpenAI-compatible model providers.
pub use wooster_model_providers;

/// Tool framework for the agent.
pub use wooster_tools;

/// Durable cron and one-off scheduling.
pub use wooster_scheduler;

/// Markdown knowledge base with hybrid retrieval.
pub use wooster_kb;

/// Dual-mode agent executor.
pub use wooster_agent;

/// Plugin contract, manager, and core plugins.
pub use wooster_plugins;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use wooster_agent::{AgentExecutor, TurnMode, TurnOutcome, TurnState};
    pub use wooster_config::{ConfigView, init_logging};
    pub use wooster_kb::{KnowledgeBase, QueryRequest};
    pub use wooster_model_providers::bootstrap_providers;
    pub use wooster_models::ProviderRegistry;
    pub use wooster_models::router::{HealthMonitor, ModelRouter, RouterOptions, TaskTag};
    pub use wooster_plugins::{PluginContext, PluginManager, WoosterPlugin};
    pub use wooster_registry::ServiceRegistry;
    pub use wooster_scheduler::{Clock, ScheduleStore, Scheduler};
    pub use wooster_tools::{Tool, ToolRegistry};
}
