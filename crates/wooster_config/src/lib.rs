//! Typed configuration view and logging bootstrap.
//!
//! Configuration enters the process as flat env-style key/value pairs
//! (`WOOSTER_OPENAI_API_KEY=...`) and is bound once at startup into the
//! read-only [`ConfigView`]. Every component receives the view behind an
//! `Arc` and never mutates it.
//!
//! Validation is fail-fast: a view that cannot support a running agent
//! (e.g. no chat provider at all) refuses to load with a human-readable
//! reason instead of failing later mid-turn.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use wooster_config::ConfigView;
//!
//! let mut pairs = HashMap::new();
//! pairs.insert("WOOSTER_OPENAI_API_KEY".to_string(), "sk-local-test".to_string());
//! pairs.insert("WOOSTER_LOGGING_QUIET_MODE".to_string(), "true".to_string());
//!
//! let config = ConfigView::from_pairs(&pairs).unwrap();
//! assert_eq!(config.logging.console_level, "error");
//! assert!(config.plugin_enabled("gtd")); // absent flag defaults to enabled
//! ```

mod error;
mod logging;
mod view;

pub use error::ConfigError;
pub use logging::init_logging;
pub use view::{
    CodeAgentConfig, ConfigView, KnowledgeBaseConfig, LoggingConfig, OpenAiConfig, ProviderEntry,
    RoutingConfig, RoutingProfile, SchedulerConfig, VectorConfig, WorkspaceConfig,
};
