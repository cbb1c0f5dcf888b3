//! Plugin contract, plugin manager, and the core plugin set.
//!
//! Plugins are statically linked: the embedder builds a list of
//! constructors and hands it to the [`PluginManager`], which validates
//! metadata, honors configuration enable flags, initializes in a stable
//! lexicographic order, collects contributed tools and scheduled tasks,
//! and shuts everything down in reverse order.
//!
//! There is no dependency declaration between plugins. Peer capabilities
//! are published in the [`ServiceRegistry`](wooster_registry::ServiceRegistry)
//! and resolved **just-in-time** at call sites, so load order never
//! matters for correctness.

mod daily_review;
mod email;
mod error;
mod gtd;
mod health;
mod manager;
mod plugin;

pub use daily_review::{DAILY_REVIEW_TASK_KEY, DailyReviewPlugin};
pub use email::{EMAIL_SERVICE, Email, EmailService};
pub use error::PluginError;
pub use gtd::{GTD_CAPTURE_SERVICE, GtdPlugin, InboxCapture, TaskLine, load_tasks, save_tasks};
pub use health::{HEALTH_LOG_SERVICE, HealthLog, HealthLogPlugin};
pub use manager::{PluginDescriptor, PluginManager};
pub use plugin::{LifecycleState, PluginContext, ScheduledTaskSetup, TaskHandler, WoosterPlugin};
