//! Tool framework for the Wooster agent.
//!
//! A tool is a named capability the agent can invoke: a
//! [`ToolDefinition`](wooster_models::chat::ToolDefinition) (name,
//! description, JSON schema) for the model, plus an async execute function.
//! The [`ToolRegistry`] collects tools from the core and from plugins and
//! guarantees the names visible to the agent are unique.
//!
//! # Collision precedence
//!
//! Registration is provenance-aware: a core tool always beats a plugin tool
//! of the same name, and among plugins the earlier registration wins. Losing
//! registrations are logged and dropped, never panicked on, so a misbehaving
//! plugin cannot shadow `finalAnswer`.

mod error;
mod registry;
mod schema;
mod tool;

pub use error::ToolError;
pub use registry::{ToolProvenance, ToolRegistry};
pub use schema::definition_for;
pub use tool::{Tool, ToolFuture};
