//! Service contracts consumed by the Tool API.
//!
//! These are the seams to external collaborators (search backends,
//! delivery channels). Concrete implementations live in plugins and are
//! published in the [`ServiceRegistry`](wooster_registry::ServiceRegistry)
//! under well-known names; tools resolve them just-in-time and surface
//! `ToolUnavailable` when nothing is registered.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Registry name of the web-search service.
pub const WEB_SEARCH_SERVICE: &str = "webSearchService";

/// Registry name of the Discord delivery channel.
pub const DISCORD_SERVICE: &str = "discordService";

/// Registry name of the Signal delivery channel.
pub const SIGNAL_SERVICE: &str = "signalService";

/// One web search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub url: String,
    /// Short excerpt.
    pub snippet: String,
}

/// Web search capability (e.g. backed by Tavily).
#[async_trait]
pub trait WebSearchService: Send + Sync + 'static {
    /// Runs a search and returns ranked hits.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String>;
}

/// Registry wrapper for a [`WebSearchService`].
///
/// The registry stores concrete types; this newtype is the concrete handle
/// providers register and consumers downcast to.
pub struct WebSearch(pub Arc<dyn WebSearchService>);

/// Fire-and-forget message delivery (Discord, Signal).
#[async_trait]
pub trait MessageChannel: Send + Sync + 'static {
    /// Delivers one message.
    async fn send(&self, message: &str) -> Result<(), String>;
}

/// Registry wrapper for a [`MessageChannel`].
pub struct Channel(pub Arc<dyn MessageChannel>);
