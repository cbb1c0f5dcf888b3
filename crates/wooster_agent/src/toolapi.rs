//! The core Tool API: the stable surface both agent modes call through.

use crate::services::{
    Channel, DISCORD_SERVICE, SIGNAL_SERVICE, WEB_SEARCH_SERVICE, WebSearch,
};
use chrono::{Duration as ChronoDuration, Local, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;
use wooster_kb::{KnowledgeBase, QueryRequest};
use wooster_registry::ServiceRegistry;
use wooster_scheduler::{ExecutionPolicy, HandlerType, NewSchedule, Scheduler};
use wooster_tools::{Tool, ToolError, ToolFuture, ToolRegistry, definition_for};

/// Default context count for `queryRAG`.
const RAG_TOP_K: usize = 5;

/// Maximum bytes kept from a fetched body.
const FETCH_MAX_BYTES: usize = 65_536;

/// Shared dependencies of the core tools.
///
/// Services resolve just-in-time from the registry at each invocation, so
/// tools built before a provider plugin loaded still find it later.
pub struct ToolApiDeps {
    /// Process-wide service registry.
    pub services: ServiceRegistry,
    /// Knowledge base handle, when the KB subsystem is up.
    pub kb: Option<Arc<KnowledgeBase>>,
    /// Scheduler handle, when the scheduler subsystem is up.
    pub scheduler: Option<Arc<Scheduler>>,
    /// Append target for `writeNote`.
    pub notes_path: PathBuf,
    /// Host allowlist for `fetchText`; empty means unrestricted.
    pub fetch_allowed_hosts: Vec<String>,
}

impl core::fmt::Debug for ToolApiDeps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ToolApiDeps")
            .field("notes_path", &self.notes_path)
            .field("fetch_allowed_hosts", &self.fetch_allowed_hosts)
            .finish_non_exhaustive()
    }
}

/// Registers the whole core Tool API into `registry`.
///
/// Core registration wins name collisions, so no plugin can shadow these.
pub fn install_tool_api(registry: &mut ToolRegistry, deps: Arc<ToolApiDeps>) {
    registry.register_core(WebSearchTool { deps: deps.clone() });
    registry.register_core(FetchTextTool { deps: deps.clone() });
    registry.register_core(QueryRagTool { deps: deps.clone() });
    registry.register_core(WriteNoteTool { deps: deps.clone() });
    registry.register_core(ScheduleTool { deps: deps.clone() });
    registry.register_core(NotifyTool {
        deps: deps.clone(),
        name: "discordNotify",
        service: DISCORD_SERVICE,
    });
    registry.register_core(NotifyTool {
        deps,
        name: "signalNotify",
        service: SIGNAL_SERVICE,
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// webSearch
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for `webSearch`.
#[derive(Deserialize, JsonSchema)]
struct WebSearchParams {
    /// The search query.
    query: String,
}

struct WebSearchTool {
    deps: Arc<ToolApiDeps>,
}

impl Tool for WebSearchTool {
    fn definition(&self) -> wooster_models::chat::ToolDefinition {
        definition_for::<WebSearchParams>("webSearch", "Search the web and return ranked results.")
    }

    fn execute(&self, args: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let params: WebSearchParams = serde_json::from_value(args)?;
            let service = self
                .deps
                .services
                .lookup_as::<WebSearch>(WEB_SEARCH_SERVICE)
                .ok_or_else(|| ToolError::unavailable("web search is not installed or enabled"))?;
            let hits = service
                .0
                .search(&params.query)
                .await
                .map_err(ToolError::invocation)?;
            Ok(json!({
                "results": hits
                    .iter()
                    .map(|hit| json!({"title": hit.title, "url": hit.url, "snippet": hit.snippet}))
                    .collect::<Vec<_>>()
            }))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// fetchText
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for `fetchText`.
#[derive(Deserialize, JsonSchema)]
struct FetchTextParams {
    /// The URL to fetch.
    url: String,
}

struct FetchTextTool {
    deps: Arc<ToolApiDeps>,
}

impl Tool for FetchTextTool {
    fn definition(&self) -> wooster_models::chat::ToolDefinition {
        definition_for::<FetchTextParams>(
            "fetchText",
            "Fetch a URL and return its body as text (plain text or HTML only, size-capped).",
        )
    }

    fn execute(&self, args: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let params: FetchTextParams = serde_json::from_value(args)?;
            let url = reqwest::Url::parse(&params.url)
                .map_err(|err| ToolError::invalid_params(format!("bad url: {err}")))?;

            if !self.deps.fetch_allowed_hosts.is_empty() {
                let host = url.host_str().unwrap_or_default();
                let allowed = self
                    .deps
                    .fetch_allowed_hosts
                    .iter()
                    .any(|entry| entry == host);
                if !allowed {
                    return Err(ToolError::unavailable(format!(
                        "host '{host}' is not on the fetch allowlist"
                    )));
                }
            }

            let response = reqwest::get(url)
                .await
                .map_err(|err| ToolError::invocation(err.to_string()))?;
            if !response.status().is_success() {
                return Err(ToolError::invocation(format!(
                    "request failed with status {}",
                    response.status()
                )));
            }
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("text/plain")
                .to_string();
            if !content_type.starts_with("text/") {
                return Err(ToolError::invocation(format!(
                    "unsupported content type '{content_type}'"
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|err| ToolError::invocation(err.to_string()))?;
            if body.len() > FETCH_MAX_BYTES {
                return Err(ToolError::invocation(format!(
                    "body exceeds the {FETCH_MAX_BYTES}-byte cap"
                )));
            }
            Ok(Value::String(body))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// queryRAG
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for `queryRAG`.
#[derive(Deserialize, JsonSchema)]
struct QueryRagParams {
    /// The question to answer from the knowledge base.
    query: String,
}

struct QueryRagTool {
    deps: Arc<ToolApiDeps>,
}

impl Tool for QueryRagTool {
    fn definition(&self) -> wooster_models::chat::ToolDefinition {
        definition_for::<QueryRagParams>(
            "queryRAG",
            "Search the user's notes and return short excerpts with citations.",
        )
    }

    fn execute(&self, args: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let params: QueryRagParams = serde_json::from_value(args)?;
            let kb = self
                .deps
                .kb
                .as_ref()
                .ok_or_else(|| ToolError::invocation("knowledge base is unavailable"))?;

            let response = kb
                .query(QueryRequest {
                    top_k: Some(RAG_TOP_K),
                    force_retrieval: true,
                    ..QueryRequest::new(params.query)
                })
                .await
                .map_err(|err| ToolError::invocation(err.to_string()))?;

            let excerpts: Vec<Value> = response
                .contexts
                .iter()
                .zip(
                    response
                        .citations
                        .iter()
                        .map(Some)
                        .chain(std::iter::repeat(None)),
                )
                .map(|(context, citation)| {
                    let cite = citation.map(|c| {
                        format!("{}#{}-{}", c.doc_id, c.start_offset, c.end_offset)
                    });
                    json!({"text": context.text, "citation": cite})
                })
                .collect();
            Ok(json!({"excerpts": excerpts, "degraded": response.degraded}))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// writeNote
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for `writeNote`.
#[derive(Deserialize, JsonSchema)]
struct WriteNoteParams {
    /// The note text to append.
    text: String,
}

struct WriteNoteTool {
    deps: Arc<ToolApiDeps>,
}

impl Tool for WriteNoteTool {
    fn definition(&self) -> wooster_models::chat::ToolDefinition {
        definition_for::<WriteNoteParams>(
            "writeNote",
            "Append a timestamped line to the notes file.",
        )
    }

    fn execute(&self, args: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let params: WriteNoteParams = serde_json::from_value(args)?;
            let line = format!(
                "- [{}] {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                params.text.trim()
            );
            if let Some(parent) = self.deps.notes_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| ToolError::invocation(err.to_string()))?;
            }
            let mut existing = std::fs::read_to_string(&self.deps.notes_path).unwrap_or_default();
            existing.push_str(&line);
            std::fs::write(&self.deps.notes_path, existing)
                .map_err(|err| ToolError::invocation(err.to_string()))?;
            Ok(json!({"written": true}))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// schedule
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for `schedule`.
#[derive(Deserialize, JsonSchema)]
struct ScheduleParams {
    /// When to run: an RFC 3339 instant or a relative phrase like
    /// "in 2 hours".
    when: String,
    /// The prompt the agent should run at that time.
    text: String,
}

struct ScheduleTool {
    deps: Arc<ToolApiDeps>,
}

impl Tool for ScheduleTool {
    fn definition(&self) -> wooster_models::chat::ToolDefinition {
        definition_for::<ScheduleParams>(
            "schedule",
            "Schedule an agent task for a future instant.",
        )
    }

    fn execute(&self, args: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let params: ScheduleParams = serde_json::from_value(args)?;
            let scheduler = self
                .deps
                .scheduler
                .as_ref()
                .ok_or_else(|| ToolError::invocation("scheduler is unavailable"))?;

            let instant = parse_when(&params.when).ok_or_else(|| {
                ToolError::invalid_params(format!(
                    "cannot interpret '{}' as a time; use RFC 3339 or 'in N minutes/hours/days'",
                    params.when
                ))
            })?;

            let task_key = format!("agent.scheduled.{}", Uuid::new_v4());
            let id = scheduler
                .create(NewSchedule {
                    description: format!("Agent task scheduled for {instant}"),
                    schedule_expression: instant.to_rfc3339(),
                    payload: params.text.clone().into_bytes(),
                    task_key: task_key.clone(),
                    handler_type: HandlerType::AgentPrompt,
                    execution_policy: ExecutionPolicy::RunImmediatelyIfMissed,
                })
                .map_err(|err| ToolError::invocation(err.to_string()))?;

            Ok(json!({"scheduled": true, "id": id.to_string(), "task_key": task_key, "at": instant.to_rfc3339()}))
        })
    }
}

/// Parses an absolute RFC 3339 instant or a small relative grammar
/// ("in 20 minutes", "in 2 hours", "in 3 days").
fn parse_when(when: &str) -> Option<chrono::DateTime<Utc>> {
    let trimmed = when.trim();
    if let Ok(instant) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(instant.with_timezone(&Utc));
    }

    let rest = trimmed.strip_prefix("in ")?;
    let mut parts = rest.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    let delta = match unit.trim_end_matches('s') {
        "minute" | "min" => ChronoDuration::minutes(amount),
        "hour" | "hr" => ChronoDuration::hours(amount),
        "day" => ChronoDuration::days(amount),
        _ => return None,
    };
    Some(Utc::now() + delta)
}

// ─────────────────────────────────────────────────────────────────────────────
// discordNotify / signalNotify
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for the notify tools.
#[derive(Deserialize, JsonSchema)]
struct NotifyParams {
    /// The message to deliver.
    message: String,
}

struct NotifyTool {
    deps: Arc<ToolApiDeps>,
    name: &'static str,
    service: &'static str,
}

impl Tool for NotifyTool {
    fn definition(&self) -> wooster_models::chat::ToolDefinition {
        definition_for::<NotifyParams>(self.name, "Deliver a message through this channel.")
    }

    fn execute(&self, args: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let params: NotifyParams = serde_json::from_value(args)?;
            let channel = self
                .deps
                .services
                .lookup_as::<Channel>(self.service)
                .ok_or_else(|| {
                    ToolError::unavailable(format!("no {} channel is registered", self.name))
                })?;
            channel
                .0
                .send(&params.message)
                .await
                .map_err(ToolError::invocation)?;
            Ok(json!({"delivered": true}))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MessageChannel, SearchHit, WebSearchService};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn deps(dir: &TempDir) -> Arc<ToolApiDeps> {
        Arc::new(ToolApiDeps {
            services: ServiceRegistry::new(),
            kb: None,
            scheduler: None,
            notes_path: dir.path().join("notes.md"),
            fetch_allowed_hosts: Vec::new(),
        })
    }

    fn registry_with(deps: Arc<ToolApiDeps>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        install_tool_api(&mut registry, deps);
        registry
    }

    #[test]
    fn all_core_tool_names_are_present_and_unique() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with(deps(&dir));
        let names = registry.names();
        assert_eq!(
            names,
            vec![
                "webSearch",
                "fetchText",
                "queryRAG",
                "writeNote",
                "schedule",
                "discordNotify",
                "signalNotify"
            ]
        );
    }

    #[tokio::test]
    async fn web_search_without_service_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with(deps(&dir));
        let err = registry
            .execute("webSearch", &json!({"query": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[tokio::test]
    async fn web_search_resolves_service_just_in_time() {
        struct FixedSearch;

        #[async_trait]
        impl WebSearchService for FixedSearch {
            async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
                Ok(vec![SearchHit {
                    title: format!("about {query}"),
                    url: "https://example.org".to_string(),
                    snippet: "snippet".to_string(),
                }])
            }
        }

        let dir = TempDir::new().unwrap();
        let shared = deps(&dir);
        let registry = registry_with(shared.clone());

        // The service shows up only after the tool was built.
        shared.services.register(
            WEB_SEARCH_SERVICE,
            Arc::new(WebSearch(Arc::new(FixedSearch))),
        );

        let result = registry
            .execute("webSearch", &json!({"query": "rust"}))
            .await
            .unwrap();
        assert_eq!(result["results"][0]["title"], "about rust");
    }

    #[tokio::test]
    async fn write_note_appends_timestamped_lines() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with(deps(&dir));

        registry
            .execute("writeNote", &json!({"text": "first"}))
            .await
            .unwrap();
        registry
            .execute("writeNote", &json!({"text": "second"}))
            .await
            .unwrap();

        let notes = std::fs::read_to_string(dir.path().join("notes.md")).unwrap();
        let lines: Vec<&str> = notes.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("- ["));
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
    }

    #[tokio::test]
    async fn notify_routes_to_registered_channel() {
        struct Recorder(Mutex<Vec<String>>);

        #[async_trait]
        impl MessageChannel for Recorder {
            async fn send(&self, message: &str) -> Result<(), String> {
                self.0.lock().push(message.to_string());
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let shared = deps(&dir);
        let registry = registry_with(shared.clone());

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        shared
            .services
            .register(DISCORD_SERVICE, Arc::new(Channel(recorder.clone())));

        registry
            .execute("discordNotify", &json!({"message": "ping"}))
            .await
            .unwrap();
        assert_eq!(*recorder.0.lock(), vec!["ping".to_string()]);

        // Signal has no channel registered: unavailable, not an error.
        let err = registry
            .execute("signalNotify", &json!({"message": "ping"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[test]
    fn parse_when_accepts_rfc3339_and_relative() {
        assert!(parse_when("2030-01-01T09:00:00Z").is_some());
        assert!(parse_when("in 20 minutes").is_some());
        assert!(parse_when("in 2 hours").is_some());
        assert!(parse_when("in 1 day").is_some());
        assert!(parse_when("whenever").is_none());
        assert!(parse_when("in five minutes").is_none());
    }
}
