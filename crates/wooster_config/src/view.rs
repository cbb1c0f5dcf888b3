//! The read-only configuration view and its option groups.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Prefix shared by every recognized configuration key.
const KEY_PREFIX: &str = "WOOSTER_";

// ─────────────────────────────────────────────────────────────────────────────
// Option groups
// ─────────────────────────────────────────────────────────────────────────────

/// `openai` group: the primary cloud chat/embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key; empty means the provider is not configured.
    pub api_key: String,
    /// Default chat model name.
    pub model_name: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Embedding model name.
    pub embedding_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model_name: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// One provider entry in the routing table.
///
/// `base_url` lets the same OpenAI-compatible client talk to local servers
/// (Ollama, llama.cpp, LM Studio) as well as the cloud endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Provider name used in `provider/model` identifiers.
    pub name: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// API key; may be empty for local servers.
    #[serde(default)]
    pub api_key: String,
}

/// Per-task-tag routing profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingProfile {
    /// Ordered `provider/model` candidates, most preferred first.
    pub preferred: Vec<String>,
    /// Sampling temperature for this task class.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token cap for this task class.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Selection criteria label (`speed`, `quality`, `accuracy`, `cost`,
    /// `creativity`); advisory, recorded in routing decisions.
    #[serde(default)]
    pub criteria: String,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// `routing` group: model selection across providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Whether profile-based routing is active. When false, everything
    /// resolves to the `openai` group's default model.
    pub enabled: bool,
    /// Routing strategy label. One of `speed`, `quality`, `cost`, `privacy`,
    /// `availability`, `intelligent`.
    pub strategy: String,
    /// Global fallback chain of `provider/model` identifiers, tried in order
    /// when every profile candidate is exhausted.
    pub fallback_chain: Vec<String>,
    /// Known providers.
    pub providers: Vec<ProviderEntry>,
    /// Profiles keyed by task tag name (e.g. `"TOOL_EXECUTION"`).
    pub profiles: HashMap<String, RoutingProfile>,
    /// Health probe interval in seconds.
    pub health_probe_interval_secs: u64,
    /// Consecutive probe misses before a provider is marked down.
    pub health_failure_threshold: u32,
    /// Total request attempts across fallback candidates.
    pub max_attempts: u32,
}

/// Vector-store sub-record of the knowledge base group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Vector index provider label; `"flat"` is the built-in index.
    pub provider: String,
    /// On-disk location of the index artifacts.
    pub path: PathBuf,
    /// Embedding dimension. A mismatch with the sidecar forces a rebuild.
    pub dims: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: "flat".to_string(),
            path: PathBuf::from("vector_data"),
            dims: 1536,
        }
    }
}

/// `knowledgeBase` group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Path of the metadata + full-text database.
    pub db_path: PathBuf,
    /// Vector index settings.
    pub vector: VectorConfig,
    /// Known namespaces; the first is the default ingestion namespace.
    pub namespaces: Vec<String>,
    /// Documents carrying any of these tags are excluded from retrieval.
    pub privacy_excluded_tags: Vec<String>,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("knowledge_base.db"),
            vector: VectorConfig::default(),
            namespaces: vec!["notes".to_string(), "profile".to_string()],
            privacy_excluded_tags: vec!["private".to_string()],
        }
    }
}

/// `scheduler` group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Path of the schedule database.
    pub db_path: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("scheduler.db"),
        }
    }
}

/// `codeAgent` group: limits shared by both agent modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeAgentConfig {
    /// Format-failure retries before falling back to classic mode.
    pub max_attempts: u32,
    /// Per-step wall-clock timeout in milliseconds.
    pub step_timeout_ms: u64,
    /// Whole-turn wall-clock timeout in milliseconds.
    pub total_timeout_ms: u64,
    /// Memory cap for sandboxed programs, in megabytes.
    pub memory_limit_mb: u64,
    /// Tool output visible to a program is truncated to this many bytes.
    pub max_output_length: usize,
}

impl Default for CodeAgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step_timeout_ms: 20_000,
            total_timeout_ms: 120_000,
            memory_limit_mb: 64,
            max_output_length: 16_384,
        }
    }
}

/// `logging` group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level printed to the console.
    pub console_level: String,
    /// Minimum level written to the log file.
    pub file_level: String,
    /// Log file path; `None` disables the file layer.
    pub log_file: Option<PathBuf>,
    /// Raises the console level to `error`.
    pub quiet_mode: bool,
    /// Verbose per-turn model/tool interaction logging.
    pub log_agent_interactions: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: "info".to_string(),
            file_level: "debug".to_string(),
            log_file: None,
            quiet_mode: false,
            log_agent_interactions: false,
        }
    }
}

/// `workspace` group: where collaborator files live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root under which the relative defaults below resolve.
    pub home_dir: PathBuf,
    /// Per-project journals: `projects/<name>/<name>.md`.
    pub projects_dir: PathBuf,
    /// GTD files: `gtd/inbox.md`, `gtd/next_actions.md`.
    pub gtd_dir: PathBuf,
    /// Base system prompt file.
    pub base_prompt_path: PathBuf,
    /// Directory of supplemental prompt `.txt` files.
    pub prompts_dir: PathBuf,
    /// Append-only health events file.
    pub health_log_path: PathBuf,
    /// Default append target for the notes tool.
    pub notes_path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        let home = PathBuf::from(".");
        Self {
            projects_dir: home.join("projects"),
            gtd_dir: home.join("gtd"),
            base_prompt_path: home.join("prompts/base.md"),
            prompts_dir: home.join("prompts/supplemental"),
            health_log_path: home.join("health_events.log.md"),
            notes_path: home.join("notes.md"),
            home_dir: home,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigView
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only snapshot of all settings, organized by component.
///
/// Built once at startup via [`ConfigView::from_pairs`] and shared by `Arc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigView {
    /// Primary cloud provider settings.
    pub openai: OpenAiConfig,
    /// Model routing settings.
    pub routing: RoutingConfig,
    /// Knowledge base settings.
    pub knowledge_base: KnowledgeBaseConfig,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Agent execution limits.
    pub code_agent: CodeAgentConfig,
    /// Per-plugin enable flags keyed by canonical plugin name.
    pub plugins: HashMap<String, bool>,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Filesystem layout.
    pub workspace: WorkspaceConfig,
}

impl ConfigView {
    /// Binds flat env-style pairs into a validated view.
    ///
    /// Unknown `WOOSTER_*` keys are ignored with a warning so new keys can be
    /// introduced without breaking older binaries. Missing keys fall back to
    /// the declared defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable values and
    /// [`ConfigError::MissingChatProvider`] when neither the `openai` group
    /// nor the routing provider table yields a usable chat provider.
    pub fn from_pairs(pairs: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut view = Self::default();
        let mut routing = RoutingConfig {
            strategy: "availability".to_string(),
            health_probe_interval_secs: 30,
            health_failure_threshold: 1,
            max_attempts: 3,
            ..RoutingConfig::default()
        };

        for (key, value) in pairs {
            let Some(rest) = key.strip_prefix(KEY_PREFIX) else {
                continue;
            };
            match rest {
                "OPENAI_API_KEY" => view.openai.api_key = value.clone(),
                "OPENAI_MODEL_NAME" => view.openai.model_name = value.clone(),
                "OPENAI_TEMPERATURE" => view.openai.temperature = parse(key, value)?,
                "OPENAI_MAX_TOKENS" => view.openai.max_tokens = parse(key, value)?,
                "OPENAI_EMBEDDING_MODEL" => view.openai.embedding_model = value.clone(),

                "ROUTING_ENABLED" => routing.enabled = parse_bool(key, value)?,
                "ROUTING_STRATEGY" => routing.strategy = parse_strategy(key, value)?,
                "ROUTING_FALLBACK_CHAIN" => routing.fallback_chain = parse_list(value),
                "ROUTING_PROVIDERS" => routing.providers = parse_json(key, value)?,
                "ROUTING_PROFILES" => routing.profiles = parse_json(key, value)?,
                "ROUTING_HEALTH_PROBE_INTERVAL_SECS" => {
                    routing.health_probe_interval_secs = parse(key, value)?;
                }
                "ROUTING_HEALTH_FAILURE_THRESHOLD" => {
                    routing.health_failure_threshold = parse(key, value)?;
                }
                "ROUTING_MAX_ATTEMPTS" => routing.max_attempts = parse(key, value)?,

                "KB_DB_PATH" => view.knowledge_base.db_path = PathBuf::from(value),
                "KB_VECTOR_PROVIDER" => view.knowledge_base.vector.provider = value.clone(),
                "KB_VECTOR_PATH" => view.knowledge_base.vector.path = PathBuf::from(value),
                "KB_VECTOR_DIMS" => view.knowledge_base.vector.dims = parse(key, value)?,
                "KB_NAMESPACES" => view.knowledge_base.namespaces = parse_list(value),
                "KB_PRIVACY_EXCLUDED_TAGS" => {
                    view.knowledge_base.privacy_excluded_tags = parse_list(value);
                }

                "SCHEDULER_DB_PATH" => view.scheduler.db_path = PathBuf::from(value),

                "CODE_AGENT_MAX_ATTEMPTS" => view.code_agent.max_attempts = parse(key, value)?,
                "CODE_AGENT_STEP_TIMEOUT_MS" => {
                    view.code_agent.step_timeout_ms = parse(key, value)?;
                }
                "CODE_AGENT_TOTAL_TIMEOUT_MS" => {
                    view.code_agent.total_timeout_ms = parse(key, value)?;
                }
                "CODE_AGENT_MEMORY_LIMIT_MB" => {
                    view.code_agent.memory_limit_mb = parse(key, value)?;
                }
                "CODE_AGENT_MAX_OUTPUT_LENGTH" => {
                    view.code_agent.max_output_length = parse(key, value)?;
                }

                "LOGGING_CONSOLE_LEVEL" => view.logging.console_level = parse_level(key, value)?,
                "LOGGING_FILE_LEVEL" => view.logging.file_level = parse_level(key, value)?,
                "LOGGING_LOG_FILE" => view.logging.log_file = Some(PathBuf::from(value)),
                "LOGGING_QUIET_MODE" => view.logging.quiet_mode = parse_bool(key, value)?,
                "LOGGING_LOG_AGENT_INTERACTIONS" => {
                    view.logging.log_agent_interactions = parse_bool(key, value)?;
                }

                "HOME_DIR" => view.workspace = workspace_under(PathBuf::from(value)),

                other => {
                    if let Some(plugin) = other.strip_prefix("PLUGINS_") {
                        let enabled = parse_bool(key, value)?;
                        view.plugins.insert(camel_case(plugin), enabled);
                    } else {
                        tracing::warn!(key = %key, "ignoring unrecognized configuration key");
                    }
                }
            }
        }

        if view.logging.quiet_mode {
            view.logging.console_level = "error".to_string();
        }
        view.routing = routing;
        view.validate()?;
        Ok(view)
    }

    /// Whether a plugin is enabled. A missing entry defaults to enabled.
    #[must_use]
    pub fn plugin_enabled(&self, canonical_name: &str) -> bool {
        self.plugins.get(canonical_name).copied().unwrap_or(true)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let has_openai = !self.openai.api_key.is_empty();
        let has_routed = self.routing.enabled && !self.routing.providers.is_empty();
        if !has_openai && !has_routed {
            return Err(ConfigError::MissingChatProvider);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse<T: core::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: core::fmt::Display,
{
    value
        .parse()
        .map_err(|err: T::Err| ConfigError::invalid(key, err.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(key, format!("not a boolean: {other}"))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_json<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Result<T, ConfigError> {
    serde_json::from_str(value).map_err(|err| ConfigError::invalid(key, err.to_string()))
}

fn parse_strategy(key: &str, value: &str) -> Result<String, ConfigError> {
    const STRATEGIES: [&str; 6] = [
        "speed",
        "quality",
        "cost",
        "privacy",
        "availability",
        "intelligent",
    ];
    let lower = value.to_ascii_lowercase();
    if STRATEGIES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(ConfigError::invalid(
            key,
            format!("unknown strategy '{value}', expected one of {STRATEGIES:?}"),
        ))
    }
}

fn parse_level(key: &str, value: &str) -> Result<String, ConfigError> {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    let lower = value.to_ascii_lowercase();
    if LEVELS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(ConfigError::invalid(
            key,
            format!("unknown log level '{value}', expected one of {LEVELS:?}"),
        ))
    }
}

/// Converts `SCREAMING_SNAKE` plugin key suffixes to canonical lower camel.
fn camel_case(screaming: &str) -> String {
    let mut out = String::with_capacity(screaming.len());
    for (i, part) in screaming.split('_').enumerate() {
        let lower = part.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.extend(chars);
            }
        }
    }
    out
}

fn workspace_under(home: PathBuf) -> WorkspaceConfig {
    WorkspaceConfig {
        projects_dir: home.join("projects"),
        gtd_dir: home.join("gtd"),
        base_prompt_path: home.join("prompts/base.md"),
        prompts_dir: home.join("prompts/supplemental"),
        health_log_path: home.join("health_events.log.md"),
        notes_path: home.join("notes.md"),
        home_dir: home,
    }
}
