//! Task tags, profiles, and router options.

use std::collections::HashMap;
use wooster_config::ConfigView;

/// The closed set of task tags callers use to describe work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskTag {
    /// Driving the classic tool-calling loop.
    ToolExecution,
    /// Multi-step reasoning over a hard question.
    ComplexReasoning,
    /// Emitting programs in code-agent mode.
    CodeAssistance,
    /// Long-form prose generation.
    CreativeWriting,
    /// Scheduled, non-interactive work.
    BackgroundTask,
    /// Synthesizing answers over retrieved contexts.
    RagProcessing,
    /// Cheap yes/no gating decisions inside the router and the KB.
    RouterClassification,
}

impl TaskTag {
    /// All tags, in declaration order.
    pub const ALL: [TaskTag; 7] = [
        TaskTag::ToolExecution,
        TaskTag::ComplexReasoning,
        TaskTag::CodeAssistance,
        TaskTag::CreativeWriting,
        TaskTag::BackgroundTask,
        TaskTag::RagProcessing,
        TaskTag::RouterClassification,
    ];

    /// The canonical configuration name of this tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskTag::ToolExecution => "TOOL_EXECUTION",
            TaskTag::ComplexReasoning => "COMPLEX_REASONING",
            TaskTag::CodeAssistance => "CODE_ASSISTANCE",
            TaskTag::CreativeWriting => "CREATIVE_WRITING",
            TaskTag::BackgroundTask => "BACKGROUND_TASK",
            TaskTag::RagProcessing => "RAG_PROCESSING",
            TaskTag::RouterClassification => "ROUTER_CLASSIFICATION",
        }
    }

    /// Parses a configuration name; unknown names map to `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == name)
    }
}

impl core::fmt::Display for TaskTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved profile for one task tag.
#[derive(Debug, Clone)]
pub struct TaskProfile {
    /// Ordered `provider/model` candidates, most preferred first.
    pub preferred: Vec<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Advisory criteria label, recorded in routing decisions.
    pub criteria: String,
}

/// Everything the router needs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Profiles per task tag. Missing tags resolve through
    /// [`RouterOptions::profile_for`].
    pub profiles: HashMap<TaskTag, TaskProfile>,
    /// Global fallback chain tried after profile candidates.
    pub fallback_chain: Vec<String>,
    /// Total request attempts across fallback candidates.
    pub max_attempts: u32,
    /// Embedding candidates, most preferred first.
    pub embedding_candidates: Vec<String>,
    /// Expected embedding dimension.
    pub embedding_dims: usize,
}

impl RouterOptions {
    /// Resolves router options from the configuration view.
    ///
    /// With routing disabled, every profile collapses to the `openai` group's
    /// default model so the process still runs against a single provider.
    /// Profile entries keyed by unknown tag names are dropped with a warning.
    #[must_use]
    pub fn from_config(config: &ConfigView) -> Self {
        let default_chat = format!("openai/{}", config.openai.model_name);
        let default_profile = TaskProfile {
            preferred: vec![default_chat.clone()],
            temperature: config.openai.temperature,
            max_tokens: config.openai.max_tokens,
            timeout_ms: 30_000,
            criteria: String::new(),
        };

        let mut profiles = HashMap::new();
        if config.routing.enabled {
            for (name, profile) in &config.routing.profiles {
                let Some(tag) = TaskTag::parse(name) else {
                    tracing::warn!(profile = %name, "dropping profile for unknown task tag");
                    continue;
                };
                profiles.insert(
                    tag,
                    TaskProfile {
                        preferred: profile.preferred.clone(),
                        temperature: profile.temperature,
                        max_tokens: profile.max_tokens,
                        timeout_ms: profile.timeout_ms,
                        criteria: profile.criteria.clone(),
                    },
                );
            }
        }
        profiles
            .entry(TaskTag::ToolExecution)
            .or_insert_with(|| default_profile.clone());

        let mut fallback_chain = config.routing.fallback_chain.clone();
        if fallback_chain.is_empty() && !config.openai.api_key.is_empty() {
            fallback_chain.push(default_chat);
        }

        let embedding_candidates = if config.openai.embedding_model.is_empty() {
            Vec::new()
        } else {
            vec![format!("openai/{}", config.openai.embedding_model)]
        };

        Self {
            profiles,
            fallback_chain,
            max_attempts: config.routing.max_attempts.max(1),
            embedding_candidates,
            embedding_dims: config.knowledge_base.vector.dims,
        }
    }

    /// Returns the profile for a tag, falling back to `TOOL_EXECUTION`.
    ///
    /// `RouterOptions::from_config` guarantees the fallback profile exists.
    #[must_use]
    pub fn profile_for(&self, tag: TaskTag) -> &TaskProfile {
        self.profiles
            .get(&tag)
            .or_else(|| self.profiles.get(&TaskTag::ToolExecution))
            .expect("TOOL_EXECUTION fallback profile must exist")
    }
}
