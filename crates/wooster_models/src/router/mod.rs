//! Task-profile model router.
//!
//! The router answers one question: *which model should handle this piece of
//! work?* Callers tag work with a [`TaskTag`]; the router walks the tag's
//! profile candidates, consults cached provider health, falls back down the
//! global chain, and records a [`RoutingDecision`] for every selection.
//!
//! # Fallback triggers
//!
//! 1. **Pre-request**: candidates whose provider failed its last health
//!    probe are skipped during selection.
//! 2. **Timeout**: a request exceeding the profile timeout advances to the
//!    next candidate.
//! 3. **Error**: transient errors retry the same candidate with exponential
//!    backoff, then advance; permanent errors advance immediately.

mod decision;
mod health;
mod profile;

pub use decision::{RouterStats, RoutingDecision};
pub use health::{HealthMonitor, HealthStatus, ProviderHealth};
pub use profile::{RouterOptions, TaskProfile, TaskTag};

use crate::chat::{ChatModel, ChatRequest, ChatResponse};
use crate::embedding::Embedder;
use crate::error::{GenerationError, RoutingError};
use crate::registry::ProviderRegistry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Retained routing decisions for diagnostics.
const DECISION_LOG_CAP: usize = 256;

/// Transient-error retries within a single candidate.
const TRANSIENT_RETRIES: u32 = 2;

/// Base delay of the per-candidate exponential backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Selects chat and embedding models per task profile, with health-aware
/// fallback.
pub struct ModelRouter {
    registry: Arc<ProviderRegistry>,
    options: RouterOptions,
    health: Arc<HealthMonitor>,
    decisions: Mutex<VecDeque<RoutingDecision>>,
    stats: Mutex<RouterStats>,
}

impl ModelRouter {
    /// Creates a router over a provider registry and a health monitor.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        options: RouterOptions,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            registry,
            options,
            health,
            decisions: Mutex::new(VecDeque::with_capacity(DECISION_LOG_CAP)),
            stats: Mutex::new(RouterStats::default()),
        }
    }

    /// Selects a chat model for the given task tag.
    ///
    /// Walks the profile's preferred candidates, then the global fallback
    /// chain, skipping candidates whose provider is marked down. The first
    /// healthy, registered candidate wins.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Unavailable`] when every candidate is down or
    /// unregistered.
    pub fn select_chat_model(&self, task: TaskTag) -> Result<ChatModel, RoutingError> {
        let started = std::time::Instant::now();
        let profile = self.options.profile_for(task);
        let mut tried = Vec::new();

        for candidate in self.candidates(profile) {
            match self.try_candidate(candidate, profile) {
                Ok(model) => {
                    self.record_decision(task, &model, &tried, started, "healthy candidate");
                    return Ok(model);
                }
                Err(reason) => {
                    tracing::debug!(candidate, reason, "skipping routing candidate");
                    tried.push(candidate.to_string());
                }
            }
        }

        self.stats.lock().routing_failures += 1;
        Err(RoutingError::Unavailable {
            task: task.as_str().to_string(),
            tried,
        })
    }

    /// Selects the configured embedding model.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NoEmbedder`] when no embedding candidate is
    /// configured, or [`RoutingError::Unavailable`] when none is usable.
    pub fn select_embedding_model(&self) -> Result<Embedder, RoutingError> {
        if self.options.embedding_candidates.is_empty() {
            return Err(RoutingError::NoEmbedder);
        }
        let mut tried = Vec::new();
        for candidate in &self.options.embedding_candidates {
            let (provider, _) = match candidate.split_once('/') {
                Some(parts) => parts,
                None => {
                    tried.push(candidate.clone());
                    continue;
                }
            };
            if !self.health.is_usable(provider) {
                tried.push(candidate.clone());
                continue;
            }
            match self
                .registry
                .embedder(candidate, self.options.embedding_dims)
            {
                Ok(embedder) => return Ok(embedder),
                Err(_) => tried.push(candidate.clone()),
            }
        }
        Err(RoutingError::Unavailable {
            task: "EMBEDDING".to_string(),
            tried,
        })
    }

    /// Sends a chat request with full request-time fallback semantics.
    ///
    /// Selection skips unhealthy candidates as in [`select_chat_model`](Self::select_chat_model);
    /// at request time, a timeout or error on one candidate advances to the
    /// next, up to the configured total attempt budget. Transient errors are
    /// retried on the same candidate with exponential backoff first.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::Exhausted`] with the final error once the
    /// attempt budget is spent, or [`RoutingError::Unavailable`] when no
    /// candidate could even be tried.
    pub async fn generate(
        &self,
        task: TaskTag,
        request: ChatRequest,
    ) -> Result<ChatResponse, RoutingError> {
        let started = std::time::Instant::now();
        let profile = self.options.profile_for(task);
        let timeout = Duration::from_millis(profile.timeout_ms);
        let mut tried = Vec::new();
        let mut attempts = 0u32;
        let mut last_error: Option<GenerationError> = None;

        for candidate in self.candidates(profile) {
            if attempts >= self.options.max_attempts {
                break;
            }
            let model = match self.try_candidate(candidate, profile) {
                Ok(model) => model,
                Err(_) => {
                    tried.push(candidate.to_string());
                    continue;
                }
            };

            match self
                .attempt_candidate(&model, &request, timeout, &mut attempts)
                .await
            {
                Ok(response) => {
                    if !tried.is_empty() {
                        self.stats.lock().fallbacks += 1;
                    }
                    self.record_decision(task, &model, &tried, started, "request succeeded");
                    return Ok(response);
                }
                Err(err) => {
                    tracing::warn!(candidate, %err, "candidate failed, advancing fallback");
                    tried.push(candidate.to_string());
                    last_error = Some(err);
                }
            }
        }

        self.stats.lock().routing_failures += 1;
        match last_error {
            Some(last) => Err(RoutingError::Exhausted { attempts, last }),
            None => Err(RoutingError::Unavailable {
                task: task.as_str().to_string(),
                tried,
            }),
        }
    }

    /// Returns the current per-provider health snapshot.
    #[must_use]
    pub fn health_snapshot(&self) -> std::collections::HashMap<String, ProviderHealth> {
        self.health.snapshot()
    }

    /// Returns routing counters.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        self.stats.lock().clone()
    }

    /// Returns the most recent routing decisions, newest last.
    #[must_use]
    pub fn recent_decisions(&self) -> Vec<RoutingDecision> {
        self.decisions.lock().iter().cloned().collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    /// Profile candidates followed by the global fallback chain, deduped.
    fn candidates<'a>(&'a self, profile: &'a TaskProfile) -> impl Iterator<Item = &'a str> {
        let mut seen = Vec::new();
        profile
            .preferred
            .iter()
            .chain(self.options.fallback_chain.iter())
            .filter_map(move |candidate| {
                if seen.contains(&candidate.as_str()) {
                    None
                } else {
                    seen.push(candidate.as_str());
                    Some(candidate.as_str())
                }
            })
    }

    /// Resolves a candidate if its provider is healthy and registered.
    fn try_candidate(
        &self,
        candidate: &str,
        profile: &TaskProfile,
    ) -> Result<ChatModel, &'static str> {
        let Some((provider, _)) = candidate.split_once('/') else {
            return Err("malformed candidate id");
        };
        if !self.health.is_usable(provider) {
            return Err("provider marked down");
        }
        let model = self
            .registry
            .chat_model(candidate)
            .map_err(|_| "provider not registered")?;
        Ok(model.with_params(profile.temperature, profile.max_tokens))
    }

    /// Runs one candidate with timeout and transient-error backoff.
    async fn attempt_candidate(
        &self,
        model: &ChatModel,
        request: &ChatRequest,
        timeout: Duration,
        attempts: &mut u32,
    ) -> Result<ChatResponse, GenerationError> {
        let mut retries = 0u32;
        loop {
            *attempts += 1;
            let outcome = tokio::time::timeout(timeout, model.generate(request.clone())).await;
            let err = match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) => err,
                Err(_) => GenerationError::Timeout(timeout.as_millis() as u64),
            };
            let out_of_budget =
                *attempts >= self.options.max_attempts || retries >= TRANSIENT_RETRIES;
            if !err.is_transient() || out_of_budget {
                return Err(err);
            }
            let delay = BACKOFF_BASE * 2u32.pow(retries);
            tracing::debug!(model = %model.id(), ?delay, "transient error, backing off");
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }

    fn record_decision(
        &self,
        task: TaskTag,
        model: &ChatModel,
        tried: &[String],
        started: std::time::Instant,
        reasoning: &str,
    ) {
        let decision = RoutingDecision {
            timestamp: chrono::Utc::now(),
            task_tag: task.as_str().to_string(),
            selected_provider: model.provider_name().to_string(),
            selected_model: model.model_name().to_string(),
            reasoning: reasoning.to_string(),
            fallbacks_tried: tried.to_vec(),
            latency_ms: started.elapsed().as_millis() as u64,
        };
        tracing::debug!(
            task = decision.task_tag,
            selected = %format!("{}/{}", decision.selected_provider, decision.selected_model),
            fallbacks = decision.fallbacks_tried.len(),
            "routing decision"
        );
        let mut log = self.decisions.lock();
        if log.len() == DECISION_LOG_CAP {
            log.pop_front();
        }
        log.push_back(decision);
        self.stats.lock().selections += 1;
    }
}

impl core::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{AssistantBlock, ChatProvider, Usage};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Chat provider whose probe result and generation behavior are
    /// controlled by the test.
    struct ScriptedProvider {
        healthy: AtomicBool,
        fail_generate: AtomicBool,
        calls: AtomicU32,
        reply: &'static str,
    }

    impl ScriptedProvider {
        fn new(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(true),
                fail_generate: AtomicBool::new(false),
                calls: AtomicU32::new(0),
                reply,
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn generate(
            &self,
            _model: &str,
            _request: ChatRequest,
        ) -> Result<ChatResponse, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_generate.load(Ordering::SeqCst) {
                return Err(GenerationError::Provider {
                    status: Some(400),
                    message: "scripted failure".to_string(),
                });
            }
            Ok(ChatResponse {
                content: vec![AssistantBlock::text(self.reply)],
                usage: Usage::default(),
            })
        }

        async fn probe(&self) -> Result<(), GenerationError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(GenerationError::Http("probe refused".to_string()))
            }
        }
    }

    fn router_with(
        providers: Vec<(&str, Arc<ScriptedProvider>)>,
        preferred: Vec<&str>,
        fallback: Vec<&str>,
    ) -> (ModelRouter, Arc<HealthMonitor>) {
        let mut registry = ProviderRegistry::new();
        for (name, provider) in providers {
            registry.register_chat_provider(name, provider);
        }
        let registry = Arc::new(registry);
        let health = Arc::new(HealthMonitor::new(registry.clone(), 1));

        let mut profiles = HashMap::new();
        profiles.insert(
            TaskTag::ToolExecution,
            TaskProfile {
                preferred: preferred.into_iter().map(str::to_string).collect(),
                temperature: 0.2,
                max_tokens: 512,
                timeout_ms: 5_000,
                criteria: "speed".to_string(),
            },
        );
        let options = RouterOptions {
            profiles,
            fallback_chain: fallback.into_iter().map(str::to_string).collect(),
            max_attempts: 3,
            embedding_candidates: Vec::new(),
            embedding_dims: 8,
        };
        (
            ModelRouter::new(registry, options, health.clone()),
            health,
        )
    }

    #[tokio::test]
    async fn unhealthy_preferred_candidate_is_skipped() {
        let first = ScriptedProvider::new("first");
        let second = ScriptedProvider::new("second");
        first.healthy.store(false, Ordering::SeqCst);

        let (router, health) = router_with(
            vec![("first", first), ("second", second)],
            vec!["first/a", "second/b"],
            vec![],
        );
        health.probe_all().await;

        let model = router.select_chat_model(TaskTag::ToolExecution).unwrap();
        assert_eq!(model.provider_name(), "second");

        let decisions = router.recent_decisions();
        assert_eq!(decisions.last().unwrap().fallbacks_tried, vec!["first/a"]);
    }

    #[tokio::test]
    async fn exhausted_profile_walks_global_fallback_chain() {
        let primary = ScriptedProvider::new("primary");
        let reserve = ScriptedProvider::new("reserve");
        primary.healthy.store(false, Ordering::SeqCst);

        let (router, health) = router_with(
            vec![("primary", primary), ("reserve", reserve)],
            vec!["primary/a", "primary/b"],
            vec!["reserve/c"],
        );
        health.probe_all().await;

        let model = router.select_chat_model(TaskTag::ToolExecution).unwrap();
        assert_eq!(model.id(), "reserve/c");
    }

    #[tokio::test]
    async fn all_candidates_down_is_unavailable() {
        let only = ScriptedProvider::new("only");
        only.healthy.store(false, Ordering::SeqCst);

        let (router, health) = router_with(vec![("only", only)], vec!["only/a"], vec![]);
        health.probe_all().await;

        let err = router.select_chat_model(TaskTag::ToolExecution).unwrap_err();
        assert!(matches!(err, RoutingError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn generate_advances_past_request_errors() {
        let flaky = ScriptedProvider::new("flaky");
        let steady = ScriptedProvider::new("steady");
        flaky.fail_generate.store(true, Ordering::SeqCst);

        let (router, health) = router_with(
            vec![("flaky", flaky.clone()), ("steady", steady)],
            vec!["flaky/a", "steady/b"],
            vec![],
        );
        health.probe_all().await;

        let response = router
            .generate(TaskTag::ToolExecution, ChatRequest::new("hello"))
            .await
            .unwrap();
        assert_eq!(response.text(), "steady");
        // Non-transient failure: the flaky candidate was tried exactly once.
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
        assert_eq!(router.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn unknown_task_tag_falls_back_to_tool_execution_profile() {
        let provider = ScriptedProvider::new("only");
        let (router, health) = router_with(vec![("only", provider)], vec!["only/a"], vec![]);
        health.probe_all().await;

        // No CREATIVE_WRITING profile configured; selection still succeeds
        // through the TOOL_EXECUTION profile.
        let model = router.select_chat_model(TaskTag::CreativeWriting).unwrap();
        assert_eq!(model.id(), "only/a");
    }
}
