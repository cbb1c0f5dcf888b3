//! The agent executor: one turn, two modes.

use crate::error::{SandboxError, TurnError};
use crate::prompt::PromptAssembler;
use crate::redact::{code_prefix, summarize_args};
use crate::sandbox::Sandbox;
use crate::script::{extract_single_fenced_block, parse_program};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wooster_config::CodeAgentConfig;
use wooster_models::chat::{ChatRequest, Message, ToolChoice};
use wooster_models::router::{ModelRouter, TaskTag};
use wooster_scheduler::TurnRunner;
use wooster_tools::ToolRegistry;

/// Bytes of an emitted program kept in the turn log.
const CODE_LOG_PREFIX: usize = 256;

/// System prompt for the reasoning-depth gate.
const REASONING_GATE_PROMPT: &str = "You decide whether the user's request needs careful \
multi-step reasoning (planning, analysis, synthesis) rather than a quick tool call or lookup. \
Reply with exactly one word: yes or no.";

/// Message shown when a turn exceeds its deadline.
const DEADLINE_MESSAGE: &str = "That took too long, please try again.";

/// Execution style for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    /// Iterative tool-calling loop.
    ClassicTools,
    /// One sandboxed program emitted by the model.
    CodeScript,
}

/// Terminal state of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// The turn produced a final answer.
    Final,
    /// The turn failed (routing exhausted, no usable model output).
    Failed,
    /// The turn exceeded its total deadline.
    DeadlineExceeded,
}

/// The result of one agent turn.
///
/// Always carries a user-presentable `answer`, even for failures and
/// deadline expiry.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Final answer or graceful failure message.
    pub answer: String,
    /// How the turn ended.
    pub state: TurnState,
    /// `provider/model` selected for the turn, when selection succeeded.
    pub model: Option<String>,
    /// Tools invoked during the turn, in order.
    pub tools_invoked: Vec<String>,
    /// Wall-clock duration of the turn.
    pub latency_ms: u64,
}

/// Runs user turns against the router and the tool registry.
pub struct AgentExecutor {
    router: Arc<ModelRouter>,
    tools: Arc<ToolRegistry>,
    sandbox: Sandbox,
    prompts: PromptAssembler,
    limits: CodeAgentConfig,
    log_interactions: bool,
}

impl AgentExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        router: Arc<ModelRouter>,
        tools: Arc<ToolRegistry>,
        prompts: PromptAssembler,
        limits: CodeAgentConfig,
        log_interactions: bool,
    ) -> Self {
        let sandbox = Sandbox::new(tools.clone(), limits.clone());
        Self {
            router,
            tools,
            sandbox,
            prompts,
            limits,
            log_interactions,
        }
    }

    /// Runs one turn to a terminal state.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures (prompt assembly) error out; model
    /// unavailability and deadline expiry end the turn gracefully inside
    /// the returned [`TurnOutcome`].
    pub async fn execute_turn(
        &self,
        input: &str,
        history: &[Message],
        mode: TurnMode,
    ) -> Result<TurnOutcome, TurnError> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.limits.total_timeout_ms);

        let outcome = match mode {
            TurnMode::ClassicTools => self.run_classic(input, history, started, deadline).await?,
            TurnMode::CodeScript => self.run_script(input, history, started, deadline).await?,
        };

        tracing::info!(
            mode = ?mode,
            state = ?outcome.state,
            model = outcome.model.as_deref().unwrap_or("-"),
            tools = ?outcome.tools_invoked,
            answer_len = outcome.answer.len(),
            latency_ms = outcome.latency_ms,
            "agent turn finished"
        );
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Classic tools mode
    // ─────────────────────────────────────────────────────────────────────

    async fn run_classic(
        &self,
        input: &str,
        history: &[Message],
        started: Instant,
        deadline: Instant,
    ) -> Result<TurnOutcome, TurnError> {
        let system = self.prompts.classic()?;
        let task = self.classify_task(input).await;
        let model = self
            .router
            .select_chat_model(task)
            .map(|model| model.id())
            .ok();

        let mut messages: Vec<Message> = history.to_vec();
        messages.push(Message::user(input));
        let definitions = self.tools.definitions();
        let mut tools_invoked = Vec::new();
        let step_timeout = Duration::from_millis(self.limits.step_timeout_ms);

        loop {
            let Some(remaining) = remaining_until(deadline) else {
                return Ok(self.finish(
                    DEADLINE_MESSAGE,
                    TurnState::DeadlineExceeded,
                    model,
                    tools_invoked,
                    started,
                ));
            };

            let request = ChatRequest {
                system: Some(system.clone()),
                messages: messages.clone(),
                tools: Some(definitions.clone()),
                tool_choice: Some(ToolChoice::Auto),
                temperature: None,
                max_tokens: None,
            };
            let response = match tokio::time::timeout(
                step_timeout.min(remaining),
                self.router.generate(task, request),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    tracing::warn!(%err, "model call failed, ending turn");
                    return Ok(self.finish(
                        "I could not reach a language model just now; please try again shortly.",
                        TurnState::Failed,
                        model,
                        tools_invoked,
                        started,
                    ));
                }
                Err(_) => {
                    return Ok(self.finish(
                        DEADLINE_MESSAGE,
                        TurnState::DeadlineExceeded,
                        model,
                        tools_invoked,
                        started,
                    ));
                }
            };

            let calls: Vec<_> = response
                .tool_calls()
                .into_iter()
                .cloned()
                .collect();
            if calls.is_empty() {
                let answer = response.text();
                return Ok(self.finish(&answer, TurnState::Final, model, tools_invoked, started));
            }

            messages.push(Message::Assistant {
                content: response.content.clone(),
            });
            for call in calls {
                if remaining_until(deadline).is_none() {
                    return Ok(self.finish(
                        DEADLINE_MESSAGE,
                        TurnState::DeadlineExceeded,
                        model,
                        tools_invoked,
                        started,
                    ));
                }
                if self.log_interactions {
                    tracing::debug!(
                        tool = %call.name,
                        args = %summarize_args(&call.arguments),
                        "tool call"
                    );
                }
                tools_invoked.push(call.name.clone());
                let observation = tokio::time::timeout(
                    step_timeout,
                    self.tools.execute(&call.name, &call.arguments),
                )
                .await;
                let message = match observation {
                    Ok(Ok(value)) => Message::tool_result(&call.id, value.to_string()),
                    Ok(Err(err)) => Message::tool_error(&call.id, err.observation()),
                    Err(_) => Message::tool_error(&call.id, "error: tool call timed out"),
                };
                messages.push(message);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Code-script mode
    // ─────────────────────────────────────────────────────────────────────

    async fn run_script(
        &self,
        input: &str,
        history: &[Message],
        started: Instant,
        deadline: Instant,
    ) -> Result<TurnOutcome, TurnError> {
        let system = self.prompts.script()?;
        let model = self
            .router
            .select_chat_model(TaskTag::CodeAssistance)
            .map(|model| model.id())
            .ok();
        let mut reminder: Option<String> = None;

        for attempt in 1..=self.limits.max_attempts.max(1) {
            let Some(remaining) = remaining_until(deadline) else {
                return Ok(self.finish(
                    DEADLINE_MESSAGE,
                    TurnState::DeadlineExceeded,
                    model,
                    Vec::new(),
                    started,
                ));
            };

            let user_input = match &reminder {
                Some(reminder) => format!("{input}\n\nFormat reminder: {reminder}"),
                None => input.to_string(),
            };
            let request = ChatRequest::with_system(system.clone(), user_input)
                .history(history.to_vec());
            let response = match tokio::time::timeout(
                remaining,
                self.router.generate(TaskTag::CodeAssistance, request),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    tracing::warn!(%err, "model call failed in script mode");
                    break;
                }
                Err(_) => {
                    return Ok(self.finish(
                        DEADLINE_MESSAGE,
                        TurnState::DeadlineExceeded,
                        model,
                        Vec::new(),
                        started,
                    ));
                }
            };

            let text = response.text();
            let code = match extract_single_fenced_block(&text) {
                Ok(code) => code,
                Err(format_error) => {
                    tracing::debug!(attempt, %format_error, "format failure in script mode");
                    reminder = Some(format_error);
                    continue;
                }
            };
            tracing::debug!(code = %code_prefix(&code, CODE_LOG_PREFIX), "program extracted");

            let program = match parse_program(&code) {
                Ok(program) => program,
                Err(err) => {
                    reminder = Some(err.to_string());
                    continue;
                }
            };

            match self.sandbox.execute(&program).await {
                Ok(run) => {
                    return Ok(self.finish(
                        &run.answer,
                        TurnState::Final,
                        model,
                        run.tools_invoked,
                        started,
                    ));
                }
                Err(SandboxError::TotalTimeout | SandboxError::StepTimeout(_)) => {
                    return Ok(self.finish(
                        DEADLINE_MESSAGE,
                        TurnState::DeadlineExceeded,
                        model,
                        Vec::new(),
                        started,
                    ));
                }
                Err(err) => {
                    tracing::debug!(attempt, %err, "sandbox rejected program");
                    reminder = Some(err.to_string());
                }
            }
        }

        // Attempts exhausted (or the model is down): classic mode gets the
        // same input.
        tracing::warn!("code-script mode failed, falling back to classic tools");
        self.run_classic(input, history, started, deadline).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Shared helpers
    // ─────────────────────────────────────────────────────────────────────

    /// Decides between `TOOL_EXECUTION` and `COMPLEX_REASONING` via the
    /// classifier; any failure defaults to tool execution.
    async fn classify_task(&self, input: &str) -> TaskTag {
        let request = ChatRequest::with_system(REASONING_GATE_PROMPT, input);
        match self
            .router
            .generate(TaskTag::RouterClassification, request)
            .await
        {
            Ok(response) if response.text().trim().to_ascii_lowercase().starts_with("yes") => {
                TaskTag::ComplexReasoning
            }
            _ => TaskTag::ToolExecution,
        }
    }

    fn finish(
        &self,
        answer: &str,
        state: TurnState,
        model: Option<String>,
        tools_invoked: Vec<String>,
        started: Instant,
    ) -> TurnOutcome {
        TurnOutcome {
            answer: answer.to_string(),
            state,
            model,
            tools_invoked,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }
}

impl core::fmt::Debug for AgentExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AgentExecutor")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Scheduled turns run classic mode with an empty history and no
/// interactive channel; the answer flows back into the execution log.
#[async_trait]
impl TurnRunner for AgentExecutor {
    async fn run_scheduled_turn(&self, task_key: &str, prompt: &str) -> Result<String, String> {
        tracing::info!(task_key, "running scheduled agent turn");
        let outcome = self
            .execute_turn(prompt, &[], TurnMode::ClassicTools)
            .await
            .map_err(|err| err.to_string())?;
        match outcome.state {
            TurnState::Final => Ok(outcome.answer),
            TurnState::Failed | TurnState::DeadlineExceeded => Err(outcome.answer),
        }
    }
}

fn remaining_until(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    (now < deadline).then(|| deadline - now)
}
