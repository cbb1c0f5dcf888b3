//! Isolated evaluation of script programs against the Tool API.
//!
//! The sandbox holds no mutable state shared with the host beyond the tool
//! registry bridge. A program can only name Tool API functions; filesystem,
//! network, environment, and host memory are unreachable by construction,
//! so any attempt surfaces as [`SandboxError::UnknownFunction`].

use crate::error::SandboxError;
use crate::redact::summarize_args;
use crate::script::Step;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wooster_config::CodeAgentConfig;
use wooster_tools::{ToolError, ToolRegistry};

/// The single-shot answer sink name.
const FINAL_ANSWER: &str = "finalAnswer";

/// Result of a completed sandbox run.
#[derive(Debug)]
pub struct SandboxRun {
    /// The argument of the winning `finalAnswer` call.
    pub answer: String,
    /// Names of tools invoked, in order (including failed calls).
    pub tools_invoked: Vec<String>,
}

/// Evaluates step programs with deadlines, an output budget, and a
/// single-shot `finalAnswer` sink.
pub struct Sandbox {
    tools: Arc<ToolRegistry>,
    limits: CodeAgentConfig,
}

impl Sandbox {
    /// Creates a sandbox over the tool registry with the configured limits.
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>, limits: CodeAgentConfig) -> Self {
        Self { tools, limits }
    }

    /// Runs a program to completion.
    ///
    /// Tool failures bind error observations and execution continues; the
    /// first `finalAnswer` wins and later calls observe a `ToolError`.
    ///
    /// # Errors
    ///
    /// Violations (unknown function, bad reference, budget, deadlines) and
    /// a missing `finalAnswer` abort the run.
    pub async fn execute(&self, program: &[Step]) -> Result<SandboxRun, SandboxError> {
        let total_deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.limits.total_timeout_ms);
        let step_timeout = Duration::from_millis(self.limits.step_timeout_ms);
        let mut budget = self.limits.memory_limit_mb as usize * 1024 * 1024;

        let mut bindings: HashMap<String, Value> = HashMap::new();
        let mut final_answer: Option<String> = None;
        let mut tools_invoked = Vec::new();

        for step in program {
            if tokio::time::Instant::now() >= total_deadline {
                return Err(SandboxError::TotalTimeout);
            }
            let args = resolve_refs(&step.args, &bindings)?;

            // The answer sink is handled by the sandbox itself, not the
            // registry: exactly one call may land.
            if step.call == FINAL_ANSWER {
                let text = answer_text(&args);
                match &final_answer {
                    None => final_answer = Some(text),
                    Some(_) => {
                        let observation = ToolError::invocation(
                            "finalAnswer was already called; the first answer stands",
                        )
                        .observation();
                        bind(&mut bindings, step, Value::String(observation), &mut budget)?;
                    }
                }
                continue;
            }

            if !self.tools.has(&step.call) {
                return Err(SandboxError::UnknownFunction(step.call.clone()));
            }

            tracing::debug!(tool = %step.call, args = %summarize_args(&args), "sandbox step");
            tools_invoked.push(step.call.clone());
            let outcome =
                tokio::time::timeout(step_timeout, self.tools.execute(&step.call, &args)).await;
            let value = match outcome {
                Ok(Ok(value)) => self.truncate(value),
                Ok(Err(err)) => Value::String(err.observation()),
                Err(_) => return Err(SandboxError::StepTimeout(self.limits.step_timeout_ms)),
            };
            bind(&mut bindings, step, value, &mut budget)?;
        }

        match final_answer {
            Some(answer) => Ok(SandboxRun {
                answer,
                tools_invoked,
            }),
            None => Err(SandboxError::NoFinalAnswer),
        }
    }

    /// Truncates tool output to the configured byte cap before it becomes
    /// visible to the program.
    fn truncate(&self, value: Value) -> Value {
        let serialized = value.to_string();
        if serialized.len() <= self.limits.max_output_length {
            return value;
        }
        let mut cut = self.limits.max_output_length;
        while !serialized.is_char_boundary(cut) {
            cut -= 1;
        }
        Value::String(format!("{}…[truncated]", &serialized[..cut]))
    }
}

impl core::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sandbox")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Stores a step result under its binding, charging the output budget.
fn bind(
    bindings: &mut HashMap<String, Value>,
    step: &Step,
    value: Value,
    budget: &mut usize,
) -> Result<(), SandboxError> {
    let Some(name) = &step.bind else {
        return Ok(());
    };
    let cost = value.to_string().len();
    if cost > *budget {
        return Err(SandboxError::BudgetExceeded);
    }
    *budget -= cost;
    bindings.insert(name.clone(), value);
    Ok(())
}

/// Renders the `finalAnswer` argument as text.
fn answer_text(args: &Value) -> String {
    match args.get("text") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => match args {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        },
    }
}

/// Substitutes `{"$ref": "binding.path.0"}` nodes from earlier bindings.
fn resolve_refs(
    value: &Value,
    bindings: &HashMap<String, Value>,
) -> Result<Value, SandboxError> {
    match value {
        Value::Object(map) => {
            if map.len() == 1
                && let Some(Value::String(path)) = map.get("$ref")
            {
                return lookup_path(path, bindings);
            }
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, inner) in map {
                resolved.insert(key.clone(), resolve_refs(inner, bindings)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_refs(item, bindings))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn lookup_path(path: &str, bindings: &HashMap<String, Value>) -> Result<Value, SandboxError> {
    let mut segments = path.split('.');
    let root = segments
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| SandboxError::BadReference(path.to_string()))?;
    let mut current = bindings
        .get(root)
        .ok_or_else(|| SandboxError::BadReference(path.to_string()))?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        }
        .ok_or_else(|| SandboxError::BadReference(path.to_string()))?;
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse_program;
    use serde_json::json;
    use wooster_models::chat::ToolDefinition;
    use wooster_tools::{Tool, ToolFuture};

    struct EchoTool;

    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "echoes its arguments".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        fn execute(&self, args: Value) -> ToolFuture<'_> {
            Box::pin(async move { Ok(json!({"echoed": args})) })
        }
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "slow".to_string(),
                description: "sleeps forever".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        fn execute(&self, _args: Value) -> ToolFuture<'_> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            })
        }
    }

    struct BigTool;

    impl Tool for BigTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "big".to_string(),
                description: "returns a large payload".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        fn execute(&self, _args: Value) -> ToolFuture<'_> {
            Box::pin(async move { Ok(Value::String("y".repeat(100_000))) })
        }
    }

    fn sandbox() -> Sandbox {
        let mut registry = ToolRegistry::new();
        registry.register_core(EchoTool);
        registry.register_core(SlowTool);
        registry.register_core(BigTool);
        Sandbox::new(
            Arc::new(registry),
            CodeAgentConfig {
                max_attempts: 3,
                step_timeout_ms: 200,
                total_timeout_ms: 2_000,
                memory_limit_mb: 1,
                max_output_length: 1_000,
            },
        )
    }

    #[tokio::test]
    async fn refs_flow_between_steps() {
        let program = parse_program(
            r#"[
                {"call": "echo", "args": {"payload": "hello"}, "bind": "first"},
                {"call": "finalAnswer", "args": {"text": {"$ref": "first.echoed.payload"}}}
            ]"#,
        )
        .unwrap();

        let run = sandbox().execute(&program).await.unwrap();
        assert_eq!(run.answer, "hello");
        assert_eq!(run.tools_invoked, vec!["echo"]);
    }

    #[tokio::test]
    async fn first_final_answer_wins() {
        let program = parse_program(
            r#"[
                {"call": "finalAnswer", "args": {"text": "first"}},
                {"call": "finalAnswer", "args": {"text": "second"}, "bind": "dup"}
            ]"#,
        )
        .unwrap();

        let run = sandbox().execute(&program).await.unwrap();
        assert_eq!(run.answer, "first");
    }

    #[tokio::test]
    async fn host_access_attempts_are_violations() {
        for call in ["readFile", "openSocket", "getEnv"] {
            let program = parse_program(&format!(
                r#"[{{"call": "{call}", "args": {{}}}}, {{"call": "finalAnswer", "args": {{"text": "x"}}}}]"#
            ))
            .unwrap();

            let err = sandbox().execute(&program).await.unwrap_err();
            assert!(matches!(err, SandboxError::UnknownFunction(name) if name == call));
        }
    }

    #[tokio::test]
    async fn missing_final_answer_is_reported() {
        let program =
            parse_program(r#"[{"call": "echo", "args": {"payload": 1}}]"#).unwrap();
        let err = sandbox().execute(&program).await.unwrap_err();
        assert!(matches!(err, SandboxError::NoFinalAnswer));
    }

    #[tokio::test]
    async fn bad_reference_is_a_violation() {
        let program = parse_program(
            r#"[{"call": "finalAnswer", "args": {"text": {"$ref": "nope.path"}}}]"#,
        )
        .unwrap();
        let err = sandbox().execute(&program).await.unwrap_err();
        assert!(matches!(err, SandboxError::BadReference(_)));
    }

    #[tokio::test]
    async fn slow_steps_hit_the_step_deadline() {
        let program = parse_program(
            r#"[{"call": "slow", "args": {}}, {"call": "finalAnswer", "args": {"text": "x"}}]"#,
        )
        .unwrap();
        let err = sandbox().execute(&program).await.unwrap_err();
        assert!(matches!(err, SandboxError::StepTimeout(_)));
    }

    #[tokio::test]
    async fn oversize_tool_output_is_truncated_before_binding() {
        let program = parse_program(
            r#"[
                {"call": "big", "args": {}, "bind": "huge"},
                {"call": "finalAnswer", "args": {"text": {"$ref": "huge"}}}
            ]"#,
        )
        .unwrap();

        let run = sandbox().execute(&program).await.unwrap();
        assert!(run.answer.len() < 2_000);
        assert!(run.answer.ends_with("…[truncated]"));
    }
}
