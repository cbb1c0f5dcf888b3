//! End-to-end agent turns with a scripted model: the code-script happy
//! path, format-failure fallback to classic mode, the classic tool loop,
//! and deadline expiry.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wooster_agent::services::{SearchHit, WEB_SEARCH_SERVICE, WebSearch, WebSearchService};
use wooster_agent::{
    AgentExecutor, PromptAssembler, ToolApiDeps, TurnMode, TurnState, install_tool_api,
};
use wooster_config::CodeAgentConfig;
use wooster_models::chat::{
    AssistantBlock, ChatProvider, ChatRequest, ChatResponse, ToolCall, Usage,
};
use wooster_models::router::{HealthMonitor, ModelRouter, RouterOptions, TaskProfile, TaskTag};
use wooster_models::{GenerationError, ProviderRegistry};
use wooster_registry::ServiceRegistry;

/// Chat provider that replays queued responses; an empty queue answers
/// "no", which both ends gate classifications and terminates loops.
struct ScriptedChat {
    responses: Mutex<VecDeque<ChatResponse>>,
    delay: Duration,
}

impl ScriptedChat {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            delay,
        })
    }

    fn push_text(&self, text: &str) {
        self.responses.lock().push_back(ChatResponse {
            content: vec![AssistantBlock::text(text)],
            usage: Usage::default(),
        });
    }

    fn push_tool_call(&self, id: &str, name: &str, arguments: serde_json::Value) {
        self.responses.lock().push_back(ChatResponse {
            content: vec![AssistantBlock::ToolCall(ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            })],
            usage: Usage::default(),
        });
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn generate(
        &self,
        _model: &str,
        _request: ChatRequest,
    ) -> Result<ChatResponse, GenerationError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.responses.lock().pop_front().unwrap_or(ChatResponse {
            content: vec![AssistantBlock::text("no")],
            usage: Usage::default(),
        }))
    }

    async fn probe(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

struct RecordingSearch {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl WebSearchService for RecordingSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
        self.calls.lock().push(query.to_string());
        Ok(vec![SearchHit {
            title: "Headline about X".to_string(),
            url: "https://news.example.org/x".to_string(),
            snippet: "X did a thing today.".to_string(),
        }])
    }
}

struct Fixture {
    executor: AgentExecutor,
    chat: Arc<ScriptedChat>,
    search: Arc<RecordingSearch>,
    _dir: TempDir,
}

fn fixture_with(limits: CodeAgentConfig, delay: Duration) -> Fixture {
    let dir = TempDir::new().unwrap();
    let chat = ScriptedChat::new(delay);

    let mut providers = ProviderRegistry::new();
    providers.register_chat_provider("mock", chat.clone());
    let providers = Arc::new(providers);
    let health = Arc::new(HealthMonitor::new(providers.clone(), 1));

    let mut profiles = HashMap::new();
    profiles.insert(
        TaskTag::ToolExecution,
        TaskProfile {
            preferred: vec!["mock/chat".to_string()],
            temperature: 0.2,
            max_tokens: 1024,
            timeout_ms: 5_000,
            criteria: "speed".to_string(),
        },
    );
    let router = Arc::new(ModelRouter::new(
        providers,
        RouterOptions {
            profiles,
            fallback_chain: Vec::new(),
            max_attempts: 2,
            embedding_candidates: Vec::new(),
            embedding_dims: 8,
        },
        health,
    ));

    let services = ServiceRegistry::new();
    let search = Arc::new(RecordingSearch {
        calls: Mutex::new(Vec::new()),
    });
    services.register(
        WEB_SEARCH_SERVICE,
        Arc::new(WebSearch(search.clone() as Arc<dyn WebSearchService>)),
    );

    let deps = Arc::new(ToolApiDeps {
        services,
        kb: None,
        scheduler: None,
        notes_path: dir.path().join("notes.md"),
        fetch_allowed_hosts: Vec::new(),
    });
    let mut tools = wooster_tools::ToolRegistry::new();
    install_tool_api(&mut tools, deps);

    let prompts = PromptAssembler::new(dir.path().join("base.md"), dir.path().join("prompts"));
    let executor = AgentExecutor::new(router, Arc::new(tools), prompts, limits, true);

    Fixture {
        executor,
        chat,
        search,
        _dir: dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(CodeAgentConfig::default(), Duration::ZERO)
}

#[tokio::test]
async fn code_script_turn_searches_and_answers() {
    let fixture = fixture();
    fixture.chat.push_text(
        "```json\n[\n  {\"call\": \"webSearch\", \"args\": {\"query\": \"today's headline about X\"}, \"bind\": \"r\"},\n  {\"call\": \"finalAnswer\", \"args\": {\"text\": {\"$ref\": \"r.results.0.snippet\"}}}\n]\n```",
    );

    let outcome = fixture
        .executor
        .execute_turn(
            "search the web for today's headline about X and summarize",
            &[],
            TurnMode::CodeScript,
        )
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Final);
    assert_eq!(outcome.answer, "X did a thing today.");
    assert_eq!(outcome.tools_invoked, vec!["webSearch"]);
    assert_eq!(*fixture.search.calls.lock(), vec![
        "today's headline about X".to_string()
    ]);
}

#[tokio::test]
async fn persistent_format_failures_fall_back_to_classic() {
    let fixture = fixture();
    // Three bad attempts: prose only, two blocks, unparsable program.
    fixture.chat.push_text("I would search the web for you.");
    fixture
        .chat
        .push_text("```json\n[]\n```\nand also\n```json\n[]\n```");
    fixture.chat.push_text("```json\nnot a program\n```");
    // Classic fallback: the reasoning gate says no, then a plain answer.
    fixture.chat.push_text("no");
    fixture.chat.push_text("Here is a plain answer instead.");

    let outcome = fixture
        .executor
        .execute_turn("do the thing", &[], TurnMode::CodeScript)
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Final);
    assert_eq!(outcome.answer, "Here is a plain answer instead.");
}

#[tokio::test]
async fn classic_loop_executes_tools_and_finishes() {
    let fixture = fixture();
    // Gate: not complex. Then one tool call, then the final answer.
    fixture.chat.push_text("no");
    fixture
        .chat
        .push_tool_call("call_1", "webSearch", json!({"query": "rust news"}));
    fixture.chat.push_text("Summarized: X did a thing today.");

    let outcome = fixture
        .executor
        .execute_turn("what's new in rust?", &[], TurnMode::ClassicTools)
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Final);
    assert_eq!(outcome.answer, "Summarized: X did a thing today.");
    assert_eq!(outcome.tools_invoked, vec!["webSearch"]);
    assert_eq!(*fixture.search.calls.lock(), vec!["rust news".to_string()]);
}

#[tokio::test]
async fn unknown_tool_calls_become_observations_not_crashes() {
    let fixture = fixture();
    fixture.chat.push_text("no");
    fixture
        .chat
        .push_tool_call("call_1", "launchMissiles", json!({}));
    fixture.chat.push_text("I cannot do that.");

    let outcome = fixture
        .executor
        .execute_turn("do something impossible", &[], TurnMode::ClassicTools)
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::Final);
    assert_eq!(outcome.answer, "I cannot do that.");
}

#[tokio::test]
async fn slow_turns_end_with_a_graceful_deadline_message() {
    let limits = CodeAgentConfig {
        total_timeout_ms: 50,
        step_timeout_ms: 40,
        ..CodeAgentConfig::default()
    };
    let fixture = fixture_with(limits, Duration::from_millis(200));

    let outcome = fixture
        .executor
        .execute_turn("anything", &[], TurnMode::ClassicTools)
        .await
        .unwrap();

    assert_eq!(outcome.state, TurnState::DeadlineExceeded);
    assert!(outcome.answer.contains("took too long"));
}
