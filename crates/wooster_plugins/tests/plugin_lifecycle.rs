//! Plugin manager behavior: load-failure isolation, just-in-time service
//! lookup across load order, tool-name precedence, validation, scheduled
//! task seeding, and reverse-order shutdown.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use wooster_config::ConfigView;
use wooster_plugins::{
    DAILY_REVIEW_TASK_KEY, DailyReviewPlugin, EMAIL_SERVICE, Email, EmailService, GtdPlugin,
    LifecycleState, PluginContext, PluginError, PluginManager, WoosterPlugin,
};
use wooster_registry::ServiceRegistry;
use wooster_scheduler::{Clock, ExecutionStatus, MockClock, ScheduleStore, Scheduler};
use wooster_tools::{Tool, ToolFuture, ToolProvenance, ToolRegistry};

fn config(extra: &[(&str, &str)]) -> Arc<ConfigView> {
    let mut pairs: HashMap<String, String> = HashMap::new();
    pairs.insert("WOOSTER_OPENAI_API_KEY".to_string(), "sk-test".to_string());
    for (key, value) in extra {
        pairs.insert((*key).to_string(), (*value).to_string());
    }
    Arc::new(ConfigView::from_pairs(&pairs).unwrap())
}

fn context_at(
    store: Arc<ScheduleStore>,
    hour: u32,
    minute: u32,
    extra: &[(&str, &str)],
) -> PluginContext {
    let clock = MockClock::at(Utc.with_ymd_and_hms(2024, 7, 1, hour, minute, 0).unwrap());
    PluginContext {
        config: config(extra),
        services: ServiceRegistry::new(),
        scheduler: Arc::new(Scheduler::new(store, Clock::with_provider(clock))),
    }
}

/// A minimal plugin with configurable behavior.
struct TestPlugin {
    name: &'static str,
    description: &'static str,
    fail_init: bool,
    tool_name: Option<&'static str>,
    shutdown_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl TestPlugin {
    fn named(name: &'static str) -> Self {
        Self {
            name,
            description: "a test plugin",
            fail_init: false,
            tool_name: None,
            shutdown_log: None,
        }
    }
}

struct NamedTool {
    name: &'static str,
    reply: &'static str,
}

impl Tool for NamedTool {
    fn definition(&self) -> wooster_models::chat::ToolDefinition {
        wooster_models::chat::ToolDefinition {
            name: self.name.to_string(),
            description: "test tool".to_string(),
            parameters: json!({"type": "object", "additionalProperties": false}),
        }
    }

    fn execute(&self, _args: serde_json::Value) -> ToolFuture<'_> {
        let reply = self.reply;
        Box::pin(async move { Ok(json!(reply)) })
    }
}

#[async_trait]
impl WoosterPlugin for TestPlugin {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> &str {
        "0.0.1"
    }

    fn description(&self) -> &str {
        self.description
    }

    async fn initialize(&self, _context: &PluginContext) -> Result<(), PluginError> {
        if self.fail_init {
            Err(PluginError::initialize("intentional failure"))
        } else {
            Ok(())
        }
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        if let Some(log) = &self.shutdown_log {
            log.lock().push(self.name.to_string());
        }
        Ok(())
    }

    fn agent_tools(&self) -> Vec<Arc<dyn Tool>> {
        match self.tool_name {
            Some(name) => vec![Arc::new(NamedTool {
                name,
                reply: self.name,
            })],
            None => Vec::new(),
        }
    }
}

/// Email provider standing in for a Gmail plugin.
struct FakeGmailPlugin {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

struct RecordingEmail {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl EmailService for RecordingEmail {
    async fn send(&self, subject: &str, body: &str) -> Result<(), String> {
        self.sent.lock().push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

#[async_trait]
impl WoosterPlugin for FakeGmailPlugin {
    fn name(&self) -> &str {
        "gmail"
    }

    fn version(&self) -> &str {
        "0.0.1"
    }

    fn description(&self) -> &str {
        "records outgoing mail"
    }

    async fn initialize(&self, context: &PluginContext) -> Result<(), PluginError> {
        context.services.register(
            EMAIL_SERVICE,
            Arc::new(Email(Arc::new(RecordingEmail {
                sent: self.sent.clone(),
            }))),
        );
        Ok(())
    }
}

#[tokio::test]
async fn failing_plugin_does_not_block_its_peers() {
    let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
    let context = context_at(store, 9, 0, &[]);
    let mut manager = PluginManager::new(context);
    let mut tools = ToolRegistry::new();

    let mut failing = TestPlugin::named("aaaBroken");
    failing.fail_init = true;
    let mut healthy = TestPlugin::named("zzzHealthy");
    healthy.tool_name = Some("healthyTool");

    manager
        .load(vec![Arc::new(failing), Arc::new(healthy)], &mut tools)
        .await
        .unwrap();

    let descriptors = manager.descriptors();
    assert_eq!(descriptors[0].state, LifecycleState::Failed);
    assert_eq!(descriptors[1].state, LifecycleState::Initialized);
    assert!(tools.has("healthyTool"));

    let result = tools.execute("healthyTool", &json!({})).await.unwrap();
    assert_eq!(result, json!("zzzHealthy"));
}

#[tokio::test]
async fn daily_review_finds_email_service_registered_by_a_later_plugin() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
    // 09:30, past the 07:00 firing: reconciliation will catch up today.
    let context = context_at(store, 9, 30, &[]);
    let mut manager = PluginManager::new(context.clone());
    let mut tools = ToolRegistry::new();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let daily = DailyReviewPlugin::new(context.services.clone(), dir.path().to_path_buf());
    let gmail = FakeGmailPlugin { sent: sent.clone() };

    // "dailyReview" sorts before "gmail": the consumer initializes first,
    // before its provider exists. Just-in-time lookup makes this fine.
    manager
        .load(vec![Arc::new(daily), Arc::new(gmail)], &mut tools)
        .await
        .unwrap();

    context.scheduler.reconcile().await.unwrap();

    let deliveries = sent.lock();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, "Daily review");
    assert!(deliveries[0].1.contains("open next action(s)"));

    let schedule = context
        .scheduler
        .get_by_key(DAILY_REVIEW_TASK_KEY)
        .unwrap()
        .unwrap();
    let log = context
        .scheduler
        .store()
        .recent_executions(schedule.id, 10)
        .unwrap();
    assert_eq!(log[0].status, ExecutionStatus::Success);
    assert_eq!(log[0].period_identifier, "2024-07-01");
}

#[tokio::test]
async fn earlier_plugin_wins_tool_name_and_core_always_wins() {
    let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
    let context = context_at(store, 9, 0, &[]);
    let mut manager = PluginManager::new(context);
    let mut tools = ToolRegistry::new();
    tools.register_core(NamedTool {
        name: "reserved",
        reply: "core",
    });

    let mut first = TestPlugin::named("alpha");
    first.tool_name = Some("shared");
    let mut second = TestPlugin::named("beta");
    second.tool_name = Some("shared");
    let mut grabby = TestPlugin::named("gamma");
    grabby.tool_name = Some("reserved");

    manager
        .load(
            vec![Arc::new(second), Arc::new(first), Arc::new(grabby)],
            &mut tools,
        )
        .await
        .unwrap();

    // Lexicographic load order: alpha registered "shared" before beta.
    assert_eq!(
        tools.provenance("shared"),
        Some(&ToolProvenance::Plugin("alpha".to_string()))
    );
    // The core tool was not displaced.
    assert_eq!(tools.provenance("reserved"), Some(&ToolProvenance::Core));
    let result = tools.execute("reserved", &json!({})).await.unwrap();
    assert_eq!(result, json!("core"));
}

#[tokio::test]
async fn invalid_and_duplicate_and_disabled_plugins_are_skipped() {
    let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
    let dir = TempDir::new().unwrap();
    let context = context_at(store, 9, 0, &[("WOOSTER_PLUGINS_GTD", "false")]);
    let mut manager = PluginManager::new(context);
    let mut tools = ToolRegistry::new();

    let mut nameless = TestPlugin::named("");
    nameless.description = "has no name";
    let first_dup = TestPlugin::named("twin");
    let second_dup = TestPlugin::named("twin");
    let disabled = GtdPlugin::new(dir.path().to_path_buf());

    manager
        .load(
            vec![
                Arc::new(nameless),
                Arc::new(first_dup),
                Arc::new(second_dup),
                Arc::new(disabled),
            ],
            &mut tools,
        )
        .await
        .unwrap();

    let descriptors = manager.descriptors();
    // The nameless plugin and the duplicate never made it in.
    assert_eq!(descriptors.len(), 2);
    assert_eq!(descriptors[0].name, "gtd");
    assert!(!descriptors[0].enabled);
    assert_eq!(descriptors[0].state, LifecycleState::Discovered);
    assert_eq!(descriptors[1].name, "twin");
    assert_eq!(descriptors[1].state, LifecycleState::Initialized);

    // The disabled plugin contributed no tools.
    assert!(!tools.has("captureToInbox"));
}

#[tokio::test]
async fn task_seeding_is_idempotent_across_restarts() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("scheduler.db");

    for _ in 0..3 {
        let store = Arc::new(ScheduleStore::open(&db).unwrap());
        let context = context_at(store, 6, 0, &[]);
        let mut manager = PluginManager::new(context.clone());
        let mut tools = ToolRegistry::new();
        let daily = DailyReviewPlugin::new(context.services.clone(), dir.path().to_path_buf());
        manager.load(vec![Arc::new(daily)], &mut tools).await.unwrap();
    }

    let store = ScheduleStore::open(&db).unwrap();
    let schedules = store.list().unwrap();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].task_key, DAILY_REVIEW_TASK_KEY);
    assert_eq!(schedules[0].schedule_expression, "0 7 * * *");
}

#[tokio::test]
async fn shutdown_runs_in_reverse_initialization_order() {
    let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
    let context = context_at(store, 9, 0, &[]);
    let mut manager = PluginManager::new(context);
    let mut tools = ToolRegistry::new();

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut first = TestPlugin::named("alpha");
    first.shutdown_log = Some(log.clone());
    let mut second = TestPlugin::named("beta");
    second.shutdown_log = Some(log.clone());
    let mut broken = TestPlugin::named("middle");
    broken.fail_init = true;
    broken.shutdown_log = Some(log.clone());

    manager
        .load(
            vec![Arc::new(second), Arc::new(broken), Arc::new(first)],
            &mut tools,
        )
        .await
        .unwrap();
    manager.shutdown_all().await;

    // Initialization order was [alpha, beta, middle(failed)]; shutdown is
    // the reverse, and the failed plugin's shutdown must not run at all.
    assert_eq!(*log.lock(), vec!["beta".to_string(), "alpha".to_string()]);

    let states: Vec<LifecycleState> = manager
        .descriptors()
        .into_iter()
        .map(|descriptor| descriptor.state)
        .collect();
    assert_eq!(
        states,
        vec![
            LifecycleState::ShutDown,
            LifecycleState::ShutDown,
            LifecycleState::Failed
        ]
    );
}
