//! GTD plugin: inbox capture and the next-actions task-line format.

use crate::error::PluginError;
use crate::plugin::{PluginContext, WoosterPlugin};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use wooster_tools::{Tool, ToolError, ToolFuture, definition_for};

/// Registry name of the inbox-capture service (consumed by the external
/// HTTP surface).
pub const GTD_CAPTURE_SERVICE: &str = "gtdCaptureService";

/// Timestamp format used in inbox lines and captured annotations.
const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─────────────────────────────────────────────────────────────────────────────
// Task lines
// ─────────────────────────────────────────────────────────────────────────────

/// One next-actions task line.
///
/// Serialized form:
///
/// ```text
/// - [ ] @home +Wooster replace the router due:2024-07-05 (Captured: 2024-07-01 09:15:00) (id: 3f2b...)
/// ```
///
/// Every field except the description and the trailing id is optional; the
/// id is assigned on first serialization and stays stable across rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLine {
    /// Whether the task is done (`- [x]`).
    pub completed: bool,
    /// `@context` marker without the `@`.
    pub context: Option<String>,
    /// `+Project` marker without the `+`.
    pub project: Option<String>,
    /// Free-text description.
    pub description: String,
    /// Due date from `due:YYYY-MM-DD`.
    pub due: Option<NaiveDate>,
    /// Capture annotation contents.
    pub captured: Option<String>,
    /// Completion annotation contents.
    pub completed_at: Option<String>,
    /// Stable identifier.
    pub id: Uuid,
}

impl TaskLine {
    /// Creates an open task with a fresh id.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            completed: false,
            context: None,
            project: None,
            description: description.into(),
            due: None,
            captured: Some(Local::now().format(STAMP_FORMAT).to_string()),
            completed_at: None,
            id: Uuid::new_v4(),
        }
    }

    /// Parses a task line; returns `None` for lines that are not tasks.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim();
        let (completed, mut rest) = if let Some(rest) = rest.strip_prefix("- [ ] ") {
            (false, rest.to_string())
        } else if let Some(rest) = rest.strip_prefix("- [x] ") {
            (true, rest.to_string())
        } else {
            return None;
        };

        let id = extract_annotation(&mut rest, "(id: ")
            .and_then(|text| Uuid::parse_str(text.trim()).ok())
            .unwrap_or_else(Uuid::new_v4);
        let completed_at = extract_annotation(&mut rest, "(Completed: ");
        let captured = extract_annotation(&mut rest, "(Captured: ");

        let mut due = None;
        let mut context = None;
        let mut project = None;
        let mut description_words = Vec::new();
        for word in rest.split_whitespace() {
            if let Some(date_text) = word.strip_prefix("due:") {
                if let Ok(date) = NaiveDate::parse_from_str(date_text, "%Y-%m-%d") {
                    due = Some(date);
                    continue;
                }
            }
            if description_words.is_empty() {
                if let Some(ctx) = word.strip_prefix('@') {
                    if context.is_none() {
                        context = Some(ctx.to_string());
                        continue;
                    }
                }
                if let Some(proj) = word.strip_prefix('+') {
                    if project.is_none() {
                        project = Some(proj.to_string());
                        continue;
                    }
                }
            }
            description_words.push(word);
        }

        Some(Self {
            completed,
            context,
            project,
            description: description_words.join(" "),
            due,
            captured,
            completed_at,
            id,
        })
    }

    /// Serializes to the canonical line form (no trailing newline).
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut parts = vec![if self.completed {
            "- [x]".to_string()
        } else {
            "- [ ]".to_string()
        }];
        if let Some(context) = &self.context {
            parts.push(format!("@{context}"));
        }
        if let Some(project) = &self.project {
            parts.push(format!("+{project}"));
        }
        parts.push(self.description.clone());
        if let Some(due) = self.due {
            parts.push(format!("due:{}", due.format("%Y-%m-%d")));
        }
        if let Some(captured) = &self.captured {
            parts.push(format!("(Captured: {captured})"));
        }
        if let Some(completed_at) = &self.completed_at {
            parts.push(format!("(Completed: {completed_at})"));
        }
        parts.push(format!("(id: {})", self.id));
        parts.join(" ")
    }
}

/// Pulls a `(prefix ...)` annotation out of `rest`, returning its contents.
fn extract_annotation(rest: &mut String, prefix: &str) -> Option<String> {
    let start = rest.find(prefix)?;
    let after = start + prefix.len();
    let close = rest[after..].find(')')? + after;
    let contents = rest[after..close].to_string();
    rest.replace_range(start..=close, "");
    Some(contents)
}

/// Loads task lines from a next-actions file; non-task lines are skipped.
///
/// # Errors
///
/// Returns the underlying I/O error when the file exists but cannot be
/// read. A missing file is an empty list.
pub fn load_tasks(path: &Path) -> std::io::Result<Vec<TaskLine>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    Ok(text.lines().filter_map(TaskLine::parse).collect())
}

/// Writes task lines to a next-actions file, one per line.
///
/// # Errors
///
/// Returns the underlying I/O error on write failure.
pub fn save_tasks(path: &Path, tasks: &[TaskLine]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = String::new();
    for task in tasks {
        text.push_str(&task.to_line());
        text.push('\n');
    }
    std::fs::write(path, text)
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbox capture
// ─────────────────────────────────────────────────────────────────────────────

/// Inbox-capture service: appends `- [ ] YYYY-MM-DD HH:MM:SS <text>` lines
/// to `gtd/inbox.md`.
pub struct InboxCapture {
    gtd_dir: PathBuf,
}

impl InboxCapture {
    /// Creates a capture service rooted at the GTD directory.
    #[must_use]
    pub fn new(gtd_dir: PathBuf) -> Self {
        Self { gtd_dir }
    }

    /// Appends one inbox line.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error on write failure.
    pub fn capture(&self, text: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.gtd_dir)?;
        let path = self.gtd_dir.join("inbox.md");
        let line = format!(
            "- [ ] {} {}\n",
            Local::now().format(STAMP_FORMAT),
            text.trim()
        );
        let mut existing = std::fs::read_to_string(&path).unwrap_or_default();
        existing.push_str(&line);
        std::fs::write(&path, existing)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for the `captureToInbox` tool.
#[derive(Deserialize, JsonSchema)]
struct CaptureParams {
    /// The text to capture.
    text: String,
}

struct CaptureTool {
    capture: Arc<InboxCapture>,
}

impl Tool for CaptureTool {
    fn definition(&self) -> wooster_models::chat::ToolDefinition {
        definition_for::<CaptureParams>("captureToInbox", "Capture a thought into the GTD inbox.")
    }

    fn execute(&self, args: serde_json::Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let params: CaptureParams = serde_json::from_value(args)?;
            self.capture
                .capture(&params.text)
                .map_err(|err| ToolError::invocation(err.to_string()))?;
            Ok(json!({"captured": true}))
        })
    }
}

/// The GTD plugin: inbox capture service plus the `captureToInbox` tool.
pub struct GtdPlugin {
    capture: Arc<InboxCapture>,
}

impl GtdPlugin {
    /// Creates the plugin over the configured GTD directory.
    #[must_use]
    pub fn new(gtd_dir: PathBuf) -> Self {
        Self {
            capture: Arc::new(InboxCapture::new(gtd_dir)),
        }
    }
}

#[async_trait]
impl WoosterPlugin for GtdPlugin {
    fn name(&self) -> &str {
        "gtd"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        "GTD inbox capture and next-actions management"
    }

    async fn initialize(&self, context: &PluginContext) -> Result<(), PluginError> {
        context
            .services
            .register(GTD_CAPTURE_SERVICE, self.capture.clone());
        Ok(())
    }

    fn agent_tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(CaptureTool {
            capture: self.capture.clone(),
        })]
    }
}
