//! Daily review plugin: a scheduled morning summary delivered by email.

use crate::email::{EMAIL_SERVICE, Email};
use crate::gtd::load_tasks;
use crate::plugin::{ScheduledTaskSetup, TaskHandler, WoosterPlugin};
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use wooster_registry::ServiceRegistry;
use wooster_scheduler::ExecutionPolicy;

/// Task key of the seeded system schedule.
pub const DAILY_REVIEW_TASK_KEY: &str = "system.dailyReview";

/// Default firing time: 07:00 every day.
const DEFAULT_SCHEDULE: &str = "0 7 * * *";

/// Open tasks listed in full before the summary truncates to a count.
const LISTED_TASKS: usize = 5;

/// Seeds and serves the `system.dailyReview` schedule.
///
/// The handler composes a summary of open next actions and delivers it
/// through the email service, which it looks up **at fire time**. An email
/// provider plugin loaded after this one therefore still receives the
/// review (the registry lookup happens hours after initialization anyway).
pub struct DailyReviewPlugin {
    services: ServiceRegistry,
    gtd_dir: PathBuf,
    schedule_override: Option<String>,
}

impl DailyReviewPlugin {
    /// Creates the plugin.
    #[must_use]
    pub fn new(services: ServiceRegistry, gtd_dir: PathBuf) -> Self {
        Self {
            services,
            gtd_dir,
            schedule_override: None,
        }
    }

    /// Overrides the default 07:00 schedule.
    #[must_use]
    pub fn with_schedule(mut self, expression: impl Into<String>) -> Self {
        self.schedule_override = Some(expression.into());
        self
    }

    /// Builds the review text from the GTD next-actions file.
    fn compose_review(gtd_dir: &PathBuf) -> String {
        let tasks = load_tasks(&gtd_dir.join("next_actions.md")).unwrap_or_default();
        let open: Vec<_> = tasks.iter().filter(|task| !task.completed).collect();

        let mut lines = vec![format!("Good morning. {} open next action(s).", open.len())];
        for task in open.iter().take(LISTED_TASKS) {
            let due = task
                .due
                .map(|date| format!(" (due {date})"))
                .unwrap_or_default();
            lines.push(format!("• {}{due}", task.description));
        }
        if open.len() > LISTED_TASKS {
            lines.push(format!("… and {} more.", open.len() - LISTED_TASKS));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl WoosterPlugin for DailyReviewPlugin {
    fn name(&self) -> &str {
        "dailyReview"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        "Morning summary of open tasks, delivered through the email channel"
    }

    fn scheduled_task_setups(&self) -> Vec<ScheduledTaskSetup> {
        vec![ScheduledTaskSetup {
            task_key: DAILY_REVIEW_TASK_KEY.to_string(),
            description: "Morning daily review".to_string(),
            default_schedule_expression: DEFAULT_SCHEDULE.to_string(),
            effective_schedule_expression: self.schedule_override.clone(),
            enabled: true,
            handler: Some(review_handler(self.services.clone(), self.gtd_dir.clone())),
            execution_policy: ExecutionPolicy::RunOncePerPeriodCatchUp,
            initial_payload: b"{}".to_vec(),
        }]
    }
}

fn review_handler(services: ServiceRegistry, gtd_dir: PathBuf) -> TaskHandler {
    Arc::new(
        move |_payload| -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> {
            let services = services.clone();
            let gtd_dir = gtd_dir.clone();
            Box::pin(async move {
                let review = DailyReviewPlugin::compose_review(&gtd_dir);

                // Just-in-time lookup: whichever email provider is
                // registered *now* delivers the review.
                let email = services
                    .lookup_as::<Email>(EMAIL_SERVICE)
                    .ok_or_else(|| "email service is not registered".to_string())?;
                email.0.send("Daily review", &review).await
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtd::{TaskLine, save_tasks};
    use tempfile::TempDir;

    #[test]
    fn review_counts_and_lists_open_tasks() {
        let dir = TempDir::new().unwrap();
        let mut done = TaskLine::new("already finished");
        done.completed = true;
        let tasks = vec![
            TaskLine::new("water the plants"),
            TaskLine::new("call the bank"),
            done,
        ];
        save_tasks(&dir.path().join("next_actions.md"), &tasks).unwrap();

        let review = DailyReviewPlugin::compose_review(&dir.path().to_path_buf());
        assert!(review.starts_with("Good morning. 2 open next action(s)."));
        assert!(review.contains("water the plants"));
        assert!(!review.contains("already finished"));
    }

    #[test]
    fn review_handles_missing_file() {
        let dir = TempDir::new().unwrap();
        let review = DailyReviewPlugin::compose_review(&dir.path().to_path_buf());
        assert!(review.contains("0 open next action(s)"));
    }
}
