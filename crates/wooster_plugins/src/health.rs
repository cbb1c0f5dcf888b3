//! Health-log plugin: append-only health events file.

use crate::error::PluginError;
use crate::plugin::{PluginContext, WoosterPlugin};
use async_trait::async_trait;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;

/// Registry name of the health-log service (consumed by the external HTTP
/// surface).
pub const HEALTH_LOG_SERVICE: &str = "healthLogService";

/// Append-only health event log.
pub struct HealthLog {
    path: PathBuf,
}

impl HealthLog {
    /// Creates a log writing to `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Appends one timestamped event line.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error on write failure.
    pub fn log_event(&self, text: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = format!(
            "- {} {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            text.trim()
        );
        let mut existing = std::fs::read_to_string(&self.path).unwrap_or_default();
        existing.push_str(&line);
        std::fs::write(&self.path, existing)
    }
}

/// Plugin registering the [`HealthLog`] service.
pub struct HealthLogPlugin {
    log: Arc<HealthLog>,
}

impl HealthLogPlugin {
    /// Creates the plugin over the configured events file.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            log: Arc::new(HealthLog::new(path)),
        }
    }
}

#[async_trait]
impl WoosterPlugin for HealthLogPlugin {
    fn name(&self) -> &str {
        "healthLog"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        "Append-only health event logging"
    }

    async fn initialize(&self, context: &PluginContext) -> Result<(), PluginError> {
        context
            .services
            .register(HEALTH_LOG_SERVICE, self.log.clone());
        Ok(())
    }
}
