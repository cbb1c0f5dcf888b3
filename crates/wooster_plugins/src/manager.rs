//! The plugin manager: validation, ordered initialization, collection,
//! and reverse-order shutdown.

use crate::error::PluginError;
use crate::plugin::{LifecycleState, PluginContext, WoosterPlugin};
use std::collections::HashSet;
use std::sync::Arc;
use wooster_scheduler::{HandlerType, NewSchedule, ScheduleError};
use wooster_tools::ToolRegistry;

/// Public snapshot of one managed plugin.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// Canonical name.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Whether configuration left the plugin enabled.
    pub enabled: bool,
    /// Current lifecycle state.
    pub state: LifecycleState,
}

struct PluginEntry {
    plugin: Arc<dyn WoosterPlugin>,
    descriptor: PluginDescriptor,
}

/// Loads, initializes, and shuts down statically linked plugins.
///
/// Initialization runs in lexicographic canonical-name order: deterministic
/// and independent of any dependency notion. A plugin whose `initialize`
/// fails is marked failed and skipped for contributions; everything else
/// continues loading.
pub struct PluginManager {
    context: PluginContext,
    entries: Vec<PluginEntry>,
}

impl PluginManager {
    /// Creates a manager over the shared capability bundle.
    #[must_use]
    pub fn new(context: PluginContext) -> Self {
        Self {
            context,
            entries: Vec::new(),
        }
    }

    /// Loads a batch of plugins: validate, order, initialize, collect.
    ///
    /// Rejected plugins (bad metadata, duplicate name, disabled by
    /// configuration) are logged and skipped; initialization failures are
    /// isolated per plugin. Contributed tools land in `tools` with plugin
    /// provenance; scheduled tasks are seeded into the scheduler.
    ///
    /// # Errors
    ///
    /// Returns a storage error only when schedule seeding cannot reach the
    /// scheduler database at all.
    pub async fn load(
        &mut self,
        plugins: Vec<Arc<dyn WoosterPlugin>>,
        tools: &mut ToolRegistry,
    ) -> Result<(), ScheduleError> {
        let mut accepted: Vec<Arc<dyn WoosterPlugin>> = Vec::new();
        let mut names: HashSet<String> = self
            .entries
            .iter()
            .map(|entry| entry.descriptor.name.clone())
            .collect();

        for plugin in plugins {
            match validate(plugin.as_ref(), &names) {
                Ok(()) => {
                    names.insert(plugin.name().to_string());
                    accepted.push(plugin);
                }
                Err(err) => {
                    tracing::warn!(plugin = %plugin.name(), %err, "rejecting plugin");
                }
            }
        }

        // Deterministic order: lexicographic by canonical name.
        accepted.sort_by(|a, b| a.name().cmp(b.name()));

        for plugin in accepted {
            let enabled = self.context.config.plugin_enabled(plugin.name());
            let mut descriptor = PluginDescriptor {
                name: plugin.name().to_string(),
                version: plugin.version().to_string(),
                description: plugin.description().to_string(),
                enabled,
                state: LifecycleState::Discovered,
            };

            if !enabled {
                tracing::info!(plugin = %descriptor.name, "plugin disabled by configuration");
                self.entries.push(PluginEntry { plugin, descriptor });
                continue;
            }

            match plugin.initialize(&self.context).await {
                Ok(()) => {
                    descriptor.state = LifecycleState::Initialized;
                    tracing::info!(
                        plugin = %descriptor.name,
                        version = %descriptor.version,
                        "plugin initialized"
                    );
                }
                Err(err) => {
                    descriptor.state = LifecycleState::Failed;
                    tracing::error!(plugin = %descriptor.name, %err, "plugin initialization failed");
                    self.entries.push(PluginEntry { plugin, descriptor });
                    continue;
                }
            }

            for tool in plugin.agent_tools() {
                tools.register_plugin(descriptor.name.clone(), tool);
            }
            self.seed_scheduled_tasks(plugin.as_ref())?;

            self.entries.push(PluginEntry { plugin, descriptor });
        }
        Ok(())
    }

    /// Seeds one plugin's scheduled tasks.
    ///
    /// The schedule row is created only when the task key is new; the
    /// direct handler is (re-)registered unconditionally, since handler
    /// registrations are in-memory and vanish at process exit.
    fn seed_scheduled_tasks(&self, plugin: &dyn WoosterPlugin) -> Result<(), ScheduleError> {
        for setup in plugin.scheduled_task_setups() {
            if !setup.enabled {
                tracing::debug!(task_key = %setup.task_key, "task disabled by its plugin");
                continue;
            }

            if let Some(handler) = setup.handler.clone() {
                self.context
                    .scheduler
                    .register_direct_handler(setup.task_key.clone(), move |payload| {
                        handler(payload)
                    });
            }

            if self.context.scheduler.get_by_key(&setup.task_key)?.is_some() {
                continue;
            }
            let handler_type = if setup.handler.is_some() {
                HandlerType::DirectHandler
            } else {
                HandlerType::AgentPrompt
            };
            match self.context.scheduler.create(NewSchedule {
                description: setup.description.clone(),
                schedule_expression: setup.expression().to_string(),
                payload: setup.initial_payload.clone(),
                task_key: setup.task_key.clone(),
                handler_type,
                execution_policy: setup.execution_policy,
            }) {
                Ok(id) => {
                    tracing::info!(task_key = %setup.task_key, %id, "seeded scheduled task");
                }
                // A concurrent seeder won the race; the schedule exists.
                Err(ScheduleError::DuplicateTaskKey(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Shuts down initialized plugins in reverse initialization order.
    ///
    /// Errors are logged and do not prevent subsequent shutdowns.
    pub async fn shutdown_all(&mut self) {
        for entry in self.entries.iter_mut().rev() {
            if entry.descriptor.state != LifecycleState::Initialized {
                continue;
            }
            if let Err(err) = entry.plugin.shutdown().await {
                tracing::error!(plugin = %entry.descriptor.name, %err, "plugin shutdown failed");
            }
            entry.descriptor.state = LifecycleState::ShutDown;
        }
    }

    /// Snapshots of all managed plugins, in initialization order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.entries
            .iter()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }
}

impl core::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.descriptors().len())
            .finish_non_exhaustive()
    }
}

/// Metadata validation: non-empty name/version/description, unique name.
fn validate(plugin: &dyn WoosterPlugin, names: &HashSet<String>) -> Result<(), PluginError> {
    if plugin.name().trim().is_empty() {
        return Err(PluginError::InvalidMetadata("empty name".to_string()));
    }
    if plugin.version().trim().is_empty() {
        return Err(PluginError::InvalidMetadata("empty version".to_string()));
    }
    if plugin.description().trim().is_empty() {
        return Err(PluginError::InvalidMetadata("empty description".to_string()));
    }
    if names.contains(plugin.name()) {
        return Err(PluginError::DuplicateName(plugin.name().to_string()));
    }
    Ok(())
}
