//! Tool registry with provenance-aware collision handling.

use crate::error::ToolError;
use crate::tool::Tool;
use indexmap::IndexMap;
use jsonschema::Validator;
use std::sync::Arc;
use wooster_models::chat::ToolDefinition;

/// Where a tool registration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolProvenance {
    /// Provided by the core; wins every collision.
    Core,
    /// Provided by the named plugin; earlier registrations win among plugins.
    Plugin(String),
}

/// One registered tool with its provenance and compiled argument validator.
struct ToolEntry {
    tool: Arc<dyn Tool>,
    provenance: ToolProvenance,
    validator: Option<Validator>,
}

/// Registry of available tools.
///
/// Insertion order is preserved so the definitions handed to the model are
/// stable across runs.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, ToolEntry>,
}

impl core::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a core-provided tool.
    ///
    /// Replaces any plugin-provided tool of the same name. Two core tools
    /// with the same name indicate a wiring bug; the first wins and the
    /// duplicate is logged.
    pub fn register_core(&mut self, tool: impl Tool) -> bool {
        self.register(Arc::new(tool), ToolProvenance::Core)
    }

    /// Registers a plugin-provided tool.
    ///
    /// Dropped when the name is already taken — by the core or by an
    /// earlier-loaded plugin. Returns whether the tool was kept.
    pub fn register_plugin(&mut self, plugin: impl Into<String>, tool: Arc<dyn Tool>) -> bool {
        self.register(tool, ToolProvenance::Plugin(plugin.into()))
    }

    fn register(&mut self, tool: Arc<dyn Tool>, provenance: ToolProvenance) -> bool {
        let definition = tool.definition();
        let name = definition.name.clone();
        let validator = compile_validator(&definition);

        match self.tools.get(&name) {
            None => {
                self.tools.insert(
                    name,
                    ToolEntry {
                        tool,
                        provenance,
                        validator,
                    },
                );
                true
            }
            Some(existing) => match (&existing.provenance, &provenance) {
                (ToolProvenance::Plugin(loser), ToolProvenance::Core) => {
                    tracing::warn!(
                        tool = %name,
                        displaced = %loser,
                        "core tool displaces plugin tool of the same name"
                    );
                    self.tools.insert(
                        name,
                        ToolEntry {
                            tool,
                            provenance,
                            validator,
                        },
                    );
                    true
                }
                (_, ToolProvenance::Plugin(plugin)) => {
                    tracing::warn!(
                        tool = %name,
                        plugin = %plugin,
                        "dropping plugin tool: name already registered"
                    );
                    false
                }
                (ToolProvenance::Core, ToolProvenance::Core) => {
                    tracing::error!(tool = %name, "duplicate core tool registration ignored");
                    false
                }
            },
        }
    }

    /// Validates arguments and executes a tool by name.
    ///
    /// # Errors
    ///
    /// [`ToolError::Unknown`] for an unregistered name,
    /// [`ToolError::InvalidParams`] when the arguments fail the tool's
    /// schema, and whatever the tool itself returns.
    pub async fn execute(
        &self,
        name: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        if let Some(validator) = &entry.validator
            && let Err(violation) = validator.validate(args)
        {
            return Err(ToolError::invalid_params(violation.to_string()));
        }

        entry.tool.execute(args.clone()).await
    }

    /// Returns definitions for all registered tools, in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|entry| entry.tool.definition())
            .collect()
    }

    /// Returns a tool handle by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.tool.clone())
    }

    /// Returns the provenance of a registered tool.
    #[must_use]
    pub fn provenance(&self, name: &str) -> Option<&ToolProvenance> {
        self.tools.get(name).map(|entry| &entry.provenance)
    }

    /// Returns whether a tool with the given name is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the names of all registered tools, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}

/// Compiles the definition's parameter schema; invalid schemas disable
/// validation for that tool rather than blocking registration.
fn compile_validator(definition: &ToolDefinition) -> Option<Validator> {
    match jsonschema::validator_for(&definition.parameters) {
        Ok(validator) => Some(validator),
        Err(err) => {
            tracing::warn!(
                tool = %definition.name,
                %err,
                "tool schema does not compile, skipping argument validation"
            );
            None
        }
    }
}
