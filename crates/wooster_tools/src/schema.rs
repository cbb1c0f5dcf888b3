//! Schema helpers for tool definitions.

use schemars::{JsonSchema, schema_for};
use wooster_models::chat::ToolDefinition;

/// Builds a [`ToolDefinition`] whose parameter schema is derived from `T`.
///
/// Closed object schemas (`additionalProperties: false`) keep models from
/// inventing parameters, and validation can then reject them outright.
///
/// # Example
///
/// ```
/// use schemars::JsonSchema;
/// use serde::Deserialize;
/// use wooster_tools::definition_for;
///
/// /// Parameters for the `writeNote` tool.
/// #[derive(Deserialize, JsonSchema)]
/// struct WriteNoteParams {
///     /// The note text to append.
///     text: String,
/// }
///
/// let def = definition_for::<WriteNoteParams>("writeNote", "Append a note.");
/// assert_eq!(def.name, "writeNote");
/// ```
#[must_use]
pub fn definition_for<T: JsonSchema>(name: &str, description: &str) -> ToolDefinition {
    let mut schema = serde_json::to_value(schema_for!(T)).expect("schema serialization failed");
    if let Some(obj) = schema.as_object_mut() {
        obj.insert(
            "additionalProperties".to_string(),
            serde_json::Value::Bool(false),
        );
        // The meta-schema reference is noise for providers.
        obj.remove("$schema");
    }
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters: schema,
    }
}
