//! Chat model types, provider trait, and handle.

mod model;
mod provider;
mod types;

pub use model::ChatModel;
pub use provider::ChatProvider;
pub use types::{
    AssistantBlock, ChatRequest, ChatResponse, Message, ToolCall, ToolChoice, ToolDefinition,
    ToolResult, ToolResultStatus, Usage, UserBlock,
};
