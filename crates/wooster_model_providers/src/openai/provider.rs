//! [`ChatProvider`] / [`EmbeddingProvider`] implementation over the
//! OpenAI-compatible client.

use super::client::OpenAiClient;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, WireFunctionCall,
    WireFunctionDef, WireMessage, WireTool, WireToolCall,
};
use async_trait::async_trait;
use wooster_models::chat::{
    AssistantBlock, ChatProvider, ChatRequest, ChatResponse, Message, ToolCall, ToolChoice, Usage,
    UserBlock,
};
use wooster_models::embedding::EmbeddingProvider;
use wooster_models::{EmbeddingError, GenerationError};

/// Provider for any OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiCompatProvider {
    client: OpenAiClient,
}

impl OpenAiCompatProvider {
    /// Creates a provider for the given base URL and API key.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: OpenAiClient::new(base_url, api_key),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn generate(
        &self,
        model: &str,
        request: ChatRequest,
    ) -> Result<ChatResponse, GenerationError> {
        let wire_request = convert_request(model, &request)?;
        let response = self.client.chat_completions(&wire_request).await?;
        convert_response(response)
    }

    async fn probe(&self) -> Result<(), GenerationError> {
        self.client.list_models().await
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatProvider {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .client
            .embeddings(&EmbeddingRequest {
                model: model.to_string(),
                input: texts.to_vec(),
            })
            .await?;

        let mut data = response.data;
        data.sort_by_key(|datum| datum.index);
        Ok(data.into_iter().map(|datum| datum.embedding).collect())
    }

    async fn probe(&self) -> Result<(), EmbeddingError> {
        self.client
            .list_models()
            .await
            .map_err(|err| EmbeddingError::Http(err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Request conversion (Wooster -> wire)
// ---------------------------------------------------------------------------

fn convert_request(
    model: &str,
    request: &ChatRequest,
) -> Result<ChatCompletionRequest, GenerationError> {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        messages.push(WireMessage::text("system", system.clone()));
    }

    for message in &request.messages {
        match message {
            Message::User { content } => convert_user_message(content, &mut messages),
            Message::Assistant { content } => {
                convert_assistant_message(content, &mut messages)?;
            }
        }
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| WireTool {
                kind: "function".to_string(),
                function: WireFunctionDef {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    });

    let tool_choice = request.tool_choice.as_ref().map(|choice| match choice {
        ToolChoice::Auto => serde_json::json!("auto"),
        ToolChoice::Required => serde_json::json!("required"),
        ToolChoice::None => serde_json::json!("none"),
    });

    Ok(ChatCompletionRequest {
        model: model.to_string(),
        messages,
        tools,
        tool_choice,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    })
}

fn convert_user_message(blocks: &[UserBlock], messages: &mut Vec<WireMessage>) {
    // Tool results become their own `role: tool` entries; consecutive text
    // blocks collapse into one user message.
    let mut text_parts: Vec<&str> = Vec::new();
    for block in blocks {
        match block {
            UserBlock::Text { text } => text_parts.push(text),
            UserBlock::ToolResult(result) => {
                messages.push(WireMessage {
                    role: "tool".to_string(),
                    content: Some(result.content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(result.call_id.clone()),
                });
            }
        }
    }
    if !text_parts.is_empty() {
        messages.push(WireMessage::text("user", text_parts.join("\n")));
    }
}

fn convert_assistant_message(
    blocks: &[AssistantBlock],
    messages: &mut Vec<WireMessage>,
) -> Result<(), GenerationError> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            AssistantBlock::Text { text } => text_parts.push(text),
            AssistantBlock::ToolCall(call) => {
                let arguments = serde_json::to_string(&call.arguments)?;
                tool_calls.push(WireToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments,
                    },
                });
            }
        }
    }

    messages.push(WireMessage {
        role: "assistant".to_string(),
        content: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join(""))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Response conversion (wire -> Wooster)
// ---------------------------------------------------------------------------

fn convert_response(response: ChatCompletionResponse) -> Result<ChatResponse, GenerationError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::InvalidResponse("response has no choices".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        content.push(AssistantBlock::Text { text });
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        let arguments = serde_json::from_str(&call.function.arguments).map_err(|err| {
            GenerationError::InvalidResponse(format!("malformed tool arguments: {err}"))
        })?;
        content.push(AssistantBlock::ToolCall(ToolCall {
            id: call.id,
            name: call.function.name,
            arguments,
        }));
    }

    let usage = response
        .usage
        .map(|usage| Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse { content, usage })
}
