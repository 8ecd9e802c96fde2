//! Request shapes for both client protocols, and their conversion into the single internal
//! [`UpstreamRequest`] the gateway actually sends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tokens;

/// The gateway's single internal request shape, independent of which client protocol was used.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<UpstreamMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<UpstreamTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text(String),
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ---- Anthropic Messages request shape ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    #[serde(default)]
    pub system: Option<AnthropicSystem>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<AnthropicTool>,
    #[serde(flatten)]
    pub other: std::collections::HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnthropicSystem {
    Text(String),
    Blocks(Vec<AnthropicTextBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicTextBlock {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: AnthropicToolResultContent },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnthropicToolResultContent {
    Text(String),
    Blocks(Vec<AnthropicTextBlock>),
}

impl AnthropicToolResultContent {
    fn as_text(&self) -> String {
        match self {
            AnthropicToolResultContent::Text(s) => s.clone(),
            AnthropicToolResultContent::Blocks(blocks) => {
                blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("")
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

// ---- OpenAI Chat Completions request shape ----

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<OpenAiTool>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub other: std::collections::HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<OpenAiToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Value,
}

/// Converts an Anthropic Messages request into the internal upstream shape.
pub fn anthropic_to_upstream(request: &AnthropicRequest) -> UpstreamRequest {
    let system = request.system.as_ref().map(|s| match s {
        AnthropicSystem::Text(t) => t.clone(),
        AnthropicSystem::Blocks(blocks) => blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n"),
    });

    let messages = request
        .messages
        .iter()
        .map(|m| UpstreamMessage {
            role: m.role.clone(),
            content: anthropic_content_parts(&m.content),
        })
        .collect();

    let tools = request
        .tools
        .iter()
        .map(|t| UpstreamTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect();

    UpstreamRequest {
        model: request.model.clone(),
        system,
        messages,
        tools,
        max_tokens: Some(request.max_tokens),
    }
}

fn anthropic_content_parts(content: &AnthropicContent) -> Vec<ContentPart> {
    match content {
        AnthropicContent::Text(text) => vec![ContentPart::Text(text.clone())],
        AnthropicContent::Blocks(blocks) => blocks
            .iter()
            .map(|b| match b {
                AnthropicContentBlock::Text { text } => ContentPart::Text(text.clone()),
                AnthropicContentBlock::ToolUse { id, name, input } => ContentPart::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                },
                AnthropicContentBlock::ToolResult { tool_use_id, content } => ContentPart::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: content.as_text(),
                },
            })
            .collect(),
    }
}

/// Converts an OpenAI Chat Completions request into the internal upstream shape.
pub fn openai_to_upstream(request: &OpenAiRequest) -> UpstreamRequest {
    let mut system = None;
    let mut messages = Vec::new();

    for m in &request.messages {
        if m.role == "system" {
            system = m.content.clone();
            continue;
        }

        let mut content = Vec::new();

        if let Some(text) = &m.content {
            content.push(ContentPart::Text(text.clone()));
        }

        for call in &m.tool_calls {
            let input = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            content.push(ContentPart::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input,
            });
        }

        if let Some(tool_call_id) = &m.tool_call_id {
            content.push(ContentPart::ToolResult {
                tool_use_id: tool_call_id.clone(),
                content: m.content.clone().unwrap_or_default(),
            });
        }

        messages.push(UpstreamMessage {
            role: m.role.clone(),
            content,
        });
    }

    let tools = request
        .tools
        .iter()
        .map(|t| UpstreamTool {
            name: t.function.name.clone(),
            description: t.function.description.clone(),
            input_schema: t.function.parameters.clone(),
        })
        .collect();

    UpstreamRequest {
        model: request.model.clone(),
        system,
        messages,
        tools,
        max_tokens: request.max_tokens,
    }
}

/// Body accepted by `/v1/messages/count_tokens`: the same shape as [`AnthropicRequest`] minus
/// the fields only a real generation call needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CountTokensRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default)]
    pub system: Option<AnthropicSystem>,
    #[serde(default)]
    pub tools: Vec<AnthropicTool>,
    #[serde(flatten)]
    pub other: std::collections::HashMap<String, Value>,
}

/// Converts a count-tokens request into the internal upstream shape for estimation purposes
/// only; it is never actually sent upstream.
pub fn count_tokens_to_upstream(request: &CountTokensRequest) -> UpstreamRequest {
    let system = request.system.as_ref().map(|s| match s {
        AnthropicSystem::Text(t) => t.clone(),
        AnthropicSystem::Blocks(blocks) => blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n"),
    });

    let messages = request
        .messages
        .iter()
        .map(|m| UpstreamMessage {
            role: m.role.clone(),
            content: anthropic_content_parts(&m.content),
        })
        .collect();

    let tools = request
        .tools
        .iter()
        .map(|t| UpstreamTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect();

    UpstreamRequest {
        model: request.model.clone(),
        system,
        messages,
        tools,
        max_tokens: None,
    }
}

/// Estimates `input_tokens` for a fully-built upstream request, per the §4.D heuristic.
pub fn estimate_input_tokens(request: &UpstreamRequest) -> u32 {
    let mut total = 0u32;

    if let Some(system) = &request.system {
        total += tokens::text_tokens(system);
    }

    for message in &request.messages {
        total += tokens::MESSAGE_STRUCTURAL_TOKENS;
        for part in &message.content {
            total += match part {
                ContentPart::Text(text) => tokens::text_tokens(text),
                ContentPart::ToolUse { name, input, .. } => {
                    tokens::tool_use_start_tokens(name) + tokens::text_tokens(&input.to_string())
                }
                ContentPart::ToolResult { content, .. } => tokens::tool_result_tokens(content),
            };
        }
    }

    for tool in &request.tools {
        total += tokens::tool_definition_tokens(&tool.name, &tool.description, &tool.input_schema.to_string());
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_plain_text_request_converts() {
        let request = AnthropicRequest {
            model: "upstream-model".to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: AnthropicContent::Text("hello".to_string()),
            }],
            max_tokens: 1024,
            system: Some(AnthropicSystem::Text("be nice".to_string())),
            stream: true,
            tools: vec![],
            other: Default::default(),
        };

        let upstream = anthropic_to_upstream(&request);
        assert_eq!(upstream.system.as_deref(), Some("be nice"));
        assert_eq!(upstream.messages.len(), 1);
        assert!(matches!(&upstream.messages[0].content[0], ContentPart::Text(t) if t == "hello"));
    }

    #[test]
    fn openai_system_message_is_extracted() {
        let request = OpenAiRequest {
            model: "upstream-model".to_string(),
            messages: vec![
                OpenAiMessage {
                    role: "system".to_string(),
                    content: Some("be nice".to_string()),
                    tool_calls: vec![],
                    tool_call_id: None,
                },
                OpenAiMessage {
                    role: "user".to_string(),
                    content: Some("hello".to_string()),
                    tool_calls: vec![],
                    tool_call_id: None,
                },
            ],
            stream: true,
            tools: vec![],
            max_tokens: None,
            other: Default::default(),
        };

        let upstream = openai_to_upstream(&request);
        assert_eq!(upstream.system.as_deref(), Some("be nice"));
        assert_eq!(upstream.messages.len(), 1);
    }

    #[test]
    fn estimate_input_tokens_is_positive_for_nonempty_request() {
        let request = UpstreamRequest {
            model: "m".to_string(),
            system: Some("system prompt".to_string()),
            messages: vec![UpstreamMessage {
                role: "user".to_string(),
                content: vec![ContentPart::Text("hello there".to_string())],
            }],
            tools: vec![],
            max_tokens: None,
        };

        assert!(estimate_input_tokens(&request) > 0);
    }

    #[test]
    fn count_tokens_request_omits_max_tokens_and_stream() {
        let request = CountTokensRequest {
            model: "upstream-model".to_string(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: AnthropicContent::Text("hello".to_string()),
            }],
            system: None,
            tools: vec![],
            other: Default::default(),
        };

        let upstream = count_tokens_to_upstream(&request);
        assert!(upstream.max_tokens.is_none());
        assert!(estimate_input_tokens(&upstream) > 0);
    }
}
