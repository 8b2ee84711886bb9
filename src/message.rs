//! Canonical message, tool and stream-chunk shapes shared by every provider adapter.
//!
//! Every adapter in [`crate::providers`] translates these canonical types into its own wire
//! format on the way out, and normalizes its wire responses back into [`StreamChunk`] on the way
//! in. No adapter-specific type leaks past the adapter boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A role a [`Message`] can be authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

/// One part of a multipart message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    Audio { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A message body: either plain text or an ordered list of multimodal parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    pub fn as_text(text: impl Into<String>) -> Self {
        Content::Text(text.into())
    }

    /// Join all text parts and drop binary parts, for providers that cannot accept multimodal
    /// input. Grounded in the original source's Gemini adapter text-joining fallback.
    pub fn flatten_to_text(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(t) => t.trim().is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }
}

/// A function/tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub index: Option<usize>,
    pub name: String,
    /// Arguments as received from the provider: either a JSON object or a JSON-encoded string.
    /// Callers that need a parsed object should go through [`ToolCall::arguments_value`].
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Parses `arguments` into a JSON object regardless of whether the provider sent it as an
    /// object already or as a JSON-encoded string (OpenAI-style providers do the latter).
    pub fn arguments_value(&self) -> serde_json::Value {
        match &self.arguments {
            serde_json::Value::String(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({}))
            }
            other => other.clone(),
        }
    }
}

/// A tool definition exposed to the model. Names are globally unique within a request; MCP tools
/// are namespaced `mcp_<server>_<tool>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The result of executing a single tool call. `content` is always a JSON-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
}

/// A canonical chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Content::as_text(text),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::as_text(text),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::as_text(text),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::as_text(text),
            tool_calls,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: Content::as_text(result.content.clone()),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.tool_call_id.clone()),
            name: Some(result.name.clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("tool-role message at index {0} has no tool_call_id matching a prior tool_calls entry")]
    MissingToolCallId(usize),
}

/// Rejects a message list where a `tool`-role message does not carry a `tool_call_id` matching a
/// prior `tool_calls` entry.
pub fn validate_tool_role(messages: &[Message]) -> Result<(), MessageError> {
    let mut pending_ids: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for (idx, msg) in messages.iter().enumerate() {
        match msg.role {
            Role::Assistant => {
                pending_ids.extend(msg.tool_calls.iter().map(|tc| tc.id.as_str()));
            }
            Role::Tool => {
                let id = msg.tool_call_id.as_deref();
                match id {
                    Some(id) if pending_ids.contains(id) => {
                        pending_ids.remove(id);
                    }
                    _ => return Err(MessageError::MissingToolCallId(idx)),
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// One `finish_reason` a terminal [`StreamChunk`] choice can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

/// A tool-call delta fragment. `index` lets the aggregator in [`crate::dispatcher`] merge
/// fragments that arrive split across multiple chunks by position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments_fragment: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The canonical, OpenAI-compatible incremental chunk every [`crate::providers::ProviderAdapter`]
/// emits, regardless of the wire format it actually speaks to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    pub fn content_delta(model: &str, id: &str, created: i64, content: impl Into<String>) -> Self {
        StreamChunk {
            id: id.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    content: Some(content.into()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    pub fn finish(model: &str, id: &str, created: i64, reason: FinishReason, usage: Option<TokenUsage>) -> Self {
        StreamChunk {
            id: id.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta::default(),
                finish_reason: Some(reason),
            }],
            usage,
        }
    }
}

/// A full, folded chat response (the non-streaming shape `complete()` returns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub message: Message,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_role_without_matching_call_is_rejected() {
        let messages = vec![
            Message::user("hi"),
            Message {
                role: Role::Tool,
                content: Content::as_text("result"),
                tool_calls: Vec::new(),
                tool_call_id: Some("call_1".into()),
                name: Some("foo".into()),
            },
        ];
        assert!(validate_tool_role(&messages).is_err());
    }

    #[test]
    fn tool_role_with_matching_call_is_accepted() {
        let tool_call = ToolCall {
            id: "call_1".into(),
            index: Some(0),
            name: "foo".into(),
            arguments: serde_json::json!({}),
        };
        let messages = vec![
            Message::user("hi"),
            Message::assistant_with_tool_calls("", vec![tool_call]),
            Message {
                role: Role::Tool,
                content: Content::as_text("result"),
                tool_calls: Vec::new(),
                tool_call_id: Some("call_1".into()),
                name: Some("foo".into()),
            },
        ];
        assert!(validate_tool_role(&messages).is_ok());
    }

    #[test]
    fn flatten_to_text_drops_binary_parts() {
        let content = Content::Parts(vec![
            ContentPart::Text { text: "hello".into() },
            ContentPart::ImageUrl {
                image_url: ImageUrl { url: "data:image/png;base64,xx".into() },
            },
            ContentPart::Text { text: "world".into() },
        ]);
        assert_eq!(content.flatten_to_text(), "hello world");
    }
}
