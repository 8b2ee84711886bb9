//! Helpers shared across adapters: the canonical-chunk builder, the boxed-stream alias
//! (`Pin<Box<dyn Stream<...> + Send>>`), and SSE line parsing.

use std::pin::Pin;

use futures_util::Stream;

use crate::error::AppResult;
use crate::message::{ChunkChoice, Delta, FinishReason, StreamChunk, TokenUsage, ToolCallDelta};

pub type ChunkStream = Pin<Box<dyn Stream<Item = AppResult<StreamChunk>> + Send>>;

/// Builds one canonical chunk. Every adapter funnels its normalized content/tool-call/finish data
/// through this single constructor so the shape emitted is identical regardless of wire origin.
pub fn format_stream_chunk(
    id: &str,
    created: i64,
    model: &str,
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
    finish_reason: Option<FinishReason>,
    usage: Option<TokenUsage>,
) -> StreamChunk {
    StreamChunk {
        id: id.to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta { content, tool_calls },
            finish_reason,
        }],
        usage,
    }
}

/// Splits a raw SSE byte buffer into complete `data: ...` payload lines, returning the leftover
/// partial buffer so the caller can keep accumulating across network reads. A line equal to
/// `[DONE]` is dropped by the caller, not here, since the sentinel's meaning is adapter-specific
/// in name only (every OpenAI-shaped adapter uses the same literal).
pub fn split_sse_lines(buffer: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line = buffer[..pos].trim_end_matches('\r').to_string();
        *buffer = buffer[pos + 1..].to_string();
        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            let data = data.trim();
            if !data.is_empty() {
                out.push(data.to_string());
            }
        }
    }
    out
}

/// Renders canonical messages into OpenAI Chat Completions shape, shared by every
/// OpenAI-wire-compatible adapter (GitHub, OpenRouter, NVIDIA NIM).
pub fn to_openai_messages(messages: &[crate::message::Message]) -> serde_json::Value {
    use crate::message::{Content, Role};
    let rendered: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut obj = serde_json::json!({ "role": role });
            match &m.content {
                Content::Text(t) => obj["content"] = serde_json::json!(t),
                Content::Parts(parts) => {
                    let rendered_parts: Vec<serde_json::Value> = parts
                        .iter()
                        .map(|p| match p {
                            crate::message::ContentPart::Text { text } => {
                                serde_json::json!({"type": "text", "text": text})
                            }
                            crate::message::ContentPart::ImageUrl { image_url } => {
                                serde_json::json!({"type": "image_url", "image_url": {"url": image_url.url}})
                            }
                            crate::message::ContentPart::Audio { url } => {
                                serde_json::json!({"type": "audio", "audio_url": {"url": url}})
                            }
                        })
                        .collect();
                    obj["content"] = serde_json::json!(rendered_parts);
                }
            }
            if !m.tool_calls.is_empty() {
                obj["tool_calls"] = serde_json::json!(m
                    .tool_calls
                    .iter()
                    .map(|tc| serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {"name": tc.name, "arguments": tc.arguments},
                    }))
                    .collect::<Vec<_>>());
            }
            if let Some(id) = &m.tool_call_id {
                obj["tool_call_id"] = serde_json::json!(id);
            }
            if let Some(name) = &m.name {
                obj["name"] = serde_json::json!(name);
            }
            obj
        })
        .collect();
    serde_json::json!(rendered)
}

/// Wire shape of one OpenAI/Azure-compatible streaming tool-call delta: the name and argument
/// fragment are nested under `function`, unlike the canonical flat [`ToolCallDelta`].
#[derive(Debug, serde::Deserialize)]
struct WireToolCallFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct WireToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireToolCallFunction>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, serde::Deserialize)]
struct WireChoice {
    index: usize,
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<FinishReason>,
}

#[derive(Debug, serde::Deserialize)]
struct WireChunk {
    id: String,
    created: i64,
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

fn wire_chunk_into_canonical(wire: WireChunk) -> StreamChunk {
    StreamChunk {
        id: wire.id,
        created: wire.created,
        model: wire.model,
        choices: wire
            .choices
            .into_iter()
            .map(|choice| ChunkChoice {
                index: choice.index,
                delta: Delta {
                    content: choice.delta.content,
                    tool_calls: choice.delta.tool_calls.map(|calls| {
                        calls
                            .into_iter()
                            .map(|call| ToolCallDelta {
                                index: call.index,
                                id: call.id,
                                name: call.function.as_ref().and_then(|f| f.name.clone()),
                                arguments_fragment: call
                                    .function
                                    .and_then(|f| f.arguments)
                                    .unwrap_or_default(),
                            })
                            .collect()
                    }),
                },
                finish_reason: choice.finish_reason,
            })
            .collect(),
        usage: wire.usage,
    }
}

/// Parses one OpenAI/Azure-compatible streaming chunk line, remapping the wire's nested
/// `function.name`/`function.arguments` tool-call shape into the canonical flat
/// [`ToolCallDelta`]. Every adapter that speaks OpenAI's wire SSE framing directly (GitHub/Azure,
/// NVIDIA NIM) must go through this rather than deserializing straight into [`StreamChunk`],
/// whose tool-call shape is canonical-flat, not wire-nested.
pub fn parse_openai_wire_chunk(line: &str) -> Result<StreamChunk, serde_json::Error> {
    let wire: WireChunk = serde_json::from_str(line)?;
    Ok(wire_chunk_into_canonical(wire))
}

/// Same remapping as [`parse_openai_wire_chunk`], starting from an already-parsed
/// [`serde_json::Value`] — used by adapters (OpenRouter) that rewrite fields on the raw value
/// before the wire-to-canonical conversion.
pub fn wire_chunk_from_value(raw: serde_json::Value) -> Result<StreamChunk, serde_json::Error> {
    let wire: WireChunk = serde_json::from_value(raw)?;
    Ok(wire_chunk_into_canonical(wire))
}

/// Renders tool definitions into OpenAI `{type:"function", function:{...}}` shape.
pub fn to_openai_tools(tools: &[crate::message::ToolDefinition]) -> serde_json::Value {
    serde_json::json!(tools
        .iter()
        .map(|t| serde_json::json!({
            "type": "function",
            "function": {
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            },
        }))
        .collect::<Vec<_>>())
}

/// Shallow-merges a caller-supplied sampling-params object into a request body, letting callers
/// override defaults like `temperature`/`top_p`/`max_tokens` without the adapter needing to know
/// every field name.
pub fn merge_params(body: &mut serde_json::Value, params: &serde_json::Value) {
    if let (Some(body_obj), Some(params_obj)) = (body.as_object_mut(), params.as_object()) {
        for (k, v) in params_obj {
            body_obj.insert(k.clone(), v.clone());
        }
    }
}

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn new_chunk_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sse_lines_extracts_data_payloads_and_keeps_partial_tail() {
        let mut buf = "data: {\"a\":1}\n\ndata: [DONE]\npartial".to_string();
        let lines = split_sse_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
        assert_eq!(buf, "partial");
    }

    #[test]
    fn parse_openai_wire_chunk_unnests_function_name_and_arguments() {
        let line = r#"{"id":"chatcmpl-1","created":1,"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"searchDuckDuckGo","arguments":"{\"query\":\"cats\"}"}}]},"finish_reason":"tool_calls"}]}"#;
        let chunk = parse_openai_wire_chunk(line).unwrap();
        let deltas = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].id.as_deref(), Some("call_1"));
        assert_eq!(deltas[0].name.as_deref(), Some("searchDuckDuckGo"));
        assert_eq!(deltas[0].arguments_fragment, "{\"query\":\"cats\"}");
    }

    #[test]
    fn parse_openai_wire_chunk_keeps_plain_content_deltas_intact() {
        let line = r#"{"id":"chatcmpl-1","created":1,"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"content":"hi"},"finish_reason":null}]}"#;
        let chunk = parse_openai_wire_chunk(line).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hi"));
        assert!(chunk.choices[0].delta.tool_calls.is_none());
    }
}
