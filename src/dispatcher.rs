//! Stream Dispatcher (C3): picks an adapter by model name, forwards its chunks, and folds a
//! stream into a complete response for non-streaming callers. The fold algorithm (`complete`) is
//! the only place chunk-merging logic lives, so every caller — `/chat/completions`, the agent
//! executor's per-round calls — observes identical semantics.

use std::sync::Arc;

use futures_util::StreamExt;

use crate::error::{AppError, AppResult};
use crate::message::{ChatResponse, FinishReason, Message, StreamChunk, ToolCall, ToolDefinition};
use crate::providers::{ChunkStream, ProviderRegistry};

pub struct StreamDispatcher {
    registry: Arc<ProviderRegistry>,
}

impl StreamDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Streams canonical chunks for `model`, delegating wire-level work entirely to the selected
    /// adapter.
    pub async fn stream(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
    ) -> AppResult<ChunkStream> {
        self.stream_with_params(messages, model, tools, None).await
    }

    pub async fn stream_with_params(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
        params: Option<&serde_json::Value>,
    ) -> AppResult<ChunkStream> {
        let adapter = self
            .registry
            .select(model)
            .ok_or_else(|| AppError::ProviderUnavailable(format!("no adapter registered for model '{}'", model)))?;
        if !adapter.available() {
            return Err(AppError::ProviderUnavailable(format!(
                "adapter '{}' for model '{}' is not configured",
                adapter.tag(),
                model
            )));
        }
        adapter.stream(messages, model, tools, params).await
    }

    /// Consumes the chunk stream and folds it into a single [`ChatResponse`]: concatenate
    /// `delta.content`, merge `delta.tool_calls` by index, take `finish_reason` from the terminal
    /// chunk, keep the last `usage` seen. A mid-stream failure yields a response with whatever
    /// partial content had already accumulated and `finish_reason := Error`.
    pub async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
    ) -> AppResult<ChatResponse> {
        let mut stream = self.stream(messages, model, tools).await?;
        Self::fold(&mut stream, model).await
    }

    pub async fn fold(stream: &mut ChunkStream, model: &str) -> AppResult<ChatResponse> {
        let mut content = String::new();
        let mut tool_calls: Vec<(usize, String, String, String)> = Vec::new();
        let mut finish_reason: Option<FinishReason> = None;
        let mut usage = None;
        let mut id = String::new();
        let mut created = 0i64;
        let mut had_error = false;

        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(c) => c,
                Err(_) => {
                    had_error = true;
                    break;
                }
            };
            id = chunk.id.clone();
            created = chunk.created;
            for choice in &chunk.choices {
                if let Some(text) = &choice.delta.content {
                    content.push_str(text);
                }
                if let Some(deltas) = &choice.delta.tool_calls {
                    for delta in deltas {
                        let entry = match tool_calls.iter_mut().find(|(idx, ..)| *idx == delta.index) {
                            Some(e) => e,
                            None => {
                                tool_calls.push((delta.index, String::new(), String::new(), String::new()));
                                tool_calls.last_mut().unwrap()
                            }
                        };
                        if let Some(call_id) = &delta.id {
                            entry.1 = call_id.clone();
                        }
                        if let Some(name) = &delta.name {
                            entry.2 = name.clone();
                        }
                        entry.3.push_str(&delta.arguments_fragment);
                    }
                }
                if choice.finish_reason.is_some() {
                    finish_reason = choice.finish_reason;
                }
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
        }

        if had_error {
            finish_reason = Some(FinishReason::Error);
        }

        tool_calls.sort_by_key(|(idx, ..)| *idx);
        let message_tool_calls: Vec<ToolCall> = tool_calls
            .into_iter()
            .map(|(index, call_id, name, arguments)| ToolCall {
                id: if call_id.is_empty() { format!("call_{}", index) } else { call_id },
                index: Some(index),
                name,
                arguments: serde_json::Value::String(arguments),
            })
            .collect();

        let message = if message_tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tool_calls(content, message_tool_calls)
        };

        Ok(ChatResponse {
            id: if id.is_empty() { format!("chatcmpl-{}", uuid::Uuid::new_v4()) } else { id },
            created,
            model: model.to_string(),
            message,
            finish_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChunkChoice, Delta, ToolCallDelta};
    use futures_util::stream;

    fn chunk(content: Option<&str>, tool_calls: Option<Vec<ToolCallDelta>>, finish: Option<FinishReason>) -> AppResult<StreamChunk> {
        Ok(StreamChunk {
            id: "chatcmpl-test".into(),
            created: 1,
            model: "test-model".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta { content: content.map(|s| s.to_string()), tool_calls },
                finish_reason: finish,
            }],
            usage: None,
        })
    }

    #[tokio::test]
    async fn fold_concatenates_content_and_takes_terminal_finish_reason() {
        let mut s: ChunkStream = Box::pin(stream::iter(vec![
            chunk(Some("Hel"), None, None),
            chunk(Some("lo"), None, Some(FinishReason::Stop)),
        ]));
        let response = StreamDispatcher::fold(&mut s, "test-model").await.unwrap();
        assert_eq!(response.message.content.flatten_to_text(), "Hello");
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn fold_merges_tool_call_fragments_by_index() {
        let mut s: ChunkStream = Box::pin(stream::iter(vec![
            chunk(
                None,
                Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some("call_1".into()),
                    name: Some("searchDuckDuckGo".into()),
                    arguments_fragment: "{\"q\":".into(),
                }]),
                None,
            ),
            chunk(
                None,
                Some(vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    name: None,
                    arguments_fragment: "\"cats\"}".into(),
                }]),
                Some(FinishReason::ToolCalls),
            ),
        ]));
        let response = StreamDispatcher::fold(&mut s, "test-model").await.unwrap();
        assert_eq!(response.message.tool_calls.len(), 1);
        let call = &response.message.tool_calls[0];
        assert_eq!(call.name, "searchDuckDuckGo");
        assert_eq!(call.arguments, serde_json::Value::String("{\"q\":\"cats\"}".into()));
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn fold_surfaces_mid_stream_error_as_error_finish_reason_with_partial_content() {
        let mut s: ChunkStream = Box::pin(stream::iter(vec![
            chunk(Some("partial"), None, None),
            Err(AppError::ProviderTransport("boom".into())),
        ]));
        let response = StreamDispatcher::fold(&mut s, "test-model").await.unwrap();
        assert_eq!(response.message.content.flatten_to_text(), "partial");
        assert_eq!(response.finish_reason, Some(FinishReason::Error));
    }
}
