//! Ollama adapter. Wire format is JSON-Lines, not SSE — one JSON object per line on
//! `POST {endpoint}/api/chat`, terminated by a line with `done: true` carrying token counts.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::message::{FinishReason, Message, TokenUsage, ToolCallDelta, ToolDefinition};
use crate::providers::common::{format_stream_chunk, new_chunk_id, now_unix, to_openai_messages, to_openai_tools};
use crate::providers::{ChunkStream, ModelQuirks, ProviderAdapter};

#[derive(Debug, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Deserialize, Default)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Deserialize)]
struct OllamaLine {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

pub struct OllamaAdapter {
    client: Client,
    endpoint: Option<String>,
    quirks: ModelQuirks,
    timeout_secs: u64,
}

impl OllamaAdapter {
    pub fn new(config: &AppConfig) -> Self {
        let provider = config.provider("ollama");
        Self {
            client: Client::new(),
            endpoint: provider
                .and_then(|p| p.endpoint.clone())
                .or_else(|| Some("http://localhost:11434".to_string())),
            quirks: ModelQuirks::from_config(config),
            timeout_secs: config.provider_timeout_secs,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn tag(&self) -> &'static str {
        "ollama"
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["ollama/".to_string(), "llama3".to_string(), "mistral".to_string(), "qwen".to_string()]
    }

    fn available(&self) -> bool {
        self.endpoint.is_some()
    }

    fn supports_tools(&self, model: &str) -> bool {
        self.quirks.supports_tools(model)
    }

    async fn stream(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
        params: Option<&serde_json::Value>,
    ) -> AppResult<ChunkStream> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| AppError::ProviderUnavailable("ollama endpoint not configured".into()))?;

        let mut body = json!({
            "model": model,
            "messages": to_openai_messages(messages),
            "stream": true,
        });
        if let Some(tools) = tools {
            if !tools.is_empty() && self.supports_tools(model) {
                body["tools"] = to_openai_tools(tools);
            }
        }
        if let Some(params) = params {
            super::common::merge_params(&mut body, params);
        }

        let response = self
            .client
            .post(format!("{}/api/chat", endpoint.trim_end_matches('/')))
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderTransport(format!("ollama returned {}: {}", status, text)));
        }

        let model = model.to_string();
        let id = new_chunk_id();
        let byte_stream = response.bytes_stream();
        let initial_state = (byte_stream, String::new(), std::collections::VecDeque::new(), false);
        let chunks = stream::unfold(
            initial_state,
            move |(mut bytes, mut buffer, mut pending, mut done)| {
                let model = model.clone();
                let id = id.clone();
                async move {
                    loop {
                        if let Some(line) = pending.pop_front() {
                            return Some((
                                Self::translate_line(&line, &model, &id),
                                (bytes, buffer, pending, done),
                            ));
                        }
                        if done {
                            return None;
                        }
                        match bytes.next().await {
                            Some(Ok(b)) => {
                                buffer.push_str(&String::from_utf8_lossy(&b));
                                while let Some(pos) = buffer.find('\n') {
                                    let line = buffer[..pos].trim().to_string();
                                    buffer.drain(..=pos);
                                    if !line.is_empty() {
                                        pending.push_back(line);
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                return Some((Err(AppError::Http(e)), (bytes, buffer, pending, true)));
                            }
                            None => done = true,
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}

impl OllamaAdapter {
    fn translate_line(line: &str, model: &str, id: &str) -> AppResult<crate::message::StreamChunk> {
        let parsed: OllamaLine = serde_json::from_str(line)
            .map_err(|e| AppError::ProviderProtocol(format!("malformed ollama line: {}", e)))?;

        let created = now_unix();
        let message = parsed.message.unwrap_or_default();

        if parsed.done {
            let has_tool_calls = !message.tool_calls.is_empty();
            let usage = TokenUsage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
                total_tokens: parsed.prompt_eval_count + parsed.eval_count,
            };
            let finish_reason = if has_tool_calls { FinishReason::ToolCalls } else { FinishReason::Stop };
            let content = if message.content.is_empty() { None } else { Some(message.content) };
            let tool_calls = Self::translate_tool_calls(&message.tool_calls);
            let mut chunk = format_stream_chunk(id, created, model, content, tool_calls, Some(finish_reason), Some(usage));
            chunk.choices[0].finish_reason = Some(finish_reason);
            return Ok(chunk);
        }

        let content = if message.content.is_empty() { None } else { Some(message.content) };
        let tool_calls = Self::translate_tool_calls(&message.tool_calls);
        Ok(format_stream_chunk(id, created, model, content, tool_calls, None, None))
    }

    fn translate_tool_calls(calls: &[OllamaToolCall]) -> Option<Vec<ToolCallDelta>> {
        if calls.is_empty() {
            return None;
        }
        Some(
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index,
                    id: Some(format!("call_{}", uuid::Uuid::new_v4())),
                    name: Some(call.function.name.clone()),
                    arguments_fragment: call.function.arguments.to_string(),
                })
                .collect(),
        )
    }
}
