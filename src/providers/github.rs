//! GitHub / Azure Inference adapter. Wire format: OpenAI-compatible Chat Completions over SSE.
//! Tool-call deltas arrive with `name`/`arguments` nested under `function`, so chunks go through
//! [`parse_openai_wire_chunk`] to remap into the canonical flat shape.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;
use serde_json::json;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::message::{Message, ToolDefinition};
use crate::providers::common::{parse_openai_wire_chunk, split_sse_lines};
use crate::providers::{ChunkStream, ModelQuirks, ProviderAdapter};

use super::common::to_openai_messages;

pub struct GithubAdapter {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    quirks: ModelQuirks,
    timeout_secs: u64,
}

impl GithubAdapter {
    pub fn new(config: &AppConfig) -> Self {
        let provider = config.provider("github");
        Self {
            client: Client::new(),
            endpoint: provider.and_then(|p| p.endpoint.clone()),
            api_key: provider.and_then(|p| p.api_key.clone()),
            quirks: ModelQuirks::from_config(config),
            timeout_secs: config.provider_timeout_secs,
        }
    }
}

#[async_trait]
impl ProviderAdapter for GithubAdapter {
    fn tag(&self) -> &'static str {
        "github"
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["gpt-".to_string(), "openai/".to_string(), "Meta-Llama".to_string(), "Phi-".to_string()]
    }

    fn available(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
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
            .ok_or_else(|| AppError::ProviderUnavailable("github endpoint not configured".into()))?;
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::ProviderUnavailable("github api key not configured".into()))?;

        let mut body = json!({
            "model": model,
            "messages": to_openai_messages(messages),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if let Some(tools) = tools {
            if !tools.is_empty() && self.supports_tools(model) {
                body["tools"] = super::common::to_openai_tools(tools);
                body["tool_choice"] = json!("auto");
            }
        }
        if let Some(params) = params {
            super::common::merge_params(&mut body, params);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", endpoint.trim_end_matches('/')))
            .header("api-key", api_key)
            .header("Accept", "text/event-stream")
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(AppError::ProviderTransport(format!("429 rate limited: {}", text)));
            }
            return Err(AppError::ProviderTransport(format!("github returned {}: {}", status, text)));
        }

        let byte_stream = response.bytes_stream();
        let initial_state = (byte_stream, String::new(), std::collections::VecDeque::new(), false);
        let chunks = stream::unfold(
            initial_state,
            move |(mut bytes, mut buffer, mut pending, mut done)| async move {
                loop {
                    if let Some(line) = pending.pop_front() {
                        if line == "[DONE]" {
                            continue;
                        }
                        let parsed = parse_openai_wire_chunk(&line);
                        return match parsed {
                            Ok(chunk) => Some((Ok(chunk), (bytes, buffer, pending, done))),
                            Err(e) => Some((
                                Err(AppError::ProviderProtocol(format!("malformed github chunk: {}", e))),
                                (bytes, buffer, pending, done),
                            )),
                        };
                    }
                    if done {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(b)) => {
                            buffer.push_str(&String::from_utf8_lossy(&b));
                            pending.extend(split_sse_lines(&mut buffer));
                        }
                        Some(Err(e)) => {
                            return Some((Err(AppError::Http(e)), (bytes, buffer, pending, true)));
                        }
                        None => {
                            done = true;
                        }
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}
