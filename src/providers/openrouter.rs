//! OpenRouter adapter. Same SSE framing as GitHub, but two chunk-level rewrites happen after JSON
//! parsing and before the chunk reaches the caller: a reasoning-model's `delta.reasoning` is
//! promoted into `delta.content`, and a `delta.refusal` is rendered as `"[refusal] " + refusal`.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;
use serde_json::json;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::message::{Message, ToolDefinition};
use crate::providers::common::{split_sse_lines, to_openai_messages, to_openai_tools, wire_chunk_from_value};
use crate::providers::{ChunkStream, ModelQuirks, ProviderAdapter};

pub struct OpenRouterAdapter {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    quirks: ModelQuirks,
    timeout_secs: u64,
}

impl OpenRouterAdapter {
    pub fn new(config: &AppConfig) -> Self {
        let provider = config.provider("openrouter");
        Self {
            client: Client::new(),
            endpoint: provider
                .and_then(|p| p.endpoint.clone())
                .or_else(|| Some("https://openrouter.ai/api/v1".to_string())),
            api_key: provider.and_then(|p| p.api_key.clone()),
            quirks: ModelQuirks::from_config(config),
            timeout_secs: config.provider_timeout_secs,
        }
    }
}

/// Rewrites a raw (already-deserialized-as-`serde_json::Value`) chunk's first choice delta in
/// place per the reasoning/refusal passthrough rules, before it is reinterpreted as a
/// [`crate::message::StreamChunk`].
fn rewrite_delta(raw: &mut serde_json::Value) {
    if let Some(choices) = raw.get_mut("choices").and_then(|c| c.as_array_mut()) {
        for choice in choices {
            let Some(delta) = choice.get_mut("delta") else { continue };
            let reasoning = delta.get("reasoning").and_then(|r| r.as_str()).map(|s| s.to_string());
            let content_empty = delta
                .get("content")
                .map(|c| c.as_str().unwrap_or("").is_empty())
                .unwrap_or(true);
            if content_empty {
                if let Some(reasoning) = reasoning {
                    delta["content"] = json!(reasoning);
                }
            }
            if let Some(refusal) = delta.get("refusal").and_then(|r| r.as_str()).map(|s| s.to_string()) {
                delta["content"] = json!(format!("[refusal] {}", refusal));
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn tag(&self) -> &'static str {
        "openrouter"
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["openrouter/".to_string()]
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
            .ok_or_else(|| AppError::ProviderUnavailable("openrouter endpoint not configured".into()))?;
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::ProviderUnavailable("openrouter api key not configured".into()))?;

        let mut body = json!({
            "model": model,
            "messages": to_openai_messages(messages),
            "stream": true,
        });
        if let Some(tools) = tools {
            if !tools.is_empty() && self.supports_tools(model) {
                body["tools"] = to_openai_tools(tools);
                body["tool_choice"] = json!("auto");
            }
        }
        if let Some(params) = params {
            super::common::merge_params(&mut body, params);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", endpoint.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("HTTP-Referer", "https://agentrelay.local")
            .header("X-Title", "agentrelay")
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
            return Err(AppError::ProviderTransport(format!("openrouter returned {}: {}", status, text)));
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
                        let mut raw: serde_json::Value = match serde_json::from_str(&line) {
                            Ok(v) => v,
                            Err(e) => {
                                return Some((
                                    Err(AppError::ProviderProtocol(format!(
                                        "malformed openrouter chunk: {}",
                                        e
                                    ))),
                                    (bytes, buffer, pending, done),
                                ))
                            }
                        };
                        rewrite_delta(&mut raw);
                        let parsed = wire_chunk_from_value(raw);
                        return match parsed {
                            Ok(chunk) => Some((Ok(chunk), (bytes, buffer, pending, done))),
                            Err(e) => Some((
                                Err(AppError::ProviderProtocol(format!("malformed openrouter chunk: {}", e))),
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
                        None => done = true,
                    }
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_is_promoted_into_content_when_content_is_empty() {
        let mut raw = json!({
            "choices": [{"delta": {"content": "", "reasoning": "thinking about cats"}}]
        });
        rewrite_delta(&mut raw);
        assert_eq!(raw["choices"][0]["delta"]["content"], "thinking about cats");
    }

    #[test]
    fn reasoning_does_not_override_nonempty_content() {
        let mut raw = json!({
            "choices": [{"delta": {"content": "actual answer", "reasoning": "thinking"}}]
        });
        rewrite_delta(&mut raw);
        assert_eq!(raw["choices"][0]["delta"]["content"], "actual answer");
    }

    #[test]
    fn refusal_is_rewritten_with_a_prefix() {
        let mut raw = json!({
            "choices": [{"delta": {"refusal": "cannot help with that"}}]
        });
        rewrite_delta(&mut raw);
        assert_eq!(raw["choices"][0]["delta"]["content"], "[refusal] cannot help with that");
    }
}
