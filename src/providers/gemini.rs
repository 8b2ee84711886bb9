//! Gemini adapter. Wire format: Google's Generative Language REST streaming endpoint
//! (`:streamGenerateContent?alt=sse`), not OpenAI-shaped SSE. Speaks to the provider over plain
//! `reqwest` like the other adapters, rather than pulling in a dedicated Gemini SDK crate.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;
use serde_json::json;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::message::{Content, ContentPart, FinishReason, Message, Role, ToolCallDelta, ToolDefinition};
use crate::providers::common::{format_stream_chunk, new_chunk_id, now_unix, split_sse_lines};
use crate::providers::{ChunkStream, ModelQuirks, ProviderAdapter};

const MODELS_WITHOUT_SYSTEM_INSTRUCTION: &[&str] = &["gemma"];

pub struct GeminiAdapter {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    quirks: ModelQuirks,
    timeout_secs: u64,
}

impl GeminiAdapter {
    pub fn new(config: &AppConfig) -> Self {
        let provider = config.provider("gemini");
        Self {
            client: Client::new(),
            endpoint: provider
                .and_then(|p| p.endpoint.clone())
                .or_else(|| Some("https://generativelanguage.googleapis.com/v1beta".to_string())),
            api_key: provider.and_then(|p| p.api_key.clone()),
            quirks: ModelQuirks::from_config(config),
            timeout_secs: config.provider_timeout_secs,
        }
    }

    fn supports_system_instruction(model: &str) -> bool {
        !MODELS_WITHOUT_SYSTEM_INSTRUCTION.iter().any(|m| model.contains(m))
    }

    /// Builds the `contents` array and, when the model supports it, a separate system
    /// instruction.
    fn build_contents(messages: &[Message], model: &str, allow_multimodal: bool) -> (Vec<serde_json::Value>, Option<serde_json::Value>) {
        let mut contents = Vec::new();
        let mut system_instruction = None;
        let mut pending_system_prefix = String::new();

        for message in messages {
            match message.role {
                Role::System => {
                    let text = message.content.flatten_to_text();
                    if Self::supports_system_instruction(model) {
                        system_instruction = Some(json!({ "parts": [{ "text": text }] }));
                    } else {
                        pending_system_prefix.push_str(&format!("[system instruction] {}\n\n", text));
                    }
                    continue;
                }
                Role::User | Role::Tool => {
                    let role = "user";
                    let mut parts = Self::content_parts(&message.content, allow_multimodal);
                    if !pending_system_prefix.is_empty() {
                        if let Some(first) = parts.first_mut() {
                            if let Some(text) = first.get_mut("text") {
                                *text = json!(format!("{}{}", pending_system_prefix, text.as_str().unwrap_or("")));
                            } else {
                                parts.insert(0, json!({ "text": pending_system_prefix.clone() }));
                            }
                        } else {
                            parts.push(json!({ "text": pending_system_prefix.clone() }));
                        }
                        pending_system_prefix.clear();
                    }
                    contents.push(json!({ "role": role, "parts": parts }));
                }
                Role::Assistant => {
                    let role = "model";
                    let mut parts = Self::content_parts(&message.content, allow_multimodal);
                    for call in &message.tool_calls {
                        parts.push(json!({
                            "functionCall": { "name": call.name, "args": call.arguments_value() }
                        }));
                    }
                    contents.push(json!({ "role": role, "parts": parts }));
                }
            }
        }
        (contents, system_instruction)
    }

    fn content_parts(content: &Content, allow_multimodal: bool) -> Vec<serde_json::Value> {
        match content {
            Content::Text(t) => {
                if t.is_empty() {
                    Vec::new()
                } else {
                    vec![json!({ "text": t })]
                }
            }
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(json!({ "text": text })),
                    ContentPart::ImageUrl { image_url } if allow_multimodal => {
                        Self::decode_data_uri(&image_url.url)
                    }
                    _ => None,
                })
                .collect(),
        }
    }

    /// Decodes a `data:<mime>;base64,<data>` URI into an inline Gemini part. Returns `None` for
    /// http(s) URIs, which the REST API cannot ingest inline.
    fn decode_data_uri(uri: &str) -> Option<serde_json::Value> {
        let rest = uri.strip_prefix("data:")?;
        let (mime, data) = rest.split_once(";base64,")?;
        Some(json!({ "inlineData": { "mimeType": mime, "data": data } }))
    }

    fn build_tools(tools: &[ToolDefinition]) -> serde_json::Value {
        json!([{
            "functionDeclarations": tools.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })).collect::<Vec<_>>()
        }])
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn tag(&self) -> &'static str {
        "gemini"
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["gemini-".to_string(), "gemma".to_string()]
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
            .ok_or_else(|| AppError::ProviderUnavailable("gemini endpoint not configured".into()))?;
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::ProviderUnavailable("gemini api key not configured".into()))?;

        let allow_multimodal = self.quirks.supports_multimodal(model);
        let (contents, system_instruction) = Self::build_contents(messages, model, allow_multimodal);

        let mut body = json!({ "contents": contents });
        if let Some(system_instruction) = system_instruction {
            body["systemInstruction"] = system_instruction;
        }
        if let Some(tools) = tools {
            if !tools.is_empty() && self.supports_tools(model) {
                body["tools"] = Self::build_tools(tools);
            }
        }
        if let Some(params) = params {
            let mut generation_config = json!({});
            super::common::merge_params(&mut generation_config, params);
            body["generationConfig"] = generation_config;
        }

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            endpoint.trim_end_matches('/'),
            model,
            api_key
        );
        let response = self
            .client
            .post(url)
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
            return Err(AppError::ProviderTransport(format!("gemini returned {}: {}", status, text)));
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
                            return Some((Self::translate_event(&line, &model, &id), (bytes, buffer, pending, done)));
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
                }
            },
        );

        Ok(Box::pin(chunks))
    }
}

impl GeminiAdapter {
    fn translate_event(raw: &str, model: &str, id: &str) -> AppResult<crate::message::StreamChunk> {
        let parsed: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| AppError::ProviderProtocol(format!("malformed gemini event: {}", e)))?;

        let created = now_unix();
        let candidate = parsed
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .cloned()
            .unwrap_or(json!({}));

        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                text.push_str(t);
            }
            if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(|n| n.as_str()).unwrap_or_default().to_string();
                let args = call.get("args").cloned().unwrap_or(json!({}));
                tool_calls.push(ToolCallDelta {
                    index,
                    id: Some(format!("call_{}", uuid::Uuid::new_v4())),
                    name: Some(name),
                    arguments_fragment: args.to_string(),
                });
            }
        }

        let finish_signal = candidate.get("finishReason").and_then(|f| f.as_str());
        let finish_reason = if !tool_calls.is_empty() {
            Some(FinishReason::ToolCalls)
        } else {
            finish_signal.map(|_| FinishReason::Stop)
        };

        let content = if text.is_empty() { None } else { Some(text) };
        let tool_calls = if tool_calls.is_empty() { None } else { Some(tool_calls) };
        Ok(format_stream_chunk(id, created, model, content, tool_calls, finish_reason, None))
    }
}
