//! Tool Registry & Executor (C4): a handler takes JSON arguments and returns a JSON-encodable
//! result or a descriptive error, and the registry assembles the tool list and dispatches calls
//! in order, never propagating exceptions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::dispatcher::StreamDispatcher;
use crate::mcp::MCPClient;
use crate::message::{Message, ToolCall, ToolDefinition, ToolResult};

/// A built-in tool handler. Implementations must not panic or propagate errors past their own
/// boundary — `call` returns `Err` for legitimate failures, which the registry turns into a
/// `{error: ...}` tool result rather than aborting the dispatch loop.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Value) -> Result<Value, String>;
}

/// Per-request side channel for artifacts too bulky to round-trip through the model context,
/// such as `generateImage` output. Keyed per request, never global.
#[derive(Default, Clone)]
pub struct SideChannel {
    inner: Arc<std::sync::Mutex<Option<String>>>,
}

impl SideChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_image(&self, data_uri: String) {
        *self.inner.lock().unwrap() = Some(data_uri);
    }

    pub fn take_image(&self) -> Option<String> {
        self.inner.lock().unwrap().take()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolsConfig {
    pub search: bool,
    pub advanced: bool,
    pub mcp: bool,
    pub image_generation: bool,
}

pub struct ToolRegistry {
    builtin: HashMap<String, Arc<dyn ToolHandler>>,
    mcp_client: Option<Arc<MCPClient>>,
}

impl ToolRegistry {
    pub fn new(builtin: Vec<Arc<dyn ToolHandler>>, mcp_client: Option<Arc<MCPClient>>) -> Self {
        let mut map = HashMap::new();
        for handler in builtin {
            map.insert(handler.definition().name.clone(), handler);
        }
        Self { builtin: map, mcp_client }
    }

    /// Assembles the tool list visible to the model for this request: built-ins gated by
    /// `config`, unioned with MCP tools when enabled and a client is wired in.
    pub async fn tool_definitions(&self, config: &ToolsConfig) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .builtin
            .values()
            .filter(|h| {
                let name = h.definition().name;
                if name == "generateImage" {
                    return config.image_generation;
                }
                if name == "searchDuckDuckGo" {
                    return config.search;
                }
                if ADVANCED_TOOL_NAMES.contains(&name.as_str()) {
                    return config.advanced;
                }
                true
            })
            .map(|h| h.definition())
            .collect();

        if config.mcp {
            if let Some(client) = &self.mcp_client {
                defs.extend(client.namespaced_tool_definitions().await);
            }
        }
        defs
    }

    /// Executes every call in order, producing one [`ToolResult`] per call. Never propagates a
    /// handler error — it is folded into the result content.
    pub async fn dispatch(&self, calls: &[ToolCall], side_channel: &SideChannel) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let content = self.dispatch_one(call, side_channel).await;
            results.push(ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                content,
            });
        }
        results
    }

    async fn dispatch_one(&self, call: &ToolCall, side_channel: &SideChannel) -> String {
        let arguments = call.arguments_value();

        if call.name == "generateImage" {
            return self.dispatch_generate_image(arguments, side_channel).await;
        }

        if let Some(rest) = call.name.strip_prefix("mcp_") {
            return self.dispatch_mcp(rest, arguments).await;
        }

        match self.builtin.get(&call.name) {
            None => json_error(format!("unknown tool '{}'", call.name)),
            Some(handler) => match handler.call(arguments).await {
                Ok(value) => json_success(value),
                Err(message) => json_error(message),
            },
        }
    }

    async fn dispatch_generate_image(&self, arguments: Value, side_channel: &SideChannel) -> String {
        match self.builtin.get("generateImage") {
            None => json_error("generateImage tool is not registered".to_string()),
            Some(handler) => match handler.call(arguments).await {
                Ok(value) => {
                    if let Some(data_uri) = value.get("data_uri").and_then(|v| v.as_str()) {
                        side_channel.set_image(data_uri.to_string());
                    }
                    json_success(serde_json::json!({ "success": true }))
                }
                Err(message) => json_error(message),
            },
        }
    }

    /// Restores the `server:tool` key from the `mcp_<server>_<tool>` namespaced form by
    /// splitting at the first `_` only.
    async fn dispatch_mcp(&self, namespaced: &str, arguments: Value) -> String {
        let Some(client) = &self.mcp_client else {
            return json_error("MCP is not enabled for this request".to_string());
        };
        let Some((server, tool)) = namespaced.split_once('_') else {
            return json_error(format!("malformed MCP tool name 'mcp_{}'", namespaced));
        };
        let key = format!("{}:{}", server, tool);
        match client.call_tool(&key, arguments).await {
            Ok(value) => value.to_string(),
            Err(e) => json_error(e.to_string()),
        }
    }
}

/// Names of the closed advanced-tool set, most implemented as a call back into the dispatcher
/// itself (LLM-backed utility tools) — one-shot completions rather than third-party integrations.
const ADVANCED_TOOL_NAMES: &[&str] = &[
    "fetchWebpage",
    "analyzeText",
    "convertContentFormat",
    "summarizeText",
    "translateText",
    "generateStructuredData",
    "answerFromData",
    "memorySave",
    "memoryRetrieve",
    "datePlan",
    "integrateInformation",
    "generateCode",
    "evaluateAgentPerformance",
];

fn json_success(value: Value) -> String {
    let mut obj = serde_json::Map::new();
    obj.insert("success".to_string(), Value::Bool(true));
    if let Value::Object(map) = value {
        for (k, v) in map {
            obj.insert(k, v);
        }
    } else {
        obj.insert("result".to_string(), value);
    }
    Value::Object(obj).to_string()
}

fn json_error(message: String) -> String {
    serde_json::json!({ "success": false, "error": message }).to_string()
}

/// A one-shot-completion-backed advanced tool: builds a single prompt from its arguments, sends
/// it through the dispatcher with no tools attached, and returns the folded text as the result.
/// Tools like `summarizeText`/`translateText` are not external API integrations — they are the
/// model talking to itself with a narrow instruction.
pub struct LlmBackedTool {
    name: String,
    description: String,
    parameters: Value,
    model: String,
    prompt_template: fn(&Value) -> Result<String, String>,
    dispatcher: Arc<StreamDispatcher>,
}

impl LlmBackedTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        model: impl Into<String>,
        prompt_template: fn(&Value) -> Result<String, String>,
        dispatcher: Arc<StreamDispatcher>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            model: model.into(),
            prompt_template,
            dispatcher,
        }
    }
}

#[async_trait]
impl ToolHandler for LlmBackedTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, String> {
        let prompt = (self.prompt_template)(&arguments)?;
        let messages = vec![Message::user(prompt)];
        let response = self
            .dispatcher
            .complete(&messages, &self.model, None)
            .await
            .map_err(|e| e.to_string())?;
        Ok(serde_json::json!({ "text": response.message.content.flatten_to_text() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "echoes its input".to_string(),
                parameters: serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            }
        }

        async fn call(&self, arguments: Value) -> Result<Value, String> {
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "missing required field 'text'".to_string())?;
            Ok(serde_json::json!({ "echoed": text }))
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(vec![Arc::new(EchoTool)], None)
    }

    #[tokio::test]
    async fn dispatch_routes_builtin_tool_and_wraps_success() {
        let registry = registry();
        let side_channel = SideChannel::new();
        let call = ToolCall {
            id: "call_1".into(),
            index: Some(0),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hi"}),
        };
        let results = registry.dispatch(&[call], &side_channel).await;
        assert_eq!(results.len(), 1);
        let parsed: Value = serde_json::from_str(&results[0].content).unwrap();
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["echoed"], "hi");
    }

    #[tokio::test]
    async fn dispatch_yields_error_result_instead_of_propagating_missing_argument() {
        let registry = registry();
        let side_channel = SideChannel::new();
        let call = ToolCall {
            id: "call_1".into(),
            index: Some(0),
            name: "echo".into(),
            arguments: serde_json::json!({}),
        };
        let results = registry.dispatch(&[call], &side_channel).await;
        let parsed: Value = serde_json::from_str(&results[0].content).unwrap();
        assert_eq!(parsed["success"], false);
        assert!(parsed["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_an_error_result_not_a_panic() {
        let registry = registry();
        let side_channel = SideChannel::new();
        let call = ToolCall {
            id: "call_1".into(),
            index: Some(0),
            name: "doesNotExist".into(),
            arguments: serde_json::json!({}),
        };
        let results = registry.dispatch(&[call], &side_channel).await;
        let parsed: Value = serde_json::from_str(&results[0].content).unwrap();
        assert_eq!(parsed["success"], false);
    }

    #[tokio::test]
    async fn mcp_disabled_dispatch_yields_error_result() {
        let registry = registry();
        let side_channel = SideChannel::new();
        let call = ToolCall {
            id: "call_1".into(),
            index: Some(0),
            name: "mcp_filesystem_read_file".into(),
            arguments: serde_json::json!({"path": "README.md"}),
        };
        let results = registry.dispatch(&[call], &side_channel).await;
        let parsed: Value = serde_json::from_str(&results[0].content).unwrap();
        assert_eq!(parsed["success"], false);
    }
}
