//! MCP Client (C5): owns the session table, runs capability discovery, and dispatches
//! `tools/call`/`resources/read`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::mcp::config::{MCPServerSpec, McpConfigFile};
use crate::mcp::process::McpProcess;
use crate::mcp::protocol::{
    CallToolResult, MCPResource, MCPTool, ResourcesListResult, RpcRequest, ToolsListResult, METHOD_NOT_FOUND,
    PROBE_METHODS,
};
use crate::message::ToolDefinition;

/// Per-connected-server session state: process handle, transport state, and the discovery cache.
pub struct MCPSession {
    pub spec: MCPServerSpec,
    process: McpProcess,
    pub connected: AtomicBool,
    pub created_at: DateTime<Utc>,
    supported_methods: RwLock<Option<HashSet<String>>>,
    tools: RwLock<Vec<MCPTool>>,
    resources: RwLock<Vec<MCPResource>>,
}

impl MCPSession {
    fn timeout_secs(&self) -> u64 {
        self.spec.timeout
    }

    async fn request(&self, method: &str, params: Option<Value>) -> AppResult<Value> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AppError::MCPTransportBroken(format!("session '{}' is disconnected", self.spec.name)));
        }
        let request = RpcRequest::new(method, params);
        let response = match self.process.send_request(&request, self.timeout_secs()).await {
            Ok(r) => r,
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        if let Some(error) = response.error {
            if error.code == METHOD_NOT_FOUND {
                self.mark_unsupported(method).await;
                return Err(AppError::MCPMethodUnsupported(format!("{}: {}", method, error.message)));
            }
            return Err(AppError::MCPRpcError { code: error.code, message: error.message });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn mark_unsupported(&self, method: &str) {
        let mut guard = self.supported_methods.write().await;
        if let Some(set) = guard.as_mut() {
            set.remove(method);
        }
    }

    async fn mark_supported(&self, method: &str) {
        let mut guard = self.supported_methods.write().await;
        match guard.as_mut() {
            Some(set) => {
                set.insert(method.to_string());
            }
            None => {
                let mut set = HashSet::new();
                set.insert(method.to_string());
                *guard = Some(set);
            }
        }
    }

    async fn supports(&self, method: &str) -> bool {
        self.supported_methods
            .read()
            .await
            .as_ref()
            .map(|set| set.contains(method))
            .unwrap_or(false)
    }

    /// Capability discovery: try `system/methods` first; fall back to probing each well-known
    /// method individually when the server does not implement discovery itself.
    async fn discover(&self) {
        match self.request("system/methods", None).await {
            Ok(value) => {
                if let Some(methods) = value.as_array() {
                    let set: HashSet<String> = methods
                        .iter()
                        .filter_map(|m| m.as_str().map(|s| s.to_string()))
                        .collect();
                    *self.supported_methods.write().await = Some(set);
                    return;
                }
            }
            Err(_) => {}
        }

        for method in PROBE_METHODS {
            match self.request(method, Some(json!({}))).await {
                Err(AppError::MCPMethodUnsupported(_)) => {}
                _ => self.mark_supported(method).await,
            }
        }
    }

    async fn refresh_tools(&self) -> AppResult<()> {
        if !self.supports("tools/list").await {
            *self.tools.write().await = Self::builtin_fallback_tools(&self.spec.name);
            return Ok(());
        }
        let result = self.request("tools/list", None).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)?;
        *self.tools.write().await = parsed.tools;
        Ok(())
    }

    async fn refresh_resources(&self) -> AppResult<()> {
        if !self.supports("resources/list").await {
            return Ok(());
        }
        let result = self.request("resources/list", None).await?;
        let parsed: ResourcesListResult = serde_json::from_value(result)?;
        *self.resources.write().await = parsed.resources;
        Ok(())
    }

    /// Small built-in sample set per known server type, used when `tools/list` is absent or
    /// unsupported.
    fn builtin_fallback_tools(server_name: &str) -> Vec<MCPTool> {
        match server_name {
            "filesystem" => vec![
                MCPTool {
                    name: "read_file".to_string(),
                    description: "Read the contents of a file".to_string(),
                    input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
                    annotations: None,
                },
                MCPTool {
                    name: "list_directory".to_string(),
                    description: "List entries in a directory".to_string(),
                    input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
                    annotations: None,
                },
            ],
            "github" => vec![MCPTool {
                name: "search_repositories".to_string(),
                description: "Search GitHub repositories".to_string(),
                input_schema: json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
                annotations: None,
            }],
            _ => Vec::new(),
        }
    }
}

pub struct MCPClient {
    sessions: DashMap<String, Arc<MCPSession>>,
    config: McpConfigFile,
}

impl MCPClient {
    pub fn new(config: McpConfigFile) -> Self {
        Self { sessions: DashMap::new(), config }
    }

    /// Connects every enabled server up front when `settings.auto_init` is set, matching the
    /// original's eager-connect-at-startup default.
    pub async fn init_configured_servers(&self) {
        if !self.config.settings.auto_init {
            return;
        }
        for spec in self.config.enabled_servers() {
            if let Err(e) = self.connect(&spec.name).await {
                log::error!("failed to connect MCP server '{}': {}", spec.name, e);
            }
        }
    }

    /// Creates a session lazily on first use.
    pub async fn connect(&self, server_name: &str) -> AppResult<Arc<MCPSession>> {
        if let Some(existing) = self.sessions.get(server_name) {
            if existing.connected.load(Ordering::SeqCst) {
                return Ok(existing.clone());
            }
        }

        let spec = self
            .config
            .mcp_servers
            .get(server_name)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("no MCP server named '{}' is configured", server_name)))?;
        if !spec.enabled {
            return Err(AppError::Config(format!("MCP server '{}' is disabled", server_name)));
        }

        let process = McpProcess::spawn(&spec).await?;
        let session = Arc::new(MCPSession {
            spec,
            process,
            connected: AtomicBool::new(true),
            created_at: Utc::now(),
            supported_methods: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
        });
        session.discover().await;
        session.refresh_tools().await?;
        session.refresh_resources().await?;

        self.sessions.insert(server_name.to_string(), session.clone());
        Ok(session)
    }

    /// All currently discovered tools across connected sessions, rendered as globally namespaced
    /// `ToolDefinition`s (`mcp_<server>_<tool>`).
    pub async fn namespaced_tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            let tools = session.tools.read().await;
            for tool in tools.iter() {
                defs.push(ToolDefinition {
                    name: format!("mcp_{}_{}", session.spec.name, tool.name),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                });
            }
        }
        defs
    }

    /// Invokes `tools/call` for `key` formatted as `"<server>:<tool>"`.
    pub async fn call_tool(&self, key: &str, arguments: Value) -> AppResult<Value> {
        let Some((server, tool)) = key.split_once(':') else {
            return Err(AppError::ToolArgumentInvalid(format!("malformed MCP tool key '{}'", key)));
        };

        let session = match self.sessions.get(server).map(|e| e.value().clone()) {
            Some(s) => s,
            None => self.connect(server).await?,
        };

        if !session.tools.read().await.iter().any(|t| t.name == tool) {
            session.refresh_tools().await?;
        }
        if !session.tools.read().await.iter().any(|t| t.name == tool) {
            return Ok(json!({
                "success": false,
                "error": format!("tool '{}' not found on server '{}'", tool, server),
                "error_code": METHOD_NOT_FOUND,
            }));
        }

        if !session.supports("tools/call").await {
            return Ok(json!({
                "success": false,
                "error": format!("server '{}' does not support tools/call", server),
                "error_code": METHOD_NOT_FOUND,
                "unsupported": true,
            }));
        }

        let params = json!({ "name": tool, "arguments": arguments });
        match session.request("tools/call", Some(params)).await {
            Ok(result) => {
                let parsed: CallToolResult = match serde_json::from_value(result.clone()) {
                    Ok(p) => p,
                    Err(_) => return Ok(json!({ "success": true, "result": result })),
                };
                if parsed.is_error {
                    let text = parsed
                        .content
                        .iter()
                        .filter_map(|c| c.text.clone())
                        .collect::<Vec<_>>()
                        .join("\n");
                    return Ok(json!({ "success": false, "tool_error": true, "error": text }));
                }
                Ok(json!({ "success": true, "result": result }))
            }
            Err(AppError::MCPMethodUnsupported(msg)) => {
                Ok(json!({ "success": false, "error": msg, "error_code": METHOD_NOT_FOUND, "unsupported": true }))
            }
            Err(AppError::MCPRpcError { code, message }) => {
                Ok(json!({ "success": false, "error": message, "error_code": code }))
            }
            Err(AppError::MCPTimeout(secs)) => {
                Ok(json!({ "success": false, "error": format!("timed out after {}s", secs), "error_code": -32000 }))
            }
            Err(e) => Ok(json!({ "success": false, "error": e.to_string() })),
        }
    }

    pub async fn read_resource(&self, key: &str) -> AppResult<Value> {
        let Some((server, uri)) = key.split_once(':') else {
            return Err(AppError::ToolArgumentInvalid(format!("malformed MCP resource key '{}'", key)));
        };
        let session = match self.sessions.get(server).map(|e| e.value().clone()) {
            Some(s) => s,
            None => self.connect(server).await?,
        };
        if !session.supports("resources/read").await {
            return Ok(json!({ "success": false, "error": "resources/read not supported", "unsupported": true }));
        }
        let result = session.request("resources/read", Some(json!({ "uri": uri }))).await?;
        Ok(json!({ "success": true, "result": result }))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_connected(&self, server_name: &str) -> bool {
        self.sessions
            .get(server_name)
            .map(|s| s.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Marks every session disconnected, terminates every child (grace period then kill), and
    /// clears the table.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<MCPSession>> = self.sessions.iter().map(|e| e.value().clone()).collect();
        for session in sessions {
            session.connected.store(false, Ordering::SeqCst);
            session.process.shutdown(std::time::Duration::from_millis(800)).await;
        }
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::McpSettings;
    use std::collections::HashMap;

    fn empty_client() -> MCPClient {
        MCPClient::new(McpConfigFile { mcp_servers: HashMap::new(), settings: McpSettings::default() })
    }

    #[tokio::test]
    async fn connect_to_unknown_server_is_a_config_error() {
        let client = empty_client();
        let result = client.connect("nope").await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn call_tool_with_malformed_key_is_an_argument_error() {
        let client = empty_client();
        let result = client.call_tool("no-colon-here", json!({})).await;
        assert!(matches!(result, Err(AppError::ToolArgumentInvalid(_))));
    }

    #[tokio::test]
    async fn namespaced_tool_definitions_is_empty_with_no_sessions() {
        let client = empty_client();
        assert!(client.namespaced_tool_definitions().await.is_empty());
    }
}
