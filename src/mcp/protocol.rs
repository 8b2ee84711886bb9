//! JSON-RPC 2.0 request/response/error shapes used over the MCP stdio transport, newline-framed:
//! one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const TIMEOUT_CODE: i64 = -32000;

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }

    pub fn to_line(&self) -> String {
        format!("{}\n", serde_json::to_string(self).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn is_method_not_found(&self) -> bool {
        self.error.as_ref().map(|e| e.code == METHOD_NOT_FOUND).unwrap_or(false)
    }
}

/// The well-known methods the discovery/probing step cares about.
pub const PROBE_METHODS: &[&str] = &[
    "tools/list",
    "tools/call",
    "resources/list",
    "resources/read",
    "system/info",
    "prompts/list",
    "prompts/render",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MCPTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(default)]
    pub annotations: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MCPResource {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<MCPTool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesListResult {
    #[serde(default)]
    pub resources: Vec<MCPResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_jsonrpc_tag_and_trailing_newline() {
        let req = RpcRequest::new("tools/list", None);
        let line = req.to_line();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"jsonrpc\":\"2.0\""));
        assert!(line.contains("\"method\":\"tools/list\""));
    }

    #[test]
    fn response_detects_method_not_found() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32601,"message":"not found"}}"#;
        let resp: RpcResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.is_method_not_found());
    }
}
