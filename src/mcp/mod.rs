//! MCP Client (C5): subprocess lifecycle, JSON-RPC 2.0 framing, capability discovery, and tool
//! dispatch for external Model Context Protocol servers.

pub mod client;
pub mod config;
pub mod process;
pub mod protocol;

pub use client::{MCPClient, MCPSession};
pub use config::{McpConfigFile, McpSettings, MCPServerSpec};
pub use protocol::{MCPResource, MCPTool};
