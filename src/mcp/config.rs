//! MCP server configuration: the `mcpServers` map loaded once at startup.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

fn default_transport() -> String {
    "stdio".to_string()
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MCPServerSpec {
    #[serde(default)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpSettings {
    #[serde(default = "default_true")]
    pub auto_init: bool,
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> usize {
    10
}

impl Default for McpSettings {
    fn default() -> Self {
        Self { auto_init: true, default_timeout: 30, max_connections: 10 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpConfigFile {
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: HashMap<String, MCPServerSpec>,
    #[serde(default)]
    pub settings: McpSettings,
}

impl McpConfigFile {
    /// Loads the config file at `path`, writing a default one (with a disabled `filesystem`
    /// example server) if it does not exist. The example ships disabled since `npx` cannot be
    /// assumed to be installed.
    pub fn load_or_create(path: &str) -> AppResult<Self> {
        let file_path = Path::new(path);
        if !file_path.exists() {
            let default = Self::default_config();
            if let Some(parent) = file_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let serialized = serde_json::to_string_pretty(&default)?;
            std::fs::write(file_path, serialized)?;
            return Ok(default);
        }
        let contents = std::fs::read_to_string(file_path)?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("failed to parse MCP config at {}: {}", path, e)))
    }

    fn default_config() -> Self {
        let mut servers = HashMap::new();
        servers.insert(
            "filesystem".to_string(),
            MCPServerSpec {
                name: "filesystem".to_string(),
                command: "npx".to_string(),
                args: vec![
                    "-y".to_string(),
                    "@modelcontextprotocol/server-filesystem".to_string(),
                    ".".to_string(),
                ],
                env: HashMap::new(),
                transport: "stdio".to_string(),
                enabled: false,
                timeout: 30,
                description: Some("Local filesystem access via the reference MCP server".to_string()),
            },
        );
        Self { mcp_servers: servers, settings: McpSettings::default() }
    }

    pub fn enabled_servers(&self) -> Vec<MCPServerSpec> {
        self.mcp_servers
            .iter()
            .filter(|(_, spec)| spec.enabled)
            .map(|(name, spec)| {
                let mut spec = spec.clone();
                spec.name = name.clone();
                spec
            })
            .collect()
    }
}

/// Resolves `command` to a concrete executable path, preferring `.cmd`/`.exe` variants for
/// node-ecosystem launchers (`npm`, `npx`, `uv`, `uvx`) on platforms whose shells do not
/// auto-resolve extensions.
pub fn resolve_command(command: &str) -> String {
    const NODE_LAUNCHERS: &[&str] = &["npm", "npx", "uv", "uvx"];
    if !cfg!(windows) || !NODE_LAUNCHERS.contains(&command) {
        return command.to_string();
    }
    for ext in [".cmd", ".exe"] {
        let candidate = format!("{}{}", command, ext);
        if which_on_path(&candidate).is_some() {
            return candidate;
        }
    }
    command.to_string()
}

fn which_on_path(candidate: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(candidate)).find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_or_create_writes_a_default_config_with_disabled_filesystem_server() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mcp_servers.json");
        let config = McpConfigFile::load_or_create(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
        assert!(config.mcp_servers.contains_key("filesystem"));
        assert!(!config.mcp_servers["filesystem"].enabled);
        assert!(config.enabled_servers().is_empty());
    }

    #[test]
    fn load_or_create_reads_back_an_existing_file_without_overwriting_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mcp_servers.json");
        std::fs::write(
            &path,
            r#"{"mcpServers":{"demo":{"command":"demo-server","args":[],"env":{},"transport":"stdio","enabled":true,"timeout":10}},"settings":{}}"#,
        )
        .unwrap();
        let config = McpConfigFile::load_or_create(path.to_str().unwrap()).unwrap();
        assert_eq!(config.enabled_servers().len(), 1);
        assert_eq!(config.enabled_servers()[0].name, "demo");
    }
}
