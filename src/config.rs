//! Startup configuration.
//!
//! Read once from the environment into a plain struct the binary constructs at boot — no
//! file-format parsing crate pulled in.

use std::collections::HashMap;
use std::env;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl ProviderConfig {
    fn from_env(endpoint_var: &str, key_var: &str) -> Self {
        Self {
            endpoint: env::var(endpoint_var).ok(),
            api_key: env::var(key_var).ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentPrompts {
    pub react_planning: String,
    pub simple: String,
    pub react_mcp: String,
    pub simple_mcp: String,
    pub reflection: String,
    pub summary: String,
}

impl Default for AgentPrompts {
    fn default() -> Self {
        Self {
            react_planning: "You are an autonomous agent. Before acting, write a brief plan for \
                how you will satisfy the user's request using the tools available to you."
                .to_string(),
            simple: "You are a helpful assistant. Use the available tools when they help answer \
                the request, otherwise answer directly."
                .to_string(),
            react_mcp: "You are an autonomous agent with access to built-in tools and external \
                MCP tool servers. Plan your approach before acting."
                .to_string(),
            simple_mcp: "You are a helpful assistant with access to built-in tools and external \
                MCP tool servers."
                .to_string(),
            reflection: "Reflect on the tool results so far: are you on track to satisfy the \
                request, or does your plan need to change?"
                .to_string(),
            summary: "You have reached the maximum number of steps. Summarize what you found and \
                give the best answer you can with the information gathered so far."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub providers: HashMap<String, ProviderConfig>,
    pub mcp_config_path: String,
    pub default_max_steps: u32,
    pub default_reflection_threshold: u32,
    pub max_rate_limit_retries: u32,
    pub rate_limit_backoff_secs: u64,
    pub provider_timeout_secs: u64,
    pub mcp_default_timeout_secs: u64,
    pub mcp_max_connections: usize,
    pub tool_unsupported_models: Vec<String>,
    pub multimodal_unsupported_models: Vec<String>,
    pub prompts: AgentPrompts,
    pub admin_api_key: Option<String>,
}

impl AppConfig {
    /// Reads the recognized environment-variable set. All values are read once at startup;
    /// nothing here is re-read on a hot path.
    pub fn from_env() -> AppResult<Self> {
        let mut providers = HashMap::new();
        providers.insert(
            "github".to_string(),
            ProviderConfig::from_env("GITHUB_MODELS_ENDPOINT", "GITHUB_MODELS_API_KEY"),
        );
        providers.insert(
            "openrouter".to_string(),
            ProviderConfig::from_env("OPENROUTER_ENDPOINT", "OPENROUTER_API_KEY"),
        );
        providers.insert(
            "nvidia_nim".to_string(),
            ProviderConfig::from_env("NVIDIA_NIM_ENDPOINT", "NVIDIA_NIM_API_KEY"),
        );
        providers.insert(
            "ollama".to_string(),
            ProviderConfig::from_env("OLLAMA_ENDPOINT", "OLLAMA_API_KEY"),
        );
        providers.insert(
            "gemini".to_string(),
            ProviderConfig::from_env("GEMINI_ENDPOINT", "GEMINI_API_KEY"),
        );

        let have_any_endpoint = providers.values().any(|p| p.endpoint.is_some());
        if !have_any_endpoint {
            return Err(AppError::Config(
                "no provider endpoint configured; set at least one of GITHUB_MODELS_ENDPOINT, \
                 OPENROUTER_ENDPOINT, NVIDIA_NIM_ENDPOINT, OLLAMA_ENDPOINT, GEMINI_ENDPOINT"
                    .to_string(),
            ));
        }

        let bind_addr = env::var("AGENTRELAY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let mcp_config_path =
            env::var("MCP_CONFIG_PATH").unwrap_or_else(|_| "data/mcp_servers.json".to_string());

        let parse_u32 = |var: &str, default: u32| -> u32 {
            env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let parse_u64 = |var: &str, default: u64| -> u64 {
            env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        };

        let tool_unsupported_models = env::var("TOOL_UNSUPPORTED_MODELS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let multimodal_unsupported_models = env::var("MULTIMODAL_UNSUPPORTED_MODELS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            providers,
            mcp_config_path,
            default_max_steps: parse_u32("AGENT_MAX_STEPS", 10),
            default_reflection_threshold: parse_u32("AGENT_REFLECTION_THRESHOLD", 3),
            max_rate_limit_retries: parse_u32("PROVIDER_MAX_RETRIES", 3),
            rate_limit_backoff_secs: parse_u64("PROVIDER_RATE_LIMIT_BACKOFF_SECS", 60),
            provider_timeout_secs: parse_u64("PROVIDER_TIMEOUT_SECS", 120),
            mcp_default_timeout_secs: parse_u64("MCP_DEFAULT_TIMEOUT_SECS", 30),
            mcp_max_connections: parse_u32("MCP_MAX_CONNECTIONS", 10) as usize,
            tool_unsupported_models,
            multimodal_unsupported_models,
            prompts: AgentPrompts::default(),
            admin_api_key: env::var("ADMIN_API_KEY").ok(),
        })
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_all_endpoints_is_a_config_error() {
        for var in [
            "GITHUB_MODELS_ENDPOINT",
            "OPENROUTER_ENDPOINT",
            "NVIDIA_NIM_ENDPOINT",
            "OLLAMA_ENDPOINT",
            "GEMINI_ENDPOINT",
        ] {
            env::remove_var(var);
        }
        let result = AppConfig::from_env();
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn single_endpoint_is_sufficient() {
        env::set_var("OLLAMA_ENDPOINT", "http://localhost:11434");
        let config = AppConfig::from_env().expect("config should build with one endpoint");
        assert_eq!(config.default_max_steps, 10);
        env::remove_var("OLLAMA_ENDPOINT");
    }
}
