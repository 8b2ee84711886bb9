//! Provider Adapter (C2) and the static registry the Stream Dispatcher (C3) selects from.
//!
//! Each adapter owns its own wire format end to end: building the provider-specific request body
//! from canonical [`crate::message::Message`]s, reading the provider's native stream framing, and
//! normalizing every event into a canonical [`crate::message::StreamChunk`]. No two adapters share
//! wire code.

mod common;
mod github;
mod openrouter;
mod nvidia_nim;
mod ollama;
mod gemini;

pub use common::{format_stream_chunk, ChunkStream};
pub use github::GithubAdapter;
pub use openrouter::OpenRouterAdapter;
pub use nvidia_nim::NvidiaNimAdapter;
pub use ollama::OllamaAdapter;
pub use gemini::GeminiAdapter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::message::{Message, StreamChunk, ToolDefinition};

/// The capability interface every provider implements as a value, rather than an inheritance
/// hierarchy of provider classes.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short tag used in the registry and in log lines, e.g. `"github"`, `"gemini"`.
    fn tag(&self) -> &'static str;

    /// Model name prefixes/aliases this adapter claims. The dispatcher picks an adapter by
    /// longest matching entry.
    fn supported_models(&self) -> Vec<String>;

    /// Whether the adapter has the configuration it needs (endpoint, API key) to make calls.
    fn available(&self) -> bool;

    /// Whether `model` accepts a `tools` argument at all.
    fn supports_tools(&self, model: &str) -> bool;

    /// Streams canonical chunks for one call. Implementations build the provider wire body from
    /// `messages`/`tools`/`params`, issue the request, and translate the response stream.
    async fn stream(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
        params: Option<&serde_json::Value>,
    ) -> AppResult<ChunkStream>;
}

/// Static membership table built once at startup.
pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self { adapters }
    }

    /// Builds the registry from the running configuration, constructing every known adapter
    /// regardless of whether it is configured (`available()` reflects that) so the dispatcher's
    /// selection-by-model-name logic does not need to special-case missing providers.
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(GithubAdapter::new(config)),
            Arc::new(OpenRouterAdapter::new(config)),
            Arc::new(NvidiaNimAdapter::new(config)),
            Arc::new(OllamaAdapter::new(config)),
            Arc::new(GeminiAdapter::new(config)),
        ];
        Self::new(adapters)
    }

    /// Selects an adapter by model name: the longest supported-model prefix match wins.
    pub fn select(&self, model: &str) -> Option<Arc<dyn ProviderAdapter>> {
        let mut best: Option<(usize, Arc<dyn ProviderAdapter>)> = None;
        for adapter in &self.adapters {
            for candidate in adapter.supported_models() {
                if model.starts_with(candidate.as_str()) {
                    let better = match &best {
                        None => true,
                        Some((len, _)) => candidate.len() > *len,
                    };
                    if better {
                        best = Some((candidate.len(), adapter.clone()));
                    }
                }
            }
        }
        best.map(|(_, adapter)| adapter)
    }

    pub fn all(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.adapters
    }
}

/// Per-model overrides shared by every adapter: the configured unsupported-tool and
/// unsupported-multimodal model lists.
#[derive(Debug, Clone, Default)]
pub struct ModelQuirks {
    pub tool_unsupported: Vec<String>,
    pub multimodal_unsupported: Vec<String>,
}

impl ModelQuirks {
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            tool_unsupported: config.tool_unsupported_models.clone(),
            multimodal_unsupported: config.multimodal_unsupported_models.clone(),
        }
    }

    pub fn supports_tools(&self, model: &str) -> bool {
        !self.tool_unsupported.iter().any(|m| model.contains(m.as_str()))
    }

    pub fn supports_multimodal(&self, model: &str) -> bool {
        !self.multimodal_unsupported.iter().any(|m| model.contains(m.as_str()))
    }
}

pub type ParamOverrides = HashMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter {
        tag: &'static str,
        models: Vec<&'static str>,
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn tag(&self) -> &'static str {
            self.tag
        }
        fn supported_models(&self) -> Vec<String> {
            self.models.iter().map(|s| s.to_string()).collect()
        }
        fn available(&self) -> bool {
            true
        }
        fn supports_tools(&self, _model: &str) -> bool {
            true
        }
        async fn stream(
            &self,
            _messages: &[Message],
            _model: &str,
            _tools: Option<&[ToolDefinition]>,
            _params: Option<&serde_json::Value>,
        ) -> AppResult<ChunkStream> {
            unimplemented!()
        }
    }

    #[test]
    fn select_picks_the_longest_matching_prefix() {
        let registry = ProviderRegistry::new(vec![
            Arc::new(StubAdapter { tag: "a", models: vec!["gpt-"] }),
            Arc::new(StubAdapter { tag: "b", models: vec!["gpt-4o-"] }),
        ]);
        let adapter = registry.select("gpt-4o-mini").unwrap();
        assert_eq!(adapter.tag(), "b");
    }

    #[test]
    fn select_returns_none_when_nothing_matches() {
        let registry = ProviderRegistry::new(vec![Arc::new(StubAdapter { tag: "a", models: vec!["gpt-"] })]);
        assert!(registry.select("claude-3").is_none());
    }

    #[test]
    fn model_quirks_flag_substring_matches() {
        let quirks = ModelQuirks { tool_unsupported: vec!["gemma".into()], multimodal_unsupported: vec!["llama3".into()] };
        assert!(!quirks.supports_tools("gemma-2b"));
        assert!(quirks.supports_tools("gemini-1.5"));
        assert!(!quirks.supports_multimodal("meta/llama3-70b"));
        assert!(quirks.supports_multimodal("mistral"));
    }
}
