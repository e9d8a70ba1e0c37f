//! Configuration for the API client and the orchestrator loop

use serde::{Deserialize, Serialize};

/// Default model API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Default API version header value
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Environment variable consulted when no API key is configured explicitly
pub const API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";

/// Configuration for the streaming HTTP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the model API
    pub base_url: String,
    /// API key; falls back to `ANTHROPIC_API_KEY` when unset
    pub api_key: Option<String>,
    /// Model identifier sent with every request
    pub model: String,
    /// Maximum tokens the model may produce per turn
    pub max_tokens: u32,
    /// Value of the `anthropic-version` header
    pub api_version: String,
}

impl ApiConfig {
    /// Create a config for the given model with default endpoint settings
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: model.into(),
            max_tokens: 16384,
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Set the API key explicitly
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL (useful for proxies and test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the per-turn token limit
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Resolve the API key from the config or the environment
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV_VAR).ok())
    }
}

/// Configuration for the conversation orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// System instructions sent with every model request
    pub system_prompt: String,
    /// Maximum model round-trips per user message before the loop stops
    pub max_tool_loops: u32,
    /// Per-tool execution timeout in seconds
    pub tool_timeout_secs: u64,
}

impl OrchestratorConfig {
    /// Create a config with the given system prompt and default bounds
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_tool_loops: 20,
            tool_timeout_secs: 300,
        }
    }

    /// Set the tool-use loop bound
    pub fn with_max_tool_loops(mut self, max_tool_loops: u32) -> Self {
        self.max_tool_loops = max_tool_loops;
        self
    }

    /// Set the per-tool timeout
    pub fn with_tool_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_config_defaults() {
        let config = ApiConfig::new("claude-opus-4-6");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, "claude-opus-4-6");
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = ApiConfig::new("claude-opus-4-6").with_api_key("sk-test");
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_orchestrator_config_bounds() {
        let config = OrchestratorConfig::new("help").with_max_tool_loops(5);
        assert_eq!(config.max_tool_loops, 5);
        assert_eq!(config.tool_timeout_secs, 300);
    }
}
