use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::DEFAULT_LOG_TAIL;
use crate::error::{FlowError, Result};

/// Top-level Flowforge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Model providers keyed by name (`anthropic`, `openai`, `groq`, `gemini`).
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub http_call: HttpCallConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally visible base URL used when reporting deployment endpoints.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: None,
        }
    }
}

impl GatewayConfig {
    /// Base URL for absolute endpoint links, without a trailing slash.
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8000".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Echo run logs to the tracing subscriber for every run.
    #[serde(default)]
    pub debug: bool,
    /// Node-scoped log entries kept on each node result.
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
    /// Finished runs kept for status queries before the oldest is evicted.
    #[serde(default = "default_max_tracked_runs")]
    pub max_tracked_runs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_tail: default_log_tail(),
            max_tracked_runs: default_max_tracked_runs(),
        }
    }
}

fn default_log_tail() -> usize { DEFAULT_LOG_TAIL }
fn default_max_tracked_runs() -> usize { 100 }

/// Credentials and endpoint override for one model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_provider_timeout() -> u64 { 60 }

/// Defaults for generic HTTP call nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCallConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpCallConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout() -> u64 { 30 }
fn default_user_agent() -> String { format!("flowforge/{}", env!("CARGO_PKG_VERSION")) }

impl AppConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))
    }

    /// Load config, falling back to defaults when the file does not exist.
    /// A file that exists but fails to parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(FlowError::ConfigNotFound(p)) => {
                tracing::warn!(path = %p, "Config file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay verbatim
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_FLOWFORGE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_FLOWFORGE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_FLOWFORGE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_FLOWFORGE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_FLOWFORGE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.bind, "127.0.0.1:8000");
        assert_eq!(config.engine.log_tail, 10);
        assert!(!config.engine.debug);
        assert_eq!(config.http_call.timeout_secs, 30);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_provider_sections() {
        let toml_str = r#"
[providers.groq]
api_key = "gsk-test"

[providers.openai]
base_url = "http://localhost:11434/v1/chat/completions"
timeout_secs = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let groq = config.provider("groq").unwrap();
        assert_eq!(groq.api_key.as_deref(), Some("gsk-test"));
        assert_eq!(groq.timeout_secs, 60);
        assert_eq!(config.provider("openai").unwrap().timeout_secs, 5);
        assert!(config.provider("anthropic").is_none());
    }

    #[test]
    fn test_gateway_base_url() {
        let mut gw = GatewayConfig::default();
        assert_eq!(gw.base_url(), "http://127.0.0.1:8000");
        gw.public_url = Some("https://flows.example.com/".into());
        assert_eq!(gw.base_url(), "https://flows.example.com");
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/flowforge.toml")).unwrap_err();
        assert!(matches!(err, FlowError::ConfigNotFound(_)));
        let config = AppConfig::load_or_default(Path::new("/nonexistent/flowforge.toml")).unwrap();
        assert_eq!(config.gateway.bind, "127.0.0.1:8000");
    }
}
