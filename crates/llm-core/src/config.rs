//! Model provider configuration

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::retry::RetryConfig;

/// DashScope OpenAI-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Credential wrapper that never prints its value
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Access the raw credential
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Settings for the chat model
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider API key
    pub api_key: SecretString,
    /// Base URL of the chat completions API
    pub base_url: String,
    /// Model name
    pub name: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Request a server-sent-event response
    pub streaming: bool,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries after a failed model call
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: SecretString::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            name: "qwen-max".to_string(),
            temperature: 0.7,
            top_p: 0.8,
            streaming: true,
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy derived from `max_retries`
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::default().with_max_retries(self.max_retries)
    }

    /// Chat completions URL
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let secret = SecretString::new("sk-123");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose(), "sk-123");
    }

    #[test]
    fn test_parse_partial_model_config() {
        let toml = r#"
api_key = "sk-test"
name = "qwen-plus"
streaming = false
"#;
        let config: ModelConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.name, "qwen-plus");
        assert!(!config.streaming);
        assert_eq!(config.api_key.expose(), "sk-test");
        assert_eq!(config.top_p, 0.8);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let config = ModelConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.completions_url(), "http://localhost:8080/v1/chat/completions");
    }
}
