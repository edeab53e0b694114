//! Settings for the search-chat CLI
//!
//! Sources, lowest precedence first: defaults, `search-chat.toml`, `.env`,
//! process environment.

use anyhow::{Context, Result};
use llm_core::{ModelConfig, SecretString};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AgentError;

/// File name searched for in the working directory and its parents
pub const CONFIG_FILE_NAME: &str = "search-chat.toml";

pub const MODEL_KEY_ENV: &str = "DASHSCOPE_API_KEY";
pub const SEARCH_KEY_ENV: &str = "TAVILY_API_KEY";

const MODEL_KEY_PLACEHOLDER: &str = "your_dashscope_api_key";
const SEARCH_KEY_PLACEHOLDER: &str = "your_tavily_api_key";

/// Complete application settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub agent: LoopConfig,
}

/// Web search tool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Register the search tool
    pub enabled: bool,
    pub api_key: SecretString,
    pub base_url: String,
    /// Results per query unless the model asks for a different number
    pub max_results: u32,
    pub timeout_secs: u64,
    /// "basic" or "advanced"
    pub search_depth: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: SecretString::default(),
            base_url: "https://api.tavily.com".to_string(),
            max_results: 2,
            timeout_secs: 30,
            search_depth: "basic".to_string(),
        }
    }
}

/// Agent loop settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Model -> tools round trips allowed per user turn
    pub max_tool_rounds: usize,
    pub tool_timeout_secs: u64,
    /// Retries after a failed tool execution
    pub tool_retries: u32,
    /// Dispatch the calls of one assistant message concurrently
    pub parallel_tool_calls: bool,
    /// Replaces the built-in system preamble
    pub system_prompt: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 10,
            tool_timeout_secs: 30,
            tool_retries: 0,
            parallel_tool_calls: false,
            system_prompt: None,
        }
    }
}

impl LoopConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Settings {
    /// Load settings from the config file (if any) and the environment
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = match Self::find_config_path(explicit)? {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading settings file");
                Self::load_from(&path)?
            }
            None => Self::default(),
        };

        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Load settings from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Override credentials from environment variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(MODEL_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.model.api_key = SecretString::new(key);
        }
        if let Some(key) = lookup(SEARCH_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.search.api_key = SecretString::new(key);
        }
    }

    /// Check that required credentials are present
    pub fn validate(&self) -> std::result::Result<(), AgentError> {
        let model_key = self.model.api_key.expose().trim();
        if model_key.is_empty() || model_key == MODEL_KEY_PLACEHOLDER {
            return Err(AgentError::Configuration(format!(
                "{MODEL_KEY_ENV} is not set!\n\
                 Option 1: add `{MODEL_KEY_ENV}=sk-xxx` to a .env file\n\
                 Option 2: export {MODEL_KEY_ENV}=sk-xxx before running\n\
                 Option 3: set `api_key` under [model] in {CONFIG_FILE_NAME}"
            )));
        }

        if self.search.enabled {
            let search_key = self.search.api_key.expose().trim();
            if search_key.is_empty() || search_key == SEARCH_KEY_PLACEHOLDER {
                return Err(AgentError::Configuration(format!(
                    "{SEARCH_KEY_ENV} is not set!\n\
                     Add `{SEARCH_KEY_ENV}=tvly-xxx` to a .env file, export it, \
                     or disable search with `enabled = false` under [search]"
                )));
            }
        }

        Ok(())
    }

    /// Explicit path, else nearest `search-chat.toml`, else the user config file
    pub fn find_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            return Ok(Some(path.to_path_buf()));
        }

        let mut current = std::env::current_dir()?;
        for _ in 0..10 {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(Some(candidate));
            }
            if !current.pop() {
                break;
            }
        }

        Ok(Self::user_config_path().filter(|p| p.exists()))
    }

    /// Platform config location, e.g. ~/.config/search-chat/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("search-chat").join("config.toml"))
    }

    /// Write a commented default configuration file
    pub fn create_default(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let default_config = r#"# search-chat configuration
# Credentials may also come from DASHSCOPE_API_KEY / TAVILY_API_KEY
# (environment or .env file); those take precedence.

[model]
# api_key = "sk-xxx"
base_url = "https://dashscope.aliyuncs.com/compatible-mode/v1"
name = "qwen-max"
temperature = 0.7
top_p = 0.8
streaming = true
timeout_secs = 60
max_retries = 2

[search]
enabled = true
# api_key = "tvly-xxx"
max_results = 2
timeout_secs = 30
search_depth = "basic"

[agent]
# Model -> tools round trips per user turn before giving up
max_tool_rounds = 10
tool_timeout_secs = 30
tool_retries = 0
parallel_tool_calls = false
# system_prompt = "You are a helpful assistant."
"#;

        fs::write(path, default_config)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_keys() -> Settings {
        let mut settings = Settings::default();
        settings.model.api_key = "sk-model".into();
        settings.search.api_key = "tvly-search".into();
        settings
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.model.name, "qwen-max");
        assert_eq!(settings.search.max_results, 2);
        assert_eq!(settings.agent.max_tool_rounds, 10);
        assert!(settings.search.enabled);
    }

    #[test]
    fn test_parse_settings() {
        let toml = r#"
[model]
name = "qwen-plus"
temperature = 0.2

[search]
max_results = 5

[agent]
max_tool_rounds = 3
parallel_tool_calls = true
"#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.model.name, "qwen-plus");
        assert_eq!(settings.model.temperature, 0.2);
        assert_eq!(settings.search.max_results, 5);
        assert_eq!(settings.agent.max_tool_rounds, 3);
        assert!(settings.agent.parallel_tool_calls);
    }

    #[test]
    fn test_env_overrides_file_credentials() {
        let mut settings = with_keys();
        settings.apply_env(|key| match key {
            MODEL_KEY_ENV => Some("sk-env".to_string()),
            _ => None,
        });
        assert_eq!(settings.model.api_key.expose(), "sk-env");
        assert_eq!(settings.search.api_key.expose(), "tvly-search");
    }

    #[test]
    fn test_validate_requires_model_key() {
        let mut settings = with_keys();
        settings.model.api_key = SecretString::default();
        assert!(matches!(settings.validate(), Err(AgentError::Configuration(_))));

        settings.model.api_key = MODEL_KEY_PLACEHOLDER.into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains(MODEL_KEY_ENV));
    }

    #[test]
    fn test_validate_search_key_only_when_enabled() {
        let mut settings = with_keys();
        settings.search.api_key = SecretString::default();
        assert!(settings.validate().is_err());

        settings.search.enabled = false;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_create_default_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        Settings::create_default(&path).unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.agent.max_tool_rounds, 10);
        assert_eq!(settings.model.name, "qwen-max");

        assert!(Settings::create_default(&path).is_err());
    }

    #[test]
    fn test_explicit_missing_path_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Settings::find_config_path(Some(&missing)).is_err());
    }
}
