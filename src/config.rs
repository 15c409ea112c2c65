//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::Result;
use crate::error::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `memory.md` and `blacklist.txt`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Prompt template file; the built-in template is used when unset
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,

    /// Pause before every work cycle, in seconds
    #[serde(default = "default_cycle_delay_secs")]
    pub cycle_delay_secs: u64,

    #[serde(default)]
    pub forum: ForumConfig,

    /// Main model, the one answering notifications
    #[serde(default)]
    pub model: ModelConfig,

    /// Secondary vision model used to describe images for a text-only main model
    #[serde(default)]
    pub vlm: Option<ModelConfig>,

    #[serde(default)]
    pub web_search: WebSearchConfig,
}

/// Forum account the agent acts as
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumConfig {
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub api_key: String,
}

/// An OpenAI-compatible model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub name: String,

    #[serde(default = "default_model_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Whether the model accepts images as input
    #[serde(default)]
    pub vision: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    /// Search API key; web search is disabled when empty
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
}

fn default_data_dir() -> PathBuf {
    config_dir().join("data")
}

fn default_cycle_delay_secs() -> u64 {
    5
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_model_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            prompt_file: None,
            cycle_delay_secs: default_cycle_delay_secs(),
            forum: ForumConfig::default(),
            model: ModelConfig::default(),
            vlm: None,
            web_search: WebSearchConfig::default(),
        }
    }
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            base_url: "https://forum.example.com".to_string(),
            username: String::new(),
            api_key: String::new(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            base_url: default_model_url(),
            api_key: String::new(),
            vision: false,
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_search_endpoint(),
        }
    }
}

impl ModelConfig {
    #[cfg(test)]
    pub fn test(name: &str, vision: bool) -> Self {
        Self {
            name: name.to_string(),
            base_url: "http://localhost".to_string(),
            api_key: "test-key".to_string(),
            vision,
        }
    }
}

impl Config {
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    /// Prompt template text: the configured file, or the built-in one.
    pub fn prompt_template(&self) -> Result<String> {
        match &self.prompt_file {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read prompt file {:?}: {}", path, e))
            }),
            None => Ok(crate::templates::PROMPT.to_string()),
        }
    }

    /// Check the fields a work cycle cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.forum.username.is_empty() {
            return Err(Error::Config("forum.username is not set".to_string()));
        }
        if self.forum.base_url.is_empty() {
            return Err(Error::Config("forum.base_url is not set".to_string()));
        }
        if self.model.name.is_empty() {
            return Err(Error::Config("model.name is not set".to_string()));
        }
        Ok(())
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".breeze")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from the default location
pub fn load() -> Result<Config> {
    load_from(&config_path())
}

/// Load configuration from file
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config not found at {:?}. Run 'breeze init' first.",
            path
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    // Create parent directory
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cycle_delay(), Duration::from_secs(5));
        assert!(config.vlm.is_none());
        assert!(config.web_search.api_key.is_empty());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{
            "forum": {"base_url": "https://bbs.test", "username": "breeze", "api_key": "k"},
            "model": {"name": "qwen-vl", "vision": true},
            "vlm": {"name": "describer"}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.model.vision);
        assert_eq!(config.model.base_url, default_model_url());
        assert_eq!(config.vlm.unwrap().name, "describer");
        assert_eq!(config.cycle_delay_secs, 5);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.forum.username = "breeze".into();

        save_to(&config, &path).unwrap();
        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.forum.username, "breeze");
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_missing_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_requires_username() {
        assert!(Config::default().validate().is_err());
    }
}
