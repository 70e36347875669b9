//! User configuration from `~/.cobol-bridge/config.toml`.

use crate::provider::{ClientOptions, Provider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the home directory for config and data.
const APP_DIR: &str = ".cobol-bridge";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider ID (openai, openrouter, groq, ollama, local).
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    /// Completion token limit per agent call. None lets the server decide.
    pub max_tokens: Option<u32>,
    /// Overrides the provider's default API URL.
    pub base_url: Option<String>,
    /// API keys by provider ID. Environment variables take precedence.
    pub api_keys: HashMap<String, String>,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Retries for transient provider errors.
    pub max_retries: u32,
    /// Refuse to start a stage whose estimated prompt exceeds this.
    pub max_input_tokens: usize,
    /// Stream completions and print deltas as they arrive.
    pub stream: bool,
    /// Directory with `<template>.j2` files overriding the built-in prompts.
    pub prompts_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.0,
            max_tokens: None,
            base_url: None,
            api_keys: HashMap::new(),
            request_timeout_secs: 600,
            max_retries: 3,
            max_input_tokens: 100_000,
            stream: true,
            prompts_dir: None,
            data_dir: app_dir(),
            web: WebConfig::default(),
        }
    }
}

fn app_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(APP_DIR))
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        app_dir().join("config.toml")
    }

    /// Load from the default location, or defaults if the file is absent.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Path to the runs SQLite database.
    pub fn runs_db_path(&self) -> PathBuf {
        self.data_dir.join("runs.db")
    }

    pub fn provider(&self) -> crate::error::Result<Provider> {
        Provider::from_id(&self.provider)
            .ok_or_else(|| crate::error::Error::Config(format!("Unknown provider '{}'", self.provider)))
    }

    /// API key for a provider: environment first, then config.
    pub fn api_key_for(&self, provider: Provider) -> Option<String> {
        provider
            .api_key()
            .or_else(|| self.api_keys.get(provider.id()).cloned())
            .filter(|k| !k.is_empty())
    }

    pub fn client_options(&self, provider: Provider) -> ClientOptions {
        ClientOptions {
            api_key: self.api_key_for(provider),
            base_url: self.base_url.clone(),
            timeout: Some(Duration::from_secs(self.request_timeout_secs)),
        }
    }

    /// Read a single value for `config get`.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "provider" => Some(self.provider.clone()),
            "model" => Some(self.model.clone()),
            "temperature" => Some(self.temperature.to_string()),
            "max_tokens" => self.max_tokens.map(|v| v.to_string()),
            "base_url" => self.base_url.clone(),
            "request_timeout_secs" => Some(self.request_timeout_secs.to_string()),
            "max_retries" => Some(self.max_retries.to_string()),
            "max_input_tokens" => Some(self.max_input_tokens.to_string()),
            "stream" => Some(self.stream.to_string()),
            "prompts_dir" => self.prompts_dir.as_ref().map(|p| p.display().to_string()),
            "data_dir" => Some(self.data_dir.display().to_string()),
            "web.port" => Some(self.web.port.to_string()),
            "web.host" => Some(self.web.host.clone()),
            _ => None,
        }
    }

    /// Update a single value for `config set`. `api_key.<provider>` stores a key.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T> {
            value
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid value for {key}: {value}"))
        }

        match key {
            "provider" => {
                Provider::from_id(value)
                    .ok_or_else(|| anyhow::anyhow!("Unknown provider '{value}'"))?;
                self.provider = value.to_lowercase();
            }
            "model" => self.model = value.to_string(),
            "temperature" => self.temperature = parse(key, value)?,
            "max_tokens" => self.max_tokens = Some(parse(key, value)?),
            "base_url" => self.base_url = Some(value.to_string()),
            "request_timeout_secs" => self.request_timeout_secs = parse(key, value)?,
            "max_retries" => self.max_retries = parse(key, value)?,
            "max_input_tokens" => self.max_input_tokens = parse(key, value)?,
            "stream" => self.stream = parse(key, value)?,
            "prompts_dir" => self.prompts_dir = Some(PathBuf::from(value)),
            "data_dir" => self.data_dir = PathBuf::from(value),
            "web.port" => self.web.port = parse(key, value)?,
            "web.host" => self.web.host = value.to_string(),
            _ => {
                let Some(provider) = key.strip_prefix("api_key.") else {
                    anyhow::bail!("Unknown config key: {key}");
                };
                let provider = Provider::from_id(provider)
                    .ok_or_else(|| anyhow::anyhow!("Unknown provider '{provider}'"))?;
                self.api_keys
                    .insert(provider.id().to_string(), value.to_string());
            }
        }
        Ok(())
    }
}
