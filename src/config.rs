//! Configuration: defaults, optional TOML file, environment, CLI overrides.

use crate::gateway::{GatewayInitError, DEFAULT_TEMPERATURE};
use crate::gemini_api::DEFAULT_BASE_URL;
use anyhow::{anyhow, Context as _, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Generic variable checked after DEFAULT_API_KEY_ENV
pub const FALLBACK_API_KEY_ENV: &str = "API_KEY";
/// Overrides both model names
pub const MODEL_ENV: &str = "CONVOCOACH_MODEL";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub chat_model: String,
    pub feedback_model: String,
    pub temperature: f32,
    /// API key given directly in the config file
    pub api_key: Option<String>,
    /// Environment variable holding the key. When unset, GEMINI_API_KEY
    /// then API_KEY are tried.
    pub api_key_env: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_MODEL.to_string(),
            feedback_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            api_key: None,
            api_key_env: None,
            connect_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    fn key_env_vars(&self) -> Vec<&str> {
        match &self.api_key_env {
            Some(name) => vec![name.as_str()],
            None => vec![DEFAULT_API_KEY_ENV, FALLBACK_API_KEY_ENV],
        }
    }

    /// Resolve the API key, wrapped in a SecretString.
    pub fn resolve_api_key(&self) -> Result<SecretString, GatewayInitError> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(SecretString::from(key.trim().to_string()));
        }

        for var in self.key_env_vars() {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    return Ok(SecretString::from(key.trim().to_string()));
                }
            }
        }

        Err(GatewayInitError::MissingCredentials {
            env_var: self.key_env_vars().join(" or "),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

/// A single validation problem
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

impl Config {
    /// Default config file location: `<config_dir>/convocoach/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("convocoach").join("config.toml"))
    }

    /// Load from the default location if it exists, else defaults.
    /// Environment overrides are applied either way.
    pub fn load() -> Result<Self> {
        let mut cfg = match Self::default_path() {
            Some(path) if path.exists() => Self::parse_file(&path)?,
            _ => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    /// Load from an explicit path; the file must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::parse_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| anyhow!("{}", e))
    }

    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var(MODEL_ENV) {
            if !model.trim().is_empty() {
                self.gateway.chat_model = model.trim().to_string();
                self.gateway.feedback_model = model.trim().to_string();
            }
        }
    }

    /// Check every field and report all problems at once
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        let gw = &self.gateway;

        if gw.chat_model.trim().is_empty() {
            errors.push(ConfigError {
                field: "gateway.chat_model",
                message: "must not be empty".to_string(),
            });
        }
        if gw.feedback_model.trim().is_empty() {
            errors.push(ConfigError {
                field: "gateway.feedback_model",
                message: "must not be empty".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&gw.temperature) {
            errors.push(ConfigError {
                field: "gateway.temperature",
                message: format!("{} is outside 0.0..=2.0", gw.temperature),
            });
        }
        if !(gw.base_url.starts_with("https://") || gw.base_url.starts_with("http://")) {
            errors.push(ConfigError {
                field: "gateway.base_url",
                message: format!("'{}' is not an http(s) URL", gw.base_url),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
