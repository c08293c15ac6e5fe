//! Bridge configuration
//!
//! Handles parsing and management of `espbridge.toml` files.
//!
//! ```toml
//! [engine]
//! heap_size = 131072
//!
//! [debugger]
//! bind_addr = "0.0.0.0:9091"
//!
//! [logging]
//! default_level = "info"
//! tags = { modules = "debug" }
//!
//! [web]
//! bind_host = "0.0.0.0"
//! default_port = 80
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::debugger::DEFAULT_BIND_ADDR;
use crate::engine::DEFAULT_HEAP_SIZE;
use crate::modules::web::{WebSettings, DEFAULT_PORT};
use crate::runtime::levels;

/// Name of the configuration file searched for by [`BridgeConfig::find_and_load`].
pub const CONFIG_FILE: &str = "espbridge.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching espbridge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub debugger: DebuggerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub web: WebConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    /// Falls back to defaults when no file exists.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would only fail later at startup.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.heap_size == 0 {
            return Err(ConfigError::Invalid("engine.heap_size must be > 0".into()));
        }
        if levels::resolve(&self.logging.default_level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown logging.default_level '{}'",
                self.logging.default_level
            )));
        }
        for (tag, level) in &self.logging.tags {
            if levels::resolve(level).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "unknown level '{}' for tag '{}'",
                    level, tag
                )));
            }
        }
        Ok(())
    }
}

/// Script engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Heap budget in bytes
    #[serde(default = "default_heap_size")]
    pub heap_size: usize,
}

fn default_heap_size() -> usize {
    DEFAULT_HEAP_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heap_size: default_heap_size(),
        }
    }
}

/// Remote debugger settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebuggerConfig {
    /// Address `ESP32.debug()` listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Log thresholds, by severity name (`none` .. `verbose`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub default_level: String,

    /// Per-tag overrides
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: default_level(),
            tags: HashMap::new(),
        }
    }
}

/// Web responder settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Port used when `startMongoose` is given none
    #[serde(default = "default_port")]
    pub default_port: u16,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            default_port: default_port(),
        }
    }
}

impl From<&WebConfig> for WebSettings {
    fn from(config: &WebConfig) -> Self {
        Self {
            bind_host: config.bind_host.clone(),
            default_port: config.default_port,
        }
    }
}
