use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Main configuration structure for the gateway
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Outbound transport configuration shared by every provider
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Google PaLM configuration
    #[serde(default)]
    pub palm: PalmConfig,
    /// Google Bard (ask about image) configuration
    #[serde(default)]
    pub bard: BardConfig,
    /// Xunfei Spark configuration
    #[serde(default)]
    pub spark: SparkConfig,
}

impl Config {
    /// Parse a configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Read and parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Load the configuration from an explicit path, or from the first
    /// default location that exists, falling back to built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        for path in default_config_paths() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(&path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    [
        dirs::home_dir().map(|h| h.join(".aoe-gateway").join("config.toml")),
        dirs::config_dir().map(|c| c.join("aoe-gateway").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:10099")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:10099".to_string()
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Process-wide default timeout in seconds. Applies to the whole call for
    /// one-shot requests and to each read for streaming requests.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Max idle pooled connections per host
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

/// Google PaLM API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PalmConfig {
    /// Base URL of the generative language API
    #[serde(default = "default_palm_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_palm_api_key_env")]
    pub api_key_env: String,
    /// Model used by the chat endpoint
    #[serde(default = "default_palm_chat_model")]
    pub chat_model: String,
    /// Model used by the text endpoint
    #[serde(default = "default_palm_text_model")]
    pub text_model: String,
}

impl PalmConfig {
    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

impl Default for PalmConfig {
    fn default() -> Self {
        Self {
            base_url: default_palm_base_url(),
            api_key_env: default_palm_api_key_env(),
            chat_model: default_palm_chat_model(),
            text_model: default_palm_text_model(),
        }
    }
}

fn default_palm_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_palm_api_key_env() -> String {
    "PALM_API_KEY".to_string()
}

fn default_palm_chat_model() -> String {
    "chat-bison-001".to_string()
}

fn default_palm_text_model() -> String {
    "text-bison-001".to_string()
}

/// Bard ask-about-image relay configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BardConfig {
    /// Relay endpoint accepting a multipart question + image (empty = disabled)
    #[serde(default)]
    pub url: String,
}

/// Xunfei Spark configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SparkConfig {
    /// Streaming chat endpoint (empty = disabled)
    #[serde(default)]
    pub url: String,
    /// Application id sent in every frame header
    #[serde(default)]
    pub app_id: String,
    /// Model domain, e.g. "generalv2"
    #[serde(default = "default_spark_domain")]
    pub domain: String,
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            app_id: String::new(),
            domain: default_spark_domain(),
        }
    }
}

fn default_spark_domain() -> String {
    "generalv2".to_string()
}
