//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults, then applies
//!     environment overrides on top.
//!
//! structure:
//!     - ServerConfig: listen address, allowed origins, optional static dir.
//!     - StoreConfig: reading store connection string.
//!     - BroadcastConfig: per-viewer queue depth.
//!     - ActuatorConfig: where control commands are forwarded.
//!     - MockConfig: development reading generator.
//!     - LoggingConfig: level and output format.
//!
//! environment overrides:
//!     PORT, DATABASE_URL, ALLOWED_ORIGINS, STATIC_DIR, ACTUATOR_ENDPOINT,
//!     MOCK_DATA, LOG_LEVEL, LOG_FORMAT
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub broadcast: BroadcastConfig,
    pub actuator: ActuatorConfig,
    pub mock: MockConfig,
    pub logging: LoggingConfig,
    /// file the configuration was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// origins allowed for http and websocket. "*" allows any.
    pub allowed_origins: Vec<String>,
    /// dashboard bundle served for non-api paths
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConfig {
    pub viewer_queue: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ActuatorConfig {
    /// http endpoint of the actuator node. unset = log only.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MockConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            allowed_origins: vec!["*".to_string()],
            static_dir: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { url: "sqlite://hydroponics.sqlite".to_string() }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { viewer_queue: crate::broadcast::DEFAULT_VIEWER_QUEUE }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self { endpoint: None, timeout_ms: 2_000 }
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self { enabled: false, interval_seconds: 5 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let mut config: HubConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        config.source = Some(path.as_ref().to_path_buf());

        Ok(config)
    }

    /// Load the first config file found, else defaults, then the environment.
    /// a config file that exists but does not parse is an error.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let paths = [
            PathBuf::from("config").join("hub.toml"),
            PathBuf::from("..").join("config").join("hub.toml"),
        ];

        let mut config = match paths.iter().find(|p| p.exists()) {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// apply overrides from an environment-style lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            self.store.url = url;
        }
        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
            if !origins.is_empty() {
                self.server.allowed_origins = origins;
            }
        }
        if let Some(dir) = lookup("STATIC_DIR").filter(|v| !v.trim().is_empty()) {
            self.server.static_dir = Some(PathBuf::from(dir));
        }
        if let Some(endpoint) = lookup("ACTUATOR_ENDPOINT") {
            self.actuator.endpoint = Some(endpoint).filter(|e| !e.trim().is_empty());
        }
        if let Some(enabled) = lookup("MOCK_DATA").as_deref().and_then(parse_bool) {
            self.mock.enabled = enabled;
        }
        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
        match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            Some("json") => self.logging.format = LogFormat::Json,
            Some("text") => self.logging.format = LogFormat::Text,
            _ => {}
        }
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        match &self.source {
            Some(path) => tracing::info!(path = %path.display(), "configuration loaded"),
            None => tracing::warn!("no config file found, using defaults"),
        }
        tracing::info!(
            listen = %format!("{}:{}", self.server.host, self.server.port),
            store = %self.store.url,
            origins = %self.server.allowed_origins.join(","),
            actuator = self.actuator.endpoint.as_deref().unwrap_or("log only"),
            mock = self.mock.enabled,
            "hub configuration"
        );
    }
}
