//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{ConfigError, DialogueConfig, PipelineConfig, ProvidersConfig, SessionConfig};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Audio pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Per-call limits
    #[serde(default)]
    pub session: SessionConfig,

    /// Dialogue policy configuration
    #[serde(default)]
    pub dialogue: DialogueConfig,

    /// External provider settings
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.session.validate()?;
        self.dialogue.validate()?;

        if self.server.ws_path.is_empty() || !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "server.ws_path",
                "must be an absolute path",
            ));
        }

        if let Some(path) = &self.pipeline.synthesis.fallback_audio_path {
            if !Path::new(path).is_file() {
                tracing::warn!("Fallback audio not found: {}, a generated tone will be used", path);
            }
        }

        self.providers.warn_missing_credentials();
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public host name the carrier reaches us on (tunnel or load balancer).
    /// Falls back to the request's Host header.
    #[serde(default)]
    pub public_host: Option<String>,

    /// WebSocket path for the media stream
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Point the carrier at a local loopback stream instead of the public host
    #[serde(default)]
    pub testing: bool,

    /// Seconds the call is held open after the stream is requested
    #[serde(default = "default_pause")]
    pub stream_pause_secs: u32,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_pause() -> u32 {
    40
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: None,
            ws_path: default_ws_path(),
            testing: false,
            stream_pause_secs: default_pause(),
            cors_enabled: default_true(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (INTAKE_AGENT__ prefix, `__` separated)
/// 2. The explicit config file, if given
/// 3. config/default.{toml,yaml}
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("INTAKE_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
