//! Configuration management for the intake agent
//!
//! Supports loading configuration from:
//! - YAML/TOML files
//! - Environment variables (INTAKE_AGENT__ prefix)
//!
//! Settings are loaded once at startup and shared read-only with every call.

pub mod agent;
pub mod pipeline;
pub mod providers;
pub mod settings;

pub use agent::{DialogueConfig, SessionConfig};
pub use pipeline::{BargeInConfig, PipelineConfig, SynthesisConfig, TelephonyConfig, TranscriptConfig};
pub use providers::{
    AddressProviderConfig, EmailProviderConfig, LlmProviderConfig, ProvidersConfig, SttProviderConfig,
    TtsProviderConfig,
};
pub use settings::{load_settings, ObservabilityConfig, ServerConfig, Settings};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
