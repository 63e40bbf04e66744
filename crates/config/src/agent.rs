//! Per-call session and dialogue configuration

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Call session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// End the call after this long without caller speech
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// Hard cap on call length
    #[serde(default = "default_max_call_duration")]
    pub max_call_duration_secs: u64,

    /// Reconnect attempts when the transcription stream drops
    #[serde(default = "default_stt_reconnects")]
    pub stt_reconnect_attempts: u32,

    /// Controller timer resolution
    #[serde(default = "default_tick")]
    pub tick_ms: u64,

    /// Maximum concurrent calls handled by one process
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_idle_timeout() -> u64 {
    8000
}
fn default_max_call_duration() -> u64 {
    900
}
fn default_stt_reconnects() -> u32 {
    1
}
fn default_tick() -> u64 {
    50
}
fn default_max_sessions() -> usize {
    100
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_ms < 1000 {
            return Err(ConfigError::invalid(
                "session.idle_timeout_ms",
                "idle timeout must be at least 1000ms",
            ));
        }
        if self.tick_ms == 0 || self.tick_ms > 500 {
            return Err(ConfigError::invalid("session.tick_ms", "must be 1-500ms"));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout(),
            max_call_duration_secs: default_max_call_duration(),
            stt_reconnect_attempts: default_stt_reconnects(),
            tick_ms: default_tick(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Dialogue policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Failed attempts per field before the answer is accepted unverified
    #[serde(default = "default_max_retries")]
    pub max_field_retries: u32,

    /// Wait before the single backend retry
    #[serde(default = "default_backoff")]
    pub backend_retry_backoff_ms: u64,

    /// Per-request backend timeout
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_ms: u64,

    /// Conversation turns sent to the backend
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Practice name used in the greeting
    #[serde(default = "default_practice_name")]
    pub practice_name: String,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff() -> u64 {
    500
}
fn default_backend_timeout() -> u64 {
    6000
}
fn default_history_turns() -> usize {
    12
}
fn default_practice_name() -> String {
    "the medical office".to_string()
}

impl DialogueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_field_retries == 0 {
            return Err(ConfigError::invalid(
                "dialogue.max_field_retries",
                "at least one attempt is required",
            ));
        }
        Ok(())
    }
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_field_retries: default_max_retries(),
            backend_retry_backoff_ms: default_backoff(),
            backend_timeout_ms: default_backend_timeout(),
            history_turns: default_history_turns(),
            practice_name: default_practice_name(),
        }
    }
}
