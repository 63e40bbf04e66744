//! Audio pipeline configuration

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Telephony wire format
    #[serde(default)]
    pub telephony: TelephonyConfig,

    /// Transcript aggregation / endpointing
    #[serde(default)]
    pub transcript: TranscriptConfig,

    /// Barge-in configuration
    #[serde(default)]
    pub barge_in: BargeInConfig,

    /// Speech synthesis
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.telephony.validate()?;
        self.transcript.validate()?;
        self.barge_in.validate()?;
        Ok(())
    }
}

/// Telephony stream format and frame handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Wire sample rate (μ-law is 8 kHz)
    #[serde(default = "default_telephony_rate")]
    pub sample_rate: u32,

    /// Outbound wire frame duration in milliseconds
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    /// Sample rate expected by the speech providers
    #[serde(default = "default_provider_rate")]
    pub provider_sample_rate: u32,

    /// Provider frame duration in milliseconds
    #[serde(default = "default_frame_ms")]
    pub provider_frame_ms: u32,

    /// Largest accepted inbound payload after base64 decoding
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,

    /// Frames held back waiting for a missing sequence number
    #[serde(default = "default_reorder_window")]
    pub reorder_window: usize,
}

fn default_telephony_rate() -> u32 {
    8000
}
fn default_frame_ms() -> u32 {
    20
}
fn default_provider_rate() -> u32 {
    16000
}
fn default_max_payload() -> usize {
    // one second of 8 kHz μ-law
    8000
}
fn default_reorder_window() -> usize {
    8
}

const SUPPORTED_RATES: [u32; 4] = [8000, 16000, 24000, 48000];

impl TelephonyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_RATES.contains(&self.sample_rate) {
            return Err(ConfigError::invalid(
                "pipeline.telephony.sample_rate",
                format!("unsupported rate {}", self.sample_rate),
            ));
        }
        if !SUPPORTED_RATES.contains(&self.provider_sample_rate) {
            return Err(ConfigError::invalid(
                "pipeline.telephony.provider_sample_rate",
                format!("unsupported rate {}", self.provider_sample_rate),
            ));
        }
        for (field, ms) in [
            ("pipeline.telephony.frame_ms", self.frame_ms),
            ("pipeline.telephony.provider_frame_ms", self.provider_frame_ms),
        ] {
            if !(10..=60).contains(&ms) {
                return Err(ConfigError::invalid(field, "frame duration must be 10-60ms"));
            }
        }
        Ok(())
    }

    /// Samples per outbound wire frame
    pub fn wire_frame_samples(&self) -> usize {
        (self.sample_rate * self.frame_ms / 1000) as usize
    }

    /// Samples per provider frame
    pub fn provider_frame_samples(&self) -> usize {
        (self.provider_sample_rate * self.provider_frame_ms / 1000) as usize
    }
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_telephony_rate(),
            frame_ms: default_frame_ms(),
            provider_sample_rate: default_provider_rate(),
            provider_frame_ms: default_frame_ms(),
            max_payload_bytes: default_max_payload(),
            reorder_window: default_reorder_window(),
        }
    }
}

/// Transcript aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    /// Trailing silence after the last partial before the turn is closed
    #[serde(default = "default_endpoint_silence")]
    pub endpoint_silence_ms: u64,

    /// How long a provider final may still win after the silence timeout
    #[serde(default = "default_final_grace")]
    pub final_grace_ms: u64,
}

fn default_endpoint_silence() -> u64 {
    900
}
fn default_final_grace() -> u64 {
    250
}

impl TranscriptConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_silence_ms < 100 {
            return Err(ConfigError::invalid(
                "pipeline.transcript.endpoint_silence_ms",
                "minimum 100ms",
            ));
        }
        if self.final_grace_ms >= self.endpoint_silence_ms {
            return Err(ConfigError::invalid(
                "pipeline.transcript.final_grace_ms",
                "grace window must be shorter than the endpoint timeout",
            ));
        }
        Ok(())
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            endpoint_silence_ms: default_endpoint_silence(),
            final_grace_ms: default_final_grace(),
        }
    }
}

/// Barge-in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInConfig {
    /// Enable barge-in
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum partial confidence
    #[serde(default = "default_barge_in_confidence")]
    pub min_confidence: f32,

    /// Minimum partial length in characters (ignores coughs and "uh")
    #[serde(default = "default_barge_in_chars")]
    pub min_chars: usize,
}

fn default_true() -> bool {
    true
}
fn default_barge_in_confidence() -> f32 {
    0.6
}
fn default_barge_in_chars() -> usize {
    4
}

impl BargeInConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::invalid(
                "pipeline.barge_in.min_confidence",
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: default_barge_in_confidence(),
            min_chars: default_barge_in_chars(),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Longest text sent to the provider in one request
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// μ-law file played when synthesis fails. A generated tone is used when unset.
    #[serde(default)]
    pub fallback_audio_path: Option<String>,
}

fn default_max_chunk_chars() -> usize {
    220
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            fallback_audio_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_samples() {
        let cfg = TelephonyConfig::default();
        assert_eq!(cfg.wire_frame_samples(), 160);
        assert_eq!(cfg.provider_frame_samples(), 320);
    }

    #[test]
    fn test_grace_must_be_shorter_than_endpoint() {
        let mut cfg = TranscriptConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.final_grace_ms = cfg.endpoint_silence_ms;
        assert!(cfg.validate().is_err());
    }
}
