//! Transcript types for STT output

use serde::{Deserialize, Serialize};

/// Transcript result from STT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// Transcribed text
    pub text: String,

    /// Is this a final result?
    pub is_final: bool,

    /// Provider marked the end of the speaker's turn
    #[serde(default)]
    pub speech_final: bool,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Start time offset (ms from stream start)
    pub start_time_ms: u64,

    /// End time offset (ms from stream start)
    pub end_time_ms: u64,
}

impl TranscriptResult {
    /// Create a new transcript result
    pub fn new(text: impl Into<String>, is_final: bool, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final,
            speech_final: false,
            confidence,
            start_time_ms: 0,
            end_time_ms: 0,
        }
    }

    /// Create a partial (non-final) transcript
    pub fn partial(text: impl Into<String>, confidence: f32) -> Self {
        Self::new(text, false, confidence)
    }

    /// Create a final transcript
    pub fn final_result(text: impl Into<String>, confidence: f32) -> Self {
        Self::new(text, true, confidence)
    }

    /// Set time range
    pub fn with_time_range(mut self, start_ms: u64, end_ms: u64) -> Self {
        self.start_time_ms = start_ms;
        self.end_time_ms = end_ms;
        self
    }

    /// Mark as end of turn
    pub fn with_speech_final(mut self) -> Self {
        self.is_final = true;
        self.speech_final = true;
        self
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.end_time_ms.saturating_sub(self.start_time_ms)
    }

    /// Check if transcript is empty
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Get word count
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

impl Default for TranscriptResult {
    fn default() -> Self {
        Self::new(String::new(), false, 0.0)
    }
}
