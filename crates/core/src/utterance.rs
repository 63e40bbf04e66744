//! Finalized utterances

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Who spoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    Agent,
}

/// A complete turn of speech. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Per-call monotonic id
    pub id: u64,
    pub speaker: Speaker,
    pub text: String,
    /// Offsets from stream start in milliseconds
    pub start_ms: u64,
    pub end_ms: u64,
    /// STT confidence, caller utterances only
    pub confidence: Option<f32>,
}

impl Utterance {
    /// A finalized caller utterance
    pub fn caller(id: u64, text: impl Into<String>, start_ms: u64, end_ms: u64, confidence: f32) -> Self {
        Self {
            id,
            speaker: Speaker::Caller,
            text: text.into(),
            start_ms,
            end_ms,
            confidence: Some(confidence),
        }
    }

    /// An agent utterance. Timing is filled in once playback is known.
    pub fn agent(id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            speaker: Speaker::Agent,
            text: text.into(),
            start_ms: 0,
            end_ms: 0,
            confidence: None,
        }
    }

    pub fn is_caller(&self) -> bool {
        self.speaker == Speaker::Caller
    }
}

/// Shared id source so caller and agent utterances of one call form a
/// single ordered sequence
#[derive(Debug, Clone, Default)]
pub struct UtteranceIds(Arc<AtomicU64>);

impl UtteranceIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_shared_between_clones() {
        let ids = UtteranceIds::new();
        let other = ids.clone();
        assert_eq!(ids.next(), 1);
        assert_eq!(other.next(), 2);
        assert_eq!(ids.next(), 3);
    }
}
