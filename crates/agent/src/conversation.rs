//! Conversation history
//!
//! Ordered record of every finalized utterance in a call. Agent turns carry
//! their delivery status so an interrupted prompt is not mistaken for one
//! the caller heard.

use intake_core::{Speaker, Utterance};
use intake_llm::Message;
use serde::Serialize;

/// Whether an agent utterance reached the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Queued or still playing
    Pending,
    /// Playback finished
    Delivered,
    /// Cut off by barge-in
    Interrupted,
    /// Synthesis failed, fallback audio played instead
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub utterance: Utterance,
    /// Always `Delivered` for caller turns
    pub delivery: DeliveryStatus,
}

/// Reason the conversation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Intake confirmed
    Completed,
    /// Caller hung up or the carrier stopped the stream
    CallerHangup,
    /// No caller speech for the idle timeout
    IdleTimeout,
    /// Maximum call duration reached
    MaxDuration,
    /// Transcription could not be recovered
    TranscriptionFailed,
    /// Server shutting down
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::CallerHangup => "caller_hangup",
            EndReason::IdleTimeout => "idle_timeout",
            EndReason::MaxDuration => "max_duration",
            EndReason::TranscriptionFailed => "transcription_failed",
            EndReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Default)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_caller(&mut self, utterance: Utterance) {
        self.entries.push(HistoryEntry {
            utterance,
            delivery: DeliveryStatus::Delivered,
        });
    }

    pub fn push_agent(&mut self, utterance: Utterance) {
        self.entries.push(HistoryEntry {
            utterance,
            delivery: DeliveryStatus::Pending,
        });
    }

    /// Update the delivery status of an agent utterance. A final status is
    /// never downgraded back to pending or overwritten by a late mark.
    pub fn mark(&mut self, id: u64, status: DeliveryStatus) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.utterance.id == id && e.utterance.speaker == Speaker::Agent)
        else {
            return false;
        };
        if entry.delivery != DeliveryStatus::Pending {
            return false;
        }
        entry.delivery = status;
        true
    }

    pub fn delivery(&self, id: u64) -> Option<DeliveryStatus> {
        self.entries
            .iter()
            .find(|e| e.utterance.id == id)
            .map(|e| e.delivery)
    }

    /// Most recent agent utterance
    pub fn last_agent(&self) -> Option<&Utterance> {
        self.entries
            .iter()
            .rev()
            .map(|e| &e.utterance)
            .find(|u| u.speaker == Speaker::Agent)
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Backend context for the last `limit` turns. Agent turns the caller
    /// did not hear in full are annotated.
    pub fn to_messages(&self, limit: usize) -> Vec<Message> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries[start..]
            .iter()
            .map(|entry| match entry.utterance.speaker {
                Speaker::Caller => Message::user(&entry.utterance.text),
                Speaker::Agent => match entry.delivery {
                    DeliveryStatus::Interrupted => {
                        Message::assistant(format!("{} [interrupted by caller]", entry.utterance.text))
                    }
                    DeliveryStatus::Failed => {
                        Message::assistant(format!("{} [not heard by caller]", entry.utterance.text))
                    }
                    DeliveryStatus::Pending | DeliveryStatus::Delivered => {
                        Message::assistant(&entry.utterance.text)
                    }
                },
            })
            .collect()
    }
}
