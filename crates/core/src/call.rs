//! Call session metadata and lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Stream opened, waiting for the carrier's start message
    Connecting,
    /// Audio flowing both ways
    Active,
    /// Caller interrupted agent speech
    BargeIn,
    /// Playing the final utterance before hangup
    Closing,
    /// Resources released
    Closed,
}

impl SessionState {
    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Connecting, Active) => true,
            (Active, BargeIn) | (BargeIn, Active) => true,
            (Connecting | Active | BargeIn, Closing) => true,
            (Closed, _) => false,
            (_, Closed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

/// One phone call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    /// Locally assigned session id
    pub id: String,

    /// Carrier stream id, known after the start message
    pub stream_sid: Option<String>,

    /// Carrier call id
    pub call_sid: Option<String>,

    pub state: SessionState,

    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stream_sid: None,
            call_sid: None,
            state: SessionState::Connecting,
            created_at: Utc::now(),
        }
    }

    /// Record the carrier's identifiers and go Active
    pub fn start(&mut self, stream_sid: impl Into<String>, call_sid: Option<String>) -> Result<()> {
        self.stream_sid = Some(stream_sid.into());
        self.call_sid = call_sid;
        self.transition(SessionState::Active)
    }

    pub fn transition(&mut self, to: SessionState) -> Result<()> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidSessionTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Seconds since the stream opened
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}
