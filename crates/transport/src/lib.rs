//! Intake Agent Transport Layer
//!
//! Carrier media-stream plumbing:
//! - JSON protocol for the bidirectional stream
//! - G.711 μ-law codec and resampling
//! - Frame re-chunking between wire and provider formats
//! - Inbound sequence ordering and outbound pacing

pub mod codec;
pub mod frame_codec;
pub mod ordering;
pub mod pacing;
pub mod protocol;

pub use codec::{MulawCodec, Resampler, StreamResampler};
pub use frame_codec::{CodecConfig, FrameCodec};
pub use ordering::SequenceOrderer;
pub use pacing::Pacer;
pub use protocol::{
    DtmfDigit, MarkLabel, MediaFormat, MediaPayload, OutboundMedia, OutboundMessage,
    StartMetadata, StreamMessage,
};

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

/// Telephony audio encoding announced in the start message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// G.711 mu-law
    Pcmu,
    /// G.711 A-law
    Pcma,
}

impl AudioCodec {
    pub fn from_encoding(encoding: &str) -> Option<Self> {
        match encoding {
            "audio/x-mulaw" | "audio/pcmu" => Some(AudioCodec::Pcmu),
            "audio/x-alaw" | "audio/pcma" => Some(AudioCodec::Pcma),
            _ => None,
        }
    }
}

impl Default for AudioCodec {
    fn default() -> Self {
        Self::Pcmu
    }
}
