//! Core types for the intake voice agent
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frames exchanged with the telephony stream and speech providers
//! - Transcript results from speech-to-text
//! - Finalized utterances and call session metadata
//! - The error taxonomy shared by every component

pub mod audio;
pub mod call;
pub mod error;
pub mod transcript;
pub mod utterance;

pub use audio::{AudioFrame, Direction};
pub use call::{CallSession, SessionState};
pub use error::{
    DialogueBackendError, Error, FrameDecodeError, Result, SynthesisError,
    TranscriptStreamError, ValidationError,
};
pub use transcript::TranscriptResult;
pub use utterance::{Speaker, Utterance, UtteranceIds};
