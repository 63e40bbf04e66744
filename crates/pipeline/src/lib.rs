//! Speech pipeline for the intake agent
//!
//! This crate provides the per-call speech components:
//! - Streaming Speech-to-Text provider sessions
//! - Transcript aggregation with silence endpointing and barge-in detection
//! - Streaming Text-to-Speech with sentence chunking and cancellation

pub mod stt;
pub mod tts;
pub mod turn_detection;

// STT exports
pub use stt::{ChannelStt, DeepgramStt, SttEvent, SttHandle, SttProvider, SttStream};

// Turn detection exports
pub use turn_detection::{AggregatorConfig, AggregatorEvent, AggregatorState, TranscriptAggregator};

// TTS exports
pub use tts::{
    AudioStream, CancelHandle, CartesiaTts, ChunkerConfig, SentenceChunker, SimpleTts,
    SpeechStreamer, SynthesisStream, TextChunk, TtsProvider,
};

use intake_core::{SynthesisError, TranscriptStreamError};
use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("STT error: {0}")]
    Stt(#[from] TranscriptStreamError),

    #[error("TTS error: {0}")]
    Tts(#[from] SynthesisError),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for intake_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Stt(e) => intake_core::Error::TranscriptStream(e),
            PipelineError::Tts(e) => intake_core::Error::Synthesis(e),
            other => intake_core::Error::Config(other.to_string()),
        }
    }
}
