//! Streaming Text-to-Speech
//!
//! Features:
//! - Sentence chunking for early audio emission
//! - Lazy per-chunk synthesis, abandoned immediately on cancellation
//! - Multiple backend support (Cartesia, simple/offline)

mod cartesia;
mod chunker;
mod simple;
mod streaming;

pub use cartesia::CartesiaTts;
pub use chunker::{ChunkerConfig, SentenceChunker, TextChunk};
pub use simple::SimpleTts;
pub use streaming::{CancelHandle, SpeechStreamer, SynthesisStream};

use futures::stream::BoxStream;

use intake_core::{AudioFrame, SynthesisError};

/// Frames of synthesized audio, produced lazily
pub type AudioStream = BoxStream<'static, Result<AudioFrame, SynthesisError>>;

/// TTS provider trait
#[async_trait::async_trait]
pub trait TtsProvider: Send + Sync {
    /// Start synthesizing `text`. Audio is pulled from the returned stream;
    /// dropping the stream abandons the request.
    async fn synthesize(&self, text: &str) -> Result<AudioStream, SynthesisError>;

    /// Sample rate of produced frames
    fn sample_rate(&self) -> u32;

    /// Provider name for logs
    fn name(&self) -> &str;
}
