//! Streaming Speech-to-Text
//!
//! A provider opens one streaming session per call. Audio goes in through a
//! channel and transcript events come back through another, so a slow
//! provider never blocks the call's inbound audio path.

mod channel;
mod deepgram;

pub use channel::{ChannelStt, SttHandle};
pub use deepgram::DeepgramStt;

use tokio::sync::mpsc;

use intake_core::{AudioFrame, TranscriptResult, TranscriptStreamError};

/// Output of a streaming STT session
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    Transcript(TranscriptResult),
    /// The session failed; no further events follow
    Error(TranscriptStreamError),
}

/// One open streaming session
pub struct SttStream {
    /// PCM frames at the requested sample rate
    pub audio: mpsc::Sender<AudioFrame>,
    /// Transcripts. Channel closure means the session is gone.
    pub events: mpsc::Receiver<SttEvent>,
}

/// STT provider trait
#[async_trait::async_trait]
pub trait SttProvider: Send + Sync {
    /// Open a streaming session for 16-bit mono PCM at `sample_rate`
    async fn connect(&self, sample_rate: u32) -> Result<SttStream, TranscriptStreamError>;

    /// Provider name for logs
    fn name(&self) -> &str;
}
