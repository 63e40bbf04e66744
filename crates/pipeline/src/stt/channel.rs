//! Channel-backed STT provider
//!
//! Each `connect` hands the session's far end to whoever holds the handle
//! receiver, which then plays the provider: it reads audio and pushes
//! transcripts. When nobody is listening the session stays open and silent,
//! which is how the agent runs without speech credentials.

use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

use intake_core::{AudioFrame, TranscriptResult, TranscriptStreamError};

use super::{SttEvent, SttProvider, SttStream};

/// Far end of one session
pub struct SttHandle {
    pub audio: mpsc::Receiver<AudioFrame>,
    pub events: mpsc::Sender<SttEvent>,
}

impl SttHandle {
    /// Push a transcript. Returns false once the session is gone.
    pub async fn send(&self, result: TranscriptResult) -> bool {
        self.events.send(SttEvent::Transcript(result)).await.is_ok()
    }

    /// Fail the session
    pub async fn fail(self, error: TranscriptStreamError) {
        let _ = self.events.send(SttEvent::Error(error)).await;
    }
}

pub struct ChannelStt {
    handles: mpsc::UnboundedSender<SttHandle>,
    failing_connects: AtomicU32,
}

impl ChannelStt {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SttHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                handles: tx,
                failing_connects: AtomicU32::new(0),
            },
            rx,
        )
    }

    /// Provider with no listener: sessions accept audio and never transcribe
    pub fn silent() -> Self {
        Self::new().0
    }

    /// Make the next `n` connection attempts fail
    pub fn fail_next_connects(&self, n: u32) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SttProvider for ChannelStt {
    async fn connect(&self, _sample_rate: u32) -> Result<SttStream, TranscriptStreamError> {
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(TranscriptStreamError::Connect("connection refused".to_string()));
        }

        let (audio_tx, audio_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(64);
        let handle = SttHandle {
            audio: audio_rx,
            events: event_tx,
        };

        if let Err(mpsc::error::SendError(mut handle)) = self.handles.send(handle) {
            // nobody listening: drain audio until the call drops its end
            tokio::spawn(async move {
                while handle.audio.recv().await.is_some() {}
            });
        }

        Ok(SttStream {
            audio: audio_tx,
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::Direction;

    #[tokio::test]
    async fn test_channel_session_round_trip() {
        let (stt, mut handles) = ChannelStt::new();
        let mut stream = stt.connect(16000).await.unwrap();
        let mut handle = handles.recv().await.unwrap();

        stream
            .audio
            .send(AudioFrame::silence(Direction::Inbound, 16000, 20))
            .await
            .unwrap();
        assert_eq!(handle.audio.recv().await.unwrap().len(), 320);

        assert!(handle.send(TranscriptResult::partial("hi", 0.9)).await);
        match stream.events.recv().await.unwrap() {
            SttEvent::Transcript(t) => assert_eq!(t.text, "hi"),
            other => panic!("unexpected {:?}", other),
        }

        drop(handle);
        assert!(stream.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_silent_sessions_stay_open() {
        let stt = ChannelStt::silent();
        let stream = stt.connect(16000).await.unwrap();
        assert!(stream
            .audio
            .send(AudioFrame::silence(Direction::Inbound, 16000, 20))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_failing_connects() {
        let stt = ChannelStt::silent();
        stt.fail_next_connects(1);
        assert!(stt.connect(16000).await.is_err());
        assert!(stt.connect(16000).await.is_ok());
    }
}
