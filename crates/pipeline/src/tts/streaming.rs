//! Speech synthesis streamer
//!
//! Turns one agent utterance into a lazy stream of audio frames. Chunks are
//! synthesized one at a time as the consumer pulls, so cancelling stops both
//! playback and any provider work not yet started.

use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use intake_core::{AudioFrame, SynthesisError};

use super::chunker::{ChunkerConfig, SentenceChunker};
use super::{AudioStream, TtsProvider};

/// Cancels one synthesis stream
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Audio for one utterance. Not resumable: once cancelled it only yields
/// `None`.
pub struct SynthesisStream {
    inner: AudioStream,
    cancel: CancelHandle,
}

impl SynthesisStream {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Stream for SynthesisStream {
    type Item = Result<AudioFrame, SynthesisError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.inner.as_mut().poll_next(cx)
    }
}

/// Streaming TTS front end shared by every call
#[derive(Clone)]
pub struct SpeechStreamer {
    provider: Arc<dyn TtsProvider>,
    chunker: ChunkerConfig,
}

impl SpeechStreamer {
    pub fn new(provider: Arc<dyn TtsProvider>, chunker: ChunkerConfig) -> Self {
        Self { provider, chunker }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn sample_rate(&self) -> u32 {
        self.provider.sample_rate()
    }

    /// Lazily synthesize `text`. Nothing is requested from the provider until
    /// the stream is polled.
    pub fn synthesize(&self, text: &str) -> SynthesisStream {
        let chunks = SentenceChunker::new(self.chunker.clone()).split(text);
        let provider = self.provider.clone();

        let inner = stream::iter(chunks)
            .then(move |chunk| {
                let provider = provider.clone();
                async move {
                    tracing::trace!(index = chunk.index, text = %chunk.text, "Synthesizing chunk");
                    provider.synthesize(&chunk.text).await
                }
            })
            .map(|result| match result {
                Ok(audio) => audio,
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .flatten()
            .scan(0u64, |sequence, item| {
                let item = item.map(|frame| {
                    *sequence += 1;
                    frame.with_sequence(*sequence)
                });
                futures::future::ready(Some(item))
            })
            .boxed();

        SynthesisStream {
            inner,
            cancel: CancelHandle::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::SimpleTts;
    use parking_lot::Mutex;

    /// Records which texts were requested
    struct RecordingTts {
        requests: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl TtsProvider for RecordingTts {
        async fn synthesize(&self, text: &str) -> Result<AudioStream, SynthesisError> {
            self.requests.lock().push(text.to_string());
            if self.fail {
                return Err(SynthesisError::Request("backend down".to_string()));
            }
            SimpleTts::new(8000).synthesize("ab").await
        }

        fn sample_rate(&self) -> u32 {
            8000
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn streamer(fail: bool) -> (SpeechStreamer, Arc<Mutex<Vec<String>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let provider = RecordingTts {
            requests: requests.clone(),
            fail,
        };
        (
            SpeechStreamer::new(Arc::new(provider), ChunkerConfig::default()),
            requests,
        )
    }

    #[tokio::test]
    async fn test_frames_numbered_across_chunks() {
        let (streamer, requests) = streamer(false);
        let frames: Vec<_> = streamer
            .synthesize("First sentence here. Second sentence here.")
            .collect()
            .await;
        // "ab" -> 100ms -> 5 frames per chunk
        assert_eq!(frames.len(), 10);
        let sequences: Vec<u64> = frames.iter().map(|f| f.as_ref().unwrap().sequence).collect();
        assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
        assert_eq!(requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_lazy_until_polled() {
        let (streamer, requests) = streamer(false);
        let stream = streamer.synthesize("Nothing requested yet.");
        assert!(requests.lock().is_empty());
        drop(stream);
        assert!(requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_stream_and_later_chunks() {
        let (streamer, requests) = streamer(false);
        let mut stream = streamer.synthesize("First sentence here. Second sentence here.");
        let cancel = stream.cancel_handle();

        assert!(stream.next().await.is_some());
        cancel.cancel();
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
        // second chunk never requested
        assert_eq!(requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_error_surfaces() {
        let (streamer, _) = streamer(true);
        let mut stream = streamer.synthesize("Hello there caller.");
        assert!(matches!(stream.next().await, Some(Err(SynthesisError::Request(_)))));
    }
}
