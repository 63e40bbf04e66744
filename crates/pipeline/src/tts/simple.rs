//! Offline TTS producing silence
//!
//! Stands in for a real voice when no provider is configured. Output length
//! tracks text length so playback timing stays realistic.

use futures::stream::{self, StreamExt};

use intake_core::{AudioFrame, Direction, SynthesisError};

use super::{AudioStream, TtsProvider};

/// Milliseconds of audio per character of text
const MS_PER_CHAR: u32 = 50;
const FRAME_MS: u32 = 20;

pub struct SimpleTts {
    sample_rate: u32,
}

impl SimpleTts {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for SimpleTts {
    fn default() -> Self {
        Self::new(16000)
    }
}

#[async_trait::async_trait]
impl TtsProvider for SimpleTts {
    async fn synthesize(&self, text: &str) -> Result<AudioStream, SynthesisError> {
        let total_ms = text.chars().count() as u32 * MS_PER_CHAR;
        let frames = total_ms.div_ceil(FRAME_MS);
        let rate = self.sample_rate;
        Ok(stream::iter(0..frames)
            .map(move |_| Ok(AudioFrame::silence(Direction::Outbound, rate, FRAME_MS)))
            .boxed())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "simple"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_length_tracks_text() {
        let tts = SimpleTts::default();
        let frames: Vec<_> = tts.synthesize("hello").await.unwrap().collect().await;
        // 5 chars * 50ms = 250ms -> 13 frames of 20ms
        assert_eq!(frames.len(), 13);
        assert!(frames.iter().all(|f| f.as_ref().unwrap().len() == 320));
    }
}
