//! Cartesia text-to-speech over HTTP
//!
//! Requests raw little-endian PCM and re-frames the response body into
//! fixed 20ms frames as bytes arrive.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Duration;

use intake_config::TtsProviderConfig;
use intake_core::{AudioFrame, Direction, SynthesisError};

use super::{AudioStream, TtsProvider};
use crate::PipelineError;

const FRAME_MS: usize = 20;

pub struct CartesiaTts {
    client: reqwest::Client,
    config: TtsProviderConfig,
    api_key: String,
    sample_rate: u32,
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: Voice<'a>,
    output_format: OutputFormat,
    language: &'a str,
}

#[derive(Serialize)]
struct Voice<'a> {
    mode: &'a str,
    id: &'a str,
}

#[derive(Serialize)]
struct OutputFormat {
    container: &'static str,
    encoding: &'static str,
    sample_rate: u32,
}

impl CartesiaTts {
    pub fn new(config: &TtsProviderConfig, sample_rate: u32) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| PipelineError::NotConfigured("providers.tts.api_key".to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| PipelineError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key,
            sample_rate,
        })
    }
}

#[async_trait::async_trait]
impl TtsProvider for CartesiaTts {
    async fn synthesize(&self, text: &str) -> Result<AudioStream, SynthesisError> {
        let body = TtsRequest {
            model_id: &self.config.model_id,
            transcript: text,
            voice: Voice {
                mode: "id",
                id: &self.config.voice_id,
            },
            output_format: OutputFormat {
                container: "raw",
                encoding: "pcm_s16le",
                sample_rate: self.sample_rate,
            },
            language: "en",
        };

        let response = self
            .client
            .post(&self.config.url)
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", &self.config.api_version)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SynthesisError::Timeout(self.config.timeout_ms)
                } else {
                    SynthesisError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let frame_bytes = self.sample_rate as usize * FRAME_MS / 1000 * 2;
        let rate = self.sample_rate;
        Ok(frame_pcm_stream(response.bytes_stream(), frame_bytes, rate))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "cartesia"
    }
}

/// Re-frame a byte stream of PCM16 into fixed-size frames. The final short
/// frame is emitted as is.
fn frame_pcm_stream<S, E>(body: S, frame_bytes: usize, sample_rate: u32) -> AudioStream
where
    S: futures::Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display,
{
    struct State<S> {
        body: std::pin::Pin<Box<S>>,
        buffer: BytesMut,
        done: bool,
    }

    let state = State {
        body: Box::pin(body),
        buffer: BytesMut::new(),
        done: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if state.buffer.len() >= frame_bytes {
                let chunk = state.buffer.split_to(frame_bytes);
                let frame = pcm_frame(&chunk, sample_rate);
                return Some((Ok(frame), state));
            }
            if state.done {
                if state.buffer.len() >= 2 {
                    let chunk = state.buffer.split();
                    return Some((Ok(pcm_frame(&chunk, sample_rate)), state));
                }
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.done = true;
                    state.buffer.clear();
                    return Some((Err(SynthesisError::Stream(e.to_string())), state));
                }
                None => state.done = true,
            }
        }
    })
    .boxed()
}

fn pcm_frame(bytes: &[u8], sample_rate: u32) -> AudioFrame {
    AudioFrame::new(
        0,
        Direction::Outbound,
        sample_rate,
        AudioFrame::samples_from_le_bytes(bytes),
        0,
    )
}
