//! Frame codec between the telephony wire and the speech providers
//!
//! Inbound: base64 μ-law at the wire rate -> PCM16 frames at the provider
//! rate. Outbound: PCM16 at any rate -> fixed-size base64 μ-law wire frames.
//! Frame sizes on either side need not line up, so each direction keeps a
//! remainder buffer that is prepended to the next input.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use intake_config::TelephonyConfig;
use intake_core::{AudioFrame, Direction, FrameDecodeError};

use crate::codec::{MulawCodec, Resampler, StreamResampler};
use crate::protocol::MediaPayload;

/// Frame geometry for one call
#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub wire_rate: u32,
    pub wire_frame_samples: usize,
    pub provider_rate: u32,
    pub provider_frame_samples: usize,
    pub max_payload_bytes: usize,
}

impl From<&TelephonyConfig> for CodecConfig {
    fn from(cfg: &TelephonyConfig) -> Self {
        Self {
            wire_rate: cfg.sample_rate,
            wire_frame_samples: cfg.wire_frame_samples(),
            provider_rate: cfg.provider_sample_rate,
            provider_frame_samples: cfg.provider_frame_samples(),
            max_payload_bytes: cfg.max_payload_bytes,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::from(&TelephonyConfig::default())
    }
}

/// Per-call frame codec
pub struct FrameCodec {
    config: CodecConfig,
    inbound_resampler: Resampler,
    inbound_remainder: Vec<i16>,
    inbound_sequence: u64,
    inbound_samples: u64,
    outbound_resampler: Option<StreamResampler>,
    outbound_remainder: Vec<i16>,
    outbound_sequence: u64,
}

impl FrameCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self {
            inbound_resampler: Resampler::new(config.wire_rate, config.provider_rate),
            config,
            inbound_remainder: Vec::new(),
            inbound_sequence: 0,
            inbound_samples: 0,
            outbound_resampler: None,
            outbound_remainder: Vec::new(),
            outbound_sequence: 0,
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Decode one inbound media payload into zero or more provider frames.
    ///
    /// Samples that do not fill a whole provider frame are kept for the next
    /// call. A malformed payload leaves the codec state untouched.
    pub fn decode_inbound(&mut self, media: &MediaPayload) -> Result<Vec<AudioFrame>, FrameDecodeError> {
        if let Some(track) = media.track.as_deref() {
            if !track.starts_with("inbound") {
                return Err(FrameDecodeError::WrongTrack(track.to_string()));
            }
        }

        let bytes = STANDARD
            .decode(media.payload.trim())
            .map_err(|e| FrameDecodeError::InvalidBase64(e.to_string()))?;

        if bytes.is_empty() {
            return Err(FrameDecodeError::EmptyPayload);
        }
        if bytes.len() > self.config.max_payload_bytes {
            return Err(FrameDecodeError::OversizedPayload {
                len: bytes.len(),
                max: self.config.max_payload_bytes,
            });
        }

        let pcm = MulawCodec::decode(&bytes);
        let resampled = self.inbound_resampler.resample(&pcm);
        self.inbound_remainder.extend_from_slice(&resampled);

        let frame_len = self.config.provider_frame_samples;
        let mut frames = Vec::with_capacity(self.inbound_remainder.len() / frame_len);
        while self.inbound_remainder.len() >= frame_len {
            let samples: Vec<i16> = self.inbound_remainder.drain(..frame_len).collect();
            let timestamp_ms = self.inbound_samples * 1000 / self.config.provider_rate as u64;
            self.inbound_samples += frame_len as u64;
            self.inbound_sequence += 1;
            frames.push(AudioFrame::new(
                self.inbound_sequence,
                Direction::Inbound,
                self.config.provider_rate,
                samples,
                timestamp_ms,
            ));
        }

        Ok(frames)
    }

    /// Samples waiting for a full inbound provider frame
    pub fn inbound_pending(&self) -> usize {
        self.inbound_remainder.len()
    }

    /// Encode synthesized PCM into base64 wire payloads of exactly one wire
    /// frame each. A trailing partial frame stays buffered, and so does the
    /// resampling phase.
    pub fn encode_outbound(&mut self, frame: &AudioFrame) -> Vec<String> {
        if self.outbound_resampler.as_ref().map(StreamResampler::from_rate) != Some(frame.sample_rate) {
            self.outbound_resampler = Some(StreamResampler::new(frame.sample_rate, self.config.wire_rate));
        }
        let pcm = match self.outbound_resampler.as_mut() {
            Some(resampler) => resampler.resample(&frame.samples),
            None => frame.samples.clone(),
        };
        self.outbound_remainder.extend_from_slice(&pcm);

        let frame_len = self.config.wire_frame_samples;
        let mut payloads = Vec::with_capacity(self.outbound_remainder.len() / frame_len);
        while self.outbound_remainder.len() >= frame_len {
            let chunk: Vec<i16> = self.outbound_remainder.drain(..frame_len).collect();
            payloads.push(self.wire_payload(&chunk));
        }
        payloads
    }

    /// Emit the buffered outbound remainder padded with silence. Call at the
    /// end of an utterance.
    pub fn flush_outbound(&mut self) -> Option<String> {
        self.outbound_resampler = None;
        if self.outbound_remainder.is_empty() {
            return None;
        }
        let mut chunk = std::mem::take(&mut self.outbound_remainder);
        chunk.resize(self.config.wire_frame_samples, 0);
        Some(self.wire_payload(&chunk))
    }

    /// Drop the buffered outbound remainder after a cancellation. Returns
    /// the number of samples discarded.
    pub fn discard_outbound(&mut self) -> usize {
        self.outbound_resampler = None;
        let dropped = self.outbound_remainder.len();
        if dropped > 0 {
            tracing::debug!(samples = dropped, "Discarding partial outbound frame");
        }
        self.outbound_remainder.clear();
        dropped
    }

    /// Wire frames produced so far
    pub fn outbound_frames(&self) -> u64 {
        self.outbound_sequence
    }

    /// Encode pre-recorded μ-law audio into wire payloads
    pub fn frame_mulaw(&self, mulaw: &[u8]) -> Vec<String> {
        let frame_len = self.config.wire_frame_samples;
        mulaw
            .chunks(frame_len)
            .map(|chunk| {
                let mut chunk = chunk.to_vec();
                chunk.resize(frame_len, MulawCodec::silence_byte());
                STANDARD.encode(chunk)
            })
            .collect()
    }

    fn wire_payload(&mut self, pcm: &[i16]) -> String {
        self.outbound_sequence += 1;
        STANDARD.encode(MulawCodec::encode(pcm))
    }
}
