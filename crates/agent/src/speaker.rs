//! Outbound speech path
//!
//! One speaker task per call plays agent utterances strictly one at a time.
//! Synthesized audio is re-framed to wire frames and released at playback
//! speed, each frame tagged with the playback generation it belongs to. The
//! writer task drops anything from an older generation, so bumping the
//! generation on barge-in silences the agent within one frame.

use futures::StreamExt;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use intake_core::SynthesisError;
use intake_pipeline::SpeechStreamer;
use intake_transport::{FrameCodec, MulawCodec, OutboundMessage, Pacer};

/// How far ahead of real time frames are released
const PLAYBACK_LEAD: Duration = Duration::from_millis(60);

/// Current playback generation, shared by the controller, speaker and writer
#[derive(Debug, Clone, Default)]
pub struct PlaybackGate(Arc<AtomicU64>);

impl PlaybackGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    /// Invalidate everything queued or playing. Returns the new generation.
    pub fn cancel(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Item queued for the carrier
#[derive(Debug)]
pub(crate) enum WireItem {
    Media { generation: u64, payload: String },
    Mark { generation: u64, name: String },
    Clear,
}

#[derive(Debug)]
pub(crate) struct SpeakRequest {
    pub id: u64,
    pub text: String,
    /// Generation at the time the utterance was queued
    pub generation: u64,
}

#[derive(Debug)]
pub(crate) enum SpeakerEvent {
    Started(u64),
    /// Every frame plus the mark went out
    Finished { id: u64, frames: u64 },
    /// Dropped by barge-in before or during playback
    Interrupted(u64),
    /// Synthesis failed; fallback audio and the mark went out instead
    Failed { id: u64, error: SynthesisError },
}

pub fn mark_name(id: u64) -> String {
    format!("utt-{}", id)
}

pub fn parse_mark(name: &str) -> Option<u64> {
    name.strip_prefix("utt-")?.parse().ok()
}

/// Forward queued items to the carrier, skipping stale generations
pub(crate) fn spawn_writer(
    stream_sid: String,
    gate: PlaybackGate,
    mut items: mpsc::Receiver<WireItem>,
    outbound: mpsc::Sender<OutboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut dropped = 0u64;
            while let Some(item) = items.recv().await {
                let message = match item {
                    WireItem::Media { generation, payload } => {
                        if !gate.is_current(generation) {
                            dropped += 1;
                            continue;
                        }
                        OutboundMessage::media(&stream_sid, payload)
                    }
                    WireItem::Mark { generation, name } => {
                        if !gate.is_current(generation) {
                            continue;
                        }
                        OutboundMessage::mark(&stream_sid, name)
                    }
                    WireItem::Clear => OutboundMessage::clear(&stream_sid),
                };
                if outbound.send(message).await.is_err() {
                    tracing::debug!("Carrier stream closed, stopping writer");
                    break;
                }
            }
            if dropped > 0 {
                tracing::debug!(dropped, "Stale frames dropped by writer");
            }
        }
        .in_current_span(),
    )
}

pub(crate) struct Speaker {
    speech: SpeechStreamer,
    codec: FrameCodec,
    pacer: Pacer,
    gate: PlaybackGate,
    wire: mpsc::Sender<WireItem>,
    events: mpsc::Sender<SpeakerEvent>,
    fallback: Arc<[u8]>,
}

impl Speaker {
    pub fn new(
        speech: SpeechStreamer,
        codec: FrameCodec,
        frame: Duration,
        gate: PlaybackGate,
        wire: mpsc::Sender<WireItem>,
        events: mpsc::Sender<SpeakerEvent>,
        fallback: Arc<[u8]>,
    ) -> Self {
        Self {
            speech,
            codec,
            pacer: Pacer::new(frame, PLAYBACK_LEAD),
            gate,
            wire,
            events,
            fallback,
        }
    }

    pub fn spawn(mut self, mut requests: mpsc::UnboundedReceiver<SpeakRequest>) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                while let Some(request) = requests.recv().await {
                    let event = self.play(request).await;
                    if self.events.send(event).await.is_err() {
                        break;
                    }
                }
            }
            .in_current_span(),
        )
    }

    async fn play(&mut self, request: SpeakRequest) -> SpeakerEvent {
        let SpeakRequest { id, text, generation } = request;
        if !self.gate.is_current(generation) {
            return SpeakerEvent::Interrupted(id);
        }
        let _ = self.events.send(SpeakerEvent::Started(id)).await;

        self.pacer.reset();
        let mut stream = self.speech.synthesize(&text);
        let cancel = stream.cancel_handle();
        let mut frames = 0u64;

        while let Some(item) = stream.next().await {
            match item {
                Ok(frame) => {
                    for payload in self.codec.encode_outbound(&frame) {
                        if !self.send_media(generation, payload).await {
                            cancel.cancel();
                            self.codec.discard_outbound();
                            return SpeakerEvent::Interrupted(id);
                        }
                        frames += 1;
                    }
                }
                Err(error) => {
                    cancel.cancel();
                    tracing::warn!(
                        utterance_id = id,
                        provider = self.speech.provider_name(),
                        error = %error,
                        "Synthesis failed, playing fallback audio"
                    );
                    metrics::counter!("intake_agent_errors_total", "kind" => "synthesis").increment(1);
                    self.codec.discard_outbound();
                    if !self.play_fallback(generation).await || !self.finish(id, generation).await {
                        return SpeakerEvent::Interrupted(id);
                    }
                    return SpeakerEvent::Failed { id, error };
                }
            }
        }

        if let Some(payload) = self.codec.flush_outbound() {
            if !self.send_media(generation, payload).await {
                return SpeakerEvent::Interrupted(id);
            }
            frames += 1;
        }
        if !self.finish(id, generation).await {
            return SpeakerEvent::Interrupted(id);
        }
        metrics::counter!("intake_agent_outbound_frames_total").increment(frames);
        SpeakerEvent::Finished { id, frames }
    }

    async fn play_fallback(&mut self, generation: u64) -> bool {
        self.pacer.reset();
        let payloads = self.codec.frame_mulaw(&self.fallback);
        for payload in payloads {
            if !self.send_media(generation, payload).await {
                return false;
            }
        }
        true
    }

    /// Queue the end-of-utterance mark
    async fn finish(&mut self, id: u64, generation: u64) -> bool {
        if !self.gate.is_current(generation) {
            return false;
        }
        self.wire
            .send(WireItem::Mark {
                generation,
                name: mark_name(id),
            })
            .await
            .is_ok()
    }

    async fn send_media(&mut self, generation: u64, payload: String) -> bool {
        self.pacer.wait().await;
        if !self.gate.is_current(generation) {
            return false;
        }
        self.wire
            .send(WireItem::Media { generation, payload })
            .await
            .is_ok()
    }
}

/// Two short tones, used when no fallback recording is configured
pub fn fallback_chime(sample_rate: u32) -> Vec<u8> {
    let tone = |freq: f32, ms: u32| -> Vec<i16> {
        let samples = (sample_rate * ms / 1000) as usize;
        (0..samples)
            .map(|n| {
                let t = n as f32 / sample_rate as f32;
                (6000.0 * (2.0 * PI * freq * t).sin()) as i16
            })
            .collect()
    };
    let mut pcm = tone(660.0, 180);
    pcm.extend(std::iter::repeat(0).take((sample_rate / 20) as usize));
    pcm.extend(tone(440.0, 220));
    MulawCodec::encode(&pcm)
}

/// Raw μ-law recording at the wire rate, or the chime if none is readable
pub fn load_fallback_audio(path: Option<&str>, sample_rate: u32) -> Vec<u8> {
    let Some(path) = path else {
        return fallback_chime(sample_rate);
    };
    match std::fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => {
            tracing::info!(path, bytes = bytes.len(), "Loaded fallback audio");
            bytes
        }
        Ok(_) => {
            tracing::warn!(path, "Fallback audio file is empty, using chime");
            fallback_chime(sample_rate)
        }
        Err(e) => {
            tracing::warn!(path, error = %e, "Could not read fallback audio, using chime");
            fallback_chime(sample_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use intake_pipeline::{AudioStream, ChunkerConfig, SimpleTts, TtsProvider};
    use intake_transport::CodecConfig;

    struct BrokenTts;

    #[async_trait]
    impl TtsProvider for BrokenTts {
        async fn synthesize(&self, _text: &str) -> Result<AudioStream, SynthesisError> {
            Err(SynthesisError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    struct Harness {
        gate: PlaybackGate,
        requests: mpsc::UnboundedSender<SpeakRequest>,
        events: mpsc::Receiver<SpeakerEvent>,
        outbound: mpsc::Receiver<OutboundMessage>,
    }

    fn harness(tts: Arc<dyn TtsProvider>) -> Harness {
        let gate = PlaybackGate::new();
        let (wire_tx, wire_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(1024);
        let (event_tx, event_rx) = mpsc::channel(16);
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        spawn_writer("MZ1".to_string(), gate.clone(), wire_rx, out_tx);
        Speaker::new(
            SpeechStreamer::new(tts, ChunkerConfig::default()),
            FrameCodec::new(CodecConfig::default()),
            Duration::from_millis(20),
            gate.clone(),
            wire_tx,
            event_tx,
            Arc::from(fallback_chime(8000)),
        )
        .spawn(request_rx);

        Harness {
            gate,
            requests: request_tx,
            events: event_rx,
            outbound: out_rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_utterance_ends_with_mark() {
        let mut h = harness(Arc::new(SimpleTts::new(16000)));
        h.requests
            .send(SpeakRequest {
                id: 7,
                text: "Hello there.".to_string(),
                generation: h.gate.current(),
            })
            .unwrap();

        assert!(matches!(h.events.recv().await, Some(SpeakerEvent::Started(7))));
        let Some(SpeakerEvent::Finished { id, frames }) = h.events.recv().await else {
            panic!("expected finished");
        };
        assert_eq!(id, 7);
        // 12 chars at 50 ms each, 20 ms wire frames
        assert_eq!(frames, 30);

        // let the writer drain
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut media = 0;
        let mut last = None;
        while let Ok(message) = h.outbound.try_recv() {
            if message.is_media() {
                media += 1;
            }
            last = Some(message);
        }
        assert_eq!(media, 30);
        assert_eq!(last, Some(OutboundMessage::mark("MZ1", "utt-7")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_playback() {
        let mut h = harness(Arc::new(SimpleTts::new(16000)));
        let generation = h.gate.current();
        h.requests
            .send(SpeakRequest {
                id: 1,
                text: "This is a fairly long sentence that takes seconds to play.".to_string(),
                generation,
            })
            .unwrap();
        // queued behind the first one, dropped by the same cancel
        h.requests
            .send(SpeakRequest {
                id: 2,
                text: "Second.".to_string(),
                generation,
            })
            .unwrap();

        assert!(matches!(h.events.recv().await, Some(SpeakerEvent::Started(1))));
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.gate.cancel();

        assert!(matches!(h.events.recv().await, Some(SpeakerEvent::Interrupted(1))));
        assert!(matches!(h.events.recv().await, Some(SpeakerEvent::Interrupted(2))));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut media = 0;
        while let Ok(message) = h.outbound.try_recv() {
            assert!(message.is_media(), "no mark after cancel");
            media += 1;
        }
        // roughly half a second of audio plus the lead
        assert!(media > 20 && media < 35, "sent {} frames", media);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_failure_plays_fallback() {
        let mut h = harness(Arc::new(BrokenTts));
        h.requests
            .send(SpeakRequest {
                id: 3,
                text: "Anything.".to_string(),
                generation: h.gate.current(),
            })
            .unwrap();

        assert!(matches!(h.events.recv().await, Some(SpeakerEvent::Started(3))));
        let event = h.events.recv().await;
        assert!(matches!(event, Some(SpeakerEvent::Failed { id: 3, .. })));

        // let the writer drain
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut media = 0;
        let mut last = None;
        while let Ok(message) = h.outbound.try_recv() {
            if message.is_media() {
                media += 1;
            }
            last = Some(message);
        }
        assert!(media > 0);
        assert_eq!(last, Some(OutboundMessage::mark("MZ1", "utt-3")));
    }

    #[test]
    fn test_mark_names() {
        assert_eq!(mark_name(12), "utt-12");
        assert_eq!(parse_mark("utt-12"), Some(12));
        assert_eq!(parse_mark("other"), None);
    }

    #[test]
    fn test_missing_fallback_file_uses_chime() {
        let audio = load_fallback_audio(Some("/nonexistent/fallback.ulaw"), 8000);
        assert_eq!(audio, fallback_chime(8000));
        // 180 + 50 + 220 ms at 8 kHz
        assert_eq!(audio.len(), 3600);
    }
}
