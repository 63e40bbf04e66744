//! Call session controller
//!
//! Owns one call from the carrier's start message to teardown. Inbound
//! audio is re-ordered, decoded and streamed to STT; transcripts feed the
//! aggregator; finalized utterances go to the dialogue policy task; agent
//! replies go to the speaker task. Barge-in bumps the playback generation
//! and tells the carrier to clear its buffer.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use intake_config::{DialogueConfig, PipelineConfig, SessionConfig, Settings};
use intake_core::{CallSession, SessionState, TranscriptStreamError, Utterance, UtteranceIds};
use intake_llm::DialogueBackend;
use intake_pipeline::{
    AggregatorConfig, AggregatorEvent, AggregatorState, SpeechStreamer, SttEvent, SttProvider,
    SttStream, TranscriptAggregator,
};
use intake_transport::{
    AudioCodec, CodecConfig, FrameCodec, MediaPayload, OutboundMessage, SequenceOrderer,
    StreamMessage,
};

use crate::conversation::{EndReason, HistoryEntry};
use crate::intake::FieldKey;
use crate::notifier::CompletionNotifier;
use crate::policy::{DialoguePolicy, PolicyAction, PolicyDecision};
use crate::speaker::{
    parse_mark, spawn_writer, PlaybackGate, SpeakRequest, Speaker, SpeakerEvent, WireItem,
};
use crate::validate::AddressValidator;

/// How long to wait for the closing utterance's mark before hanging up
const CLOSING_DEADLINE: Duration = Duration::from_secs(10);

/// Time the carrier gets to echo a mark beyond the utterance's own length
const MARK_SLACK: Duration = Duration::from_secs(2);

/// Per-call settings
#[derive(Debug, Clone, Default)]
pub struct CallConfig {
    pub pipeline: PipelineConfig,
    pub session: SessionConfig,
    pub dialogue: DialogueConfig,
}

impl CallConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            pipeline: settings.pipeline.clone(),
            session: settings.session.clone(),
            dialogue: settings.dialogue.clone(),
        }
    }
}

/// Shared providers handed to every call
#[derive(Clone)]
pub struct CallDeps {
    pub stt: Arc<dyn SttProvider>,
    pub speech: SpeechStreamer,
    pub backend: Arc<dyn DialogueBackend>,
    pub address_validator: Arc<dyn AddressValidator>,
    pub notifier: Arc<dyn CompletionNotifier>,
    /// Raw μ-law at the wire rate
    pub fallback_audio: Arc<[u8]>,
}

/// What happened on a call
#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub call_id: String,
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub end_reason: EndReason,
    pub completed: bool,
    pub record: serde_json::Value,
    pub unverified_fields: Vec<FieldKey>,
    pub missing_fields: Vec<FieldKey>,
    pub utterance_count: usize,
    pub transcript: Vec<HistoryEntry>,
    pub duration_ms: u64,
}

enum PolicyCommand {
    Start,
    Caller(Utterance),
    Delivered(u64),
    Interrupted(u64),
    Failed(u64),
    Close(EndReason),
}

/// Run the policy on its own task so backend calls never stall audio.
/// Start, caller and close commands get exactly one reply each.
fn spawn_policy(
    mut policy: DialoguePolicy,
    mut commands: mpsc::UnboundedReceiver<PolicyCommand>,
    replies: mpsc::UnboundedSender<Option<PolicyDecision>>,
) -> JoinHandle<DialoguePolicy> {
    tokio::spawn(
        async move {
            while let Some(command) = commands.recv().await {
                let reply = match command {
                    PolicyCommand::Start => Some(policy.start()),
                    PolicyCommand::Caller(utterance) => policy.handle_utterance(utterance).await,
                    PolicyCommand::Close(reason) => Some(policy.closing(reason)),
                    PolicyCommand::Delivered(id) => {
                        policy.on_agent_delivered(id);
                        continue;
                    }
                    PolicyCommand::Interrupted(id) => {
                        policy.on_agent_interrupted(id);
                        continue;
                    }
                    PolicyCommand::Failed(id) => {
                        policy.on_agent_failed(id);
                        continue;
                    }
                };
                if replies.send(reply).is_err() {
                    break;
                }
            }
            policy
        }
        .in_current_span(),
    )
}

enum Flow {
    Continue,
    End(EndReason),
}

struct Closing {
    reason: EndReason,
    /// Final utterance; the call ends when its mark comes back
    utterance: Option<u64>,
    deadline: Instant,
}

/// Utterance played out and waiting for the carrier's mark
struct PendingMark {
    id: u64,
    /// Playback is taken as finished if the echo has not come by then
    deadline: Instant,
}

/// Mutable state of one running call
struct ActiveCall {
    config: CallConfig,
    stt_provider: Arc<dyn SttProvider>,
    session: CallSession,
    started: Instant,
    codec: FrameCodec,
    orderer: SequenceOrderer<MediaPayload>,
    aggregator: TranscriptAggregator,
    stt: Option<SttStream>,
    stt_reconnects: u32,
    gate: PlaybackGate,
    wire: mpsc::Sender<WireItem>,
    speak: mpsc::UnboundedSender<SpeakRequest>,
    policy: mpsc::UnboundedSender<PolicyCommand>,
    /// Commands still owed a reply by the policy
    pending_replies: usize,
    /// Utterances handed to the speaker and not yet reported back
    queued_speech: usize,
    /// Played out, waiting for the carrier's mark
    awaiting_marks: Vec<PendingMark>,
    /// Marks echoed before the speaker reported the utterance
    early_marks: Vec<u64>,
    /// Last caller speech or end of agent playback
    idle_since: Instant,
    closing: Option<Closing>,
}

impl ActiveCall {
    fn send_policy(&self, command: PolicyCommand) {
        if self.policy.send(command).is_err() {
            tracing::error!("Dialogue policy task is gone");
        }
    }

    fn update_speaking(&mut self) {
        let audible = self.queued_speech > 0 || !self.awaiting_marks.is_empty();
        self.aggregator.set_agent_speaking(audible);
    }

    fn transition(&mut self, to: SessionState) {
        if let Err(e) = self.session.transition(to) {
            tracing::debug!(error = %e, "Session transition skipped");
        }
    }

    /// Open the STT stream, retrying up to the reconnect budget
    async fn connect_stt(&mut self) -> Result<(), TranscriptStreamError> {
        let rate = self.config.pipeline.telephony.provider_sample_rate;
        loop {
            match self.stt_provider.connect(rate).await {
                Ok(stream) => {
                    self.stt = Some(stream);
                    return Ok(());
                }
                Err(e) if self.stt_reconnects < self.config.session.stt_reconnect_attempts => {
                    self.stt_reconnects += 1;
                    tracing::warn!(error = %e, attempt = self.stt_reconnects, "STT connect failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn on_stream_message(&mut self, message: StreamMessage) -> Flow {
        match message {
            StreamMessage::Media { media, .. } => {
                self.on_media(media);
                Flow::Continue
            }
            StreamMessage::Mark { mark, .. } => self.on_mark(&mark.name),
            StreamMessage::Stop { .. } => {
                tracing::info!("Carrier stopped the stream");
                Flow::End(
                    self.closing
                        .as_ref()
                        .map(|c| c.reason)
                        .unwrap_or(EndReason::CallerHangup),
                )
            }
            StreamMessage::Dtmf { dtmf, .. } => {
                tracing::debug!(digit = %dtmf.digit, "Ignoring keypad input");
                Flow::Continue
            }
            other => {
                tracing::debug!(event = other.kind(), "Ignoring message after start");
                Flow::Continue
            }
        }
    }

    fn on_media(&mut self, media: MediaPayload) {
        let ready = match media.chunk {
            Some(chunk) => self.orderer.push(chunk, media),
            None => vec![media],
        };
        for media in ready {
            match self.codec.decode_inbound(&media) {
                Ok(frames) => {
                    for frame in frames {
                        self.forward_audio(frame);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, chunk = ?media.chunk, "Dropping undecodable frame");
                    metrics::counter!("intake_agent_errors_total", "kind" => "frame_decode").increment(1);
                }
            }
        }
    }

    fn forward_audio(&mut self, frame: intake_core::AudioFrame) {
        let Some(stt) = &self.stt else {
            return;
        };
        match stt.audio.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("intake_agent_stt_frames_dropped_total").increment(1);
                tracing::debug!("STT audio buffer full, dropping frame");
            }
            // reported through the event channel
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn on_mark(&mut self, name: &str) -> Flow {
        let Some(id) = parse_mark(name) else {
            tracing::debug!(mark = name, "Ignoring unknown mark");
            return Flow::Continue;
        };
        match self.awaiting_marks.iter().position(|m| m.id == id) {
            Some(position) => {
                self.awaiting_marks.remove(position);
                self.confirm_playback(id)
            }
            None => {
                self.early_marks.push(id);
                Flow::Continue
            }
        }
    }

    fn confirm_playback(&mut self, id: u64) -> Flow {
        self.send_policy(PolicyCommand::Delivered(id));
        self.idle_since = Instant::now();
        self.update_speaking();
        tracing::debug!(utterance_id = id, "Playback confirmed");
        match &self.closing {
            Some(closing) if closing.utterance == Some(id) => Flow::End(closing.reason),
            _ => Flow::Continue,
        }
    }

    /// Speaker finished sending `id`; its mark may already be back
    fn queue_mark(&mut self, id: u64, frames: u64) -> Flow {
        self.queued_speech = self.queued_speech.saturating_sub(1);
        match self.early_marks.iter().position(|m| *m == id) {
            Some(position) => {
                self.early_marks.remove(position);
                self.confirm_playback(id)
            }
            None => {
                let frame = Duration::from_millis(self.config.pipeline.telephony.frame_ms as u64);
                let playback = frame.saturating_mul(u32::try_from(frames).unwrap_or(u32::MAX));
                self.awaiting_marks.push(PendingMark {
                    id,
                    deadline: Instant::now() + playback + MARK_SLACK,
                });
                self.update_speaking();
                Flow::Continue
            }
        }
    }

    /// Marks the carrier never echoed count as played
    fn expire_marks(&mut self, now: Instant) -> Flow {
        let expired: Vec<u64> = self
            .awaiting_marks
            .iter()
            .filter(|m| now >= m.deadline)
            .map(|m| m.id)
            .collect();
        for id in expired {
            self.awaiting_marks.retain(|m| m.id != id);
            tracing::warn!(utterance_id = id, "Mark not echoed in time, assuming playback finished");
            metrics::counter!("intake_agent_errors_total", "kind" => "mark_timeout").increment(1);
            if let Flow::End(reason) = self.confirm_playback(id) {
                return Flow::End(reason);
            }
        }
        Flow::Continue
    }

    async fn on_stt_event(&mut self, event: Option<SttEvent>) -> Flow {
        match event {
            Some(SttEvent::Transcript(result)) => {
                let events = self.aggregator.on_transcript(result, Instant::now());
                self.apply_aggregator(events).await;
                Flow::Continue
            }
            Some(SttEvent::Error(error)) => self.on_stt_failure(error).await,
            None => {
                self.on_stt_failure(TranscriptStreamError::Disconnected("stream closed".to_string()))
                    .await
            }
        }
    }

    async fn on_stt_failure(&mut self, error: TranscriptStreamError) -> Flow {
        tracing::warn!(error = %error, "Transcription stream failed");
        metrics::counter!("intake_agent_errors_total", "kind" => "transcript_stream").increment(1);
        self.stt = None;
        self.aggregator.reset();
        if self.closing.is_some() {
            return Flow::Continue;
        }
        if self.stt_reconnects >= self.config.session.stt_reconnect_attempts {
            return self.begin_closing(EndReason::TranscriptionFailed);
        }
        self.stt_reconnects += 1;
        match self.connect_stt().await {
            Ok(()) => {
                tracing::info!(attempt = self.stt_reconnects, "Transcription stream reconnected");
                Flow::Continue
            }
            Err(e) => {
                tracing::error!(error = %e, "Transcription stream could not be restored");
                self.begin_closing(EndReason::TranscriptionFailed)
            }
        }
    }

    async fn apply_aggregator(&mut self, events: Vec<AggregatorEvent>) {
        for event in events {
            match event {
                AggregatorEvent::Partial { .. } => {
                    self.idle_since = Instant::now();
                }
                AggregatorEvent::BargeIn { text, confidence } => {
                    self.barge_in(&text, confidence).await;
                }
                AggregatorEvent::Utterance(utterance) => {
                    self.idle_since = Instant::now();
                    if self.closing.is_some() {
                        tracing::debug!("Ignoring caller utterance while closing");
                        continue;
                    }
                    if self.session.state == SessionState::BargeIn {
                        self.transition(SessionState::Active);
                    }
                    tracing::info!(
                        utterance_id = utterance.id,
                        confidence = ?utterance.confidence,
                        "Caller utterance finalized"
                    );
                    tracing::debug!(text = %utterance.text, "Caller said");
                    metrics::counter!("intake_agent_utterances_total", "speaker" => "caller").increment(1);
                    self.pending_replies += 1;
                    self.send_policy(PolicyCommand::Caller(utterance));
                }
            }
        }
    }

    async fn barge_in(&mut self, text: &str, confidence: f32) {
        if self.closing.is_some() {
            return;
        }
        let generation = self.gate.cancel();
        tracing::info!(generation, confidence, text, "Barge-in, cancelling agent audio");
        metrics::counter!("intake_agent_barge_ins_total").increment(1);

        if self.wire.send(WireItem::Clear).await.is_err() {
            tracing::debug!("Writer gone, clear not sent");
        }
        // played out but still in the carrier's buffer
        for mark in std::mem::take(&mut self.awaiting_marks) {
            self.send_policy(PolicyCommand::Interrupted(mark.id));
        }
        self.early_marks.clear();
        self.transition(SessionState::BargeIn);
        self.update_speaking();
    }

    fn on_decision(&mut self, decision: Option<PolicyDecision>) -> Flow {
        self.pending_replies = self.pending_replies.saturating_sub(1);
        let Some(decision) = decision else {
            return Flow::Continue;
        };
        let PolicyDecision { utterance, action } = decision;
        tracing::info!(utterance_id = utterance.id, text = %utterance.text, "Agent utterance");
        metrics::counter!("intake_agent_utterances_total", "speaker" => "agent").increment(1);

        if let PolicyAction::EndCall(reason) = action {
            self.transition(SessionState::Closing);
            self.closing = Some(Closing {
                reason,
                utterance: Some(utterance.id),
                deadline: Instant::now() + CLOSING_DEADLINE,
            });
        }

        let request = SpeakRequest {
            id: utterance.id,
            text: utterance.text,
            generation: self.gate.current(),
        };
        if self.speak.send(request).is_err() {
            tracing::error!("Speaker task is gone");
            return Flow::End(EndReason::Shutdown);
        }
        self.queued_speech += 1;
        self.update_speaking();
        Flow::Continue
    }

    fn on_speaker_event(&mut self, event: SpeakerEvent) -> Flow {
        match event {
            SpeakerEvent::Started(id) => {
                tracing::debug!(utterance_id = id, "Playback started");
                Flow::Continue
            }
            SpeakerEvent::Finished { id, frames } => {
                tracing::debug!(utterance_id = id, frames, "Playback queued");
                self.queue_mark(id, frames)
            }
            SpeakerEvent::Failed { id, error } => {
                tracing::debug!(utterance_id = id, error = %error, "Fallback audio queued");
                self.send_policy(PolicyCommand::Failed(id));
                self.queue_mark(id, 0)
            }
            SpeakerEvent::Interrupted(id) => {
                self.send_policy(PolicyCommand::Interrupted(id));
                self.queued_speech = self.queued_speech.saturating_sub(1);
                self.idle_since = Instant::now();
                self.update_speaking();
                if self.session.state == SessionState::BargeIn {
                    self.transition(SessionState::Active);
                }
                match &self.closing {
                    Some(closing) if closing.utterance == Some(id) => Flow::End(closing.reason),
                    _ => Flow::Continue,
                }
            }
        }
    }

    fn begin_closing(&mut self, reason: EndReason) -> Flow {
        if self.closing.is_some() {
            return Flow::Continue;
        }
        tracing::info!(reason = reason.as_str(), "Closing call");
        self.transition(SessionState::Closing);
        self.closing = Some(Closing {
            reason,
            utterance: None,
            deadline: Instant::now() + CLOSING_DEADLINE,
        });
        self.pending_replies += 1;
        self.send_policy(PolicyCommand::Close(reason));
        Flow::Continue
    }

    /// Nothing in flight on the agent side and the caller is not mid-turn
    fn waiting_on_caller(&self) -> bool {
        self.pending_replies == 0
            && self.queued_speech == 0
            && self.awaiting_marks.is_empty()
            && matches!(
                self.aggregator.state(),
                AggregatorState::Idle | AggregatorState::Finalized
            )
    }

    async fn on_tick(&mut self) -> Flow {
        let now = Instant::now();
        let events = self.aggregator.on_tick(now);
        self.apply_aggregator(events).await;
        if let Flow::End(reason) = self.expire_marks(now) {
            return Flow::End(reason);
        }

        if let Some(closing) = &self.closing {
            if now >= closing.deadline {
                tracing::warn!("Closing utterance not confirmed in time, hanging up");
                return Flow::End(closing.reason);
            }
            return Flow::Continue;
        }

        let max_duration = Duration::from_secs(self.config.session.max_call_duration_secs);
        if now.duration_since(self.started) >= max_duration {
            return self.begin_closing(EndReason::MaxDuration);
        }

        let idle_timeout = Duration::from_millis(self.config.session.idle_timeout_ms);
        if self.waiting_on_caller() && now.duration_since(self.idle_since) >= idle_timeout {
            tracing::info!(idle_ms = self.config.session.idle_timeout_ms, "No caller speech, ending call");
            return self.begin_closing(EndReason::IdleTimeout);
        }
        Flow::Continue
    }
}

async fn recv_stt(stt: &mut Option<SttStream>) -> Option<SttEvent> {
    match stt {
        Some(stream) => stream.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

pub struct CallController {
    config: CallConfig,
    deps: CallDeps,
    today: Option<NaiveDate>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl CallController {
    pub fn new(config: CallConfig, deps: CallDeps) -> Self {
        Self {
            config,
            deps,
            today: None,
            shutdown: None,
        }
    }

    /// Fix the reference date for date-of-birth checks
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Close the call politely when the flag turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Drive one call to completion. `inbound` carries parsed carrier
    /// messages; everything for the carrier goes out on `outbound`.
    pub async fn run(
        self,
        inbound: mpsc::Receiver<StreamMessage>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> CallSummary {
        let session = CallSession::new();
        let span = tracing::info_span!("call", call_id = %session.id);
        self.run_session(session, inbound, outbound).instrument(span).await
    }

    async fn run_session(
        mut self,
        mut session: CallSession,
        mut inbound: mpsc::Receiver<StreamMessage>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> CallSummary {
        let started = Instant::now();

        let start = loop {
            match inbound.recv().await {
                Some(StreamMessage::Start { start, .. }) => break start,
                Some(StreamMessage::Connected { .. }) => continue,
                Some(StreamMessage::Stop { .. }) | None => {
                    tracing::info!("Stream ended before start");
                    return empty_summary(&session, EndReason::CallerHangup, started);
                }
                Some(other) => tracing::debug!(event = other.kind(), "Ignoring message before start"),
            }
        };

        if let Some(format) = &start.media_format {
            if AudioCodec::from_encoding(&format.encoding) != Some(AudioCodec::Pcmu) {
                tracing::warn!(encoding = %format.encoding, "Unexpected media encoding, assuming mu-law");
            }
        }
        if let Err(e) = session.start(start.stream_sid.clone(), start.call_sid.clone()) {
            tracing::warn!(error = %e, "Session start transition refused");
        }
        tracing::info!(stream_sid = %start.stream_sid, call_sid = ?start.call_sid, "Call started");
        metrics::counter!("intake_agent_calls_total").increment(1);
        metrics::gauge!("intake_agent_active_calls").increment(1.0);

        let telephony = &self.config.pipeline.telephony;
        let codec_config = CodecConfig::from(telephony);
        let gate = PlaybackGate::new();
        let ids = UtteranceIds::new();

        let (wire_tx, wire_rx) = mpsc::channel(64);
        let writer = spawn_writer(start.stream_sid.clone(), gate.clone(), wire_rx, outbound);

        let (speak_tx, speak_rx) = mpsc::unbounded_channel();
        let (speaker_tx, mut speaker_events) = mpsc::channel(16);
        let speaker = Speaker::new(
            self.deps.speech.clone(),
            FrameCodec::new(codec_config.clone()),
            Duration::from_millis(telephony.frame_ms as u64),
            gate.clone(),
            wire_tx.clone(),
            speaker_tx,
            self.deps.fallback_audio.clone(),
        )
        .spawn(speak_rx);

        let mut policy = DialoguePolicy::new(
            self.config.dialogue.clone(),
            self.deps.backend.clone(),
            self.deps.address_validator.clone(),
            ids.clone(),
        );
        if let Some(today) = self.today {
            policy = policy.with_today(today);
        }
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut replies) = mpsc::unbounded_channel();
        let policy_task = spawn_policy(policy, command_rx, reply_tx);

        let mut call = ActiveCall {
            aggregator: TranscriptAggregator::new(
                AggregatorConfig::from_settings(
                    &self.config.pipeline.transcript,
                    &self.config.pipeline.barge_in,
                ),
                ids,
            ),
            orderer: SequenceOrderer::new(telephony.reorder_window).starting_at(1),
            codec: FrameCodec::new(codec_config),
            config: self.config.clone(),
            stt_provider: self.deps.stt.clone(),
            session,
            started,
            stt: None,
            stt_reconnects: 0,
            gate,
            wire: wire_tx,
            speak: speak_tx,
            policy: command_tx,
            pending_replies: 0,
            queued_speech: 0,
            awaiting_marks: Vec::new(),
            early_marks: Vec::new(),
            idle_since: started,
            closing: None,
        };

        match call.connect_stt().await {
            Ok(()) => {
                call.pending_replies += 1;
                call.send_policy(PolicyCommand::Start);
            }
            Err(e) => {
                tracing::error!(error = %e, provider = call.stt_provider.name(), "Could not open transcription stream");
                metrics::counter!("intake_agent_errors_total", "kind" => "transcript_stream").increment(1);
                call.begin_closing(EndReason::TranscriptionFailed);
            }
        }

        let mut tick = tokio::time::interval(Duration::from_millis(self.config.session.tick_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_seen = false;

        let end_reason = loop {
            let flow = tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => call.on_stream_message(message).await,
                    None => {
                        tracing::info!("Carrier connection closed");
                        Flow::End(call.closing.as_ref().map(|c| c.reason).unwrap_or(EndReason::CallerHangup))
                    }
                },
                event = recv_stt(&mut call.stt) => call.on_stt_event(event).await,
                reply = replies.recv() => match reply {
                    Some(decision) => call.on_decision(decision),
                    None => {
                        tracing::error!("Dialogue policy stopped unexpectedly");
                        Flow::End(EndReason::Shutdown)
                    }
                },
                Some(event) = speaker_events.recv() => call.on_speaker_event(event),
                _ = tick.tick() => call.on_tick().await,
                _ = wait_shutdown(&mut self.shutdown), if !shutdown_seen => {
                    shutdown_seen = true;
                    call.begin_closing(EndReason::Shutdown)
                }
            };
            if let Flow::End(reason) = flow {
                break reason;
            }
        };

        let ActiveCall {
            mut session,
            policy: command_tx,
            stt,
            ..
        } = call;
        drop(command_tx);
        drop(stt);
        speaker.abort();
        writer.abort();
        if let Err(e) = session.transition(SessionState::Closing) {
            tracing::debug!(error = %e, "Already closing");
        }
        if let Err(e) = session.transition(SessionState::Closed) {
            tracing::warn!(error = %e, "Session close transition refused");
        }

        let summary = match policy_task.await {
            Ok(policy) => summarize(&session, &policy, end_reason, started),
            Err(e) => {
                tracing::error!(error = %e, "Dialogue policy task failed");
                empty_summary(&session, end_reason, started)
            }
        };

        metrics::gauge!("intake_agent_active_calls").decrement(1.0);
        metrics::counter!("intake_agent_calls_ended_total", "reason" => end_reason.as_str()).increment(1);
        metrics::histogram!("intake_agent_call_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            reason = end_reason.as_str(),
            completed = summary.completed,
            utterances = summary.utterance_count,
            duration_ms = summary.duration_ms,
            "Call ended"
        );

        if summary.completed {
            if let Err(e) = self.deps.notifier.notify(&summary).await {
                tracing::warn!(error = %e, "Completion notifier failed");
            }
        }
        summary
    }
}

fn summarize(session: &CallSession, policy: &DialoguePolicy, end_reason: EndReason, started: Instant) -> CallSummary {
    let record = policy.record();
    let history = policy.history();
    CallSummary {
        call_id: session.id.clone(),
        stream_sid: session.stream_sid.clone(),
        call_sid: session.call_sid.clone(),
        end_reason,
        completed: end_reason == EndReason::Completed,
        record: record.snapshot(),
        unverified_fields: record.unverified_fields(),
        missing_fields: record.missing_required(),
        utterance_count: history.len(),
        transcript: history.entries().to_vec(),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

fn empty_summary(session: &CallSession, end_reason: EndReason, started: Instant) -> CallSummary {
    CallSummary {
        call_id: session.id.clone(),
        stream_sid: session.stream_sid.clone(),
        call_sid: session.call_sid.clone(),
        end_reason,
        completed: false,
        record: serde_json::Value::Null,
        unverified_fields: Vec::new(),
        missing_fields: Vec::new(),
        utterance_count: 0,
        transcript: Vec::new(),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
