//! End-to-end call tests
//!
//! A scripted carrier echoes marks the moment they arrive and a channel STT
//! provider stands in for the transcription service. Time is paused, so
//! multi-second prompts play out instantly.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use intake_agent::{
    fallback_chime, AgentError, CallConfig, CallController, CallDeps, CallSummary,
    CompletionNotifier, DeliveryStatus, EndReason, FieldKey, RuleBasedAddressValidator,
};
use intake_core::{Speaker, SynthesisError, TranscriptResult};
use intake_llm::RuleBasedBackend;
use intake_pipeline::{
    AudioStream, ChannelStt, ChunkerConfig, SimpleTts, SpeechStreamer, SttHandle, TtsProvider,
};
use intake_transport::{MarkLabel, OutboundMessage, StartMetadata, StreamMessage};

const STREAM_SID: &str = "MZ00000000000000000000000000000001";

#[derive(Default)]
struct RecordingNotifier {
    summaries: Mutex<Vec<CallSummary>>,
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn notify(&self, summary: &CallSummary) -> Result<(), AgentError> {
        self.summaries.lock().push(summary.clone());
        Ok(())
    }
}

struct BrokenTts;

#[async_trait]
impl TtsProvider for BrokenTts {
    async fn synthesize(&self, _text: &str) -> Result<AudioStream, SynthesisError> {
        Err(SynthesisError::Timeout(3000))
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn name(&self) -> &str {
        "broken"
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CarrierEvent {
    Media,
    Mark(String),
    Clear,
}

struct Harness {
    inbound: mpsc::Sender<StreamMessage>,
    carrier: mpsc::UnboundedReceiver<CarrierEvent>,
    stt_handles: mpsc::UnboundedReceiver<SttHandle>,
    stt: Option<SttHandle>,
    call: JoinHandle<CallSummary>,
    notifier: Arc<RecordingNotifier>,
}

/// Plays the carrier: records what the agent sends and, when `echo_marks`
/// is set, echoes marks back
fn spawn_carrier(
    mut outbound: mpsc::Receiver<OutboundMessage>,
    inbound: mpsc::Sender<StreamMessage>,
    events: mpsc::UnboundedSender<CarrierEvent>,
    echo_marks: bool,
) {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match message {
                OutboundMessage::Media { .. } => {
                    let _ = events.send(CarrierEvent::Media);
                }
                OutboundMessage::Mark { mark, .. } => {
                    let _ = events.send(CarrierEvent::Mark(mark.name.clone()));
                    if !echo_marks {
                        continue;
                    }
                    let echo = StreamMessage::Mark {
                        sequence_number: None,
                        stream_sid: Some(STREAM_SID.to_string()),
                        mark: MarkLabel { name: mark.name },
                    };
                    let _ = inbound.send(echo).await;
                }
                OutboundMessage::Clear { .. } => {
                    let _ = events.send(CarrierEvent::Clear);
                }
            }
        }
    });
}

fn start_message() -> StreamMessage {
    StreamMessage::Start {
        sequence_number: Some(1),
        stream_sid: Some(STREAM_SID.to_string()),
        start: StartMetadata {
            stream_sid: STREAM_SID.to_string(),
            account_sid: None,
            call_sid: Some("CA0001".to_string()),
            tracks: vec!["inbound".to_string()],
            custom_parameters: HashMap::new(),
            media_format: None,
        },
    }
}

impl Harness {
    async fn start(config: CallConfig, tts: Arc<dyn TtsProvider>, failing_connects: u32) -> Self {
        Self::launch(config, tts, failing_connects, true).await
    }

    async fn launch(
        config: CallConfig,
        tts: Arc<dyn TtsProvider>,
        failing_connects: u32,
        echo_marks: bool,
    ) -> Self {
        let (stt, stt_handles) = ChannelStt::new();
        stt.fail_next_connects(failing_connects);
        let notifier = Arc::new(RecordingNotifier::default());
        let deps = CallDeps {
            stt: Arc::new(stt),
            speech: SpeechStreamer::new(tts, ChunkerConfig::default()),
            backend: Arc::new(RuleBasedBackend::new()),
            address_validator: Arc::new(RuleBasedAddressValidator::new()),
            notifier: notifier.clone(),
            fallback_audio: Arc::from(fallback_chime(8000)),
        };

        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (carrier_tx, carrier_rx) = mpsc::unbounded_channel();
        spawn_carrier(outbound_rx, inbound_tx.clone(), carrier_tx, echo_marks);

        let controller = CallController::new(config, deps)
            .with_today(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
        let call = tokio::spawn(controller.run(inbound_rx, outbound_tx));
        inbound_tx.send(start_message()).await.unwrap();

        Harness {
            inbound: inbound_tx,
            carrier: carrier_rx,
            stt_handles,
            stt: None,
            call,
            notifier,
        }
    }

    async fn standard() -> Self {
        Self::start(CallConfig::default(), Arc::new(SimpleTts::new(16000)), 0).await
    }

    async fn stt(&mut self) -> &SttHandle {
        if self.stt.is_none() {
            self.stt = self.stt_handles.recv().await;
        }
        self.stt.as_ref().expect("stt session")
    }

    /// Wait for the next agent utterance to finish playing
    async fn next_mark(&mut self) -> String {
        loop {
            match self.carrier.recv().await.expect("carrier open") {
                CarrierEvent::Mark(name) => {
                    // let the controller take the echo
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    return name;
                }
                CarrierEvent::Media => {}
                CarrierEvent::Clear => panic!("unexpected clear"),
            }
        }
    }

    async fn say(&mut self, text: &str) {
        let result = TranscriptResult::final_result(text, 0.95).with_speech_final();
        assert!(self.stt().await.send(result).await, "stt session closed");
    }

    async fn answer(&mut self, text: &str) -> String {
        self.say(text).await;
        self.next_mark().await
    }

    async fn hang_up(self) -> CallSummary {
        let _ = self
            .inbound
            .send(StreamMessage::Stop {
                stream_sid: Some(STREAM_SID.to_string()),
            })
            .await;
        self.call.await.unwrap()
    }
}

fn field_value(summary: &CallSummary, key: FieldKey) -> Option<String> {
    summary.record[key.name()]["value"].as_str().map(str::to_string)
}

fn agent_texts(summary: &CallSummary) -> Vec<String> {
    summary
        .transcript
        .iter()
        .filter(|e| e.utterance.speaker == Speaker::Agent)
        .map(|e| e.utterance.text.clone())
        .collect()
}

const ANSWERS: &[&str] = &[
    "Jane",
    "Doe",
    "March 1st 1990",
    "Blue Cross",
    "ABC12345",
    "no",
    "I've had a sore throat for a week",
    "123 Main Street, New York, NY 10001",
    "555 123 4567",
    "jane at example dot com",
    "the second one",
];

#[tokio::test(start_paused = true)]
async fn test_full_intake_completes() {
    let mut h = Harness::standard().await;
    assert_eq!(h.next_mark().await, "utt-1");

    for answer in ANSWERS {
        h.answer(answer).await;
    }
    h.say("yes, that's right").await;
    h.next_mark().await;

    // the call ends by itself once the goodbye has played
    let summary = h.call.await.unwrap();
    assert_eq!(summary.end_reason, EndReason::Completed);
    assert!(summary.completed);
    assert!(summary.unverified_fields.is_empty());
    assert!(summary.missing_fields.is_empty());
    assert_eq!(field_value(&summary, FieldKey::FirstName).as_deref(), Some("Jane"));
    assert_eq!(field_value(&summary, FieldKey::Phone).as_deref(), Some("555-123-4567"));
    assert_eq!(summary.stream_sid.as_deref(), Some(STREAM_SID));
    assert_eq!(summary.call_sid.as_deref(), Some("CA0001"));

    let texts = agent_texts(&summary);
    assert!(texts.last().unwrap().contains("You're all set"));
    assert!(summary
        .transcript
        .iter()
        .filter(|e| e.utterance.speaker == Speaker::Agent)
        .all(|e| e.delivery == DeliveryStatus::Delivered));

    let notified = h.notifier.summaries.lock();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].call_id, summary.call_id);
}

#[tokio::test(start_paused = true)]
async fn test_impossible_date_is_reasked() {
    let mut h = Harness::standard().await;
    h.next_mark().await;
    h.answer("Jane").await;
    h.answer("Doe").await;
    h.answer("February 30th").await;
    h.answer("March 1st 1990").await;

    let notifier = h.notifier.clone();
    let summary = h.hang_up().await;
    assert_eq!(summary.end_reason, EndReason::CallerHangup);
    assert!(!summary.completed);
    assert_eq!(
        field_value(&summary, FieldKey::DateOfBirth).as_deref(),
        Some("March 1, 1990")
    );
    let texts = agent_texts(&summary);
    assert!(texts.iter().any(|t| t.starts_with("February doesn't have 30 days")));
    assert!(notifier.summaries.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_cap_marks_field_unverified() {
    let mut h = Harness::standard().await;
    h.next_mark().await;
    h.answer("Jane").await;
    h.answer("Doe").await;
    for _ in 0..4 {
        h.answer("July 4 2030").await;
    }

    let summary = h.hang_up().await;
    assert_eq!(summary.unverified_fields, vec![FieldKey::DateOfBirth]);
    assert_eq!(summary.record["date_of_birth"]["state"], "unverified");
    assert_eq!(field_value(&summary, FieldKey::DateOfBirth).as_deref(), Some("July 4 2030"));
    let texts = agent_texts(&summary);
    assert!(texts.last().unwrap().contains("insurance company"));
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_clears_playback() {
    let mut h = Harness::standard().await;

    // wait for the greeting to start playing
    assert_eq!(h.carrier.recv().await, Some(CarrierEvent::Media));
    tokio::time::sleep(Duration::from_millis(500)).await;

    let partial = TranscriptResult::partial("Jane", 0.9);
    assert!(h.stt().await.send(partial).await);

    // clear goes out and the greeting never completes
    loop {
        match h.carrier.recv().await.unwrap() {
            CarrierEvent::Clear => break,
            CarrierEvent::Media => {}
            CarrierEvent::Mark(name) => panic!("greeting finished despite barge-in: {}", name),
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.carrier.try_recv().is_err(), "audio kept flowing after clear");

    // the finished answer still counts
    h.say("Jane").await;
    let mark = h.next_mark().await;
    assert_ne!(mark, "utt-1");

    let summary = h.hang_up().await;
    assert_eq!(summary.transcript[0].delivery, DeliveryStatus::Interrupted);
    assert_eq!(field_value(&summary, FieldKey::FirstName).as_deref(), Some("Jane"));
    assert!(agent_texts(&summary)[1].contains("last name"));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_final_answered_once() {
    let mut h = Harness::standard().await;
    h.next_mark().await;

    h.say("Jane").await;
    h.say("Jane").await;
    h.next_mark().await;

    // nothing else queued behind the single reply
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(h.carrier.try_recv().is_err());

    let summary = h.hang_up().await;
    let caller_turns = summary
        .transcript
        .iter()
        .filter(|e| e.utterance.speaker == Speaker::Caller)
        .count();
    assert_eq!(caller_turns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_caller_is_hung_up_on() {
    let mut h = Harness::standard().await;
    h.next_mark().await;
    let greeted = tokio::time::Instant::now();

    // closing line plays, then the call ends on its own
    h.next_mark().await;
    let summary = h.call.await.unwrap();
    assert_eq!(summary.end_reason, EndReason::IdleTimeout);
    assert!(greeted.elapsed() >= Duration::from_millis(8000));
    assert!(agent_texts(&summary)
        .last()
        .unwrap()
        .starts_with("I haven't heard anything"));
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_fires_without_mark_echoes() {
    let mut h = Harness::launch(CallConfig::default(), Arc::new(SimpleTts::new(16000)), 0, false).await;
    assert_eq!(h.next_mark().await, "utt-1");
    let greeted = tokio::time::Instant::now();

    // no echo for the greeting or the closing line; both time out
    assert_eq!(h.next_mark().await, "utt-2");
    let summary = h.call.await.unwrap();
    assert_eq!(summary.end_reason, EndReason::IdleTimeout);
    assert!(greeted.elapsed() >= Duration::from_millis(8000));
    assert!(greeted.elapsed() < Duration::from_secs(60));
    assert!(agent_texts(&summary)
        .last()
        .unwrap()
        .starts_with("I haven't heard anything"));
}

#[tokio::test(start_paused = true)]
async fn test_stt_reconnects_once() {
    let mut h = Harness::standard().await;
    h.next_mark().await;

    let handle = match h.stt.take() {
        Some(handle) => handle,
        None => h.stt_handles.recv().await.unwrap(),
    };
    handle
        .fail(intake_core::TranscriptStreamError::Disconnected("reset".to_string()))
        .await;

    // a new session comes up and the call carries on
    h.answer("Jane").await;
    let summary = h.hang_up().await;
    assert_eq!(field_value(&summary, FieldKey::FirstName).as_deref(), Some("Jane"));
}

#[tokio::test(start_paused = true)]
async fn test_stt_unavailable_ends_call() {
    let mut h = Harness::start(CallConfig::default(), Arc::new(SimpleTts::new(16000)), 2).await;
    h.next_mark().await;

    let summary = h.call.await.unwrap();
    assert_eq!(summary.end_reason, EndReason::TranscriptionFailed);
    assert!(agent_texts(&summary)[0].contains("technical difficulties"));
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_failure_plays_fallback() {
    let mut h = Harness::start(CallConfig::default(), Arc::new(BrokenTts), 0).await;

    let mut media = 0;
    let mark = loop {
        match h.carrier.recv().await.unwrap() {
            CarrierEvent::Media => media += 1,
            CarrierEvent::Mark(name) => break name,
            CarrierEvent::Clear => panic!("unexpected clear"),
        }
    };
    assert_eq!(mark, "utt-1");
    // 450 ms chime in 20 ms frames
    assert_eq!(media, 23);

    let summary = h.hang_up().await;
    assert_eq!(summary.transcript[0].delivery, DeliveryStatus::Failed);
}
