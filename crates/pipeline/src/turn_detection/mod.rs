//! Transcript aggregation and turn detection
//!
//! Turns the stream of partial and final STT results into one finalized
//! caller utterance per turn. A turn ends on the provider's end-of-speech
//! final, or when trailing silence exceeds the endpoint timeout and no final
//! arrives within the grace window that follows.
//!
//! Time is passed in by the caller so behaviour is deterministic under test.

use std::time::Duration;
use tokio::time::Instant;

use intake_config::{BargeInConfig, TranscriptConfig};
use intake_core::{TranscriptResult, Utterance, UtteranceIds};

/// Aggregator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// Nothing heard yet this turn
    Idle,
    /// Partials arriving
    Listening,
    /// Silence timeout fired, waiting out the grace window for a final
    EndpointPending,
    /// Last turn closed; late results for it are ignored
    Finalized,
}

/// Aggregator output
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorEvent {
    /// Working text for the current turn
    Partial { text: String, confidence: f32 },
    /// Caller is talking over the agent
    BargeIn { text: String, confidence: f32 },
    /// Turn complete
    Utterance(Utterance),
}

/// Aggregator settings
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub endpoint_silence: Duration,
    pub final_grace: Duration,
    pub barge_in_enabled: bool,
    pub barge_in_min_confidence: f32,
    pub barge_in_min_chars: usize,
}

impl AggregatorConfig {
    pub fn from_settings(transcript: &TranscriptConfig, barge_in: &BargeInConfig) -> Self {
        Self {
            endpoint_silence: Duration::from_millis(transcript.endpoint_silence_ms),
            final_grace: Duration::from_millis(transcript.final_grace_ms),
            barge_in_enabled: barge_in.enabled,
            barge_in_min_confidence: barge_in.min_confidence,
            barge_in_min_chars: barge_in.min_chars,
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from_settings(&TranscriptConfig::default(), &BargeInConfig::default())
    }
}

/// Span of the last finalized turn, used to reject repeated finals
#[derive(Debug, Clone)]
struct FinalizedSpan {
    text: String,
    end_ms: u64,
    at: Instant,
}

/// Per-call transcript aggregator
pub struct TranscriptAggregator {
    config: AggregatorConfig,
    ids: UtteranceIds,
    state: AggregatorState,
    /// Segments the provider has marked final within this turn
    committed: Vec<String>,
    /// Latest interim text not yet committed
    working: String,
    confidence_sum: f32,
    confidence_count: u32,
    start_ms: Option<u64>,
    end_ms: u64,
    last_activity: Option<Instant>,
    pending_since: Option<Instant>,
    last_finalized: Option<FinalizedSpan>,
    agent_speaking: bool,
    barge_in_fired: bool,
}

impl TranscriptAggregator {
    pub fn new(config: AggregatorConfig, ids: UtteranceIds) -> Self {
        Self {
            config,
            ids,
            state: AggregatorState::Idle,
            committed: Vec::new(),
            working: String::new(),
            confidence_sum: 0.0,
            confidence_count: 0,
            start_ms: None,
            end_ms: 0,
            last_activity: None,
            pending_since: None,
            last_finalized: None,
            agent_speaking: false,
            barge_in_fired: false,
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Agent audio started or stopped. Barge-in can fire once per agent
    /// utterance.
    pub fn set_agent_speaking(&mut self, speaking: bool) {
        if speaking && !self.agent_speaking {
            self.barge_in_fired = false;
        }
        self.agent_speaking = speaking;
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    /// Feed one STT result
    pub fn on_transcript(&mut self, result: TranscriptResult, now: Instant) -> Vec<AggregatorEvent> {
        let mut events = Vec::new();

        if result.is_empty() {
            // keep-alive or bare end-of-speech marker
            if result.speech_final && self.has_text() && self.is_open() {
                events.extend(self.finalize(now));
            }
            return events;
        }

        if self.is_repeat_of_finalized(&result, now) {
            tracing::debug!(text = %result.text, "Ignoring repeated result for finalized turn");
            return events;
        }

        if self.should_barge_in(&result) {
            self.barge_in_fired = true;
            events.push(AggregatorEvent::BargeIn {
                text: result.text.clone(),
                confidence: result.confidence,
            });
        }

        if !self.is_open() {
            self.begin_turn(&result);
        }

        self.last_activity = Some(now);
        self.pending_since = None;
        self.end_ms = self.end_ms.max(result.end_time_ms);
        self.confidence_sum += result.confidence;
        self.confidence_count += 1;

        if result.is_final {
            self.committed.push(result.text.trim().to_string());
            self.working.clear();
            if result.speech_final || self.state == AggregatorState::EndpointPending {
                events.extend(self.finalize(now));
                return events;
            }
            self.state = AggregatorState::Listening;
        } else {
            self.working = result.text.trim().to_string();
            self.state = AggregatorState::Listening;
        }

        events.push(AggregatorEvent::Partial {
            text: self.current_text(),
            confidence: result.confidence,
        });
        events
    }

    /// Advance timers
    pub fn on_tick(&mut self, now: Instant) -> Vec<AggregatorEvent> {
        match self.state {
            AggregatorState::Listening => {
                let silent_for = self
                    .last_activity
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or_default();
                if silent_for < self.config.endpoint_silence {
                    return Vec::new();
                }
                self.state = AggregatorState::EndpointPending;
                self.pending_since = Some(now);
                if self.config.final_grace.is_zero() {
                    return self.finalize(now).into_iter().collect();
                }
                Vec::new()
            }
            AggregatorState::EndpointPending => {
                let waited = self
                    .pending_since
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or_default();
                if waited < self.config.final_grace {
                    return Vec::new();
                }
                tracing::debug!("No final within grace window, finalizing from partial");
                self.finalize(now).into_iter().collect()
            }
            AggregatorState::Idle | AggregatorState::Finalized => Vec::new(),
        }
    }

    /// Text heard so far in the open turn
    pub fn current_text(&self) -> String {
        let mut parts: Vec<&str> = self.committed.iter().map(|s| s.as_str()).collect();
        if !self.working.is_empty() {
            parts.push(&self.working);
        }
        parts.join(" ")
    }

    /// Drop everything buffered, e.g. after the STT stream reconnects
    pub fn reset(&mut self) {
        self.clear_turn();
        self.state = AggregatorState::Idle;
    }

    fn is_open(&self) -> bool {
        matches!(
            self.state,
            AggregatorState::Listening | AggregatorState::EndpointPending
        )
    }

    fn has_text(&self) -> bool {
        !self.committed.is_empty() || !self.working.is_empty()
    }

    fn begin_turn(&mut self, result: &TranscriptResult) {
        self.clear_turn();
        self.start_ms = Some(result.start_time_ms);
        self.state = AggregatorState::Listening;
    }

    fn clear_turn(&mut self) {
        self.committed.clear();
        self.working.clear();
        self.confidence_sum = 0.0;
        self.confidence_count = 0;
        self.start_ms = None;
        self.end_ms = 0;
        self.last_activity = None;
        self.pending_since = None;
    }

    fn should_barge_in(&self, result: &TranscriptResult) -> bool {
        self.config.barge_in_enabled
            && self.agent_speaking
            && !self.barge_in_fired
            && result.confidence >= self.config.barge_in_min_confidence
            && result.text.trim().chars().count() >= self.config.barge_in_min_chars
    }

    /// A result belongs to the last finalized turn when it starts inside that
    /// turn's span. Without provider timing, a prompt repeat of the same text
    /// counts as well.
    fn is_repeat_of_finalized(&self, result: &TranscriptResult, now: Instant) -> bool {
        if self.state != AggregatorState::Finalized {
            return false;
        }
        let Some(last) = &self.last_finalized else {
            return false;
        };
        if last.end_ms > 0 && result.end_time_ms > 0 {
            return result.start_time_ms < last.end_ms;
        }
        if now.saturating_duration_since(last.at) >= self.config.endpoint_silence {
            return false;
        }
        let text = normalize(&result.text);
        text == last.text || (!result.is_final && last.text.starts_with(&text))
    }

    fn finalize(&mut self, now: Instant) -> Option<AggregatorEvent> {
        let text = self.current_text();
        let text = text.trim();
        if text.is_empty() {
            self.reset();
            return None;
        }

        let confidence = if self.confidence_count > 0 {
            self.confidence_sum / self.confidence_count as f32
        } else {
            0.0
        };
        let utterance = Utterance::caller(
            self.ids.next(),
            text,
            self.start_ms.unwrap_or(0),
            self.end_ms,
            confidence,
        );

        self.last_finalized = Some(FinalizedSpan {
            text: normalize(text),
            end_ms: self.end_ms,
            at: now,
        });
        self.clear_turn();
        self.state = AggregatorState::Finalized;

        tracing::debug!(id = utterance.id, text = %utterance.text, "Caller utterance finalized");
        Some(AggregatorEvent::Utterance(utterance))
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> TranscriptAggregator {
        TranscriptAggregator::new(AggregatorConfig::default(), UtteranceIds::new())
    }

    fn utterances(events: &[AggregatorEvent]) -> Vec<&Utterance> {
        events
            .iter()
            .filter_map(|e| match e {
                AggregatorEvent::Utterance(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_partial_then_speech_final() {
        let mut agg = aggregator();
        let t0 = Instant::now();

        let events = agg.on_transcript(TranscriptResult::partial("my name", 0.8), t0);
        assert_eq!(agg.state(), AggregatorState::Listening);
        assert!(matches!(&events[0], AggregatorEvent::Partial { text, .. } if text == "my name"));

        let events = agg.on_transcript(
            TranscriptResult::final_result("my name is Jane", 0.9)
                .with_time_range(0, 1200)
                .with_speech_final(),
            t0 + Duration::from_millis(300),
        );
        let done = utterances(&events);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].text, "my name is Jane");
        assert_eq!(done[0].id, 1);
        assert_eq!(agg.state(), AggregatorState::Finalized);
    }

    #[test]
    fn test_segments_accumulate_until_speech_final() {
        let mut agg = aggregator();
        let t0 = Instant::now();

        agg.on_transcript(TranscriptResult::final_result("one two three", 0.9).with_time_range(0, 900), t0);
        assert_eq!(agg.state(), AggregatorState::Listening);
        let events = agg.on_transcript(
            TranscriptResult::final_result("four five", 0.9)
                .with_time_range(900, 1500)
                .with_speech_final(),
            t0,
        );
        assert_eq!(utterances(&events)[0].text, "one two three four five");
        assert_eq!(utterances(&events)[0].start_ms, 0);
        assert_eq!(utterances(&events)[0].end_ms, 1500);
    }

    #[test]
    fn test_silence_timeout_forces_finalization_after_grace() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.on_transcript(TranscriptResult::partial("yes please", 0.7), t0);

        assert!(agg.on_tick(t0 + Duration::from_millis(500)).is_empty());
        assert!(agg.on_tick(t0 + Duration::from_millis(900)).is_empty());
        assert_eq!(agg.state(), AggregatorState::EndpointPending);

        assert!(agg.on_tick(t0 + Duration::from_millis(1000)).is_empty());
        let events = agg.on_tick(t0 + Duration::from_millis(1150));
        assert_eq!(utterances(&events)[0].text, "yes please");
        assert_eq!(agg.state(), AggregatorState::Finalized);
    }

    #[test]
    fn test_final_within_grace_wins() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.on_transcript(TranscriptResult::partial("I think it's", 0.6), t0);
        agg.on_tick(t0 + Duration::from_millis(900));
        assert_eq!(agg.state(), AggregatorState::EndpointPending);

        let events = agg.on_transcript(
            TranscriptResult::final_result("I think it's Tuesday", 0.9),
            t0 + Duration::from_millis(1000),
        );
        assert_eq!(utterances(&events)[0].text, "I think it's Tuesday");

        // grace expiry afterwards produces nothing more
        assert!(agg.on_tick(t0 + Duration::from_millis(1300)).is_empty());
    }

    #[test]
    fn test_repeated_finals_ignored() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        let fin = TranscriptResult::final_result("my phone is 555 1234", 0.9)
            .with_time_range(100, 2000)
            .with_speech_final();

        assert_eq!(utterances(&agg.on_transcript(fin.clone(), t0)).len(), 1);
        assert!(agg.on_transcript(fin.clone(), t0).is_empty());
        assert!(agg.on_transcript(fin, t0).is_empty());

        // different text but inside the finalized span
        let late = TranscriptResult::final_result("my phone is 555 1235", 0.9)
            .with_time_range(150, 2000)
            .with_speech_final();
        assert!(agg.on_transcript(late, t0).is_empty());

        // a genuinely new turn still goes through
        let next = TranscriptResult::final_result("that's right", 0.9)
            .with_time_range(2500, 3000)
            .with_speech_final();
        let events = agg.on_transcript(next, t0);
        assert_eq!(utterances(&events)[0].id, 2);
    }

    #[test]
    fn test_final_after_forced_finalization_ignored() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.on_transcript(TranscriptResult::partial("no", 0.8).with_time_range(0, 400), t0);
        agg.on_tick(t0 + Duration::from_millis(900));
        let events = agg.on_tick(t0 + Duration::from_millis(1200));
        assert_eq!(utterances(&events).len(), 1);

        let late = TranscriptResult::final_result("No.", 0.95)
            .with_time_range(0, 450)
            .with_speech_final();
        assert!(agg.on_transcript(late, t0 + Duration::from_millis(1300)).is_empty());
    }

    #[test]
    fn test_untimed_same_answer_accepted_as_new_turn_later() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        let yes = TranscriptResult::final_result("yes", 0.9).with_speech_final();

        assert_eq!(utterances(&agg.on_transcript(yes.clone(), t0)).len(), 1);
        // immediate repeat is the provider resending
        assert!(agg.on_transcript(yes.clone(), t0 + Duration::from_millis(100)).is_empty());
        // answering "yes" to the next question is a new turn
        let events = agg.on_transcript(yes, t0 + Duration::from_secs(3));
        assert_eq!(utterances(&events).len(), 1);
    }

    #[test]
    fn test_empty_partials_do_not_reset_timer() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.on_transcript(TranscriptResult::partial("hello", 0.8), t0);
        agg.on_transcript(TranscriptResult::partial("", 0.0), t0 + Duration::from_millis(800));
        agg.on_tick(t0 + Duration::from_millis(900));
        assert_eq!(agg.state(), AggregatorState::EndpointPending);
    }

    #[test]
    fn test_barge_in_once_per_agent_utterance() {
        let mut agg = aggregator();
        let t0 = Instant::now();
        agg.set_agent_speaking(true);

        // below length threshold
        let events = agg.on_transcript(TranscriptResult::partial("uh", 0.9), t0);
        assert!(!events.iter().any(|e| matches!(e, AggregatorEvent::BargeIn { .. })));

        // below confidence threshold
        let events = agg.on_transcript(TranscriptResult::partial("wait wait", 0.3), t0);
        assert!(!events.iter().any(|e| matches!(e, AggregatorEvent::BargeIn { .. })));

        let events = agg.on_transcript(TranscriptResult::partial("wait a second", 0.8), t0);
        assert!(matches!(events[0], AggregatorEvent::BargeIn { .. }));

        let events = agg.on_transcript(TranscriptResult::partial("wait a second please", 0.8), t0);
        assert!(!events.iter().any(|e| matches!(e, AggregatorEvent::BargeIn { .. })));

        agg.set_agent_speaking(false);
        agg.set_agent_speaking(true);
        let events = agg.on_transcript(TranscriptResult::partial("wait a second please now", 0.8), t0);
        assert!(matches!(events[0], AggregatorEvent::BargeIn { .. }));
    }

    #[test]
    fn test_no_barge_in_when_agent_silent() {
        let mut agg = aggregator();
        let events = agg.on_transcript(TranscriptResult::partial("hello there", 0.9), Instant::now());
        assert!(!events.iter().any(|e| matches!(e, AggregatorEvent::BargeIn { .. })));
    }
}
