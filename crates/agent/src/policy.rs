//! Dialogue policy
//!
//! Owns the intake record of one call and turns every finalized caller
//! utterance into exactly one agent utterance. Rule-based validators handle
//! structured answers; the dialogue backend is consulted for open-ended
//! turns and for answers the rules cannot read.

use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

use intake_config::DialogueConfig;
use intake_core::{DialogueBackendError, Utterance, UtteranceIds, ValidationError};
use intake_llm::{is_bare_reply, quick_intent, BackendRequest, BackendResponse, DialogueBackend, Intent};

use crate::catalog::SlotCatalog;
use crate::conversation::{ConversationHistory, DeliveryStatus, EndReason};
use crate::intake::{FieldKey, FieldValue, IntakeRecord};
use crate::prompts;
use crate::stage::{IntakeStage, StageManager, TransitionReason};
use crate::validate::{AddressValidator, FieldValidator};

/// What the controller does after speaking a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Continue,
    /// Hang up once the utterance has played
    EndCall(EndReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub utterance: Utterance,
    pub action: PolicyAction,
}

impl PolicyDecision {
    pub fn ends_call(&self) -> bool {
        matches!(self.action, PolicyAction::EndCall(_))
    }
}

/// Words that point at a field when the caller corrects the readback, most
/// specific first
const CORRECTION_KEYWORDS: &[(&str, FieldKey)] = &[
    ("first name", FieldKey::FirstName),
    ("last name", FieldKey::LastName),
    ("surname", FieldKey::LastName),
    ("family name", FieldKey::LastName),
    ("date of birth", FieldKey::DateOfBirth),
    ("birthday", FieldKey::DateOfBirth),
    ("birth", FieldKey::DateOfBirth),
    ("born", FieldKey::DateOfBirth),
    ("member id", FieldKey::InsuranceId),
    ("insurance id", FieldKey::InsuranceId),
    ("member number", FieldKey::InsuranceId),
    ("id number", FieldKey::InsuranceId),
    ("insurance", FieldKey::PayerName),
    ("payer", FieldKey::PayerName),
    ("referring", FieldKey::ReferringPhysician),
    ("referred by", FieldKey::ReferringPhysician),
    ("referral", FieldKey::Referral),
    ("referred", FieldKey::Referral),
    ("reason", FieldKey::ChiefComplaint),
    ("complaint", FieldKey::ChiefComplaint),
    ("symptoms", FieldKey::ChiefComplaint),
    ("email", FieldKey::Email),
    ("address", FieldKey::Address),
    ("street", FieldKey::Address),
    ("zip", FieldKey::Address),
    ("city", FieldKey::Address),
    ("phone", FieldKey::Phone),
    ("number", FieldKey::Phone),
    ("appointment", FieldKey::AppointmentSlot),
    ("slot", FieldKey::AppointmentSlot),
    ("time", FieldKey::AppointmentSlot),
];

/// Filler between a field keyword and the corrected value
static CORRECTION_LEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[\s,:]*(?:(?:number|address|id|name)\b[\s,:]*)?(?:(?:is|was|should be|should say|to)\b[\s,:]*)?")
        .expect("valid regex")
});

/// End offset of `word` in `haystack` at word boundaries
fn find_word(haystack: &str, word: &str) -> Option<usize> {
    haystack
        .match_indices(word)
        .find(|(start, _)| {
            let before = haystack[..*start].chars().next_back();
            let after = haystack[start + word.len()..].chars().next();
            !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
        })
        .map(|(start, _)| start + word.len())
}

/// Words that make a question at the readback a change request, e.g.
/// "can you change my appointment to Friday?"
static CORRECTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:wrong|incorrect|not right|actually|change|changed|should be|fix|update|mistake)\b")
        .expect("valid regex")
});

/// Field named in a correction, with whatever the caller said after it
fn detect_correction(text: &str) -> Option<(FieldKey, String)> {
    let lower = text.to_ascii_lowercase();
    CORRECTION_KEYWORDS.iter().find_map(|(word, key)| {
        find_word(&lower, word).map(|end| {
            let tail = CORRECTION_LEAD.replace(&text[end..], "");
            (*key, tail.trim().trim_end_matches('.').to_string())
        })
    })
}

/// Errors that mean the rules found nothing usable, so the backend may
/// still make sense of the answer
fn needs_backend(error: &ValidationError) -> bool {
    matches!(
        error,
        ValidationError::Empty
            | ValidationError::NameFormat
            | ValidationError::YesNo
            | ValidationError::UnknownSlot
            | ValidationError::EmailFormat
            | ValidationError::PhoneDigitCount(0)
            | ValidationError::AddressFormat
            | ValidationError::InsuranceIdFormat
            | ValidationError::UnrecognizedDate
    )
}

pub struct DialoguePolicy {
    config: DialogueConfig,
    backend: Arc<dyn DialogueBackend>,
    validator: FieldValidator,
    ids: UtteranceIds,
    record: IntakeRecord,
    stages: StageManager,
    history: ConversationHistory,
    /// Field the last question asked for
    asking: Option<FieldKey>,
    /// Off-topic turns since that question was first asked
    redirects: u32,
    /// The caller cut off the last agent utterance
    interrupted: bool,
}

impl DialoguePolicy {
    pub fn new(
        config: DialogueConfig,
        backend: Arc<dyn DialogueBackend>,
        address_validator: Arc<dyn AddressValidator>,
        ids: UtteranceIds,
    ) -> Self {
        let today = Local::now().date_naive();
        Self {
            config,
            backend,
            validator: FieldValidator::new(today, SlotCatalog::mock(), address_validator),
            ids,
            record: IntakeRecord::new(),
            stages: StageManager::new(),
            history: ConversationHistory::new(),
            asking: None,
            redirects: 0,
            interrupted: false,
        }
    }

    /// Fix the reference date used for date-of-birth checks
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.validator = self.validator.with_today(today);
        self
    }

    pub fn record(&self) -> &IntakeRecord {
        &self.record
    }

    pub fn stage(&self) -> IntakeStage {
        self.stages.current()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn stages(&self) -> &StageManager {
        &self.stages
    }

    /// Greeting plus the first question
    pub fn start(&mut self) -> PolicyDecision {
        self.move_to(IntakeStage::CollectingName, TransitionReason::Started);
        let key = FieldKey::FirstName;
        self.ask(key);
        let text = format!(
            "{} {}",
            prompts::greeting(&self.config.practice_name),
            self.question(key)
        );
        self.say(text, PolicyAction::Continue)
    }

    /// Answer one finalized caller utterance. Returns `None` once the
    /// intake is complete.
    pub async fn handle_utterance(&mut self, utterance: Utterance) -> Option<PolicyDecision> {
        if self.stages.current() == IntakeStage::Complete {
            tracing::debug!(text = %utterance.text, "Ignoring caller after completion");
            return None;
        }

        let text = utterance.text.trim().to_string();
        self.history.push_caller(utterance);
        let interrupted = std::mem::take(&mut self.interrupted);

        if quick_intent(&text) == Some(Intent::Repeat) {
            return Some(self.repeat());
        }

        if self.stages.current() == IntakeStage::Confirming {
            return Some(self.handle_confirming(&text).await);
        }

        let Some(key) = self.asking else {
            return Some(self.advance(None));
        };
        Some(self.handle_answer(key, &text, interrupted).await)
    }

    /// Closing utterance for a call ended by the controller
    pub fn closing(&mut self, reason: EndReason) -> PolicyDecision {
        let text = match reason {
            EndReason::Completed => prompts::complete(&self.record),
            EndReason::IdleTimeout => prompts::idle_closing().to_string(),
            EndReason::MaxDuration => prompts::max_duration_closing().to_string(),
            EndReason::TranscriptionFailed | EndReason::Shutdown | EndReason::CallerHangup => {
                prompts::technical_apology().to_string()
            }
        };
        self.say(text, PolicyAction::EndCall(reason))
    }

    pub fn on_agent_delivered(&mut self, id: u64) {
        self.history.mark(id, DeliveryStatus::Delivered);
    }

    /// The caller barged in over agent utterance `id`
    pub fn on_agent_interrupted(&mut self, id: u64) {
        if self.history.mark(id, DeliveryStatus::Interrupted) {
            tracing::info!(utterance_id = id, "Agent utterance interrupted");
            if self.history.last_agent().map(|u| u.id) == Some(id) {
                self.interrupted = true;
            }
        }
    }

    pub fn on_agent_failed(&mut self, id: u64) {
        self.history.mark(id, DeliveryStatus::Failed);
    }

    async fn handle_answer(&mut self, key: FieldKey, text: &str, interrupted: bool) -> PolicyDecision {
        let quick = quick_intent(text);
        if key == FieldKey::Email && quick == Some(Intent::Decline) {
            return self.decline_email();
        }

        let validated = self.validator.validate(key, text).await;
        // replies that only talk to the agent are not answers, even where a
        // lenient validator would take them
        let conversational = match quick {
            Some(Intent::Decline) => true,
            Some(Intent::OffTopic) => key != FieldKey::ChiefComplaint || validated.is_err(),
            // yes and no are only answers to the referral question
            Some(Intent::Confirm) | Some(Intent::Deny) => {
                key != FieldKey::Referral && (validated.is_err() || is_bare_reply(text))
            }
            _ => false,
        };
        let rules = (!conversational).then_some(validated);

        match &rules {
            Some(Ok(value)) if key != FieldKey::ChiefComplaint => return self.accept(key, value.clone()),
            Some(Err(error)) if !needs_backend(error) => {
                return self.reject(key, text, error.clone(), interrupted)
            }
            _ => {}
        }

        match self.consult(Some(key), text).await {
            Ok(response) => self.apply_backend(key, text, response, rules, interrupted).await,
            Err(error) => self.backend_failed(key, text, error, rules),
        }
    }

    async fn apply_backend(
        &mut self,
        key: FieldKey,
        text: &str,
        response: BackendResponse,
        rules: Option<Result<FieldValue, ValidationError>>,
        interrupted: bool,
    ) -> PolicyDecision {
        match response.intent {
            Intent::OffTopic => return self.off_topic(key, text, response.reply, rules),
            Intent::Repeat => return self.repeat(),
            Intent::Decline if key == FieldKey::Email => return self.decline_email(),
            _ => {}
        }

        self.apply_extra_fields(key, &response).await;

        if let Some(suggested) = response.field(key.name()) {
            let suggested = suggested.to_string();
            return match self.validator.validate(key, &suggested).await {
                Ok(value) => self.accept(key, value),
                Err(error) => self.reject(key, text, error, interrupted),
            };
        }

        match rules {
            Some(Ok(value)) => self.accept(key, value),
            Some(Err(error)) => self.reject(key, text, error, interrupted),
            None => self.reject(key, text, ValidationError::Empty, interrupted),
        }
    }

    /// Other outstanding fields the caller volunteered in the same turn
    async fn apply_extra_fields(&mut self, asked: FieldKey, response: &BackendResponse) {
        for key in FieldKey::ALL {
            if key == asked || !self.record.is_outstanding(key) {
                continue;
            }
            let Some(suggested) = response.field(key.name()).map(str::to_string) else {
                continue;
            };
            if let Ok(value) = self.validator.validate(key, &suggested).await {
                if self.record.collect(key, value).is_ok() {
                    tracing::info!(field = key.name(), "Field collected from backend suggestion");
                }
            }
        }
    }

    fn accept(&mut self, key: FieldKey, value: FieldValue) -> PolicyDecision {
        if let Err(e) = self.record.collect(key, value) {
            tracing::warn!(error = %e, "Validated value rejected by record");
            return self.reject(key, "", ValidationError::Empty, false);
        }
        tracing::info!(field = key.name(), "Field collected");
        metrics::counter!("intake_agent_fields_collected_total", "field" => key.name()).increment(1);
        self.stages.clear_clarifying();
        self.advance(None)
    }

    fn reject(&mut self, key: FieldKey, text: &str, error: ValidationError, interrupted: bool) -> PolicyDecision {
        let question = self.question(key);

        // the caller talked over the question; ask again without counting it
        if interrupted && needs_backend(&error) {
            tracing::debug!(field = key.name(), "Re-asking interrupted question");
            return self.say(question, PolicyAction::Continue);
        }

        let failures = self.record.invalidate(key, text);
        metrics::counter!("intake_agent_validation_failures_total", "field" => key.name()).increment(1);
        tracing::debug!(field = key.name(), failures, error = %error, "Answer rejected");

        if failures > self.config.max_field_retries {
            return self.accept_unverified(key, failures);
        }

        self.stages.enter_clarifying(key);
        self.say(prompts::reask(key, &error, &question), PolicyAction::Continue)
    }

    fn accept_unverified(&mut self, key: FieldKey, failures: u32) -> PolicyDecision {
        self.record.accept_unverified(key);
        tracing::warn!(
            field = key.name(),
            failures,
            raw = ?self.record.display(key),
            "Accepting field unverified after retry cap"
        );
        metrics::counter!("intake_agent_unverified_fields_total", "field" => key.name()).increment(1);
        self.stages.clear_clarifying();
        self.advance(Some(prompts::unverified(key)))
    }

    fn decline_email(&mut self) -> PolicyDecision {
        if let Err(e) = self.record.collect(FieldKey::Email, FieldValue::Declined) {
            tracing::warn!(error = %e, "Could not record declined email");
        }
        tracing::info!("Caller declined to give an email");
        self.stages.clear_clarifying();
        self.advance(Some(prompts::declined_email().to_string()))
    }

    fn backend_failed(
        &mut self,
        key: FieldKey,
        text: &str,
        error: DialogueBackendError,
        rules: Option<Result<FieldValue, ValidationError>>,
    ) -> PolicyDecision {
        tracing::warn!(error = %error, field = key.name(), "Dialogue backend failed");
        metrics::counter!("intake_agent_errors_total", "kind" => "dialogue_backend").increment(1);

        // the complaint only went out to be summarized
        if let (FieldKey::ChiefComplaint, Some(Ok(value))) = (key, rules) {
            tracing::warn!(field = key.name(), "Keeping the caller's own words without a summary");
            return self.accept(key, value);
        }

        let failures = self.record.invalidate(key, text);
        if failures > self.config.max_field_retries {
            return self.accept_unverified(key, failures);
        }
        self.stages.enter_clarifying(key);
        let question = self.question(key);
        self.say(prompts::backend_apology(&question), PolicyAction::Continue)
    }

    /// Redirect an off-topic turn. Past the retry cap the field moves on
    /// with whatever answer was heard, so a caller who keeps wandering off
    /// cannot stall the intake.
    fn off_topic(
        &mut self,
        key: FieldKey,
        text: &str,
        reply: Option<String>,
        rules: Option<Result<FieldValue, ValidationError>>,
    ) -> PolicyDecision {
        self.redirects += 1;
        if self.redirects <= self.config.max_field_retries {
            return self.redirect(reply);
        }
        tracing::warn!(field = key.name(), redirects = self.redirects, "Caller kept going off topic");
        match rules {
            Some(Ok(value)) => self.accept(key, value),
            _ => {
                // the off-topic text is not an answer; keep only what was heard before
                tracing::debug!(field = key.name(), text, "Not storing off-topic text");
                let failures = self.record.invalidate(key, "");
                self.accept_unverified(key, failures)
            }
        }
    }

    fn redirect(&mut self, reply: Option<String>) -> PolicyDecision {
        metrics::counter!("intake_agent_off_topic_total").increment(1);
        let question = self.current_question();
        let text = match reply.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) {
            Some(reply) if reply.ends_with('?') => reply,
            Some(reply) => format!("{} {}", reply, question),
            None => prompts::off_topic(&question),
        };
        self.say(text, PolicyAction::Continue)
    }

    fn repeat(&mut self) -> PolicyDecision {
        let text = self
            .history
            .last_agent()
            .map(|u| u.text.clone())
            .unwrap_or_else(|| self.current_question());
        self.say(text, PolicyAction::Continue)
    }

    async fn handle_confirming(&mut self, text: &str) -> PolicyDecision {
        let quick = quick_intent(text);
        // "what time is my appointment?" names a field without correcting it
        let correction = detect_correction(text)
            .filter(|_| quick != Some(Intent::OffTopic) || CORRECTION_MARKER.is_match(text));
        match (quick, correction) {
            (Some(Intent::Confirm), None) => self.complete(),
            (Some(Intent::Confirm), Some((key, tail))) => match self.inline_value(key, &tail).await {
                Some(value) => self.apply_correction(key, value),
                None => self.complete(),
            },
            (_, Some((key, tail))) => self.correct(key, &tail).await,
            (Some(Intent::Deny), None) => self.say(prompts::which_correction().to_string(), PolicyAction::Continue),
            _ => match self.consult(None, text).await {
                Ok(response) => match response.intent {
                    Intent::Confirm => self.complete(),
                    Intent::Deny => self.say(prompts::which_correction().to_string(), PolicyAction::Continue),
                    Intent::OffTopic => self.redirect(response.reply),
                    Intent::Repeat => self.repeat(),
                    _ => self.say(
                        format!("Sorry, I didn't catch that. {}", prompts::confirm_question()),
                        PolicyAction::Continue,
                    ),
                },
                Err(error) => {
                    tracing::warn!(error = %error, "Dialogue backend failed during confirmation");
                    metrics::counter!("intake_agent_errors_total", "kind" => "dialogue_backend").increment(1);
                    self.say(prompts::backend_apology(prompts::confirm_question()), PolicyAction::Continue)
                }
            },
        }
    }

    /// A corrected value given in the same breath, e.g. "no, my phone
    /// number is 555 987 6543"
    async fn inline_value(&self, key: FieldKey, tail: &str) -> Option<FieldValue> {
        if tail.trim().is_empty() || quick_intent(tail).is_some() {
            return None;
        }
        self.validator.validate(key, tail).await.ok()
    }

    async fn correct(&mut self, key: FieldKey, tail: &str) -> PolicyDecision {
        tracing::info!(field = key.name(), "Caller correcting field");
        metrics::counter!("intake_agent_corrections_total", "field" => key.name()).increment(1);
        if let Some(value) = self.inline_value(key, tail).await {
            return self.apply_correction(key, value);
        }

        self.record.reset(key);
        self.move_to(IntakeStage::for_field(key), TransitionReason::Correction(key));
        self.ask(key);
        let question = self.question(key);
        self.say(prompts::correction(key, &question), PolicyAction::Continue)
    }

    fn apply_correction(&mut self, key: FieldKey, value: FieldValue) -> PolicyDecision {
        if let Err(e) = self.record.collect(key, value) {
            tracing::warn!(error = %e, "Corrected value rejected by record");
        }
        tracing::info!(field = key.name(), "Field corrected");
        self.advance(Some(prompts::updated(key)))
    }

    fn complete(&mut self) -> PolicyDecision {
        self.move_to(IntakeStage::Complete, TransitionReason::Confirmed);
        tracing::info!(
            unverified = ?self.record.unverified_fields(),
            "Intake confirmed"
        );
        let text = prompts::complete(&self.record);
        self.say(text, PolicyAction::EndCall(EndReason::Completed))
    }

    /// Ask for the next outstanding field, or read everything back
    fn advance(&mut self, prefix: Option<String>) -> PolicyDecision {
        let body = match self.record.next_outstanding() {
            Some(next) => {
                let from = self.stages.current();
                let reason = match from {
                    IntakeStage::Confirming => TransitionReason::Correction(next),
                    _ => TransitionReason::StageCompleted,
                };
                self.move_to(IntakeStage::for_field(next), reason);
                self.ask(next);
                self.question(next)
            }
            None => {
                self.asking = None;
                self.move_to(IntakeStage::Confirming, TransitionReason::StageCompleted);
                prompts::readback(&self.record)
            }
        };
        let text = match prefix {
            Some(prefix) => format!("{} {}", prefix, body),
            None => body,
        };
        self.say(text, PolicyAction::Continue)
    }

    fn move_to(&mut self, stage: IntakeStage, reason: TransitionReason) {
        if let Err(e) = self.stages.transition(stage, reason) {
            tracing::warn!(error = %e, "Stage transition refused");
        }
    }

    fn ask(&mut self, key: FieldKey) {
        if self.asking != Some(key) {
            self.redirects = 0;
        }
        self.asking = Some(key);
        self.record.mark_pending(key);
    }

    fn question(&self, key: FieldKey) -> String {
        prompts::question(key, &self.record, self.validator.catalog())
    }

    fn current_question(&self) -> String {
        match self.asking {
            Some(key) => self.question(key),
            None => prompts::confirm_question().to_string(),
        }
    }

    fn say(&mut self, text: String, action: PolicyAction) -> PolicyDecision {
        let utterance = Utterance::agent(self.ids.next(), text);
        self.history.push_agent(utterance.clone());
        PolicyDecision { utterance, action }
    }

    /// One backend turn, retried once after the configured backoff
    async fn consult(&self, key: Option<FieldKey>, text: &str) -> Result<BackendResponse, DialogueBackendError> {
        // the caller's turn is already in history and goes in as the user message
        let mut history = self.history.to_messages(self.config.history_turns + 1);
        history.pop();

        let request = BackendRequest {
            stage: self.stages.current().display_name().to_string(),
            expected_field: key.map(|k| k.name().to_string()),
            question: self.current_question(),
            caller_text: text.to_string(),
            record: self.record.snapshot(),
            history,
        };

        match self.complete_once(&request).await {
            Ok(response) => Ok(response),
            Err(first) => {
                tracing::debug!(error = %first, backend = self.backend.name(), "Retrying dialogue backend");
                tokio::time::sleep(Duration::from_millis(self.config.backend_retry_backoff_ms)).await;
                self.complete_once(&request).await
            }
        }
    }

    async fn complete_once(&self, request: &BackendRequest) -> Result<BackendResponse, DialogueBackendError> {
        let timeout = Duration::from_millis(self.config.backend_timeout_ms);
        match tokio::time::timeout(timeout, self.backend.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(DialogueBackendError::Timeout(self.config.backend_timeout_ms)),
        }
    }
}
