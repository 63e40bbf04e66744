//! Keyword backend used when no language model is configured
//!
//! Classifies the caller's intent with a few phrase lists and takes the
//! chief complaint from the caller's own words.

use once_cell::sync::Lazy;
use regex::Regex;

use intake_core::DialogueBackendError;

use crate::backend::{BackendRequest, BackendResponse, DialogueBackend, Intent};

static REPEAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(repeat( that)?|say (that|it) again|come again|pardon|didn'?t (catch|hear) (that|you))\b")
        .expect("valid regex")
});

static DECLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(rather not|prefer not|skip( it| that)?|don'?t have (one|an? \w+)|no thanks|not comfortable)\b")
        .expect("valid regex")
});

/// Questions put to the agent, and topics that are never intake answers.
/// "When I walk my knee hurts" is a statement, so a question word alone is
/// not enough.
static OFF_TOPIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:what|who|where|why|how|when|which)(?:'s|'re| is| are| was| do| does| did| can| will| should| much| time)|(?:can|could|would|will) you|do you|are you|is (?:it|there|the office))\b.*|.*\b(?:weather|joke|parking|directions|open today|office hours|opening hours|business hours)\b.*",
    )
    .expect("valid regex")
});

static FILLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:um+|uh+|well|so|yeah|okay|ok)[,\s]+)*(?:i'?m calling (?:because|about|for)|i(?: am|'m) here (?:because|for)|the reason is|it'?s (?:because|for)|i have|i've got|i've been having|i'?m having)?[,\s]*")
        .expect("valid regex")
});

const YES: &[&str] = &["yes", "yeah", "yep", "correct", "that's right", "sure", "absolutely"];
const NO: &[&str] = &["no", "nope", "wrong", "incorrect", "not right", "that's wrong"];

/// Words that make up a reply with no answer in it
const REPLY_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "sure", "okay", "ok", "correct", "absolutely", "right", "that's",
    "no", "nope", "not", "wrong", "incorrect", "uh", "um",
];

/// True when the text is only yes/no words, e.g. "yeah sure" or "no".
/// "Yeah, it's Jane" is not bare.
pub fn is_bare_reply(text: &str) -> bool {
    let lower = text.to_lowercase();
    let mut words = lower
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?'))
        .filter(|w| !w.is_empty())
        .peekable();
    words.peek().is_some() && words.all(|w| REPLY_WORDS.contains(&w))
}

/// Classify short conversational replies. Returns `None` when the text
/// looks like an actual answer.
pub fn quick_intent(text: &str) -> Option<Intent> {
    let text = text.trim().to_lowercase();
    let words = text.replace(',', "");
    let words = words.trim_end_matches(['.', '!', '?']).trim();

    if REPEAT.is_match(&text) {
        return Some(Intent::Repeat);
    }
    if DECLINE.is_match(&text) {
        return Some(Intent::Decline);
    }
    if YES.iter().any(|y| words == *y || words.starts_with(&format!("{} ", y))) {
        return Some(Intent::Confirm);
    }
    if NO.iter().any(|n| words == *n || words.starts_with(&format!("{} ", n))) {
        return Some(Intent::Deny);
    }
    if OFF_TOPIC.is_match(words) {
        return Some(Intent::OffTopic);
    }
    None
}

#[derive(Debug, Default, Clone)]
pub struct RuleBasedBackend;

impl RuleBasedBackend {
    pub fn new() -> Self {
        Self
    }

    fn classify(&self, request: &BackendRequest) -> BackendResponse {
        if let Some(intent) = quick_intent(&request.caller_text) {
            return BackendResponse::new(intent);
        }

        match request.expected_field.as_deref() {
            Some(field @ "chief_complaint") => {
                let complaint = FILLER.replace(request.caller_text.trim(), "");
                let complaint = complaint.trim().trim_end_matches('.');
                if complaint.is_empty() {
                    BackendResponse::new(Intent::Unclear)
                } else {
                    BackendResponse::new(Intent::Answer).with_field(field, complaint)
                }
            }
            _ => BackendResponse::new(Intent::Unclear),
        }
    }
}

#[async_trait::async_trait]
impl DialogueBackend for RuleBasedBackend {
    async fn complete(&self, request: &BackendRequest) -> Result<BackendResponse, DialogueBackendError> {
        Ok(self.classify(request))
    }

    fn name(&self) -> &str {
        "rules"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(field: Option<&str>, text: &str) -> BackendRequest {
        BackendRequest {
            stage: "test".to_string(),
            expected_field: field.map(str::to_string),
            question: "question".to_string(),
            caller_text: text.to_string(),
            record: serde_json::Value::Null,
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_complaint_taken_from_caller_words() {
        let backend = RuleBasedBackend::new();
        let response = backend
            .complete(&request(Some("chief_complaint"), "Um, I'm calling because I have a sore throat."))
            .await
            .unwrap();
        assert_eq!(response.intent, Intent::Answer);
        assert_eq!(response.field("chief_complaint"), Some("I have a sore throat"));

        let response = backend
            .complete(&request(Some("chief_complaint"), "Back pain for three days"))
            .await
            .unwrap();
        assert_eq!(response.field("chief_complaint"), Some("Back pain for three days"));
    }

    #[tokio::test]
    async fn test_intents() {
        let backend = RuleBasedBackend::new();
        let intent = |text: &str| {
            let request = request(Some("email"), text);
            let backend = backend.clone();
            async move { backend.complete(&request).await.unwrap().intent }
        };

        assert_eq!(intent("Can you repeat that?").await, Intent::Repeat);
        assert_eq!(intent("I'd rather not say").await, Intent::Decline);
        assert_eq!(intent("I don't have one").await, Intent::Decline);
        assert_eq!(intent("Yes, that's right").await, Intent::Confirm);
        assert_eq!(intent("nope").await, Intent::Deny);
        assert_eq!(intent("What's the weather like today?").await, Intent::OffTopic);
        assert_eq!(intent("banana").await, Intent::Unclear);
        assert_eq!(intent("What are your office hours?").await, Intent::OffTopic);
        assert_eq!(intent("Who are you").await, Intent::OffTopic);
    }

    #[tokio::test]
    async fn test_symptom_statements_are_answers() {
        let backend = RuleBasedBackend::new();
        for text in [
            "I've had a bad headache for the last six hours",
            "When I walk my knee hurts",
            "How I feel is dizzy most mornings",
        ] {
            assert_eq!(quick_intent(text), None, "{}", text);
            let response = backend
                .complete(&request(Some("chief_complaint"), text))
                .await
                .unwrap();
            assert_eq!(response.intent, Intent::Answer, "{}", text);
            assert!(response.field("chief_complaint").is_some());
        }
    }

    #[test]
    fn test_bare_reply() {
        assert!(is_bare_reply("no"));
        assert!(is_bare_reply("Yeah, sure."));
        assert!(is_bare_reply("that's right"));
        assert!(!is_bare_reply("Yeah, it's Jane"));
        assert!(!is_bare_reply(""));
    }
}
