//! Dialogue backend contract
//!
//! The backend receives the conversation so far, a snapshot of the intake
//! record and the field currently being collected. It answers with a reply
//! suggestion, an intent and zero or more field updates. Field updates are
//! suggestions only; the dialogue policy validates them before anything is
//! written to the record.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use intake_core::DialogueBackendError;

use crate::prompt::Message;

/// What the caller was trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Answered the question
    Answer,
    /// Said something unrelated to the intake
    OffTopic,
    /// Does not want to give this information
    Decline,
    /// Agreed
    Confirm,
    /// Disagreed or corrected
    Deny,
    /// Asked to hear the question again
    Repeat,
    /// Could not be interpreted
    Unclear,
}

/// One backend turn request
#[derive(Debug, Clone, Serialize)]
pub struct BackendRequest {
    /// Current stage name
    pub stage: String,
    /// Field being collected, if any
    pub expected_field: Option<String>,
    /// The question the caller is answering
    pub question: String,
    /// What the caller said
    pub caller_text: String,
    /// Intake record snapshot
    pub record: serde_json::Value,
    /// Recent conversation
    pub history: Vec<Message>,
}

/// One backend turn response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub intent: Intent,

    /// Suggested agent reply
    #[serde(default)]
    pub reply: Option<String>,

    /// Suggested field values keyed by field name
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl BackendResponse {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            reply: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Dialogue backend trait
#[async_trait::async_trait]
pub trait DialogueBackend: Send + Sync {
    /// Produce one structured turn
    async fn complete(&self, request: &BackendRequest) -> Result<BackendResponse, DialogueBackendError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// Parse model output into a response. Tolerates prose or code fences around
/// the JSON object.
pub fn parse_backend_json(text: &str) -> Result<BackendResponse, DialogueBackendError> {
    let json = JSON_OBJECT
        .find(text)
        .map(|m| m.as_str())
        .ok_or_else(|| DialogueBackendError::Parse("no JSON object in response".to_string()))?;

    #[derive(Deserialize)]
    struct Raw {
        #[serde(default)]
        intent: Option<String>,
        #[serde(default)]
        reply: Option<String>,
        #[serde(default)]
        fields: BTreeMap<String, serde_json::Value>,
    }

    let raw: Raw = serde_json::from_str(json).map_err(|e| DialogueBackendError::Parse(e.to_string()))?;

    let intent = match raw.intent.as_deref().map(|s| s.trim().to_lowercase()) {
        Some(s) => serde_json::from_value(serde_json::Value::String(s.replace(['-', ' '], "_")))
            .unwrap_or(Intent::Unclear),
        None => Intent::Answer,
    };

    // models sometimes return numbers or booleans for field values
    let fields = raw
        .fields
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some((k, s)),
            other => Some((k, other.to_string())),
        })
        .collect();

    Ok(BackendResponse {
        intent,
        reply: raw.reply.filter(|r| !r.trim().is_empty()),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let response = parse_backend_json(
            r#"{"intent":"answer","reply":"Thanks.","fields":{"chief_complaint":"persistent cough"}}"#,
        )
        .unwrap();
        assert_eq!(response.intent, Intent::Answer);
        assert_eq!(response.field("chief_complaint"), Some("persistent cough"));
        assert_eq!(response.reply.as_deref(), Some("Thanks."));
    }

    #[test]
    fn test_parse_fenced_json_with_odd_values() {
        let text = "Sure!\n```json\n{\"intent\": \"Off-Topic\", \"fields\": {\"zip\": 10001, \"x\": null}}\n```";
        let response = parse_backend_json(text).unwrap();
        assert_eq!(response.intent, Intent::OffTopic);
        assert_eq!(response.field("zip"), Some("10001"));
        assert!(response.field("x").is_none());
    }

    #[test]
    fn test_parse_unknown_intent_is_unclear() {
        let response = parse_backend_json(r#"{"intent":"banana"}"#).unwrap();
        assert_eq!(response.intent, Intent::Unclear);
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_backend_json("no json here"),
            Err(DialogueBackendError::Parse(_))
        ));
        assert!(parse_backend_json("{not valid}").is_err());
    }
}
