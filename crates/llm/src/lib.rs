//! Dialogue backend integration
//!
//! Open-ended caller turns (the chief complaint, answers the rule-based
//! validators cannot parse, off-topic questions) are delegated to a
//! language model that replies with a structured JSON turn.

pub mod backend;
pub mod openai;
pub mod prompt;
pub mod rules;

pub use backend::{parse_backend_json, BackendRequest, BackendResponse, DialogueBackend, Intent};
pub use openai::OpenAiBackend;
pub use prompt::{Message, PromptBuilder, Role};
pub use rules::{is_bare_reply, quick_intent, RuleBasedBackend};

use intake_core::DialogueBackendError;
use thiserror::Error;

/// LLM setup errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl From<LlmError> for DialogueBackendError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::NotConfigured(_) => DialogueBackendError::NotConfigured,
            LlmError::Client(msg) => DialogueBackendError::Request(msg),
        }
    }
}
