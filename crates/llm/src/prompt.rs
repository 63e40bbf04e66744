//! Prompt building for the intake dialogue backend

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Builds the message list for one backend turn
pub struct PromptBuilder {
    messages: Vec<Message>,
    practice_name: String,
}

impl PromptBuilder {
    pub fn new(practice_name: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            practice_name: practice_name.into(),
        }
    }

    /// Base instructions and the JSON response contract
    pub fn system_prompt(mut self) -> Self {
        let system = format!(
            r#"You are a friendly, polite and efficient intake assistant answering the phone for {practice}.

## Your Role
- Collect the caller's intake details one question at a time
- Never give medical advice or diagnose anything
- If the caller asks about something unrelated, answer in one short sentence at most and steer back to the current question

## Speaking Style
- Your replies are converted to audio, so never use special characters, emojis, bullet points or markdown
- Use short sentences
- Ask exactly one question per reply

## Response Format
Reply with a single JSON object and nothing else:
{{"intent": "answer|off_topic|decline|confirm|deny|repeat|unclear", "reply": "what to say next", "fields": {{"field_name": "value"}}}}
Only put a value in "fields" when the caller actually said it. Never invent values."#,
            practice = self.practice_name,
        );

        self.messages.push(Message::system(system));
        self
    }

    /// Current record snapshot
    pub fn with_record(mut self, record: &serde_json::Value) -> Self {
        if !record.is_null() {
            self.messages.push(Message::system(format!(
                "## Intake Record So Far\n{}",
                record
            )));
        }
        self
    }

    /// What the agent is currently trying to collect
    pub fn with_stage_guidance(mut self, stage: &str, field: Option<&str>, question: &str) -> Self {
        let mut guidance = format!("## Current Step\nStage: {}\n", stage);
        if let Some(field) = field {
            guidance.push_str(&format!(
                "Expected field: {}. Put the caller's answer under this key in \"fields\".\n",
                field
            ));
        }
        if field == Some("chief_complaint") {
            guidance.push_str(
                "Summarize the reason for the visit in a few plain words, keeping the caller's meaning.\n",
            );
        }
        guidance.push_str(&format!("Question asked: {}", question));
        self.messages.push(Message::system(guidance));
        self
    }

    /// Add conversation history
    pub fn with_history(mut self, history: &[Message]) -> Self {
        self.messages.extend(history.iter().cloned());
        self
    }

    /// Add current caller message
    pub fn user_message(mut self, message: &str) -> Self {
        self.messages.push(Message::user(message));
        self
    }

    /// Build final message list
    pub fn build(self) -> Vec<Message> {
        self.messages
    }

    /// Build, dropping the oldest conversation messages until the estimate
    /// fits `max_tokens`. System messages are always kept.
    pub fn build_with_limit(self, max_tokens: usize) -> Vec<Message> {
        let current_tokens = self.estimate_tokens();
        if current_tokens <= max_tokens {
            return self.messages;
        }

        let (system_msgs, conv_msgs): (Vec<_>, Vec<_>) = self
            .messages
            .into_iter()
            .partition(|m| m.role == Role::System);

        let system_tokens: usize = system_msgs.iter().map(|m| estimate(&m.content)).sum();
        let available = max_tokens.saturating_sub(system_tokens);

        let mut kept: Vec<Message> = Vec::new();
        let mut used = 0;
        for msg in conv_msgs.into_iter().rev() {
            let tokens = estimate(&msg.content);
            if used + tokens > available {
                break;
            }
            used += tokens;
            kept.push(msg);
        }
        kept.reverse();

        tracing::debug!(
            "Context truncated: {} -> {} tokens ({} messages kept)",
            current_tokens,
            system_tokens + used,
            system_msgs.len() + kept.len()
        );

        let mut result = system_msgs;
        result.extend(kept);
        result
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Rough token estimate, four characters per token
    pub fn estimate_tokens(&self) -> usize {
        self.messages.iter().map(|m| estimate(&m.content)).sum()
    }
}

fn estimate(content: &str) -> usize {
    content.chars().count().max(1) / 4 + 4
}
