//! OpenAI-compatible chat completions backend

use serde::{Deserialize, Serialize};
use std::time::Duration;

use intake_config::{DialogueConfig, LlmProviderConfig};
use intake_core::DialogueBackendError;

use crate::backend::{parse_backend_json, BackendRequest, BackendResponse, DialogueBackend};
use crate::prompt::{Message, PromptBuilder};
use crate::LlmError;

/// Context budget for one request
const MAX_CONTEXT_TOKENS: usize = 3000;

pub struct OpenAiBackend {
    client: reqwest::Client,
    config: LlmProviderConfig,
    api_key: String,
    practice_name: String,
    timeout_ms: u64,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(config: &LlmProviderConfig, dialogue: &DialogueConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::NotConfigured("providers.llm.api_key".to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| LlmError::Client(e.to_string()))?;

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
            practice_name: dialogue.practice_name.clone(),
            timeout_ms: dialogue.backend_timeout_ms,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn messages(&self, request: &BackendRequest) -> Vec<Message> {
        PromptBuilder::new(&self.practice_name)
            .system_prompt()
            .with_record(&request.record)
            .with_stage_guidance(
                &request.stage,
                request.expected_field.as_deref(),
                &request.question,
            )
            .with_history(&request.history)
            .user_message(&request.caller_text)
            .build_with_limit(MAX_CONTEXT_TOKENS)
    }
}

#[async_trait::async_trait]
impl DialogueBackend for OpenAiBackend {
    async fn complete(&self, request: &BackendRequest) -> Result<BackendResponse, DialogueBackendError> {
        let messages = self.messages(request);
        let body = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_millis(self.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DialogueBackendError::Timeout(self.timeout_ms)
                } else {
                    DialogueBackendError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DialogueBackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| DialogueBackendError::Parse(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DialogueBackendError::Parse("empty completion".to_string()))?;

        tracing::debug!(model = %self.config.model, "Backend turn: {}", content);
        parse_backend_json(&content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
