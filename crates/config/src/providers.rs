//! External speech and language provider settings
//!
//! Credentials are normally supplied through the environment, e.g.
//! `INTAKE_AGENT__PROVIDERS__STT__API_KEY`. A provider without a key runs in
//! its offline simple mode.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub stt: SttProviderConfig,

    #[serde(default)]
    pub tts: TtsProviderConfig,

    #[serde(default)]
    pub llm: LlmProviderConfig,

    #[serde(default)]
    pub email: EmailProviderConfig,

    #[serde(default)]
    pub address: AddressProviderConfig,
}

impl ProvidersConfig {
    /// Warn about providers that will fall back to simple mode
    pub fn warn_missing_credentials(&self) {
        if self.stt.api_key.is_none() {
            tracing::warn!("No STT api key configured; transcription runs in simple mode");
        }
        if self.tts.api_key.is_none() {
            tracing::warn!("No TTS api key configured; synthesis produces silence");
        }
        if self.llm.api_key.is_none() {
            tracing::warn!("No LLM api key configured; open-ended turns use rule-based replies");
        }
        if !self.email.is_configured() {
            tracing::info!("No SMTP sender configured; confirmations are only logged");
        }
        if !self.address.is_configured() {
            tracing::info!("No USPS credentials configured; addresses are checked against the local ZIP table");
        }
    }
}

/// Streaming speech-to-text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttProviderConfig {
    #[serde(default = "default_stt_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_stt_model")]
    pub model: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Provider-side endpointing hint in milliseconds
    #[serde(default = "default_endpointing")]
    pub endpointing_ms: u32,
}

fn default_stt_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}
fn default_stt_model() -> String {
    "nova-2-phonecall".to_string()
}
fn default_language() -> String {
    "en-US".to_string()
}
fn default_endpointing() -> u32 {
    300
}

impl Default for SttProviderConfig {
    fn default() -> Self {
        Self {
            url: default_stt_url(),
            api_key: None,
            model: default_stt_model(),
            language: default_language(),
            endpointing_ms: default_endpointing(),
        }
    }
}

/// Text-to-speech
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsProviderConfig {
    #[serde(default = "default_tts_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_tts_model")]
    pub model_id: String,

    #[serde(default = "default_voice")]
    pub voice_id: String,

    #[serde(default = "default_tts_version")]
    pub api_version: String,

    #[serde(default = "default_tts_timeout")]
    pub timeout_ms: u64,
}

fn default_tts_url() -> String {
    "https://api.cartesia.ai/tts/bytes".to_string()
}
fn default_tts_model() -> String {
    "sonic-english".to_string()
}
fn default_voice() -> String {
    "71a7ad14-091c-4e8e-a314-022ece01c121".to_string()
}
fn default_tts_version() -> String {
    "2024-06-10".to_string()
}
fn default_tts_timeout() -> u64 {
    5000
}

impl Default for TtsProviderConfig {
    fn default() -> Self {
        Self {
            url: default_tts_url(),
            api_key: None,
            model_id: default_tts_model(),
            voice_id: default_voice(),
            api_version: default_tts_version(),
            timeout_ms: default_tts_timeout(),
        }
    }
}

/// OpenAI-compatible chat completions backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    #[serde(default = "default_llm_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4.1-nano".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    256
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// SMTP relay for appointment confirmation emails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailProviderConfig {
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,

    /// STARTTLS port
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub sender_email: Option<String>,

    /// For providers with two-factor login this is an app password
    #[serde(default)]
    pub sender_password: Option<String>,

    #[serde(default = "default_smtp_timeout")]
    pub timeout_ms: u64,
}

fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_timeout() -> u64 {
    10000
}

impl EmailProviderConfig {
    pub fn is_configured(&self) -> bool {
        self.sender_email.is_some() && self.sender_password.is_some()
    }
}

impl Default for EmailProviderConfig {
    fn default() -> Self {
        Self {
            smtp_server: default_smtp_server(),
            smtp_port: default_smtp_port(),
            sender_email: None,
            sender_password: None,
            timeout_ms: default_smtp_timeout(),
        }
    }
}

/// USPS Addresses v3 API, OAuth client credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressProviderConfig {
    /// `https://apis-tem.usps.com` for the test environment
    #[serde(default = "default_usps_url")]
    pub base_url: String,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default = "default_usps_timeout")]
    pub timeout_ms: u64,
}

fn default_usps_url() -> String {
    "https://apis.usps.com".to_string()
}
fn default_usps_timeout() -> u64 {
    4000
}

impl AddressProviderConfig {
    pub fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

impl Default for AddressProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_usps_url(),
            client_id: None,
            client_secret: None,
            timeout_ms: default_usps_timeout(),
        }
    }
}
