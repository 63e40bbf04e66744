//! Application State
//!
//! Shared state across all handlers, plus the provider wiring every call
//! is built from.

use std::sync::Arc;
use tokio::sync::watch;

use intake_agent::{
    load_fallback_audio, AddressValidator, CallConfig, CallDeps, CompletionNotifier, EmailNotifier,
    LoggingNotifier, RuleBasedAddressValidator, UspsAddressValidator,
};
use intake_config::Settings;
use intake_llm::{DialogueBackend, OpenAiBackend, RuleBasedBackend};
use intake_pipeline::{
    CartesiaTts, ChannelStt, ChunkerConfig, DeepgramStt, SimpleTts, SpeechStreamer, SttProvider,
    TtsProvider,
};

use crate::session::SessionManager;
use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: Arc<Settings>,
    /// Per-call settings derived from `config`
    pub call_config: CallConfig,
    /// Providers shared by every call
    pub deps: CallDeps,
    /// Live calls
    pub sessions: Arc<SessionManager>,
    /// Flips to true when the server starts shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(config: Settings, deps: CallDeps, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            call_config: CallConfig::from_settings(&config),
            sessions: Arc::new(SessionManager::new(config.session.max_sessions)),
            config: Arc::new(config),
            deps,
            shutdown,
        }
    }
}

/// Build the shared providers. Providers without credentials fall back to
/// the offline implementations so the server still answers calls.
pub fn build_call_deps(settings: &Settings) -> Result<CallDeps, ServerError> {
    let providers = &settings.providers;
    let rate = settings.pipeline.telephony.provider_sample_rate;

    let stt: Arc<dyn SttProvider> = if providers.stt.api_key.is_some() {
        Arc::new(DeepgramStt::new(&providers.stt)?)
    } else {
        tracing::warn!("No STT credentials, callers will not be transcribed");
        Arc::new(ChannelStt::silent())
    };

    let tts: Arc<dyn TtsProvider> = if providers.tts.api_key.is_some() {
        Arc::new(CartesiaTts::new(&providers.tts, rate)?)
    } else {
        tracing::warn!("No TTS credentials, using silent synthesis");
        Arc::new(SimpleTts::new(rate))
    };

    let backend: Arc<dyn DialogueBackend> = if providers.llm.api_key.is_some() {
        Arc::new(OpenAiBackend::new(&providers.llm, &settings.dialogue)?)
    } else {
        tracing::info!("No LLM credentials, using rule-based dialogue backend");
        Arc::new(RuleBasedBackend::new())
    };

    let address_validator: Arc<dyn AddressValidator> = if providers.address.is_configured() {
        tracing::info!("Verifying addresses with the USPS API");
        Arc::new(UspsAddressValidator::new(&providers.address)?)
    } else {
        tracing::info!("No USPS credentials, checking addresses against the ZIP table");
        Arc::new(RuleBasedAddressValidator::new())
    };

    let notifier: Arc<dyn CompletionNotifier> = if providers.email.is_configured() {
        tracing::info!(server = %providers.email.smtp_server, "Emailing appointment confirmations");
        Arc::new(EmailNotifier::new(&providers.email, &settings.dialogue.practice_name)?)
    } else {
        Arc::new(LoggingNotifier)
    };

    let fallback = load_fallback_audio(
        settings.pipeline.synthesis.fallback_audio_path.as_deref(),
        settings.pipeline.telephony.sample_rate,
    );

    tracing::info!(
        stt = stt.name(),
        tts = tts.name(),
        backend = backend.name(),
        "Providers ready"
    );

    Ok(CallDeps {
        stt,
        speech: SpeechStreamer::new(tts, ChunkerConfig::from_settings(&settings.pipeline.synthesis)),
        backend,
        address_validator,
        notifier,
        fallback_audio: Arc::from(fallback),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_providers_without_credentials() {
        let settings = Settings::default();
        let deps = build_call_deps(&settings).unwrap();
        assert_eq!(deps.stt.name(), "channel");
        assert_eq!(deps.speech.provider_name(), "simple");
        assert_eq!(deps.backend.name(), "rules");
        assert!(!deps.fallback_audio.is_empty());
    }

    #[test]
    fn test_configured_email_and_address_providers() {
        let mut settings = Settings::default();
        settings.providers.email.sender_email = Some("front-desk@example.com".to_string());
        settings.providers.email.sender_password = Some("app-password".to_string());
        settings.providers.address.client_id = Some("id".to_string());
        settings.providers.address.client_secret = Some("secret".to_string());
        assert!(build_call_deps(&settings).is_ok());
    }

    #[test]
    fn test_state_uses_session_limit() {
        let mut settings = Settings::default();
        settings.session.max_sessions = 3;
        let deps = build_call_deps(&settings).unwrap();
        let (_tx, rx) = watch::channel(false);
        let state = AppState::new(settings, deps, rx);
        assert_eq!(state.sessions.capacity(), 3);
        assert_eq!(state.sessions.count(), 0);
    }
}
