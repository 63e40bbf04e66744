//! Patient intake agent
//!
//! Features:
//! - Intake record with per-field collection state and retry counts
//! - Rule-based field validators with a pluggable address check (local ZIP
//!   table or USPS)
//! - Stage-based dialogue policy backed by an optional language model
//! - Call session controller wiring STT, policy and streaming TTS together
//! - Barge-in with generation-gated outbound audio
//! - Completion hook that logs the intake or emails the caller a confirmation

pub mod call_session;
pub mod catalog;
pub mod conversation;
pub mod intake;
pub mod notifier;
pub mod policy;
pub mod prompts;
pub mod speaker;
pub mod stage;
pub mod usps;
pub mod validate;

pub use call_session::{CallConfig, CallController, CallDeps, CallSummary};
pub use catalog::{Slot, SlotCatalog};
pub use conversation::{ConversationHistory, DeliveryStatus, EndReason, HistoryEntry};
pub use intake::{Address, Field, FieldKey, FieldMismatch, FieldState, FieldValue, IntakeRecord};
pub use notifier::{confirmation_email, CompletionNotifier, ConfirmationEmail, EmailNotifier, LoggingNotifier};
pub use policy::{DialoguePolicy, PolicyAction, PolicyDecision};
pub use speaker::{fallback_chime, load_fallback_audio, PlaybackGate};
pub use stage::{IntakeStage, StageManager, StageTransition, TransitionReason};
pub use usps::UspsAddressValidator;
pub use validate::{AddressValidator, FieldValidator, RuleBasedAddressValidator};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid stage transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: stage::IntakeStage,
        to: stage::IntakeStage,
    },

    #[error("Field error: {0}")]
    Field(#[from] FieldMismatch),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Dialogue backend error: {0}")]
    Backend(#[from] intake_core::DialogueBackendError),

    #[error("Provider setup failed: {0}")]
    Provider(String),

    #[error("Notifier error: {0}")]
    Notify(String),
}

impl From<intake_pipeline::PipelineError> for AgentError {
    fn from(err: intake_pipeline::PipelineError) -> Self {
        AgentError::Pipeline(err.to_string())
    }
}

impl From<intake_transport::TransportError> for AgentError {
    fn from(err: intake_transport::TransportError) -> Self {
        AgentError::Pipeline(format!("Transport error: {}", err))
    }
}
