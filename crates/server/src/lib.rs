//! Intake Agent Server
//!
//! Answers the carrier's voice webhook with TwiML and runs one call
//! controller per media stream WebSocket.

pub mod http;
pub mod metrics;
pub mod session;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use session::{CallGuard, CallInfo, SessionManager};
pub use state::{build_call_deps, AppState};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Configuration error: {0}")]
    Config(#[from] intake_config::ConfigError),

    #[error("Provider setup failed: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<intake_pipeline::PipelineError> for ServerError {
    fn from(err: intake_pipeline::PipelineError) -> Self {
        ServerError::Provider(err.to_string())
    }
}

impl From<intake_agent::AgentError> for ServerError {
    fn from(err: intake_agent::AgentError) -> Self {
        ServerError::Provider(err.to_string())
    }
}

impl From<intake_llm::LlmError> for ServerError {
    fn from(err: intake_llm::LlmError) -> Self {
        ServerError::Provider(err.to_string())
    }
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Config(_) | ServerError::Provider(_) | ServerError::Internal(_) => {
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
