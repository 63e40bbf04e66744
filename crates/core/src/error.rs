//! Error types for the intake agent
//!
//! Each component has its own recoverable error kind. The controller decides
//! how each kind is handled; only stream-level failures end a call.

use thiserror::Error;

use crate::call::SessionState;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the intake agent
#[derive(Error, Debug)]
pub enum Error {
    #[error("Frame decode error: {0}")]
    FrameDecode(#[from] FrameDecodeError),

    #[error("Transcript stream error: {0}")]
    TranscriptStream(#[from] TranscriptStreamError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Dialogue backend error: {0}")]
    DialogueBackend(#[from] DialogueBackendError),

    #[error("Invalid session transition from {from:?} to {to:?}")]
    InvalidSessionTransition { from: SessionState, to: SessionState },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A single wire frame could not be decoded. The frame is dropped, the
/// session continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameDecodeError {
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("empty payload")]
    EmptyPayload,

    #[error("payload of {len} bytes exceeds maximum of {max}")]
    OversizedPayload { len: usize, max: usize },

    #[error("unexpected track: {0}")]
    WrongTrack(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// The streaming STT session failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscriptStreamError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("stream disconnected: {0}")]
    Disconnected(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Text-to-speech failed for one utterance
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("synthesis request failed: {0}")]
    Request(String),

    #[error("synthesis backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("synthesis stream interrupted: {0}")]
    Stream(String),

    #[error("synthesis timed out after {0}ms")]
    Timeout(u64),
}

/// A caller answer did not pass its field validator.
///
/// Each variant names one specific problem so the re-ask can say what was
/// wrong rather than repeating the question.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("no answer given")]
    Empty,

    #[error("could not recognise a date")]
    UnrecognizedDate,

    #[error("{month} does not have {day} days")]
    ImpossibleDate { month: String, day: u32 },

    #[error("date is missing the year")]
    MissingYear,

    #[error("date is in the future")]
    FutureDate,

    #[error("year {0} is not plausible")]
    ImplausibleYear(i32),

    #[error("expected 10 digits, heard {0}")]
    PhoneDigitCount(usize),

    #[error("email address is not valid")]
    EmailFormat,

    #[error("could not recognise a name")]
    NameFormat,

    #[error("insurance id must be 4 to 20 letters or digits with at least one digit")]
    InsuranceIdFormat,

    #[error("address format not recognised")]
    AddressFormat,

    #[error("unknown state {0}")]
    AddressState(String),

    #[error("invalid ZIP code {0}")]
    AddressZip(String),

    #[error("ZIP code {zip} does not match {city}")]
    AddressZipMismatch { zip: String, city: String },

    #[error("address is not deliverable")]
    AddressUndeliverable,

    #[error("expected a yes or no answer")]
    YesNo,

    #[error("no matching appointment")]
    UnknownSlot,
}

/// The dialogue backend failed to produce a usable turn
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DialogueBackendError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend timed out after {0}ms")]
    Timeout(u64),

    #[error("unparseable backend response: {0}")]
    Parse(String),

    #[error("backend not configured")]
    NotConfigured,
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: Error = ValidationError::FutureDate.into();
        assert!(matches!(err, Error::Validation(ValidationError::FutureDate)));
        assert_eq!(err.to_string(), "Validation error: date is in the future");
    }

    #[test]
    fn test_validation_messages_name_problem() {
        let err = ValidationError::ImpossibleDate {
            month: "February".to_string(),
            day: 30,
        };
        assert_eq!(err.to_string(), "February does not have 30 days");
    }
}
