//! Error types and handling
//!
//! The session-level error taxonomy. Every variant here aborts a capture
//! session; recording and ancillary failures discovered during teardown are
//! reported through [`crate::recorder::SessionOutcome`] instead.

use crate::capture::audio::DiscoveryError;
use crate::capture::traits::TransportError;
use crate::recorder::process::ProcessError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a capture session
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Timespan is invalid: {0:?}")]
    InvalidTimespan(String),

    #[error("Cannot use audio device {0}: device or resource busy")]
    AudioDeviceBusy(String),

    #[error("No tape inserted")]
    NoTape,

    #[error("Interrupted before playback began")]
    Interrupted,

    #[error("Failed to start {label}: {source}")]
    Spawn {
        label: String,
        #[source]
        source: ProcessError,
    },

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to set input (v4l2-ctl exited with {})", describe_code(*.code))]
    InputSwitch { code: Option<i32> },

    #[error("Recording failed (encoder exited with {})", describe_code(*.code))]
    Recording { code: Option<i32> },

    #[error("Audio node discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
}

impl CaptureError {
    /// Short machine-readable code for the summary line
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::InvalidTimespan(_) => "INVALID_TIMESPAN",
            CaptureError::AudioDeviceBusy(_) => "AUDIO_DEVICE_BUSY",
            CaptureError::NoTape => "NO_TAPE",
            CaptureError::Interrupted => "INTERRUPTED",
            CaptureError::Spawn { .. } => "SPAWN_ERROR",
            CaptureError::Process(_) => "PROCESS_ERROR",
            CaptureError::Transport(_) => "TRANSPORT_ERROR",
            CaptureError::InputSwitch { .. } => "INPUT_SWITCH_ERROR",
            CaptureError::Recording { .. } => "RECORDING_FAILURE",
            CaptureError::Discovery(_) => "DISCOVERY_ERROR",
        }
    }
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

/// Error summary emitted alongside the session outcome
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&CaptureError> for ErrorResponse {
    fn from(error: &CaptureError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_switch_message_includes_code() {
        let err = CaptureError::InputSwitch { code: Some(1) };
        assert_eq!(err.to_string(), "Failed to set input (v4l2-ctl exited with code 1)");
    }

    #[test]
    fn test_signal_exit_is_described() {
        let err = CaptureError::Recording { code: None };
        assert!(err.to_string().contains("killed by signal"));
    }

    #[test]
    fn test_error_response_uses_code() {
        let response = ErrorResponse::from(&CaptureError::NoTape);
        assert_eq!(response.code, "NO_TAPE");
        assert_eq!(response.message, "No tape inserted");
    }
}
