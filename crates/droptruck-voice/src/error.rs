//! Error types for the DropTruck voice agent

use std::time::Duration;
use thiserror::Error;

/// Result type alias for agent operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a booking conversation.
///
/// None of these are fatal to the process. Unresolvable field values are not
/// errors at all: the normalizer and matcher return `None` and the field stays unset.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Reply generation error: {0}")]
    Generation(String),

    #[error("Reply generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    #[error("Speech synthesis error: {0}")]
    Synthesis(String),

    #[error("Booking submission error: {0}")]
    Submission(String),

    #[error("Session sink error: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session already ended")]
    SessionEnded,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}
