//! Error types for Vidya Assist

use thiserror::Error;

/// Result type alias for Vidya Assist operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone permission denied or device unavailable
    #[error("microphone access error: {0}")]
    MicrophoneAccess(String),

    /// Audio device or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Transcription came back blank or inaudible
    #[error("no speech detected in audio")]
    BlankAudio,

    /// Text-to-speech error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Book search error
    #[error("search error: {0}")]
    Search(String),

    /// Answer generation error
    #[error("generation error: {0}")]
    Generation(String),

    /// Authentication/authorization error
    #[error("auth error: {0}")]
    Auth(String),

    /// Backend could not prepare a book
    #[error("book initialization error: {0}")]
    BookInit(String),

    /// Chat session persistence error
    #[error("chat error: {0}")]
    Chat(String),

    /// A state machine was asked to make a transition it does not allow
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        /// State the machine was in
        state: &'static str,
        /// Rejected action
        action: &'static str,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport failure for any backend call
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
