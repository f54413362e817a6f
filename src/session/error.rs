//! Session-level errors

use thiserror::Error;

/// Errors returned by `SessionController::start`.
///
/// All of them leave the controller with no device or connection held.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Microphone access denied: {0}")]
    Permission(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Audio device unavailable: {0}")]
    Device(String),

    #[error("A conversation is already in progress")]
    Conflict,

    #[error("Start aborted by stop")]
    Aborted,
}

impl SessionError {
    /// Message shown to the user
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Permission(_) => {
                "Microphone access was denied. Allow microphone access and try again.".to_string()
            }
            SessionError::Connection(reason) => format!("Could not reach the voice service: {}", reason),
            SessionError::Device(reason) => format!("Audio device unavailable: {}", reason),
            SessionError::Conflict => "A conversation is already in progress.".to_string(),
            SessionError::Aborted => "The conversation was stopped.".to_string(),
        }
    }
}
