use thiserror::Error;

/// Failures a live session can run into.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The user (or platform policy) refused microphone or camera access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// No usable capture hardware.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Connect failure or a mid-session transport failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// A malformed inbound audio chunk. Never fatal to the session.
    #[error("decode error: {0}")]
    Decode(String),
    #[error("timed out while {0}")]
    Timeout(&'static str),
    #[error("a session is already running")]
    AlreadyRunning,
    #[error("session start was cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether this error ends the session attempt.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Decode(_))
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
