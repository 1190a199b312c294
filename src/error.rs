//! Error taxonomy for the live session.

use thiserror::Error;

/// Errors raised anywhere in the session core.
///
/// `CredentialMissing` and `MediaAcquisitionFailed` abort a start request.
/// `TransportError` tears the session down. `DecodeError` drops a single
/// inbound chunk and `SendFailed` is logged and swallowed by fire-and-forget
/// senders.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("GEMINI_API_KEY is not set")]
    CredentialMissing,

    #[error("Could not access media device: {0}")]
    MediaAcquisitionFailed(String),

    #[error("Connection error: {0}")]
    TransportError(String),

    #[error("Malformed audio payload: {0}")]
    DecodeError(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

impl SessionError {
    pub fn media<S: Into<String>>(msg: S) -> Self {
        Self::MediaAcquisitionFailed(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::TransportError(msg.into())
    }

    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::DecodeError(msg.into())
    }

    pub fn send<S: Into<String>>(msg: S) -> Self {
        Self::SendFailed(msg.into())
    }

    /// Message shown to the user when this error ends or blocks a session.
    pub fn user_message(&self) -> String {
        match self {
            Self::TransportError(_) => {
                format!("{}. The connection dropped, please try again.", self)
            }
            other => other.to_string(),
        }
    }
}

impl From<base64::DecodeError> for SessionError {
    fn from(e: base64::DecodeError) -> Self {
        Self::DecodeError(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::DecodeError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
