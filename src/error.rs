//! Error taxonomy for the chat client.

use thiserror::Error;

/// Errors surfaced by the reconciler and its collaborators.
///
/// `Auth`, `Validation`, `NotFound`, `NotOpen` and `Network` are returned to the
/// caller of the operation that triggered them. `MalformedEvent` and
/// `StaleOperation` are handled inside the reconciler and never reach callers
/// of `send`/`edit`/`delete`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChatError {
    /// No valid caller identity, or the server rejected the credentials
    #[error("Authentication required: {0}")]
    Auth(String),

    /// Content rejected locally or by the server
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The target message no longer exists
    #[error("Message not found: {0}")]
    NotFound(String),

    /// Operation needs an open conversation
    #[error("No conversation is open")]
    NotOpen,

    /// Transport or mutation call failure
    #[error("Network error: {0}")]
    Network(String),

    /// An inbound push payload could not be decoded
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A mutation result arrived after the conversation was closed or rebound
    #[error("Stale result for conversation {0}")]
    StaleOperation(String),
}

impl ChatError {
    /// Whether the error should be shown to the user.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, ChatError::MalformedEvent(_) | ChatError::StaleOperation(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Network(e.to_string())
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
