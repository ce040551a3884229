use thiserror::Error;

/// Errors surfaced by the chat core.
///
/// `Transport` and `Upstream` come from the streaming adapter and are turned
/// into an in-conversation apology by the controller. The remaining variants are
/// returned to whoever called the operation.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing or unreadable API credential. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The request to the generation service could not be established or read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The generation service answered with an error.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Reading or writing the persistent store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Rejected input (empty submit, non-image attachment, bad data URL).
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("session {0} not found")]
    NotFound(String),

    /// A reply is already being generated for this session.
    #[error("a message is already being sent for session {0}")]
    SendInProgress(String),
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Storage(format!("serialization failed: {}", err))
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
