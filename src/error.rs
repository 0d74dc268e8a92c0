use thiserror::Error;

/// Failures of the persistent key/value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error on key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    /// The value exists but is not readable text.
    #[error("stored value for {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Corrupt { .. })
    }
}

/// Errors surfaced by session and conversation operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid model parameters: {0}")]
    InvalidParameters(String),

    /// A send for this chat is still waiting on the completion client.
    #[error("a message is already being sent for chat {0}")]
    SendInProgress(String),
}

/// Reasons an import payload was rejected. No state changes on any of these.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("payload is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("payload has no `messages` array")]
    MissingMessages,

    #[error("message {index} is malformed: {source}")]
    InvalidMessage {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("no active chat to import into")]
    NoActiveChat,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_pass_through_chat_error() {
        let err: ChatError = StorageError::InvalidKey("../x".into()).into();
        assert_eq!(err.to_string(), "invalid storage key: ../x");
    }

    #[test]
    fn import_error_messages_name_the_problem() {
        assert_eq!(
            ImportError::MissingMessages.to_string(),
            "payload has no `messages` array"
        );
        assert_eq!(
            ImportError::NoActiveChat.to_string(),
            "no active chat to import into"
        );
    }
}
