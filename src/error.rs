use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy for the engine and its collaborators
///
/// Only `Configuration` is ever surfaced to the operator as fatal. Everything
/// else is logged by the tick loop and processing continues.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Stream or HTTP transport failed; retried with backoff
    #[error("transport error: {0}")]
    Transport(String),

    /// A feed message could not be decoded; the message is dropped
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// Recent-history fetch failed; the engine starts cold
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// Durable write or read failed; in-memory state stays authoritative
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Execution collaborator rejected or failed the order
    #[error("execution failed: {0}")]
    Execution(String),

    /// Invalid or missing configuration, rejected at session start
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("position {0} not found")]
    PositionNotFound(Uuid),
}

impl EngineError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(e: redis::RedisError) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::malformed("missing field `p`");
        assert_eq!(err.to_string(), "malformed message: missing field `p`");

        let err = EngineError::config("weak_support must be below weak_resistance");
        assert!(err.to_string().starts_with("configuration error"));
    }

    #[test]
    fn test_json_error_is_malformed() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: EngineError = parse.unwrap_err().into();
        assert!(matches!(err, EngineError::MalformedMessage { .. }));
    }
}
