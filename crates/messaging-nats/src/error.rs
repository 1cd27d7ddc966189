use courier_messaging::TransportError;
use thiserror::Error;

/// Error type for NATS operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport was closed.
    #[error("transport closed")]
    Closed,

    /// Flush error.
    #[error("Failed to flush")]
    Flush,

    /// The subject name is invalid.
    #[error("invalid subject name `{0}` - must be non-empty and contain no '*' or '>'")]
    InvalidSubject(String),

    /// Publish error.
    #[error("Failed to publish: {0}")]
    Publish(async_nats::client::PublishErrorKind),

    /// Serialization error.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Subscribe error.
    #[error("Failed to subscribe")]
    Subscribe,
}

impl TransportError for Error {}
