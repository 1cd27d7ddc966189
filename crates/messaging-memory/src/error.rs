use courier_messaging::TransportError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport was closed.
    #[error("transport closed")]
    Closed,

    /// The topic name is invalid.
    #[error("invalid topic name `{0}` - must be non-empty and contain no '*' or '>'")]
    InvalidTopic(String),

    /// The envelope could not be encoded.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

impl TransportError for Error {}
