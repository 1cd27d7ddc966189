use crate::config::ConfigError;

use std::error::Error as StdError;
use std::time::Duration;

use courier_messaging::RemoteError;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the client, responder and adapters.
#[derive(Debug, Error)]
pub enum Error {
    /// The client was shut down.
    #[error("client closed")]
    Closed,

    /// The configuration was rejected before any network activity.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A reply arrived but did not have the expected shape.
    #[error("malformed reply to request {id}: {reason}")]
    MalformedReply {
        /// Correlation id of the reply.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The remote side correlated the request but reported a fault.
    #[error("request {id} failed remotely: {error}")]
    Remote {
        /// Correlation id of the reply.
        id: String,
        /// The fault carried by the reply.
        error: RemoteError,
    },

    /// No reply arrived in time.
    #[error("request {id} timed out after {timeout:?}")]
    Timeout {
        /// Correlation id of the abandoned request.
        id: String,
        /// The wait that elapsed.
        timeout: Duration,
    },

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(Box<dyn StdError + Send + Sync>),
}

impl Error {
    /// Whether sending the same request again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn transport<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Self::Transport(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use courier_messaging::ErrorCode;

    #[test]
    fn test_only_timeout_is_retryable() {
        let timeout = Error::Timeout {
            id: "abc".to_string(),
            timeout: Duration::from_secs(1),
        };
        let remote = Error::Remote {
            id: "abc".to_string(),
            error: RemoteError::new(ErrorCode::MaximumRetriesReach, "boom"),
        };

        assert!(timeout.is_retryable());
        assert!(!remote.is_retryable());
        assert!(!Error::Closed.is_retryable());
    }

    #[test]
    fn test_timeout_message_names_the_request() {
        let error = Error::Timeout {
            id: "abc".to_string(),
            timeout: Duration::from_millis(250),
        };

        assert_eq!(error.to_string(), "request abc timed out after 250ms");
    }
}
