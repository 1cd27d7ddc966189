use std::fmt::{Display, Formatter, Result as FmtResult};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fault codes reported by remote services.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// The remote handler failed on every retry attempt.
    MaximumRetriesReach,

    /// The request payload was larger than the remote service accepts.
    RequestSizeExceed,

    /// Any code this crate does not know about, kept verbatim.
    Other(String),
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::MaximumRetriesReach => "MAXIMUM_RETRIES_REACH",
            Self::RequestSizeExceed => "REQUEST_SIZE_EXCEED",
            Self::Other(code) => code,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "MAXIMUM_RETRIES_REACH" => Self::MaximumRetriesReach,
            "REQUEST_SIZE_EXCEED" => Self::RequestSizeExceed,
            _ => Self::Other(code),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Other(code) => code,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// A structured fault attached to a response by the remote end.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RemoteError {
    /// Machine readable fault code.
    pub code: ErrorCode,

    /// Human readable detail.
    pub detail: String,
}

impl RemoteError {
    /// Creates a new `RemoteError`.
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl std::error::Error for RemoteError {}

/// The wire message carried by every transport.
///
/// Field order matches the JSON layout: `id`, `source`, `message`,
/// `destination`, `error`. Absent `destination` and `error` serialize as
/// `null`; an unknown `source` is the empty string.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Envelope {
    /// Correlation id, generated by the requester.
    pub id: String,

    /// The sending service instance.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub source: String,

    /// Request or response body.
    pub message: Value,

    /// Logical reply topic for this exchange.
    #[serde(default)]
    pub destination: Option<String>,

    /// Fault reported by the remote end.
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl Envelope {
    /// Creates an envelope with no source, destination or error.
    pub fn new(id: impl Into<String>, message: Value) -> Self {
        Self {
            id: id.into(),
            source: String::new(),
            message,
            destination: None,
            error: None,
        }
    }

    /// Sets the sending service.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the reply topic. Empty strings are treated as absent.
    #[must_use]
    pub fn with_destination(mut self, destination: Option<String>) -> Self {
        self.destination = destination.filter(|d| !d.is_empty());
        self
    }

    /// Attaches a remote fault.
    #[must_use]
    pub fn with_error(mut self, error: RemoteError) -> Self {
        self.error = Some(error);
        self
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl TryFrom<Bytes> for Envelope {
    type Error = serde_json::Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        serde_json::from_slice(&bytes)
    }
}

impl TryFrom<&Envelope> for Bytes {
    type Error = serde_json::Error;

    fn try_from(envelope: &Envelope) -> Result<Self, Self::Error> {
        Ok(Self::from(serde_json::to_vec(envelope)?))
    }
}
