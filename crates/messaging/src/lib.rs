//! Abstract interface for correlated messaging over topic-based pub/sub.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Envelopes are the wire format correlating requests with responses.
pub mod envelope;

/// Handlers receive every envelope decoded by a transport.
pub mod handler;

/// Correlation ids and consumer group identities.
pub mod identity;

/// Transports publish and consume envelopes on named topics.
pub mod transport;

pub use envelope::{Envelope, ErrorCode, RemoteError};
pub use handler::{EnvelopeHandler, HandlerSlot};
pub use identity::{generate_group_id, generate_id};
pub use transport::{Transport, TransportError};
