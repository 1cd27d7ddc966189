use crate::envelope::Envelope;
use crate::handler::EnvelopeHandler;

use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

/// Marker trait for transport errors
pub trait TransportError: Error + Send + Sync + 'static {}

/// A publish/subscribe connection to one broker.
///
/// Implementations are shared between the task that publishes requests and
/// the task that consumes responses, so every method takes `&self`.
#[async_trait]
pub trait Transport
where
    Self: Debug + Send + Sync + 'static,
{
    /// The error type for the transport.
    type Error: TransportError;

    /// Publishes an envelope to a topic without waiting for any reply.
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), Self::Error>;

    /// Declares interest in the given topics. Repeating a topic is a no-op.
    async fn subscribe(&self, topics: &[String]) -> Result<(), Self::Error>;

    /// Waits a bounded time for inbound envelopes and returns those decoded.
    ///
    /// Every decoded envelope is also passed to the registered handler.
    async fn consume(&self) -> Result<Vec<Envelope>, Self::Error>;

    /// The consumer group this transport consumes in.
    fn group_id(&self) -> &str;

    /// Registers the handler invoked for each decoded inbound envelope.
    fn register_handler(&self, handler: Arc<dyn EnvelopeHandler>);

    /// Advances the broker-visible read position.
    async fn commit(&self, asynchronous: bool) -> Result<(), Self::Error>;

    /// Releases the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<(), Self::Error>;
}
