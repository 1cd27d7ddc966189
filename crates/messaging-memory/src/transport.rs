use crate::broker::MemoryBroker;
use crate::error::Error;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_messaging::{Envelope, EnvelopeHandler, HandlerSlot, Transport};
use parking_lot::RwLock;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

/// Options for the in-memory transport.
#[derive(Clone, Debug)]
pub struct MemoryTransportOptions {
    /// Consumer group this transport belongs to.
    pub group_id: String,

    /// How long `consume` waits for the first message.
    pub consume_timeout: Duration,

    /// Upper bound on envelopes returned by one `consume` call.
    pub max_batch_size: usize,
}

impl Default for MemoryTransportOptions {
    fn default() -> Self {
        Self {
            group_id: courier_messaging::identity::DEFAULT_GROUP_DOMAIN.to_string(),
            consume_timeout: Duration::from_millis(100),
            max_batch_size: 10,
        }
    }
}

/// A transport attached to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryTransport {
    broker: MemoryBroker,
    closed: AtomicBool,
    handler: HandlerSlot,
    options: MemoryTransportOptions,
    topics: RwLock<Vec<String>>,
}

impl MemoryTransport {
    /// Creates a transport that joins `options.group_id` on `broker`.
    #[must_use]
    pub fn new(broker: MemoryBroker, options: MemoryTransportOptions) -> Self {
        Self {
            broker,
            closed: AtomicBool::new(false),
            handler: HandlerSlot::default(),
            options,
            topics: RwLock::new(Vec::new()),
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn validate_topic(topic: &str) -> Result<(), Error> {
        if topic.is_empty() || topic.contains('*') || topic.contains('>') {
            return Err(Error::InvalidTopic(topic.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;

    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), Self::Error> {
        self.ensure_open()?;
        Self::validate_topic(topic)?;

        let payload = Bytes::try_from(envelope)?;
        self.broker.publish_raw(topic, payload);

        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), Self::Error> {
        self.ensure_open()?;

        for topic in topics {
            Self::validate_topic(topic)?;
        }

        let mut subscribed = self.topics.write();
        for topic in topics {
            if !subscribed.contains(topic) {
                self.broker.join(topic, &self.options.group_id);
                subscribed.push(topic.clone());
                debug!(topic = %topic, group = %self.options.group_id, "subscribed");
            }
        }

        Ok(())
    }

    async fn consume(&self) -> Result<Vec<Envelope>, Self::Error> {
        self.ensure_open()?;

        let topics = self.topics.read().clone();
        let deadline = Instant::now() + self.options.consume_timeout;

        let raw = loop {
            // Arm the notification before checking the queues so a publish
            // between the check and the wait is not missed.
            let published = self.broker.published().notified();
            tokio::pin!(published);
            published.as_mut().enable();

            let batch =
                self.broker
                    .take(&self.options.group_id, &topics, self.options.max_batch_size);
            if !batch.is_empty() {
                break batch;
            }

            if timeout_at(deadline, published).await.is_err() {
                return Ok(Vec::new());
            }
        };

        Ok(self.handler.dispatch(raw).await)
    }

    fn group_id(&self) -> &str {
        &self.options.group_id
    }

    fn register_handler(&self, handler: Arc<dyn EnvelopeHandler>) {
        self.handler.register(handler);
    }

    async fn commit(&self, _asynchronous: bool) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            for topic in self.topics.write().drain(..) {
                self.broker.leave(&topic, &self.options.group_id);
            }
            debug!(group = %self.options.group_id, "transport closed");
        }
        Ok(())
    }
}
