use crate::error::Error;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use bytes::Bytes;
use courier_messaging::{Envelope, EnvelopeHandler, HandlerSlot, Transport};
use futures::FutureExt;
use futures::StreamExt;
use futures::stream::SelectAll;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Options for new NATS transports.
#[derive(Clone, Debug)]
pub struct NatsTransportOptions {
    /// The NATS client to use.
    pub client: Client,

    /// Queue group shared by every member of the consumer group.
    pub group_id: String,

    /// How long `consume` waits for the first message.
    pub consume_timeout: Duration,

    /// Upper bound on envelopes returned by one `consume` call.
    pub max_batch_size: usize,
}

/// A transport over core NATS queue subscriptions.
///
/// Each subscribed subject gets its own queue subscription named after the
/// consumer group, so the server load-balances a subject between members of
/// one group while every distinct group still sees every message.
#[derive(Debug)]
pub struct NatsTransport {
    client: Client,
    closed: AtomicBool,
    consume_timeout: Duration,
    group_id: String,
    handler: HandlerSlot,
    max_batch_size: usize,
    subjects: RwLock<Vec<String>>,
    subscribers: Mutex<SelectAll<Subscriber>>,
}

impl NatsTransport {
    /// Creates a new `NatsTransport` with the specified options.
    #[must_use]
    pub fn new(
        NatsTransportOptions {
            client,
            group_id,
            consume_timeout,
            max_batch_size,
        }: NatsTransportOptions,
    ) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
            consume_timeout,
            group_id,
            handler: HandlerSlot::default(),
            max_batch_size,
            subjects: RwLock::new(Vec::new()),
            subscribers: Mutex::new(SelectAll::new()),
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn validate_subject(subject: &str) -> Result<(), Error> {
        if subject.is_empty() || subject.contains('*') || subject.contains('>') {
            return Err(Error::InvalidSubject(subject.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for NatsTransport {
    type Error = Error;

    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), Self::Error> {
        self.ensure_open()?;
        Self::validate_subject(topic)?;

        let payload = Bytes::try_from(envelope)?;
        self.client
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| Error::Publish(e.kind()))?;

        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), Self::Error> {
        self.ensure_open()?;

        for topic in topics {
            Self::validate_subject(topic)?;
        }

        let fresh: Vec<String> = {
            let subjects = self.subjects.read();
            topics
                .iter()
                .filter(|topic| !subjects.contains(topic))
                .cloned()
                .collect()
        };

        for subject in fresh {
            let subscriber = self
                .client
                .queue_subscribe(subject.clone(), self.group_id.clone())
                .await
                .map_err(|_| Error::Subscribe)?;

            {
                let mut subjects = self.subjects.write();
                if subjects.contains(&subject) {
                    continue;
                }
                subjects.push(subject.clone());
            }

            self.subscribers.lock().await.push(subscriber);
            debug!(subject = %subject, group = %self.group_id, "subscribed");
        }

        Ok(())
    }

    async fn consume(&self) -> Result<Vec<Envelope>, Self::Error> {
        self.ensure_open()?;

        let mut subscribers = self.subscribers.lock().await;

        // An empty SelectAll resolves to None immediately.
        if subscribers.is_empty() {
            drop(subscribers);
            tokio::time::sleep(self.consume_timeout).await;
            return Ok(Vec::new());
        }

        let Ok(Some(first)) = timeout(self.consume_timeout, subscribers.next()).await else {
            return Ok(Vec::new());
        };

        let mut raw = vec![(first.subject.to_string(), first.payload)];
        while raw.len() < self.max_batch_size {
            match subscribers.next().now_or_never() {
                Some(Some(message)) => raw.push((message.subject.to_string(), message.payload)),
                _ => break,
            }
        }
        drop(subscribers);

        Ok(self.handler.dispatch(raw).await)
    }

    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn register_handler(&self, handler: Arc<dyn EnvelopeHandler>) {
        self.handler.register(handler);
    }

    async fn commit(&self, asynchronous: bool) -> Result<(), Self::Error> {
        if asynchronous {
            return Ok(());
        }

        self.client.flush().await.map_err(|_| Error::Flush)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Dropping a subscriber unsubscribes it.
        *self.subscribers.lock().await = SelectAll::new();
        self.subjects.write().clear();
        debug!(group = %self.group_id, "transport closed");

        self.client.flush().await.map_err(|_| Error::Flush)
    }
}
