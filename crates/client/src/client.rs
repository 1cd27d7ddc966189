use crate::error::{Error, Result};
use crate::pending::PendingTable;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_messaging::{Envelope, EnvelopeHandler, RemoteError, Transport, generate_id};
use courier_store::{Store, StoreScope};
use futures::FutureExt;
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, instrument, trace, warn};

/// Options for a [`CorrelationClient`].
#[derive(Clone, Debug)]
pub struct CorrelationClientOptions {
    /// Reported as the `source` of every request.
    pub service_name: String,

    /// Topics replies arrive on.
    pub response_topics: Vec<String>,

    /// Pause between iterations of the background loop.
    pub polling_interval: Duration,

    /// Default wait for a reply.
    pub request_timeout: Duration,
}

/// A correlated reply.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    /// Correlation id shared with the request.
    pub id: String,

    /// Reply body.
    pub message: Value,

    /// The responding service.
    pub source: String,

    /// Fault reported by the responder, if any.
    pub error: Option<RemoteError>,
}

impl Reply {
    /// Returns the message, or [`Error::Remote`] when the reply carries a fault.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the responder attached a fault.
    pub fn into_message(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(Error::Remote { id: self.id, error }),
            None => Ok(self.message),
        }
    }
}

impl From<Envelope> for Reply {
    fn from(envelope: Envelope) -> Self {
        Self {
            id: envelope.id,
            message: envelope.message,
            source: envelope.source,
            error: envelope.error,
        }
    }
}

/// Writes replies the transport delivers into the result store.
///
/// With a local store only replies to this process's own pending requests
/// are kept. A distributed store keeps everything, because the request may
/// belong to another member of the consumer group.
struct ResponseSink<S: Store> {
    pending: PendingTable,
    store: S,
}

#[async_trait]
impl<S: Store> EnvelopeHandler for ResponseSink<S> {
    async fn handle(&self, envelope: Envelope) -> bool {
        if self.store.scope() == StoreScope::Local && !self.pending.contains(&envelope.id) {
            trace!(id = %envelope.id, "discarding reply to unknown request");
            return false;
        }

        let bytes = match Bytes::try_from(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(id = %envelope.id, error = %e, "failed to encode reply");
                return false;
            }
        };

        if let Err(e) = self.store.put(envelope.id.clone(), bytes).await {
            warn!(id = %envelope.id, error = %e, "failed to store reply");
            return false;
        }

        // The caller may have timed out while the write was in flight.
        if self.store.scope() == StoreScope::Local && !self.pending.contains(&envelope.id) {
            trace!(id = %envelope.id, "dropping reply stored after its caller gave up");
            if let Err(e) = self.store.del(envelope.id.clone()).await {
                warn!(id = %envelope.id, error = %e, "failed to drop late reply");
            }
            return false;
        }

        true
    }
}

struct Inner<T: Transport, S: Store> {
    closed: AtomicBool,
    options: CorrelationClientOptions,
    pending: PendingTable,
    shutdown_token: CancellationToken,
    started: AtomicBool,
    store: S,
    task_tracker: TaskTracker,
    transport: T,
}

impl<T: Transport, S: Store> Inner<T, S> {
    async fn run(&self) {
        loop {
            if self.shutdown_token.is_cancelled() {
                break;
            }

            self.poll_transport().await;
            self.poll_store().await;

            tokio::select! {
                () = self.shutdown_token.cancelled() => break,
                () = tokio::time::sleep(self.options.polling_interval) => {}
            }
        }
    }

    async fn poll_transport(&self) {
        match self.transport.consume().await {
            Ok(envelopes) if envelopes.is_empty() => {}
            Ok(envelopes) => {
                trace!(count = envelopes.len(), "consumed replies");
                if let Err(e) = self.transport.commit(true).await {
                    warn!(error = %e, "commit failed");
                }
            }
            Err(e) => warn!(error = %e, "consume failed"),
        }
    }

    async fn poll_store(&self) {
        for id in self.pending.snapshot() {
            let bytes = match self.store.get(id.clone()).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to read stored reply");
                    continue;
                }
            };

            match Envelope::try_from(bytes) {
                Ok(envelope) => {
                    if !self.pending.resolve(&id, envelope) {
                        debug!(id = %id, "reply arrived after its caller gave up");
                    }
                }
                Err(e) => warn!(id = %id, error = %e, "discarding undecodable stored reply"),
            }

            if let Err(e) = self.store.del(id.clone()).await {
                warn!(id = %id, error = %e, "failed to delete stored reply");
            }
        }
    }

    async fn close_transport(&self) {
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "failed to close transport");
        }
    }
}

/// Turns a one-way pub/sub transport into request/response calls.
///
/// Each request is published with a fresh id and parked in a pending table.
/// A background loop consumes replies into the result store and resolves
/// pending requests whose reply has landed there. The loop starts on the
/// first request, or eagerly with [`start`](Self::start).
pub struct CorrelationClient<T, S>
where
    T: Transport,
    S: Store,
{
    inner: Arc<Inner<T, S>>,
}

impl<T, S> Debug for CorrelationClient<T, S>
where
    T: Transport,
    S: Store,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CorrelationClient")
            .field("service_name", &self.inner.options.service_name)
            .field("group_id", &self.inner.transport.group_id())
            .field("scope", &self.inner.store.scope())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl<T, S> CorrelationClient<T, S>
where
    T: Transport,
    S: Store,
{
    /// Creates a client and subscribes `transport` to the response topics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the subscription fails.
    pub async fn new(transport: T, store: S, options: CorrelationClientOptions) -> Result<Self> {
        let pending = PendingTable::default();

        transport.register_handler(Arc::new(ResponseSink {
            pending: pending.clone(),
            store: store.clone(),
        }));
        transport
            .subscribe(&options.response_topics)
            .await
            .map_err(Error::transport)?;

        info!(
            service = %options.service_name,
            group = %transport.group_id(),
            topics = ?options.response_topics,
            scope = ?store.scope(),
            "correlation client ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                closed: AtomicBool::new(false),
                options,
                pending,
                shutdown_token: CancellationToken::new(),
                started: AtomicBool::new(false),
                store,
                task_tracker: TaskTracker::new(),
                transport,
            }),
        })
    }

    /// The consumer group replies are consumed in.
    #[must_use]
    pub fn group_id(&self) -> &str {
        self.inner.transport.group_id()
    }

    /// Number of requests still waiting for a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Starts the background loop. Later calls are no-ops, as are calls
    /// after [`shutdown`](Self::shutdown).
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.inner.closed.load(Ordering::Acquire)
            || self.inner.started.swap(true, Ordering::AcqRel)
        {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let span = info_span!(
            "correlation_loop",
            service = %inner.options.service_name,
            group = %inner.transport.group_id(),
        );

        self.inner.task_tracker.spawn(
            async move {
                debug!("loop started");

                if AssertUnwindSafe(inner.run()).catch_unwind().await.is_err() {
                    error!("loop panicked");
                }

                inner.closed.store(true, Ordering::Release);
                inner.close_transport().await;
                inner.pending.clear();

                debug!("loop stopped");
            }
            .instrument(span),
        );
        self.inner.task_tracker.close();
    }

    /// Sends a request and waits for its reply with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no reply arrives in time,
    /// [`Error::Transport`] if publishing fails and [`Error::Closed`] after
    /// shutdown.
    pub async fn request(
        &self,
        topic: &str,
        payload: Value,
        destination: Option<String>,
    ) -> Result<Reply> {
        self.request_with_timeout(topic, payload, destination, self.inner.options.request_timeout)
            .await
    }

    /// Sends a request and waits at most `wait` for its reply.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    #[instrument(skip(self, payload, wait), fields(service = %self.inner.options.service_name))]
    pub async fn request_with_timeout(
        &self,
        topic: &str,
        payload: Value,
        destination: Option<String>,
        wait: Duration,
    ) -> Result<Reply> {
        self.ensure_open()?;
        self.start();

        let id = generate_id();
        let receiver = self.inner.pending.register(&id);

        let envelope = Envelope::new(id.clone(), payload)
            .with_source(self.inner.options.service_name.clone())
            .with_destination(destination);

        if let Err(e) = self.inner.transport.publish(topic, &envelope).await {
            self.inner.pending.remove(&id);
            return Err(Error::transport(e));
        }

        debug!(id = %id, "request published");

        match timeout(wait, receiver).await {
            Ok(Ok(envelope)) => Ok(Reply::from(envelope)),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.inner.pending.remove(&id);
                if let Err(e) = self.inner.store.del(id.clone()).await {
                    warn!(id = %id, error = %e, "failed to drop reply of timed out request");
                }

                warn!(id = %id, timeout = ?wait, "request timed out");
                Err(Error::Timeout { id, timeout: wait })
            }
        }
    }

    /// Publishes an envelope without waiting for a reply. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if publishing fails and [`Error::Closed`]
    /// after shutdown.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Value,
        destination: Option<String>,
    ) -> Result<String> {
        self.ensure_open()?;

        let id = generate_id();
        let envelope = Envelope::new(id.clone(), payload)
            .with_source(self.inner.options.service_name.clone())
            .with_destination(destination);

        self.inner
            .transport
            .publish(topic, &envelope)
            .await
            .map_err(Error::transport)?;

        Ok(id)
    }

    /// Stops the background loop, closes the transport and fails every
    /// outstanding request with [`Error::Closed`].
    pub async fn shutdown(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            self.inner.shutdown_token.cancel();
            self.inner.task_tracker.wait().await;
        } else {
            // Never started, so nothing else owns the transport.
            self.inner.closed.store(true, Ordering::Release);
            self.inner.close_transport().await;
            self.inner.pending.clear();
        }

        self.inner.closed.store(true, Ordering::Release);
        info!(service = %self.inner.options.service_name, "correlation client shut down");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}
