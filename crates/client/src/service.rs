use crate::error::{Error, Result};

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use courier_messaging::{Envelope, ErrorCode, RemoteError, Transport};
use futures::future::join_all;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Computes the reply body for one request body.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// The error type for the handler.
    type Error: StdError + Send + Sync + 'static;

    /// Handles one request message.
    async fn handle(&self, message: Value) -> std::result::Result<Value, Self::Error>;
}

/// How often and how patiently a failing handler is retried.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Attempts in total, including the first.
    pub max_attempts: u32,

    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Options for a [`Responder`].
#[derive(Clone, Debug)]
pub struct ResponderOptions {
    /// Reported as the `source` of every reply.
    pub service_name: String,

    /// Topics requests arrive on.
    pub request_topics: Vec<String>,

    /// Where replies go when the request names no destination.
    pub default_response_topic: String,

    /// Extra topic that receives a copy of every faulted reply.
    pub error_topic: Option<String>,

    /// How many requests of a batch are handled concurrently.
    pub workers: usize,

    /// Retry behaviour for the handler.
    pub retry: RetryPolicy,
}

/// The serving side of a correlated exchange.
///
/// Consumes request envelopes, runs the handler on each message and
/// publishes a reply carrying the same id.
#[derive(Debug)]
pub struct Responder<T, H>
where
    T: Transport,
{
    handler: H,
    options: ResponderOptions,
    transport: T,
}

impl<T, H> Responder<T, H>
where
    T: Transport,
    H: RequestHandler,
{
    /// Creates a new `Responder`.
    pub const fn new(transport: T, handler: H, options: ResponderOptions) -> Self {
        Self {
            handler,
            options,
            transport,
        }
    }

    /// Handles a batch and publishes the replies, then commits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the commit fails. Failures to publish
    /// single replies are logged and do not stop the batch.
    pub async fn process(&self, batch: Vec<Envelope>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        for chunk in batch.chunks(self.options.workers.max(1)) {
            let replies = join_all(chunk.iter().map(|request| self.respond(request))).await;

            for reply in replies {
                self.send(&reply).await;
            }
        }

        self.transport.commit(false).await.map_err(Error::transport)
    }

    /// Subscribes to the request topics and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if subscribing or closing fails.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.transport
            .subscribe(&self.options.request_topics)
            .await
            .map_err(Error::transport)?;

        info!(
            service = %self.options.service_name,
            topics = ?self.options.request_topics,
            group = %self.transport.group_id(),
            "responder started"
        );

        while !shutdown.is_cancelled() {
            match self.transport.consume().await {
                Ok(batch) => {
                    if let Err(e) = self.process(batch).await {
                        warn!(error = %e, "failed to finish batch");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "consume failed");
                    tokio::select! {
                        () = shutdown.cancelled() => {}
                        () = tokio::time::sleep(self.options.retry.delay) => {}
                    }
                }
            }
        }

        info!(service = %self.options.service_name, "responder stopping");
        self.transport.close().await.map_err(Error::transport)
    }

    async fn respond(&self, request: &Envelope) -> Envelope {
        let max_attempts = self.options.retry.max_attempts.max(1);
        let mut attempt = 1;

        let outcome = loop {
            match self.handler.handle(request.message.clone()).await {
                Ok(message) => break Ok(message),
                Err(e) if attempt < max_attempts => {
                    warn!(id = %request.id, attempt, error = %e, "handler failed, retrying");
                    tokio::time::sleep(self.options.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(id = %request.id, attempts = attempt, error = %e, "handler gave up");
                    break Err(RemoteError::new(ErrorCode::MaximumRetriesReach, e.to_string()));
                }
            }
        };

        let reply = match outcome {
            Ok(message) => Envelope::new(request.id.clone(), message),
            Err(fault) => Envelope::new(request.id.clone(), json!({ "results": null }))
                .with_error(fault),
        };

        reply
            .with_source(self.options.service_name.clone())
            .with_destination(request.destination.clone())
    }

    async fn send(&self, reply: &Envelope) {
        let topic = reply
            .destination
            .as_deref()
            .unwrap_or(&self.options.default_response_topic);

        match self.transport.publish(topic, reply).await {
            Ok(()) => debug!(id = %reply.id, topic, "reply published"),
            Err(e) => warn!(id = %reply.id, topic, error = %e, "failed to publish reply"),
        }

        if reply.error.is_none() {
            return;
        }

        if let Some(error_topic) = &self.options.error_topic {
            if let Err(e) = self.transport.publish(error_topic, reply).await {
                warn!(id = %reply.id, topic = %error_topic, error = %e, "failed to publish fault");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use courier_messaging_memory::{MemoryBroker, MemoryTransport, MemoryTransportOptions};
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("flaky")]
    struct Flaky;

    struct FailTimes {
        calls: AtomicU32,
        failures: u32,
    }

    #[async_trait]
    impl RequestHandler for FailTimes {
        type Error = Flaky;

        async fn handle(&self, message: Value) -> std::result::Result<Value, Self::Error> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Flaky);
            }
            Ok(json!({ "results": message }))
        }
    }

    fn responder(
        broker: &MemoryBroker,
        failures: u32,
        error_topic: Option<&str>,
    ) -> Responder<MemoryTransport, FailTimes> {
        Responder::new(
            MemoryTransport::new(
                broker.clone(),
                MemoryTransportOptions {
                    group_id: "llm".to_string(),
                    consume_timeout: Duration::from_millis(20),
                    max_batch_size: 10,
                },
            ),
            FailTimes {
                calls: AtomicU32::new(0),
                failures,
            },
            ResponderOptions {
                service_name: "llm".to_string(),
                request_topics: vec!["llm-request".to_string()],
                default_response_topic: "llm_response".to_string(),
                error_topic: error_topic.map(ToString::to_string),
                workers: 2,
                retry: RetryPolicy {
                    max_attempts: 3,
                    delay: Duration::from_millis(1),
                },
            },
        )
    }

    async fn listener(broker: &MemoryBroker, topic: &str) -> MemoryTransport {
        let transport = MemoryTransport::new(
            broker.clone(),
            MemoryTransportOptions {
                group_id: format!("listener-{topic}"),
                consume_timeout: Duration::from_millis(20),
                max_batch_size: 10,
            },
        );
        transport.subscribe(&[topic.to_string()]).await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_recovers_within_attempts() {
        let broker = MemoryBroker::new();
        let responder = responder(&broker, 2, None);

        let reply = responder
            .respond(&Envelope::new("abc", json!({"text": "hi"})))
            .await;

        assert_eq!(reply.id, "abc");
        assert_eq!(reply.source, "llm");
        assert_eq!(reply.message, json!({"results": {"text": "hi"}}));
        assert!(reply.error.is_none());
        assert_eq!(responder.handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_attach_fault() {
        let broker = MemoryBroker::new();
        let responder = responder(&broker, u32::MAX, None);

        let reply = responder
            .respond(&Envelope::new("abc", json!({"text": "hi"})))
            .await;

        assert_eq!(reply.message, json!({"results": null}));
        let fault = reply.error.unwrap();
        assert_eq!(fault.code, ErrorCode::MaximumRetriesReach);
        assert_eq!(fault.detail, "flaky");
        assert_eq!(responder.handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reply_goes_to_destination_or_default() {
        let broker = MemoryBroker::new();
        let custom = listener(&broker, "custom").await;
        let default = listener(&broker, "llm_response").await;
        let responder = responder(&broker, 0, None);

        responder
            .process(vec![
                Envelope::new("a", json!(1)).with_destination(Some("custom".to_string())),
                Envelope::new("b", json!(2)),
                Envelope::new("c", json!(3)),
            ])
            .await
            .unwrap();

        let routed = custom.consume().await.unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].id, "a");
        assert_eq!(routed[0].destination.as_deref(), Some("custom"));

        let mut ids: Vec<String> = default
            .consume()
            .await
            .unwrap()
            .into_iter()
            .map(|envelope| envelope.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_faults_are_copied_to_error_topic() {
        let broker = MemoryBroker::new();
        let errors = listener(&broker, "llm-error").await;
        let default = listener(&broker, "llm_response").await;
        let responder = responder(&broker, u32::MAX, Some("llm-error"));

        responder
            .process(vec![Envelope::new("abc", json!({}))])
            .await
            .unwrap();

        assert_eq!(default.consume().await.unwrap().len(), 1);
        let faults = errors.consume().await.unwrap();
        assert_eq!(faults.len(), 1);
        assert!(faults[0].error.is_some());
    }

    #[tokio::test]
    async fn test_run_serves_until_cancelled() {
        let broker = MemoryBroker::new();
        let default = listener(&broker, "llm_response").await;
        let responder = std::sync::Arc::new(responder(&broker, 0, None));
        responder
            .transport
            .subscribe(&["llm-request".to_string()])
            .await
            .unwrap();
        let shutdown = CancellationToken::new();

        let serving = tokio::spawn({
            let responder = responder.clone();
            let shutdown = shutdown.clone();
            async move { responder.run(shutdown).await }
        });

        let producer = listener(&broker, "unused").await;
        producer
            .publish("llm-request", &Envelope::new("abc", json!("ping")))
            .await
            .unwrap();

        let mut replies = Vec::new();
        for _ in 0..20 {
            replies.extend(default.consume().await.unwrap());
            if !replies.is_empty() {
                break;
            }
        }

        shutdown.cancel();
        serving.await.unwrap().unwrap();

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message, json!({"results": "ping"}));
    }
}
