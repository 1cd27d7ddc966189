use crate::envelope::Envelope;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::warn;

/// Receives every envelope a transport decodes.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync + 'static {
    /// Handles one inbound envelope. Returns whether the envelope was kept.
    async fn handle(&self, envelope: Envelope) -> bool;
}

/// Holds the handler registered on a transport and feeds it decoded batches.
///
/// Transports embed one slot each so that decoding and delivery behave the
/// same whatever the broker.
#[derive(Clone, Default)]
pub struct HandlerSlot {
    handler: Arc<RwLock<Option<Arc<dyn EnvelopeHandler>>>>,
}

impl Debug for HandlerSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HandlerSlot")
            .field("registered", &self.handler.read().is_some())
            .finish()
    }
}

impl HandlerSlot {
    /// Replaces the registered handler.
    pub fn register(&self, handler: Arc<dyn EnvelopeHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Decodes a batch of raw messages and hands each envelope to the handler.
    ///
    /// Messages that fail to decode are logged and skipped; the remainder of
    /// the batch is still delivered. Returns the decoded envelopes in arrival
    /// order.
    pub async fn dispatch<I>(&self, raw: I) -> Vec<Envelope>
    where
        I: IntoIterator<Item = (String, Bytes)> + Send,
        I::IntoIter: Send,
    {
        let handler = self.handler.read().clone();
        let mut envelopes = Vec::new();

        for (topic, payload) in raw {
            let envelope = match Envelope::try_from(payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "skipping undecodable message");
                    continue;
                }
            };

            if let Some(handler) = &handler {
                handler.handle(envelope.clone()).await;
            }

            envelopes.push(envelope);
        }

        envelopes
    }
}
