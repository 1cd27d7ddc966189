use crate::client::{CorrelationClient, CorrelationClientOptions};
use crate::config::{ClientConfig, StoreConfig, TransportConfig};
use crate::error::Error;

use std::sync::Arc;
use std::time::Duration;

use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use courier_messaging::{Envelope, EnvelopeHandler, Transport, TransportError, generate_group_id};
use courier_messaging_memory::{MemoryTransport, MemoryTransportOptions};
use courier_messaging_nats::{NatsTransport, NatsTransportOptions};
use courier_store::{Store, StoreError, StoreScope};
use courier_store_memory::MemoryStore;
use courier_store_nats::{NatsStore, NatsStoreOptions};
use thiserror::Error;
use tracing::info;

/// Errors from whichever transport is selected.
#[derive(Debug, Error)]
pub enum AnyTransportError {
    /// Memory transport error.
    #[error(transparent)]
    Memory(#[from] courier_messaging_memory::Error),

    /// NATS transport error.
    #[error(transparent)]
    Nats(#[from] courier_messaging_nats::Error),
}

impl TransportError for AnyTransportError {}

/// A transport chosen at startup from configuration.
#[derive(Debug)]
pub enum AnyTransport {
    /// In-process broker.
    Memory(MemoryTransport),

    /// NATS server.
    Nats(NatsTransport),
}

#[async_trait]
impl Transport for AnyTransport {
    type Error = AnyTransportError;

    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), Self::Error> {
        match self {
            Self::Memory(transport) => Ok(transport.publish(topic, envelope).await?),
            Self::Nats(transport) => Ok(transport.publish(topic, envelope).await?),
        }
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), Self::Error> {
        match self {
            Self::Memory(transport) => Ok(transport.subscribe(topics).await?),
            Self::Nats(transport) => Ok(transport.subscribe(topics).await?),
        }
    }

    async fn consume(&self) -> Result<Vec<Envelope>, Self::Error> {
        match self {
            Self::Memory(transport) => Ok(transport.consume().await?),
            Self::Nats(transport) => Ok(transport.consume().await?),
        }
    }

    fn group_id(&self) -> &str {
        match self {
            Self::Memory(transport) => transport.group_id(),
            Self::Nats(transport) => transport.group_id(),
        }
    }

    fn register_handler(&self, handler: Arc<dyn EnvelopeHandler>) {
        match self {
            Self::Memory(transport) => transport.register_handler(handler),
            Self::Nats(transport) => transport.register_handler(handler),
        }
    }

    async fn commit(&self, asynchronous: bool) -> Result<(), Self::Error> {
        match self {
            Self::Memory(transport) => Ok(transport.commit(asynchronous).await?),
            Self::Nats(transport) => Ok(transport.commit(asynchronous).await?),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        match self {
            Self::Memory(transport) => Ok(transport.close().await?),
            Self::Nats(transport) => Ok(transport.close().await?),
        }
    }
}

/// Errors from whichever store is selected.
#[derive(Debug, Error)]
pub enum AnyStoreError {
    /// Memory store error.
    #[error(transparent)]
    Memory(#[from] courier_store_memory::Error),

    /// NATS store error.
    #[error(transparent)]
    Nats(#[from] courier_store_nats::Error),
}

impl StoreError for AnyStoreError {}

/// A result store chosen at startup from configuration.
#[derive(Clone, Debug)]
pub enum AnyStore {
    /// In-process map.
    Memory(MemoryStore),

    /// NATS JetStream key-value bucket.
    Nats(NatsStore),
}

#[async_trait]
impl Store for AnyStore {
    type Error = AnyStoreError;

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error> {
        match self {
            Self::Memory(store) => Ok(store.del(key).await?),
            Self::Nats(store) => Ok(store.del(key).await?),
        }
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error> {
        match self {
            Self::Memory(store) => Ok(store.get(key).await?),
            Self::Nats(store) => Ok(store.get(key).await?),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, Self::Error> {
        match self {
            Self::Memory(store) => Ok(store.keys().await?),
            Self::Nats(store) => Ok(store.keys().await?),
        }
    }

    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error> {
        match self {
            Self::Memory(store) => Ok(store.put(key, bytes).await?),
            Self::Nats(store) => Ok(store.put(key, bytes).await?),
        }
    }

    fn scope(&self) -> StoreScope {
        match self {
            Self::Memory(store) => store.scope(),
            Self::Nats(store) => store.scope(),
        }
    }
}

/// One NATS connection per distinct server list.
#[derive(Default)]
struct NatsConnections {
    connections: Vec<(String, Client)>,
}

impl NatsConnections {
    async fn get(&mut self, servers: &str) -> Result<Client, Error> {
        if let Some((_, client)) = self.connections.iter().find(|(s, _)| s == servers) {
            return Ok(client.clone());
        }

        let client = async_nats::connect(servers)
            .await
            .map_err(Error::transport)?;
        info!(servers, "connected to NATS");

        self.connections.push((servers.to_string(), client.clone()));
        Ok(client)
    }
}

impl AnyTransport {
    /// Builds the transport named by `config`, connecting to NATS if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the NATS connection fails.
    pub async fn connect(
        config: &TransportConfig,
        group_id: String,
        consume_timeout: Duration,
        max_batch_size: usize,
    ) -> Result<Self, Error> {
        let mut connections = NatsConnections::default();
        build_transport(
            config,
            group_id,
            consume_timeout,
            max_batch_size,
            &mut connections,
        )
        .await
    }
}

async fn build_transport(
    config: &TransportConfig,
    group_id: String,
    consume_timeout: Duration,
    max_batch_size: usize,
    connections: &mut NatsConnections,
) -> Result<AnyTransport, Error> {
    Ok(match config {
        TransportConfig::Memory { broker } => AnyTransport::Memory(MemoryTransport::new(
            broker.clone(),
            MemoryTransportOptions {
                group_id,
                consume_timeout,
                max_batch_size,
            },
        )),
        TransportConfig::Nats { servers } => AnyTransport::Nats(NatsTransport::new(
            NatsTransportOptions {
                client: connections.get(servers).await?,
                group_id,
                consume_timeout,
                max_batch_size,
            },
        )),
    })
}

/// Builds the transport and store named by `config` and returns a client
/// subscribed to the response topics.
///
/// The consumer group id is unique to this instance when the store is local,
/// so that every instance sees its own replies, and shared when the store is
/// distributed.
///
/// # Errors
///
/// Returns [`Error::Config`] for invalid configuration before any network
/// activity, and [`Error::Transport`] if connecting or subscribing fails.
pub async fn connect(
    config: ClientConfig,
) -> Result<CorrelationClient<AnyTransport, AnyStore>, Error> {
    config.validate()?;

    let mut connections = NatsConnections::default();

    let store = match &config.store {
        StoreConfig::Local => AnyStore::Memory(MemoryStore::new()),
        StoreConfig::Nats {
            servers,
            bucket,
            max_age,
        } => AnyStore::Nats(NatsStore::new(NatsStoreOptions {
            client: connections.get(servers).await?,
            bucket: bucket.clone(),
            max_age: *max_age,
            persist: false,
        })),
    };

    let group_id = generate_group_id(
        &config.group_domain,
        &config.group_suffix,
        store.scope().requires_unique_group(),
    );

    let transport = build_transport(
        &config.transport,
        group_id,
        config.consume_timeout,
        config.max_batch_size,
        &mut connections,
    )
    .await?;

    CorrelationClient::new(
        transport,
        store,
        CorrelationClientOptions {
            service_name: config.service_name,
            response_topics: config.response_topics,
            polling_interval: config.polling_interval,
            request_timeout: config.request_timeout,
        },
    )
    .await
}
