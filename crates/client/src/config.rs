use std::time::Duration;

use courier_messaging::identity::DEFAULT_GROUP_DOMAIN;
use courier_messaging_memory::MemoryBroker;
use thiserror::Error;

/// Default name reported as the `source` of every request.
pub const DEFAULT_SERVICE_NAME: &str = "courier-client";

/// Default bucket for the distributed result store.
pub const DEFAULT_BUCKET: &str = "courier-responses";

/// Default lifetime of entries in the distributed result store.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

/// Configuration rejected before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A duration that must be positive was zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The batch size was zero.
    #[error("max batch size must be at least 1")]
    ZeroBatchSize,

    /// No response topic was configured.
    #[error("at least one response topic is required")]
    NoResponseTopics,

    /// The store provider name is not known.
    #[error("unsupported store provider `{0}` - expected `local` or `nats`")]
    UnsupportedStore(String),

    /// The transport provider name is not known.
    #[error("unsupported transport provider `{0}` - expected `memory` or `nats`")]
    UnsupportedTransport(String),
}

/// Which broker carries envelopes.
#[derive(Clone, Debug)]
pub enum TransportConfig {
    /// An in-process broker. Clients built from clones of the same broker
    /// can talk to each other.
    Memory {
        /// The broker to attach to.
        broker: MemoryBroker,
    },

    /// A NATS server.
    Nats {
        /// Comma separated server URLs.
        servers: String,
    },
}

impl TransportConfig {
    /// Resolves a provider name, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedTransport`] for unknown names.
    pub fn from_provider(name: &str, servers: impl Into<String>) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory {
                broker: MemoryBroker::new(),
            }),
            "nats" => Ok(Self::Nats {
                servers: servers.into(),
            }),
            _ => Err(ConfigError::UnsupportedTransport(name.to_string())),
        }
    }
}

/// Where correlated replies are parked until their caller collects them.
#[derive(Clone, Debug)]
pub enum StoreConfig {
    /// A map owned by this process.
    Local,

    /// A NATS JetStream key-value bucket shared between processes.
    Nats {
        /// Comma separated server URLs.
        servers: String,
        /// Bucket name.
        bucket: String,
        /// Entry lifetime.
        max_age: Duration,
    },
}

impl StoreConfig {
    /// Resolves a provider name, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedStore`] for unknown names.
    pub fn from_provider(
        name: &str,
        servers: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "nats" => Ok(Self::Nats {
                servers: servers.into(),
                bucket: bucket.into(),
                max_age: DEFAULT_MAX_AGE,
            }),
            _ => Err(ConfigError::UnsupportedStore(name.to_string())),
        }
    }
}

/// Everything needed to [`connect`](crate::connect) a client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Reported as the `source` of every request.
    pub service_name: String,

    /// Topics the client consumes replies from.
    pub response_topics: Vec<String>,

    /// Prefix of the consumer group id.
    pub group_domain: String,

    /// Optional middle part of the consumer group id.
    pub group_suffix: String,

    /// Pause between iterations of the background loop.
    pub polling_interval: Duration,

    /// Default wait for a reply.
    pub request_timeout: Duration,

    /// How long one consume call waits for the first message.
    pub consume_timeout: Duration,

    /// Upper bound on envelopes taken per consume call.
    pub max_batch_size: usize,

    /// Broker selection.
    pub transport: TransportConfig,

    /// Result store selection.
    pub store: StoreConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            response_topics: Vec::new(),
            group_domain: DEFAULT_GROUP_DOMAIN.to_string(),
            group_suffix: String::new(),
            polling_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(30),
            consume_timeout: Duration::from_millis(100),
            max_batch_size: 10,
            transport: TransportConfig::Memory {
                broker: MemoryBroker::new(),
            },
            store: StoreConfig::Local,
        }
    }
}

impl ClientConfig {
    /// Checks the values that would make the client unusable.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.response_topics.is_empty() {
            return Err(ConfigError::NoResponseTopics);
        }

        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }

        for (name, value) in [
            ("polling interval", self.polling_interval),
            ("request timeout", self.request_timeout),
            ("consume timeout", self.consume_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        Ok(())
    }
}
