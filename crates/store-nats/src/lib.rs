//! Implementation of key-value storage for correlated replies using NATS
//! JetStream, shared by every process bound to the same bucket.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use async_nats::Client;
use async_nats::jetstream;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::jetstream::kv::{Config, Store as KvStore};
use async_trait::async_trait;
use bytes::Bytes;
use courier_store::{Store, StoreScope};
use futures::TryStreamExt;
use tokio::sync::OnceCell;
use tracing::debug;

/// Options for configuring a `NatsStore`.
#[derive(Clone, Debug)]
pub struct NatsStoreOptions {
    /// The NATS client to use.
    pub client: Client,

    /// The bucket to use for the key-value store.
    pub bucket: String,

    /// The maximum age of entries in the store. Use `Duration::ZERO` for no expiry.
    pub max_age: Duration,

    /// Whether to persist the store to disk.
    pub persist: bool,
}

/// KV store using NATS JS.
#[derive(Clone)]
pub struct NatsStore {
    bucket: String,
    jetstream_context: JetStreamContext,
    kv_store: Arc<OnceCell<KvStore>>,
    max_age: Duration,
    persist: bool,
}

impl Debug for NatsStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsStore")
            .field("bucket", &self.bucket)
            .field("max_age", &self.max_age)
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}

impl NatsStore {
    /// Creates a new `NatsStore` with the specified options.
    ///
    /// The bucket is created or bound on first use.
    #[must_use]
    pub fn new(
        NatsStoreOptions {
            client,
            bucket,
            max_age,
            persist,
        }: NatsStoreOptions,
    ) -> Self {
        let jetstream_context = jetstream::new(client);

        Self {
            bucket,
            jetstream_context,
            kv_store: Arc::new(OnceCell::new()),
            max_age,
            persist,
        }
    }

    /// The bucket backing this store.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get_kv_store(&self) -> Result<&KvStore, Error> {
        self.kv_store
            .get_or_try_init(|| async {
                let config = Config {
                    bucket: self.bucket.clone(),
                    max_age: self.max_age,
                    storage: if self.persist {
                        jetstream::stream::StorageType::File
                    } else {
                        jetstream::stream::StorageType::Memory
                    },
                    ..Default::default()
                };

                debug!(bucket = %self.bucket, "binding key-value bucket");

                self.jetstream_context
                    .create_key_value(config)
                    .await
                    .map_err(|e| Error::CreateKeyValue(e.kind()))
            })
            .await
    }
}

#[async_trait]
impl Store for NatsStore {
    type Error = Error;

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error> {
        self.get_kv_store()
            .await?
            .delete(key.into())
            .await
            .map_err(|e| Error::Delete(e.kind()))?;

        Ok(())
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error> {
        self.get_kv_store()
            .await?
            .get(key.into())
            .await
            .map_err(|e| Error::Entry(e.kind()))
    }

    async fn keys(&self) -> Result<Vec<String>, Self::Error> {
        self.get_kv_store()
            .await?
            .keys()
            .await
            .map_err(|e| Error::Watch(e.kind()))?
            .try_collect::<Vec<String>>()
            .await
            .map_err(|e| Error::Keys(e.to_string()))
    }

    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error> {
        self.get_kv_store()
            .await?
            .put(key.into(), bytes)
            .await
            .map_err(|e| Error::Put(e.kind()))?;

        Ok(())
    }

    fn scope(&self) -> StoreScope {
        StoreScope::Distributed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;
    use uuid::Uuid;

    async fn test_store(max_age: Duration) -> NatsStore {
        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let client = async_nats::connect(&nats_url)
            .await
            .expect("Failed to connect to NATS for tests");

        NatsStore::new(NatsStoreOptions {
            client,
            bucket: format!("courier_test_{}", Uuid::new_v4().simple()),
            max_age,
            persist: false,
        })
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_put_get_del() {
        let store = test_store(Duration::from_secs(60)).await;
        let value = Bytes::from_static(b"{\"id\":\"abc\"}");

        store.put("abc", value.clone()).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), Some(value));
        assert_eq!(store.keys().await.unwrap(), vec!["abc".to_string()]);

        store.del("abc").await.unwrap();
        store.del("abc").await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), None);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_get_missing_is_none() {
        let store = test_store(Duration::ZERO).await;

        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_stores_on_same_bucket_share_entries() {
        let store = test_store(Duration::from_secs(60)).await;
        let other = store.clone();

        store.put("shared", Bytes::from_static(b"1")).await.unwrap();

        assert_eq!(
            other.get("shared").await.unwrap(),
            Some(Bytes::from_static(b"1"))
        );
        assert_eq!(other.scope(), StoreScope::Distributed);
    }
}
