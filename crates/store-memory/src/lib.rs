//! In-memory implementation of key-value storage for correlated replies.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use courier_store::{Store, StoreScope};
use tokio::sync::Mutex;

/// In-memory key-value store.
///
/// Clones share the same map. A store built with [`MemoryStore::new`] reports
/// itself as [`StoreScope::Local`]; one built with [`MemoryStore::new_shared`]
/// reports [`StoreScope::Distributed`] so that several clients in one process
/// can act as competing consumers over it.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    map: Arc<Mutex<HashMap<String, Bytes>>>,
    scope: StoreScope,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a new process-local `MemoryStore`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_scope(StoreScope::Local)
    }

    /// Creates a `MemoryStore` meant to be cloned between clients that share
    /// a consumer group.
    #[must_use]
    pub fn new_shared() -> Self {
        Self::with_scope(StoreScope::Distributed)
    }

    fn with_scope(scope: StoreScope) -> Self {
        Self {
            map: Arc::new(Mutex::new(HashMap::new())),
            scope,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Error = Error;

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error> {
        self.map.lock().await.remove(&key.into());
        Ok(())
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error> {
        let map = self.map.lock().await;
        Ok(map.get(&key.into()).cloned())
    }

    async fn keys(&self) -> Result<Vec<String>, Self::Error> {
        let map = self.map.lock().await;
        Ok(map.keys().cloned().collect())
    }

    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error> {
        self.map.lock().await.insert(key.into(), bytes);
        Ok(())
    }

    fn scope(&self) -> StoreScope {
        self.scope
    }
}
