//! Abstract interface for the key-value stores that hold correlated replies.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for store errors
pub trait StoreError: Error + Send + Sync + 'static {}

/// Who can see the entries of a store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreScope {
    /// Entries are visible to the owning process only.
    Local,

    /// Entries are shared by every process attached to the same backend.
    Distributed,
}

impl StoreScope {
    /// Whether consumers using this scope need a group id of their own.
    ///
    /// A local store cannot see replies consumed by another instance, so each
    /// instance must receive every reply.
    #[must_use]
    pub const fn requires_unique_group(self) -> bool {
        matches!(self, Self::Local)
    }
}

/// A trait representing a key-value store with asynchronous operations.
///
/// `get` returns `None` for a missing key, `put` overwrites, and `del` on a
/// missing key succeeds.
#[async_trait]
pub trait Store
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the store.
    type Error: StoreError;

    /// Deletes a key from the store.
    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error>;

    /// Retrieves the value associated with a key.
    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error>;

    /// Retrieves all keys in the store.
    async fn keys(&self) -> Result<Vec<String>, Self::Error>;

    /// Stores a key-value pair.
    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error>;

    /// Reports whether entries are process-local or shared.
    fn scope(&self) -> StoreScope;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_local_scope_requires_unique_group() {
        assert!(StoreScope::Local.requires_unique_group());
        assert!(!StoreScope::Distributed.requires_unique_group());
    }
}
