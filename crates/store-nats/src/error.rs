use async_nats::jetstream::context::CreateKeyValueErrorKind;
use async_nats::jetstream::kv::{DeleteErrorKind, EntryErrorKind, PutErrorKind, WatchErrorKind};
use courier_store::StoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The key-value bucket could not be created or bound.
    #[error("Failed to create key-value store: {0}")]
    CreateKeyValue(CreateKeyValueErrorKind),

    /// Delete error.
    #[error("Failed to delete: {0}")]
    Delete(DeleteErrorKind),

    /// Entry error.
    #[error("Failed to read entry: {0}")]
    Entry(EntryErrorKind),

    /// The key listing failed part way through.
    #[error("Failed to list keys: {0}")]
    Keys(String),

    /// Put error.
    #[error("Failed to put: {0}")]
    Put(PutErrorKind),

    /// Watch error.
    #[error("Failed to watch keys: {0}")]
    Watch(WatchErrorKind),
}

impl StoreError for Error {}
