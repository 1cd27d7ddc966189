//! Request/response over topic-based publish/subscribe.
//!
//! A [`CorrelationClient`] publishes requests with fresh correlation ids and
//! resolves each caller once the matching reply has been consumed and parked
//! in a result store. The [`Responder`] is the serving half, and the model
//! adapters wrap the client for the completion and embedding services.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod config;
mod error;
mod models;
mod pending;
mod provider;
mod service;

pub use client::{CorrelationClient, CorrelationClientOptions, Reply};
pub use config::{
    ClientConfig, ConfigError, DEFAULT_BUCKET, DEFAULT_MAX_AGE, DEFAULT_SERVICE_NAME,
    StoreConfig, TransportConfig,
};
pub use error::{Error, Result};
pub use models::{
    CompletionModel, CompletionModelOptions, DEFAULT_FALLBACK_MESSAGE, EmbeddingModel,
    EmbeddingModelOptions,
};
pub use provider::{AnyStore, AnyStoreError, AnyTransport, AnyTransportError, connect};
pub use service::{RequestHandler, Responder, ResponderOptions, RetryPolicy};
