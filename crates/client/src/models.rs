use crate::client::CorrelationClient;
use crate::error::{Error, Result};

use std::sync::Arc;

use courier_messaging::Transport;
use courier_store::Store;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Reply used when the completion service answers with no text.
pub const DEFAULT_FALLBACK_MESSAGE: &str = "Sorry, I could not find the information you asked for. \
     Please give more detail or ask a different question.";

/// Options for a [`CompletionModel`].
#[derive(Clone, Debug)]
pub struct CompletionModelOptions {
    /// Topic the completion service listens on.
    pub request_topic: String,

    /// Topic the completion service should reply on.
    pub reply_topic: Option<String>,

    /// Returned when the service has no answer.
    pub fallback_message: String,

    /// Answer a faulted reply with `fallback_message` instead of
    /// [`Error::Remote`]. The fault is still logged.
    pub fallback_on_fault: bool,
}

impl Default for CompletionModelOptions {
    fn default() -> Self {
        Self {
            request_topic: "llm-request".to_string(),
            reply_topic: Some("llm_response".to_string()),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            fallback_on_fault: true,
        }
    }
}

/// Text completion served by a remote language model.
#[derive(Debug)]
pub struct CompletionModel<T, S>
where
    T: Transport,
    S: Store,
{
    client: Arc<CorrelationClient<T, S>>,
    options: CompletionModelOptions,
}

impl<T, S> CompletionModel<T, S>
where
    T: Transport,
    S: Store,
{
    /// Creates a new `CompletionModel` on top of a shared client.
    pub const fn new(client: Arc<CorrelationClient<T, S>>, options: CompletionModelOptions) -> Self {
        Self { client, options }
    }

    /// Completes `prompt`.
    ///
    /// A faulted reply yields the fallback message unless
    /// `fallback_on_fault` is off, in which case it is [`Error::Remote`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] as described above,
    /// [`Error::MalformedReply`] if `results` is neither a string nor null, and
    /// any error of [`CorrelationClient::request`].
    #[instrument(skip(self, prompt))]
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();

        let reply = self
            .client
            .request(
                &self.options.request_topic,
                json!({ "text": prompt }),
                self.options.reply_topic.clone(),
            )
            .await?;
        let id = reply.id.clone();

        info!(
            id = %id,
            elapsed_ms = started.elapsed().as_millis(),
            "completion received"
        );

        if let Some(fault) = &reply.error {
            if self.options.fallback_on_fault {
                warn!(id = %id, error = %fault, "completion failed remotely, using fallback");
                return Ok(self.options.fallback_message.clone());
            }
        }

        match reply.into_message()?.get("results") {
            None | Some(Value::Null) => Ok(self.options.fallback_message.clone()),
            Some(Value::String(text)) => Ok(text.clone()),
            Some(other) => Err(Error::MalformedReply {
                id,
                reason: format!("expected text results, got {other}"),
            }),
        }
    }
}

/// Options for an [`EmbeddingModel`].
#[derive(Clone, Debug)]
pub struct EmbeddingModelOptions {
    /// Topic the embedding service listens on.
    pub request_topic: String,

    /// Topic the embedding service should reply on.
    pub reply_topic: Option<String>,
}

impl Default for EmbeddingModelOptions {
    fn default() -> Self {
        Self {
            request_topic: "vector-request".to_string(),
            reply_topic: Some("vector-response".to_string()),
        }
    }
}

/// Vector embeddings served by a remote model.
#[derive(Debug)]
pub struct EmbeddingModel<T, S>
where
    T: Transport,
    S: Store,
{
    client: Arc<CorrelationClient<T, S>>,
    options: EmbeddingModelOptions,
}

impl<T, S> EmbeddingModel<T, S>
where
    T: Transport,
    S: Store,
{
    /// Creates a new `EmbeddingModel` on top of a shared client.
    pub const fn new(client: Arc<CorrelationClient<T, S>>, options: EmbeddingModelOptions) -> Self {
        Self { client, options }
    }

    /// Embeds each text, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the service reported a fault,
    /// [`Error::MalformedReply`] if `results` is not a list of vectors, and
    /// any error of [`CorrelationClient::request`].
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let started = Instant::now();

        let reply = self
            .client
            .request(
                &self.options.request_topic,
                json!({ "texts": texts }),
                self.options.reply_topic.clone(),
            )
            .await?;
        let id = reply.id.clone();
        let mut message = reply.into_message()?;

        let vectors: Vec<Vec<f32>> = match message.get_mut("results").map(Value::take) {
            None | Some(Value::Null) => {
                return Err(Error::MalformedReply {
                    id,
                    reason: "missing results".to_string(),
                });
            }
            Some(results) => serde_json::from_value(results).map_err(|e| Error::MalformedReply {
                id: id.clone(),
                reason: e.to_string(),
            })?,
        };

        info!(
            id = %id,
            length = vectors.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "embeddings received"
        );

        Ok(vectors)
    }

    /// Embeds a single query text.
    ///
    /// # Errors
    ///
    /// See [`embed_documents`](Self::embed_documents). An empty result list is
    /// reported as [`Error::MalformedReply`].
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::MalformedReply {
                id: String::new(),
                reason: "no vector returned for query".to_string(),
            })
    }
}
