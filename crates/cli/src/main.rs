//! Command line front end for sending correlated requests and running a
//! simple echo responder.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use courier_client::{
    AnyTransport, ClientConfig, ConfigError, DEFAULT_BUCKET, DEFAULT_SERVICE_NAME, RequestHandler,
    Responder, ResponderOptions, RetryPolicy, StoreConfig, TransportConfig, connect,
};
use courier_messaging::generate_group_id;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client error
    #[error(transparent)]
    Client(#[from] courier_client::Error),

    /// Invalid provider selection
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The payload argument is not JSON
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// An in-process broker cannot reach any other process
    #[error("the memory transport only works inside one process - use `--transport nats`")]
    InProcessTransport,
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Transport provider. Only `nats` can reach other processes
    #[arg(long, default_value = "nats", env = "COURIER_TRANSPORT")]
    transport: String,

    /// Comma separated NATS server URLs
    #[arg(long, default_value = "nats://localhost:4222", env = "COURIER_SERVERS")]
    servers: String,

    /// Result store provider: `local` or `nats`
    #[arg(long, default_value = "local", env = "COURIER_STORE")]
    store: String,

    /// Bucket for the NATS result store
    #[arg(long, default_value = DEFAULT_BUCKET, env = "COURIER_BUCKET")]
    bucket: String,

    /// Topic replies are consumed from (repeatable)
    #[arg(
        long = "response-topic",
        default_value = "llm_response",
        env = "COURIER_RESPONSE_TOPICS",
        value_delimiter = ','
    )]
    response_topics: Vec<String>,

    /// Middle part of the consumer group id
    #[arg(long, default_value = "", env = "COURIER_GROUP")]
    group: String,

    /// Name reported as the source of every envelope
    #[arg(long, default_value = DEFAULT_SERVICE_NAME, env = "COURIER_SERVICE_NAME")]
    service_name: String,

    /// How long to wait for a reply, in milliseconds
    #[arg(long, default_value_t = 30_000, env = "COURIER_TIMEOUT_MS")]
    timeout_ms: u64,

    /// Pause between polls of the background loop, in milliseconds
    #[arg(long, default_value_t = 100, env = "COURIER_POLLING_INTERVAL_MS")]
    polling_interval_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Publish one request and print the reply as JSON
    Request {
        /// Topic the request is published on
        #[arg(long)]
        topic: String,

        /// Request body as JSON
        #[arg(long)]
        payload: String,

        /// Topic the responder should reply on
        #[arg(long)]
        destination: Option<String>,
    },

    /// Answer every request with its own message until interrupted
    Echo {
        /// Topic requests arrive on (repeatable)
        #[arg(long = "request-topic", required = true)]
        request_topics: Vec<String>,

        /// Reply topic for requests that name no destination
        #[arg(long)]
        response_topic: String,

        /// Requests handled concurrently per batch
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
}

struct Echo;

#[async_trait]
impl RequestHandler for Echo {
    type Error = Infallible;

    async fn handle(&self, message: Value) -> Result<Value, Self::Error> {
        Ok(json!({ "results": message }))
    }
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig, Error> {
        let transport = TransportConfig::from_provider(&self.transport, self.servers.clone())?;
        if matches!(transport, TransportConfig::Memory { .. }) {
            return Err(Error::InProcessTransport);
        }

        Ok(ClientConfig {
            service_name: self.service_name.clone(),
            response_topics: self.response_topics.clone(),
            group_suffix: self.group.clone(),
            polling_interval: Duration::from_millis(self.polling_interval_ms),
            request_timeout: Duration::from_millis(self.timeout_ms),
            transport,
            store: StoreConfig::from_provider(&self.store, self.servers.clone(), self.bucket.clone())?,
            ..ClientConfig::default()
        })
    }
}

async fn request(
    args: &Args,
    topic: &str,
    payload: &str,
    destination: Option<String>,
) -> Result<(), Error> {
    let message: Value = serde_json::from_str(payload)?;
    let client = connect(args.client_config()?).await?;

    let result = client.request(topic, message, destination).await;
    client.shutdown().await;

    let message = result?.into_message()?;
    println!("{}", serde_json::to_string_pretty(&message)?);

    Ok(())
}

async fn echo(
    args: &Args,
    request_topics: Vec<String>,
    response_topic: String,
    workers: usize,
    shutdown_token: CancellationToken,
) -> Result<(), Error> {
    let config = args.client_config()?;
    let transport = AnyTransport::connect(
        &config.transport,
        generate_group_id(&args.service_name, &args.group, false),
        config.consume_timeout,
        config.max_batch_size,
    )
    .await?;

    let responder = Responder::new(
        transport,
        Echo,
        ResponderOptions {
            service_name: args.service_name.clone(),
            request_topics,
            default_response_topic: response_topic,
            error_topic: None,
            workers,
            retry: RetryPolicy::default(),
        },
    );

    responder.run(shutdown_token).await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        }
        _ => {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt signal");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received interrupt signal");
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let shutdown_token = CancellationToken::new();
    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutting down");
        signal_shutdown_token.cancel();
    });

    match args.command.clone() {
        Command::Request {
            topic,
            payload,
            destination,
        } => request(&args, &topic, &payload, destination).await,
        Command::Echo {
            request_topics,
            response_topic,
            workers,
        } => echo(&args, request_topics, response_topic, workers, shutdown_token).await,
    }
}
