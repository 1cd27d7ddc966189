//! NATS implementation of the messaging crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod transport;

pub use error::Error;
pub use transport::{NatsTransport, NatsTransportOptions};
