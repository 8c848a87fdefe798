//! The boundary between the connection lifecycle and the library speaking the AMQP wire protocol.
//!
//! [`BrokerConnection`](crate::connection::BrokerConnection) only ever talks to the broker
//! through these traits. [`ConnectionFactory`](crate::amqp::ConnectionFactory) implements them
//! on top of [`lapin`]; tests plug in an in-memory broker instead.
use crate::amqp::configuration::Driver;
use crate::topology::{ConsumeConfig, ExchangeConfig, ExchangeKind, QueueConfig, RouteConfig};
use lapin::BasicProperties;

mod delivery;

pub use delivery::Delivery;

/// Error raised by a [`Transport`] implementation.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The channel or the session the call was issued on is not open anymore.
    #[error("{0}")]
    Closed(String),
    /// The broker refused the call.
    #[error(transparent)]
    Protocol(anyhow::Error),
    /// The session could not be established.
    #[error(transparent)]
    Connect(anyhow::Error),
}

impl From<lapin::Error> for TransportError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::InvalidChannelState(state) => {
                Self::Closed(format!("channel is in state {state:?}"))
            }
            lapin::Error::InvalidConnectionState(state) => {
                Self::Closed(format!("connection is in state {state:?}"))
            }
            lapin::Error::IOError(e) => Self::Closed(format!("i/o error: {e}")),
            err => Self::Protocol(err.into()),
        }
    }
}

/// Opens transport sessions against a broker.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The variant used to open sessions, reported in errors and logs.
    fn driver(&self) -> Driver;

    /// Open a brand new session. Never reuses a previous one.
    async fn open_session(&self) -> Result<Box<dyn Session>, TransportError>;
}

/// A live connection with the broker, multiplexing channels.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Open a channel.
    ///
    /// `channel_id` is a hint: `None` lets the session pick one.
    async fn open_channel(
        &self,
        channel_id: Option<u16>,
    ) -> Result<Box<dyn BrokerChannel>, TransportError>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Protocol operations issued on a single channel.
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync {
    fn id(&self) -> u16;

    fn is_open(&self) -> bool;

    async fn declare_queue(&self, queue: &QueueConfig) -> Result<(), TransportError>;

    async fn declare_exchange(
        &self,
        exchange: &ExchangeConfig,
        kind: ExchangeKind,
    ) -> Result<(), TransportError>;

    async fn bind(
        &self,
        queue: &str,
        exchange: &str,
        route: &RouteConfig,
    ) -> Result<(), TransportError>;

    /// Submit a message without waiting for a broker confirmation.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), TransportError>;

    /// Fetch a single message, if any is ready.
    async fn get(&self, queue: &str, no_ack: bool) -> Result<Option<Delivery>, TransportError>;

    async fn consume(
        &self,
        queue: &str,
        consume: &ConsumeConfig,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// An active broker-side subscription on a queue.
#[async_trait::async_trait]
pub trait Subscription: Send {
    /// The tag the broker knows the subscription by.
    fn consumer_tag(&self) -> &str;

    /// Wait for the next delivery.
    ///
    /// Returns `None` once the subscription has been cancelled.
    async fn wait(&mut self) -> Option<Result<Delivery, TransportError>>;
}
