use crate::amqp::configuration::Driver;
use std::time::Duration;

/// Error returned by the operations of [`BrokerConnection`](crate::connection::BrokerConnection),
/// [`ConnectionPool`](crate::pool::ConnectionPool) and the [`Amqp`](crate::facade::Amqp) facade.
///
/// Every variant carries enough context (driver, operation, underlying cause) to log the failure
/// and decide what to do with the pooled slot - check out [`Error::is_fatal_to_slot`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The topology is incomplete or malformed.
    /// Raised before any call is made to the broker.
    #[error("AMQP(driver={driver}) {message}")]
    Configuration { driver: Driver, message: String },
    /// The broker rejected a declare/bind/publish/consume call.
    #[error("AMQP(driver={driver}) {operation} was rejected by the broker")]
    BrokerProtocol {
        driver: Driver,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    /// The operation was attempted against a channel or session that is already closed.
    #[error("AMQP(driver={driver}) cannot {operation}: {reason}")]
    ConnectionClosed {
        driver: Driver,
        operation: &'static str,
        reason: String,
    },
    /// A transport session could not be opened.
    #[error("AMQP(driver={driver}) failed to open a transport session")]
    Transport {
        driver: Driver,
        #[source]
        source: anyhow::Error,
    },
    /// No pooled connection became available within the configured wait policy.
    #[error("No pooled AMQP connection became available (waited {waited:?})")]
    PoolExhausted { waited: Duration },
    /// The pool refused to hand out connections, e.g. because it was closed for good.
    #[error("The AMQP connection pool is unavailable: {reason}")]
    PoolUnavailable { reason: String },
}

impl Error {
    /// Whether the connection that produced this error should be discarded rather than
    /// returned to the pool for reuse.
    pub fn is_fatal_to_slot(&self) -> bool {
        matches!(
            self,
            Self::BrokerProtocol { .. } | Self::ConnectionClosed { .. } | Self::Transport { .. }
        )
    }
}
