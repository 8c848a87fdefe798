//! `amqp-pool` manages a bounded set of reusable AMQP broker connections, built on top of
//! [`lapin`], and exposes a small operation set on each of them: declare a topology, publish,
//! fetch one message, run a consume loop.
//!
//! [`ConnectionPool`](crate::pool::ConnectionPool) and
//! [`BrokerConnection`](crate::connection::BrokerConnection) are the best starting points.
//! [`Amqp`](crate::facade::Amqp) wraps both for single-shot calls.
//!
//! ## Examples
//!
//! Check the `demos` directory as well to see the library in action.

pub mod amqp;
pub mod connection;
pub mod error;
pub mod facade;
pub mod pool;
pub mod topology;
pub mod transport;

pub use error::Error;
