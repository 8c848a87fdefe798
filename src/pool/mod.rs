//! Bounded pooling of [`BrokerConnection`](crate::connection::BrokerConnection)s on top of
//! `deadpool`.
//!
//! The pool makes two guarantees:
//! - a connection is never handed to two holders at the same time;
//! - no more than `max_size` connections are checked out, so no more than `max_size`
//!   transport sessions are opened through the pool.
//!
//! Acquiring is cheap: new connections are only opened by their first
//! [`establish`](crate::connection::BrokerConnection::establish).
//!
//! ```rust,no_run
//! use amqp_pool::amqp::configuration::ClientSettings;
//! use amqp_pool::connection::Client;
//! use amqp_pool::pool::{ConnectionManager, ConnectionPoolExt};
//!
//! // Function for asyncness.
//! async fn example() -> anyhow::Result<()> {
//!     let client = Client::new_from_config(&ClientSettings::default())?;
//!     let pool = ConnectionManager::new(client)
//!         .max_connections(16)
//!         .into_pool()?;
//!
//!     let mut connection = pool.get_connection().await?;
//!     connection.establish(None, None, None, None).await?;
//!     connection.push(b"hello", Default::default(), "").await?;
//!     pool.release(connection);
//!
//!     pool.close_connections().await;
//!     Ok(())
//! }
//! ```
mod config;
mod connection;
mod manager;
mod registry;

pub use config::PoolConfig;
pub use connection::{ConnectionPool, ConnectionPoolExt, PooledConnection, PooledConnectionExt};
pub use manager::{ConnectionManager, PooledResource};
pub use registry::PoolRegistry;
