use super::manager::{ConnectionManager, PooledResource};
use crate::Error;
use deadpool::managed::{Object, Pool, PoolError, Timeouts};
use std::time::{Duration, Instant};

/// A bounded `deadpool` pool of [`BrokerConnection`](crate::connection::BrokerConnection)s.
///
/// Cloning a pool is cheap: all clones share the same connections.
pub type ConnectionPool = Pool<ConnectionManager>;

/// A connection checked out of a [`ConnectionPool`]. It goes back to the pool when dropped.
pub type PooledConnection = Object<ConnectionManager>;

/// AMQP-aware operations on a [`ConnectionPool`].
#[async_trait::async_trait]
pub trait ConnectionPoolExt {
    /// Check out a connection.
    ///
    /// Waits for a release when `max_size` connections are already checked out, according to
    /// the configured wait timeout. Fails with [`Error::PoolExhausted`] once the wait budget is
    /// spent.
    async fn get_connection(&self) -> Result<PooledConnection, Error>;

    /// Give a connection back to the pool. Its health is not checked.
    fn release(&self, connection: PooledConnection);

    /// Close the live connections sitting in the pool and return how many were closed.
    ///
    /// Checked-out connections are left alone. The closed connections stay in the pool and
    /// reconnect on their next use, so calling this again closes nothing.
    async fn close_connections(&self) -> usize;
}

#[async_trait::async_trait]
impl ConnectionPoolExt for ConnectionPool {
    #[tracing::instrument(name = "amqp_pool_get", skip(self))]
    async fn get_connection(&self) -> Result<PooledConnection, Error> {
        let started = Instant::now();
        self.get().await.map_err(|e| match e {
            PoolError::Backend(e) => e,
            PoolError::Timeout(_) => Error::PoolExhausted {
                waited: started.elapsed(),
            },
            e => Error::PoolUnavailable {
                reason: e.to_string(),
            },
        })
    }

    fn release(&self, connection: PooledConnection) {
        drop(connection);
    }

    #[tracing::instrument(name = "amqp_pool_close", skip(self))]
    async fn close_connections(&self) -> usize {
        // Only take what is sitting in the pool: a zero wait never blocks on checked-out ones.
        let available = usize::try_from(self.status().available).unwrap_or(0);
        let non_blocking = Timeouts {
            wait: Some(Duration::ZERO),
            ..Timeouts::default()
        };
        let mut drained = Vec::with_capacity(available);
        for _ in 0..available {
            match self.timeout_get(&non_blocking).await {
                Ok(connection) => drained.push(connection),
                Err(_) => break,
            }
        }

        let mut closed = 0;
        for connection in drained.iter_mut() {
            if !PooledResource::is_live(&**connection) {
                continue;
            }
            match PooledResource::close(&mut **connection).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to close a pooled AMQP connection: {}", e),
            }
        }
        closed
    }
}

/// Operations on a [`PooledConnection`] that only make sense while it is checked out.
#[async_trait::async_trait]
pub trait PooledConnectionExt {
    /// Close the connection and remove it from its pool, freeing its slot.
    async fn discard(self) -> Result<bool, Error>;
}

#[async_trait::async_trait]
impl PooledConnectionExt for PooledConnection {
    async fn discard(self) -> Result<bool, Error> {
        let mut connection = Object::take(self);
        PooledResource::close(&mut connection).await
    }
}
