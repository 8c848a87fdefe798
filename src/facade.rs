//! Single-shot operations on top of a [`ConnectionPool`].
use crate::amqp::configuration::ClientSettings;
use crate::connection::{Client, DeliveryHandler};
use crate::pool::{
    ConnectionManager, ConnectionPool, ConnectionPoolExt, PoolConfig, PooledConnection,
    PooledConnectionExt,
};
use crate::topology::ConsumeConfig;
use crate::Error;
use lapin::BasicProperties;

/// `Amqp` turns one call into acquire, establish, operate, release.
///
/// The topology declared is the one configured on the pool's [`Client`], and it is only
/// declared the first time a pooled connection is used. A connection that fails with an error
/// [fatal to its slot](Error::is_fatal_to_slot) is discarded instead of being returned to the
/// pool. Errors are returned to the caller unchanged.
///
/// ```rust,no_run
/// use amqp_pool::amqp::configuration::ClientSettings;
/// use amqp_pool::facade::Amqp;
/// use amqp_pool::pool::PoolConfig;
///
/// async fn example() -> anyhow::Result<()> {
///     let amqp = Amqp::new_from_config(&ClientSettings::default(), PoolConfig::default())?;
///     amqp.push(b"hello", Default::default(), "").await?;
///     let message = amqp.pop().await?;
///     assert_eq!(message.as_deref(), Some(&b"hello"[..]));
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Amqp {
    pool: ConnectionPool,
}

impl Amqp {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Build a [`ConnectionPool`] for the broker in `settings` and wrap it.
    pub fn new_from_config(
        settings: &ClientSettings,
        pool: PoolConfig,
    ) -> Result<Self, anyhow::Error> {
        let client = Client::new_from_config(settings)?;
        Ok(Self::new(ConnectionManager::new(client).config(&pool).into_pool()?))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The client shared by every connection of the pool.
    pub fn client(&self) -> &Client {
        self.pool.manager().client()
    }

    /// Publish one message. See [`BrokerConnection::push`](crate::connection::BrokerConnection::push).
    pub async fn push(
        &self,
        body: &[u8],
        properties: BasicProperties,
        route_key: &str,
    ) -> Result<(), Error> {
        let mut connection = self.acquire().await?;
        let result = connection.push(body, properties, route_key).await;
        settle(connection, result).await
    }

    /// Fetch one message. See [`BrokerConnection::pop`](crate::connection::BrokerConnection::pop).
    pub async fn pop(&self) -> Result<Option<Vec<u8>>, Error> {
        let mut connection = self.acquire().await?;
        let result = connection.pop().await;
        settle(connection, result).await
    }

    /// Run a consume loop. See
    /// [`BrokerConnection::consume`](crate::connection::BrokerConnection::consume).
    ///
    /// The connection stays checked out until the subscription ends.
    pub async fn consume(
        &self,
        handler: Option<&dyn DeliveryHandler>,
        consume: Option<&ConsumeConfig>,
    ) -> Result<(), Error> {
        let mut connection = self.acquire().await?;
        let result = connection.consume(handler, consume).await;
        settle(connection, result).await
    }

    async fn acquire(&self) -> Result<PooledConnection, Error> {
        let mut connection = self.pool.get_connection().await?;
        match connection.ensure_established().await {
            Ok(()) => Ok(connection),
            Err(e) => settle(connection, Err(e)).await,
        }
    }
}

impl std::fmt::Debug for Amqp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Amqp")
            .field("client", self.client())
            .field("status", &self.pool.status())
            .finish()
    }
}

/// Release `connection`, or discard it if `result` is an error fatal to its slot.
async fn settle<T>(connection: PooledConnection, result: Result<T, Error>) -> Result<T, Error> {
    match &result {
        Err(e) if e.is_fatal_to_slot() => {
            if let Err(close_error) = connection.discard().await {
                tracing::debug!("Failed to close a discarded AMQP connection: {}", close_error);
            }
        }
        _ => drop(connection),
    }
    result
}
