//! The pooled-resource capability and the `deadpool` manager for [`BrokerConnection`]s.
use super::config::PoolConfig;
use super::ConnectionPool;
use crate::connection::{BrokerConnection, Client};
use crate::Error;
use deadpool::managed::RecycleResult;
use deadpool::Runtime;
use std::sync::Arc;
use std::time::Duration;

/// The lifecycle the pool needs from the resources it hands out.
///
/// It is deliberately unaware of what the resource does once acquired: protocol operations
/// live on the resource itself.
#[async_trait::async_trait]
pub trait PooledResource: Send + Sync + 'static {
    /// Open the underlying transport, replacing the current one if any.
    async fn create(&mut self) -> Result<(), Error>;

    /// Tear down the underlying transport.
    ///
    /// Returns `false` if there was nothing live to close.
    async fn close(&mut self) -> Result<bool, Error>;

    /// [`create`](Self::create), with failures logged and turned into `false`.
    async fn reconnect(&mut self) -> bool;

    /// Whether the resource currently holds a live transport.
    fn is_live(&self) -> bool;

    /// Time elapsed since the resource was last used.
    fn idle_time(&self) -> Duration;
}

#[async_trait::async_trait]
impl PooledResource for BrokerConnection {
    async fn create(&mut self) -> Result<(), Error> {
        BrokerConnection::create(self).await
    }

    async fn close(&mut self) -> Result<bool, Error> {
        BrokerConnection::close(self).await
    }

    async fn reconnect(&mut self) -> bool {
        BrokerConnection::reconnect(self).await
    }

    fn is_live(&self) -> bool {
        BrokerConnection::is_live(self)
    }

    fn idle_time(&self) -> Duration {
        BrokerConnection::idle_time(self)
    }
}

/// Creates and recycles the [`BrokerConnection`]s of a [`ConnectionPool`].
///
/// New connections are cheap: they share the manager's [`Client`] and only open a transport
/// session on their first [`establish`](BrokerConnection::establish).
///
/// ```rust,no_run
/// use amqp_pool::amqp::configuration::ClientSettings;
/// use amqp_pool::connection::Client;
/// use amqp_pool::pool::ConnectionManager;
/// use std::time::Duration;
///
/// # fn example() -> anyhow::Result<()> {
/// let client = Client::new_from_config(&ClientSettings::default())?;
/// let pool = ConnectionManager::new(client)
///     .max_connections(16)
///     .wait_timeout(Some(Duration::from_millis(500)))
///     .into_pool()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionManager {
    client: Arc<Client>,
    max_n_connections: usize,
    wait_timeout: Option<Duration>,
    max_idle_time: Option<Duration>,
}

impl ConnectionManager {
    pub fn new(client: Client) -> Self {
        Arc::new(client).into()
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Replace every pool setting with the ones in `config`.
    #[must_use]
    pub fn config(self, config: &PoolConfig) -> Self {
        self.max_connections(config.max_size)
            .wait_timeout(config.wait_timeout())
            .max_idle_time(config.max_idle_time())
    }

    /// Maximum number of connections checked out at the same time.
    #[must_use]
    pub fn max_connections(mut self, max_n_connections: usize) -> Self {
        self.max_n_connections = max_n_connections;
        self
    }

    /// How long an acquire waits for a free slot. `None` waits forever, zero fails straight away.
    #[must_use]
    pub fn wait_timeout(mut self, wait_timeout: Option<Duration>) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Live connections that sat in the pool for longer than this are closed when they are next
    /// acquired, and a fresh connection is handed out in their place.
    #[must_use]
    pub fn max_idle_time(mut self, max_idle_time: Option<Duration>) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    pub fn into_pool(self) -> Result<ConnectionPool, anyhow::Error> {
        let max_size = self.max_n_connections;
        let wait_timeout = self.wait_timeout;
        ConnectionPool::builder(self)
            .max_size(max_size)
            .wait_timeout(wait_timeout)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build the AMQP connection pool: {}", e))
    }

    fn is_stale<R: PooledResource>(&self, resource: &R) -> bool {
        self.max_idle_time
            .map_or(false, |max| resource.is_live() && resource.idle_time() > max)
    }
}

impl From<Arc<Client>> for ConnectionManager {
    fn from(client: Arc<Client>) -> Self {
        Self {
            client,
            max_n_connections: PoolConfig::default().max_size,
            wait_timeout: None,
            max_idle_time: None,
        }
    }
}

#[async_trait::async_trait]
impl deadpool::managed::Manager for ConnectionManager {
    type Type = BrokerConnection;
    type Error = Error;

    async fn create(&self) -> Result<BrokerConnection, Error> {
        Ok(self.client.create_connection())
    }

    /// Connections are handed back out as they are: a broken one is detected and reopened by
    /// its next operation. Stale connections are swapped for fresh ones.
    async fn recycle(&self, connection: &mut BrokerConnection) -> RecycleResult<Error> {
        if self.is_stale(connection) {
            let stale = std::mem::replace(connection, self.client.create_connection());
            // Closed on its own task: the session is closed even if this acquire is dropped.
            tokio::spawn(close_stale(stale));
        }
        Ok(())
    }
}

async fn close_stale<R: PooledResource>(mut stale: R) {
    tracing::debug!("Closing an AMQP connection idle for {:?}", stale.idle_time());
    if let Err(e) = stale.close().await {
        tracing::debug!("Failed to close an idle AMQP connection: {}", e);
    }
}
