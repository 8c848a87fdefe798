use super::connection::{ConnectionPool, ConnectionPoolExt};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

/// Type-erased handle on a registered pool.
trait ClosablePool: Send + Sync {
    fn close(&self) -> BoxFuture<'_, usize>;
}

impl ClosablePool for ConnectionPool {
    fn close(&self) -> BoxFuture<'_, usize> {
        self.close_connections()
    }
}

/// The named pools of a process, closed together when the process (or a worker) stops.
///
/// This is the hook for lifecycle events: whatever notices a worker stopping calls
/// [`close_all`](Self::close_all). Connections checked out by a task go back to their pool when
/// the task drops its [`PooledConnection`](super::PooledConnection).
///
/// Registering or unregistering while [`close_all`](Self::close_all) runs is safe: it closes the
/// pools registered when it started.
///
/// ```rust,no_run
/// use amqp_pool::amqp::configuration::ClientSettings;
/// use amqp_pool::connection::Client;
/// use amqp_pool::pool::{ConnectionManager, PoolRegistry};
///
/// async fn example() -> anyhow::Result<()> {
///     let client = Client::new_from_config(&ClientSettings::default())?;
///     let pool = ConnectionManager::new(client).max_connections(4).into_pool()?;
///
///     let registry = PoolRegistry::default();
///     registry.register("default", &pool);
///
///     let shutdown = async {
///         let _ = tokio::signal::ctrl_c().await;
///     };
///     registry.close_all_on_shutdown(shutdown, "ctrl_c").await;
///     Ok(())
/// }
/// ```
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<Vec<(String, Arc<dyn ClosablePool>)>>,
}

impl PoolRegistry {
    /// Register a pool under `name`, replacing any pool previously registered with that name.
    pub fn register(&self, name: impl Into<String>, pool: &ConnectionPool) {
        let name = name.into();
        let mut pools = self.pools.lock();
        pools.retain(|(n, _)| *n != name);
        pools.push((name, Arc::new(pool.clone())));
    }

    /// Stop tracking the pool registered under `name`. Its connections are left untouched.
    pub fn unregister(&self, name: &str) -> bool {
        let mut pools = self.pools.lock();
        let before = pools.len();
        pools.retain(|(n, _)| n != name);
        pools.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Close every registered pool and return the total number of connections closed.
    ///
    /// `event` names what triggered the shutdown, for logging purposes.
    #[tracing::instrument(name = "amqp_pool_close_all", skip(self))]
    pub async fn close_all(&self, event: &str) -> usize {
        // Pools are closed outside the lock, on a snapshot of the handles.
        let pools: Vec<_> = self.pools.lock().clone();
        let mut total = 0;
        for (name, pool) in &pools {
            let closed = pool.close().await;
            tracing::info!(pool = %name, "Closed {} AMQP connections on {}", closed, event);
            total += closed;
        }
        total
    }

    /// Wait for `shutdown` to complete, then [`close_all`](Self::close_all).
    pub async fn close_all_on_shutdown<F>(&self, shutdown: F, event: &str) -> usize
    where
        F: Future<Output = ()>,
    {
        shutdown.await;
        self.close_all(event).await
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.names())
            .finish()
    }
}
