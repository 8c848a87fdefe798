use crate::amqp::{configuration::ClientSettings, configuration::Driver, ConnectionFactory};
use crate::connection::BrokerConnection;
use crate::topology::TopologyConfig;
use crate::transport::Transport;
use std::sync::Arc;

/// The configuration shared by every connection of a pool: how to reach the broker and which
/// topology to declare.
///
/// A `Client` is cheap to share behind an `Arc` and is what
/// [`BrokerConnection::client`](crate::connection::BrokerConnection::client) hands back.
pub struct Client {
    transport: Arc<dyn Transport>,
    topology: TopologyConfig,
}

impl Client {
    /// Build a client talking to the broker described in `settings`, through
    /// [`lapin`], using the driver selected in the settings.
    pub fn new_from_config(settings: &ClientSettings) -> Result<Self, anyhow::Error> {
        Ok(Self::new(
            ConnectionFactory::new_from_config(settings)?,
            settings.topology(),
        ))
    }

    /// Build a client on top of an arbitrary [`Transport`].
    pub fn new(transport: impl Transport, topology: TopologyConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            topology,
        }
    }

    pub fn driver(&self) -> Driver {
        self.transport.driver()
    }

    pub fn topology(&self) -> &TopologyConfig {
        &self.topology
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// A new connection bound to this client.
    ///
    /// No transport session is opened until the connection is established.
    pub fn create_connection(self: &Arc<Self>) -> BrokerConnection {
        BrokerConnection::new(Arc::clone(self))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("driver", &self.driver())
            .field("topology", &self.topology)
            .finish()
    }
}
