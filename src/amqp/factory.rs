use crate::amqp::configuration::{ClientSettings, Driver};
use crate::amqp::session::LapinSession;
use crate::transport::{Session, Transport, TransportError};
use anyhow::Context;
use lapin::{
    tcp::{AMQPUriTcpExt, NativeTlsConnector},
    uri::{AMQPScheme, AMQPUri},
    ConnectionProperties,
};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::warn;

#[derive(Clone)]
/// All the information required to open sessions with an AMQP broker, for one [`Driver`].
pub struct ConnectionFactory {
    driver: Driver,
    uri: AMQPUri,
    /// The timeout observed when trying to connect to the broker.
    connection_timeout: std::time::Duration,
    /// Only set for [`Driver::Tls`].
    tls: Option<Arc<Tls>>,
}

struct Tls {
    connector: NativeTlsConnector,
    domain_name: String,
}

impl ConnectionFactory {
    /// Create a new connection factory from settings.
    ///
    /// A connection timeout can be (optionally) specified in `settings`.
    /// If the connection timeout is left unspecified, it will be defaulted to 10 seconds.
    pub fn new_from_config(settings: &ClientSettings) -> Result<Self, anyhow::Error> {
        let uri = settings.auth.amqp_uri();
        let tls = match settings.driver {
            Driver::Tls => {
                let tls_settings = settings.tls.clone().unwrap_or_default();
                let domain_name = tls_settings
                    .domain
                    .clone()
                    .unwrap_or_else(|| uri.authority.host.clone());

                let mut connector_builder = NativeTlsConnector::builder();
                if let Some(certificate) = tls_settings.ca_certificate_chain()? {
                    connector_builder.add_root_certificate(certificate);
                }
                let connector = connector_builder
                    .build()
                    .context("TLS configuration failed")?;
                Some(Arc::new(Tls {
                    connector,
                    domain_name,
                }))
            }
            Driver::Stream | Driver::Socket => None,
        };
        let connection_timeout = settings
            .auth
            .connection_timeout()
            .unwrap_or_else(|| std::time::Duration::from_secs(10));
        Ok(Self {
            driver: settings.driver,
            uri,
            connection_timeout,
            tls,
        })
    }

    /// Replaces the TLS Connector, switching the factory to [`Driver::Tls`].
    pub fn set_tls_connector(&mut self, connector: NativeTlsConnector) {
        self.set_tls_connector_with_domain(connector, self.uri.authority.host.clone());
    }

    /// Replaces the TLS Connector, along with the expected domain name for the certificate.
    pub fn set_tls_connector_with_domain(
        &mut self,
        connector: NativeTlsConnector,
        domain_name: String,
    ) {
        self.driver = Driver::Tls;
        self.tls = Some(Arc::new(Tls {
            connector,
            domain_name,
        }));
    }

    /// Create a new connection to the broker, using the configured driver.
    #[tracing::instrument(name = "amqp_connect", skip(self), fields(driver = %self.driver))]
    pub async fn new_connection(&self) -> Result<lapin::Connection, anyhow::Error> {
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let connection = timeout(self.connection_timeout, async {
            match (self.driver, &self.tls) {
                (Driver::Tls, Some(tls)) => self.connect_with_tls(properties, Arc::clone(tls)).await,
                (Driver::Socket, _) => self.connect_socket(properties).await,
                _ => self.connect_stream(properties).await,
            }
        })
        .await
        .context("Timed out while connecting to the AMQP broker")??;
        // Register a callback to log connection errors.
        connection.on_error(|e| {
            warn!("AMQP broken connection: {:?}", e);
        });
        Ok(connection)
    }

    /// Let lapin resolve and dial the uri.
    async fn connect_stream(
        &self,
        properties: ConnectionProperties,
    ) -> Result<lapin::Connection, lapin::Error> {
        lapin::Connection::connect_uri(self.uri.clone(), properties).await
    }

    /// Dial the plain TCP socket before handing it over to lapin.
    async fn connect_socket(
        &self,
        properties: ConnectionProperties,
    ) -> Result<lapin::Connection, lapin::Error> {
        lapin::Connection::connector(
            self.uri.clone(),
            Box::new(|uri| {
                let mut amqp_uri = uri.clone();
                amqp_uri.scheme = AMQPScheme::AMQP;
                amqp_uri.connect()
            }),
            properties,
        )
        .await
    }

    /// Establish a new TLS connection.
    async fn connect_with_tls(
        &self,
        properties: ConnectionProperties,
        tls_configuration: Arc<Tls>,
    ) -> Result<lapin::Connection, lapin::Error> {
        lapin::Connection::connector(
            self.uri.clone(),
            Box::new(move |uri| {
                // First establish a plain TCP connection using the AMQP protocol
                let mut amqp_uri = uri.clone();
                amqp_uri.scheme = AMQPScheme::AMQP;
                amqp_uri
                    .connect()
                    // Then perform a TLS handshake with custom settings
                    // including customisation of the expected domain for the server certificate
                    .and_then(|tcp| {
                        tcp.into_native_tls(
                            &tls_configuration.connector,
                            &tls_configuration.domain_name,
                        )
                    })
            }),
            properties,
        )
        .await
    }
}

#[async_trait::async_trait]
impl Transport for ConnectionFactory {
    fn driver(&self) -> Driver {
        self.driver
    }

    async fn open_session(&self) -> Result<Box<dyn Session>, TransportError> {
        let connection = self
            .new_connection()
            .await
            .map_err(TransportError::Connect)?;
        Ok(Box::new(LapinSession::new(connection)))
    }
}
