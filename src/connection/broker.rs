use crate::amqp::configuration::Driver;
use crate::connection::{Client, ConnectionState, DeliveryHandler};
use crate::topology::{ConsumeConfig, ExchangeConfig, ExchangeKind, QueueConfig, RouteConfig};
use crate::transport::{BrokerChannel, Session, TransportError};
use crate::Error;
use lapin::BasicProperties;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A connection to the broker, owning exactly one transport session and one channel.
///
/// A `BrokerConnection` starts [`Idle`](ConnectionState::Idle): nothing is opened until
/// [`establish`](Self::establish) (or [`create`](Self::create)) is called. Once established,
/// the names of the declared exchange and queue are cached and used by [`push`](Self::push),
/// [`pop`](Self::pop) and [`consume`](Self::consume).
///
/// # Concurrency
///
/// A connection is meant to be used by one task at a time - every operation takes `&mut self`.
/// Sharing across tasks goes through a [`ConnectionPool`](crate::pool::ConnectionPool).
pub struct BrokerConnection {
    client: Arc<Client>,
    session: Option<Box<dyn Session>>,
    channel: Option<Box<dyn BrokerChannel>>,
    /// Name of the exchange declared on the current session.
    exchange: Option<String>,
    /// Name of the queue declared on the current session.
    queue: Option<String>,
    state: ConnectionState,
    last_used: Instant,
}

impl BrokerConnection {
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            session: None,
            channel: None,
            exchange: None,
            queue: None,
            state: ConnectionState::Idle,
            last_used: Instant::now(),
        }
    }

    /// The client this connection was created from.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn driver(&self) -> Driver {
        self.client.driver()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The exchange declared by the last successful [`establish`](Self::establish).
    pub fn exchange_name(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    /// The queue declared by the last successful [`establish`](Self::establish).
    pub fn queue_name(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Time elapsed since the connection was created or last completed an operation.
    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Whether the connection holds an open transport session.
    pub fn is_live(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.is_open())
    }

    /// Open a fresh transport session, tearing down the previous one if any.
    ///
    /// Can be called again after [`close`](Self::close) or after a failure.
    #[tracing::instrument(name = "amqp_create", skip(self), fields(driver = %self.driver()))]
    pub async fn create(&mut self) -> Result<(), Error> {
        if let Err(e) = self.teardown().await {
            debug!("Failed to tear down the previous AMQP session: {}", e);
        }
        self.state = ConnectionState::Creating;
        match self.client.transport().open_session().await {
            Ok(session) => {
                self.session = Some(session);
                self.state = ConnectionState::Open;
                self.last_used = Instant::now();
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Broken;
                Err(Error::Transport {
                    driver: self.driver(),
                    source: e.into(),
                })
            }
        }
    }

    /// Call [`create`](Self::create), turning any failure into `false`.
    ///
    /// The failure is logged. A connection that failed to reconnect can try again later.
    pub async fn reconnect(&mut self) -> bool {
        match self.create().await {
            Ok(()) => true,
            Err(e) => {
                error!("AMQP reconnect error: {:?}", e);
                false
            }
        }
    }

    /// Close the channel and the transport session.
    ///
    /// Returns `false` if there was no live session to close, e.g. the connection was never
    /// established.
    #[tracing::instrument(name = "amqp_close", skip(self), fields(driver = %self.driver()))]
    pub async fn close(&mut self) -> Result<bool, Error> {
        let result = self.teardown().await;
        self.state = match (&result, self.state) {
            (Err(_), _) => ConnectionState::Broken,
            (Ok(_), ConnectionState::Idle) => ConnectionState::Idle,
            (Ok(_), _) => ConnectionState::Closed,
        };
        result
    }

    /// Open a channel on the current session, or reuse the current one if it is open and
    /// carries `channel_id`.
    pub async fn channel(&mut self, channel_id: Option<u16>) -> Result<&dyn BrokerChannel, Error> {
        self.open_channel(channel_id).await?;
        live_channel(&self.channel, self.driver(), "channel")
    }

    /// Declare the queue, then the exchange, then bind them together.
    ///
    /// Each descriptor falls back to the one configured on the [`Client`] when `None`.
    /// A transport session is opened first if the connection is not live.
    ///
    /// Incomplete descriptors are rejected with [`Error::Configuration`] before any call is made
    /// to the broker. Broker failures are not retried.
    #[tracing::instrument(
        name = "amqp_establish",
        skip(self, route, queue, exchange),
        fields(driver = %self.driver())
    )]
    pub async fn establish(
        &mut self,
        channel_id: Option<u16>,
        route: Option<&RouteConfig>,
        queue: Option<&QueueConfig>,
        exchange: Option<&ExchangeConfig>,
    ) -> Result<&dyn BrokerChannel, Error> {
        let driver = self.driver();
        let client = Arc::clone(&self.client);
        let topology = client.topology();
        let route = route.unwrap_or(&topology.route);
        let queue = queue.unwrap_or(&topology.queue);
        let exchange = exchange.unwrap_or(&topology.exchange);

        queue
            .validate()
            .map_err(|message| Error::Configuration { driver, message })?;
        let kind = exchange
            .validate()
            .map_err(|message| Error::Configuration { driver, message })?;

        if !self.is_live() {
            self.create().await?;
        }
        if let Err(e) = self.open_channel(channel_id).await {
            self.state = ConnectionState::Broken;
            return Err(e);
        }

        let declared = match self.channel.as_deref() {
            Some(channel) => declare_topology(channel, driver, queue, exchange, kind, route).await,
            None => Err(not_established(driver, "establish")),
        };
        if let Err(e) = declared {
            self.state = ConnectionState::Broken;
            return Err(e);
        }

        self.queue = Some(queue.name.clone());
        self.exchange = Some(exchange.name.clone());
        self.state = ConnectionState::Established;
        self.last_used = Instant::now();
        live_channel(&self.channel, driver, "establish")
    }

    /// [`establish`](Self::establish) with the client topology, unless the connection is
    /// already established on an open channel.
    pub async fn ensure_established(&mut self) -> Result<(), Error> {
        let ready = self.state == ConnectionState::Established
            && self.is_live()
            && self.channel.as_ref().map_or(false, |c| c.is_open());
        if !ready {
            self.establish(None, None, None, None).await?;
        }
        Ok(())
    }

    /// Publish `body` to the established exchange with `route_key`.
    ///
    /// A `message_id` and a `timestamp` are added to `properties` when missing.
    /// The broker does not confirm the publication.
    #[tracing::instrument(
        name = "amqp_push",
        skip(self, body, properties),
        fields(driver = %self.driver())
    )]
    pub async fn push(
        &mut self,
        body: &[u8],
        properties: BasicProperties,
        route_key: &str,
    ) -> Result<(), Error> {
        let driver = self.driver();
        let exchange = self
            .exchange
            .as_deref()
            .ok_or_else(|| not_established(driver, "push"))?;
        let channel = live_channel(&self.channel, driver, "push")?;

        self.state = ConnectionState::Operating;
        let result = channel
            .publish(exchange, route_key, body, inject_amqp_properties(properties))
            .await
            .map_err(|e| channel_error(driver, "push", e));
        self.state = state_after(&result);
        self.last_used = Instant::now();
        result
    }

    /// Fetch one message from the established queue, acknowledged on delivery.
    ///
    /// Returns `None` straight away if the queue is empty.
    #[tracing::instrument(name = "amqp_pop", skip(self), fields(driver = %self.driver()))]
    pub async fn pop(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let driver = self.driver();
        let queue = self
            .queue
            .as_deref()
            .ok_or_else(|| not_established(driver, "pop"))?;
        let channel = live_channel(&self.channel, driver, "pop")?;

        self.state = ConnectionState::Operating;
        let result = channel
            .get(queue, true)
            .await
            .map(|delivery| delivery.map(|d| d.body))
            .map_err(|e| channel_error(driver, "pop", e));
        self.state = state_after(&result);
        self.last_used = Instant::now();
        result
    }

    /// Subscribe to the established queue and process deliveries until the subscription ends.
    ///
    /// `consume` falls back to the consume descriptor of the [`Client`] when `None`.
    ///
    /// For every delivery, in order:
    /// 1. the body is compared with the cancellation sentinels;
    /// 2. the delivery is acknowledged (unless the subscription is in `no_ack` mode, where the
    ///    broker already considers it acknowledged);
    /// 3. on a sentinel, the subscription is cancelled;
    /// 4. `handler`, if any, is invoked with the delivery.
    ///
    /// Acknowledging before invoking the handler means a crash while handling loses the
    /// message, while a slow handler never causes redeliveries. A failing handler is logged and
    /// does not stop the loop.
    ///
    /// This call only returns once the subscription is cancelled, through a sentinel or by the
    /// broker, or when the channel is closed from the outside. Run it on a dedicated task.
    #[tracing::instrument(name = "amqp_consume", skip_all, fields(driver = %self.driver()))]
    pub async fn consume(
        &mut self,
        handler: Option<&dyn DeliveryHandler>,
        consume: Option<&ConsumeConfig>,
    ) -> Result<(), Error> {
        let driver = self.driver();
        let client = Arc::clone(&self.client);
        let consume = consume.unwrap_or(&client.topology().consume);
        let queue = self
            .queue
            .as_deref()
            .ok_or_else(|| not_established(driver, "consume"))?;
        let channel = live_channel(&self.channel, driver, "consume")?;

        self.state = ConnectionState::Operating;
        let result = consume_loop(channel, driver, queue, consume, handler).await;
        self.state = state_after(&result);
        self.last_used = Instant::now();
        result
    }

    /// Tear down the channel and the session, if any.
    ///
    /// Returns whether the session was live. Handles are dropped even when closing fails.
    async fn teardown(&mut self) -> Result<bool, Error> {
        let driver = self.driver();
        self.exchange = None;
        self.queue = None;
        let channel = self.channel.take();
        let session = self.session.take();
        let was_live = session.as_ref().map_or(false, |s| s.is_open());

        let mut outcome = Ok(was_live);
        if let Some(channel) = channel.filter(|c| c.is_open()) {
            if let Err(e) = channel.close().await {
                outcome = Err(channel_error(driver, "close", e));
            }
        }
        if let Some(session) = session.filter(|s| s.is_open()) {
            if let Err(e) = session.close().await {
                if outcome.is_ok() {
                    outcome = Err(channel_error(driver, "close", e));
                }
            }
        }
        outcome
    }

    async fn open_channel(&mut self, channel_id: Option<u16>) -> Result<(), Error> {
        let driver = self.driver();
        let reusable = match (&self.channel, channel_id) {
            (Some(channel), Some(id)) => channel.id() == id && channel.is_open(),
            _ => false,
        };
        if reusable {
            return Ok(());
        }

        let session = self
            .session
            .as_deref()
            .ok_or_else(|| not_established(driver, "open_channel"))?;
        let channel = session
            .open_channel(channel_id)
            .await
            .map_err(|e| channel_error(driver, "open_channel", e))?;
        if let Some(previous) = self.channel.replace(channel) {
            if previous.is_open() {
                if let Err(e) = previous.close().await {
                    debug!("Failed to close the previous AMQP channel: {}", e);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("driver", &self.driver())
            .field("state", &self.state)
            .field("exchange", &self.exchange)
            .field("queue", &self.queue)
            .finish()
    }
}

async fn declare_topology(
    channel: &dyn BrokerChannel,
    driver: Driver,
    queue: &QueueConfig,
    exchange: &ExchangeConfig,
    kind: ExchangeKind,
    route: &RouteConfig,
) -> Result<(), Error> {
    channel
        .declare_queue(queue)
        .await
        .map_err(|e| channel_error(driver, "declare_queue", e))?;
    channel
        .declare_exchange(exchange, kind)
        .await
        .map_err(|e| channel_error(driver, "declare_exchange", e))?;
    channel
        .bind(&queue.name, &exchange.name, route)
        .await
        .map_err(|e| channel_error(driver, "bind", e))?;
    debug!(
        queue = %queue.name,
        exchange = %exchange.name,
        routing_key = %route.key,
        "AMQP topology declared"
    );
    Ok(())
}

async fn consume_loop(
    channel: &dyn BrokerChannel,
    driver: Driver,
    queue: &str,
    consume: &ConsumeConfig,
    handler: Option<&dyn DeliveryHandler>,
) -> Result<(), Error> {
    let mut subscription = channel
        .consume(queue, consume)
        .await
        .map_err(|e| channel_error(driver, "consume", e))?;
    let consumer_tag = subscription.consumer_tag().to_owned();
    info!(queue, consumer_tag = %consumer_tag, "AMQP subscription started");

    while let Some(event) = subscription.wait().await {
        let delivery = event.map_err(|e| channel_error(driver, "consume", e))?;
        let cancel = consume.cancel_tag.matches(&delivery.body);

        if !consume.no_ack {
            channel
                .ack(delivery.delivery_tag)
                .await
                .map_err(|e| channel_error(driver, "ack", e))?;
        }
        if cancel {
            channel
                .cancel(&consumer_tag)
                .await
                .map_err(|e| channel_error(driver, "cancel", e))?;
        }
        if let Some(handler) = handler {
            let delivery_tag = delivery.delivery_tag;
            if let Err(e) = handler.handle(delivery).await {
                warn!(delivery_tag, "AMQP delivery handler failed: {:?}", e);
            }
        }
        if cancel {
            break;
        }
    }

    info!(queue, consumer_tag = %consumer_tag, "AMQP subscription ended");
    Ok(())
}

fn live_channel<'a>(
    channel: &'a Option<Box<dyn BrokerChannel>>,
    driver: Driver,
    operation: &'static str,
) -> Result<&'a dyn BrokerChannel, Error> {
    match channel.as_deref() {
        Some(channel) if channel.is_open() => Ok(channel),
        Some(_) => Err(Error::ConnectionClosed {
            driver,
            operation,
            reason: "the channel is closed".into(),
        }),
        None => Err(not_established(driver, operation)),
    }
}

fn not_established(driver: Driver, operation: &'static str) -> Error {
    Error::ConnectionClosed {
        driver,
        operation,
        reason: "the connection is not established".into(),
    }
}

fn channel_error(driver: Driver, operation: &'static str, error: TransportError) -> Error {
    match error {
        TransportError::Closed(reason) => Error::ConnectionClosed {
            driver,
            operation,
            reason,
        },
        TransportError::Protocol(source) => Error::BrokerProtocol {
            driver,
            operation,
            source,
        },
        TransportError::Connect(source) => Error::Transport { driver, source },
    }
}

fn state_after<T>(result: &Result<T, Error>) -> ConnectionState {
    match result {
        Err(e) if e.is_fatal_to_slot() => ConnectionState::Broken,
        _ => ConnectionState::Established,
    }
}

fn inject_amqp_properties(properties: BasicProperties) -> BasicProperties {
    let current_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|ct| ct.as_secs());

    let properties = if let Some(ct) = current_timestamp {
        let ts = *properties.timestamp();
        properties.with_timestamp(ts.unwrap_or(ct))
    } else {
        warn!("System time is before 1970");
        properties
    };

    let message_id = properties.message_id().clone();
    properties.with_message_id(message_id.unwrap_or_else(|| Uuid::new_v4().to_string().into()))
}
