//! [`lapin`] implementations of the transport traits.
use crate::topology::{ConsumeConfig, ExchangeConfig, ExchangeKind, QueueConfig, RouteConfig};
use crate::transport::{BrokerChannel, Delivery, Session, Subscription, TransportError};
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions,
        BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, ChannelState, ConnectionState,
};

/// Reply code sent to the broker when we close a channel or a connection on purpose.
const REPLY_SUCCESS: u16 = 200;

pub(crate) struct LapinSession {
    connection: lapin::Connection,
}

impl LapinSession {
    pub(crate) fn new(connection: lapin::Connection) -> Self {
        Self { connection }
    }
}

#[async_trait::async_trait]
impl Session for LapinSession {
    async fn open_channel(
        &self,
        channel_id: Option<u16>,
    ) -> Result<Box<dyn BrokerChannel>, TransportError> {
        let channel = self.connection.create_channel().await?;
        if let Some(requested) = channel_id.filter(|id| *id != channel.id()) {
            // lapin allocates channel ids itself.
            tracing::debug!(
                requested,
                allocated = channel.id(),
                "Channel id hint ignored by the transport"
            );
        }
        Ok(Box::new(LapinChannel { channel }))
    }

    fn is_open(&self) -> bool {
        matches!(self.connection.status().state(), ConnectionState::Connected)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connection.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }
}

pub(crate) struct LapinChannel {
    channel: lapin::Channel,
}

#[async_trait::async_trait]
impl BrokerChannel for LapinChannel {
    fn id(&self) -> u16 {
        self.channel.id()
    }

    fn is_open(&self) -> bool {
        matches!(self.channel.status().state(), ChannelState::Connected)
    }

    async fn declare_queue(&self, queue: &QueueConfig) -> Result<(), TransportError> {
        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    passive: queue.passive,
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    nowait: queue.nowait,
                },
                queue.arguments.clone(),
            )
            .await?;
        Ok(())
    }

    async fn declare_exchange(
        &self,
        exchange: &ExchangeConfig,
        kind: ExchangeKind,
    ) -> Result<(), TransportError> {
        self.channel
            .exchange_declare(
                &exchange.name,
                kind.into(),
                ExchangeDeclareOptions {
                    passive: exchange.passive,
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    internal: exchange.internal,
                    nowait: exchange.nowait,
                },
                exchange.arguments.clone(),
            )
            .await?;
        Ok(())
    }

    async fn bind(
        &self,
        queue: &str,
        exchange: &str,
        route: &RouteConfig,
    ) -> Result<(), TransportError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                &route.key,
                QueueBindOptions {
                    nowait: route.nowait,
                },
                route.arguments.clone(),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<(), TransportError> {
        // The returned confirmation is dropped: we do not wait for the broker to acknowledge.
        let _confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?;
        Ok(())
    }

    async fn get(&self, queue: &str, no_ack: bool) -> Result<Option<Delivery>, TransportError> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack })
            .await?;
        Ok(message.map(|m| m.delivery.into()))
    }

    async fn consume(
        &self,
        queue: &str,
        consume: &ConsumeConfig,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consume.consumer_tag,
                BasicConsumeOptions {
                    no_local: consume.no_local,
                    no_ack: consume.no_ack,
                    exclusive: consume.exclusive,
                    nowait: consume.nowait,
                },
                FieldTable::default(),
            )
            .await?;
        Ok(Box::new(LapinSubscription {
            consumer_tag: consumer.tag().as_str().to_owned(),
            consumer,
        }))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await?;
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.channel.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }
}

struct LapinSubscription {
    consumer_tag: String,
    consumer: lapin::Consumer,
}

#[async_trait::async_trait]
impl Subscription for LapinSubscription {
    fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    async fn wait(&mut self) -> Option<Result<Delivery, TransportError>> {
        self.consumer
            .next()
            .await
            .map(|event| event.map(Delivery::from).map_err(TransportError::from))
    }
}
