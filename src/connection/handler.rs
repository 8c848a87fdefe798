//! Callbacks invoked by [`BrokerConnection::consume`](crate::connection::BrokerConnection::consume).
use crate::transport::Delivery;
use std::future::Future;

/// Implementers of `DeliveryHandler` receive every message delivered to a consume loop.
///
/// # Scope
///
/// `handle` does not get access to the underlying channel.
/// By the time it runs, the message has already been acknowledged with the broker: a failing
/// handler is logged and the loop moves on to the next delivery, the message is not redelivered.
///
/// # Implementers
///
/// Most of the time you will rely on the implementation for async closures with a matching
/// signature - `Fn(Delivery) -> Fut`.
#[async_trait::async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl<F, Fut> DeliveryHandler for F
where
    F: Fn(Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), anyhow::Error>> + Send,
{
    async fn handle(&self, delivery: Delivery) -> Result<(), anyhow::Error> {
        (self)(delivery).await
    }
}
