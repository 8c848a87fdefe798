use amqp_pool::amqp::configuration::ClientSettings;
use amqp_pool::amqp::BasicProperties;
use amqp_pool::connection::Client;
use amqp_pool::facade::Amqp;
use amqp_pool::pool::{ConnectionManager, PoolRegistry};
use amqp_pool::transport::Delivery;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // We are using the out-of-the-box parameters for the default RabbitMq Docker image:
    // a durable direct exchange named `exchange`, bound to a durable queue named `queue`
    // with an empty routing key.
    let settings = ClientSettings::default();
    let client = Client::new_from_config(&settings)?;

    // Connections are opened lazily, the first time they are used.
    // At most 4 of them will be checked out at any point in time.
    let pool = ConnectionManager::new(client)
        .max_connections(4)
        .into_pool()?;

    // The registry is what we close on shutdown.
    let registry = PoolRegistry::default();
    registry.register("default", &pool);

    // `Amqp` gets a connection from the pool, declares the topology the first time the
    // connection is used, runs the operation and gives the connection back.
    let amqp = Amqp::new(pool.clone());
    let route_key = settings.route.key.as_str();
    for body in ["hello", "world"] {
        amqp.push(body.as_bytes(), BasicProperties::default(), route_key)
            .await?;
    }
    if let Some(body) = amqp.pop().await? {
        println!("Popped {}", String::from_utf8_lossy(&body));
    }

    // A consume loop runs until one of the cancellation sentinels is received -
    // `exit` and `quit` by default.
    amqp.push(b"exit", BasicProperties::default(), route_key)
        .await?;
    let handler = |delivery: Delivery| async move {
        println!(
            "Consumed {} (delivery tag {})",
            String::from_utf8_lossy(&delivery.body),
            delivery.delivery_tag
        );
        Ok::<_, anyhow::Error>(())
    };
    amqp.consume(Some(&handler), None).await?;

    let closed = registry.close_all("demo_completed").await;
    println!("Closed {closed} connections");
    Ok(())
}
