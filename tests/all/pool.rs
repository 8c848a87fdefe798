use crate::helpers::{topology, Call, MemoryBroker};
use amqp_pool::connection::ConnectionState;
use amqp_pool::pool::{ConnectionPoolExt, PoolConfig, PoolRegistry, PooledConnectionExt};
use amqp_pool::Error;
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn acquiring_a_connection_does_not_open_a_session() {
    let broker = MemoryBroker::new();
    let pool = broker.pool(topology(), 2);

    let connection = pool.get_connection().await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Idle);
    assert!(broker.calls().is_empty());
    let status = pool.status();
    assert_eq!(status.max_size, 2);
    assert_eq!(status.size, 1);
    assert_eq!(status.available, 0);
}

#[tokio::test]
async fn concurrent_holders_get_distinct_connections() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = broker.pool(topology(), 3);

    // Act
    let (a, b, c) = tokio::join!(
        pool.get_connection(),
        pool.get_connection(),
        pool.get_connection()
    );
    let mut connections = vec![a.unwrap(), b.unwrap(), c.unwrap()];
    for connection in connections.iter_mut() {
        connection.establish(None, None, None, None).await.unwrap();
    }

    // Assert
    assert_eq!(broker.count(|c| matches!(c, Call::OpenSession)), 3);
    assert_eq!(broker.live_sessions(), 3);
    assert_eq!(pool.status().size, 3);
    assert_eq!(pool.status().available, 0);
}

#[tokio::test]
async fn an_exhausted_pool_fails_straight_away_with_a_zero_wait_timeout() {
    let broker = MemoryBroker::new();
    let pool = broker
        .manager(topology())
        .max_connections(1)
        .wait_timeout(Some(Duration::ZERO))
        .into_pool()
        .unwrap();
    let _held = pool.get_connection().await.unwrap();

    let error = pool.get_connection().await.err().unwrap();

    assert!(matches!(error, Error::PoolExhausted { .. }), "{error:?}");
    assert!(!error.is_fatal_to_slot());
}

#[tokio::test]
async fn an_exhausted_pool_fails_once_the_wait_timeout_expires() {
    let broker = MemoryBroker::new();
    let pool = broker
        .manager(topology())
        .config(&PoolConfig {
            max_size: 2,
            wait_timeout_ms: Some(50),
            max_idle_time_seconds: None,
        })
        .into_pool()
        .unwrap();
    let _first = pool.get_connection().await.unwrap();
    let _second = pool.get_connection().await.unwrap();

    let error = pool.get_connection().await.err().unwrap();

    match error {
        Error::PoolExhausted { waited } => assert!(waited >= Duration::from_millis(50)),
        e => panic!("Unexpected error: {e:?}"),
    }
}

#[tokio::test]
async fn an_exhausted_pool_waits_for_a_release() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = broker.pool(topology(), 1);
    let mut held = pool.get_connection().await.unwrap();
    held.establish(None, None, None, None).await.unwrap();

    // Act
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get_connection().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());
    pool.release(held);

    // Assert
    let connection = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("The waiter was not woken up")
        .unwrap()
        .unwrap();
    // The same connection, still established.
    assert_eq!(connection.state(), ConnectionState::Established);
    assert_eq!(pool.status().size, 1);
}

#[tokio::test]
async fn released_connections_are_reused() {
    let broker = MemoryBroker::new();
    let pool = broker.pool(topology(), 4);

    let mut connection = pool.get_connection().await.unwrap();
    connection.ensure_established().await.unwrap();
    pool.release(connection);
    let mut connection = pool.get_connection().await.unwrap();
    connection.ensure_established().await.unwrap();

    assert_eq!(broker.count(|c| matches!(c, Call::OpenSession)), 1);
    assert_eq!(broker.count(|c| matches!(c, Call::DeclareQueue(_))), 1);
    assert_eq!(pool.status().size, 1);
}

#[tokio::test]
async fn release_does_not_check_the_health_of_the_connection() {
    let broker = MemoryBroker::new();
    broker.refuse_sessions(true);
    let pool = broker.pool(topology(), 1);

    let mut connection = pool.get_connection().await.unwrap();
    assert!(!connection.reconnect().await);
    pool.release(connection);

    assert_eq!(pool.status().available, 1);
    let connection = pool.get_connection().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Broken);
}

#[tokio::test]
async fn a_discarded_connection_is_closed_and_frees_its_slot() {
    let broker = MemoryBroker::new();
    let pool = broker.pool(topology(), 1);
    let mut connection = pool.get_connection().await.unwrap();
    connection.establish(None, None, None, None).await.unwrap();

    assert!(connection.discard().await.unwrap());

    assert_eq!(broker.live_sessions(), 0);
    assert_eq!(pool.status().size, 0);
    let connection = pool.get_connection().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn close_only_counts_established_connections_and_is_idempotent() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = broker.pool(topology(), 3);
    let mut first = pool.get_connection().await.unwrap();
    let mut second = pool.get_connection().await.unwrap();
    let never_established = pool.get_connection().await.unwrap();
    first.establish(None, None, None, None).await.unwrap();
    second.establish(None, None, None, None).await.unwrap();
    pool.release(first);
    pool.release(second);
    pool.release(never_established);

    // Act
    let closed = pool.close_connections().await;
    let closed_again = pool.close_connections().await;

    // Assert
    assert_eq!(closed, 2);
    assert_eq!(closed_again, 0);
    assert_eq!(broker.live_sessions(), 0);
    assert_eq!(pool.status().available, 3);
}

#[tokio::test]
async fn close_leaves_checked_out_connections_alone() {
    let broker = MemoryBroker::new();
    let pool = broker.pool(topology(), 2);
    let mut held = pool.get_connection().await.unwrap();
    held.establish(None, None, None, None).await.unwrap();

    assert_eq!(pool.close_connections().await, 0);
    assert!(held.is_live());
}

#[tokio::test]
async fn closed_connections_reconnect_on_their_next_use() {
    let broker = MemoryBroker::new();
    let pool = broker.pool(topology(), 1);
    let mut connection = pool.get_connection().await.unwrap();
    connection.ensure_established().await.unwrap();
    pool.release(connection);
    pool.close_connections().await;

    let mut connection = pool.get_connection().await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Closed);
    connection.ensure_established().await.unwrap();

    assert_eq!(broker.count(|c| matches!(c, Call::OpenSession)), 2);
    assert_eq!(broker.live_sessions(), 1);
}

#[tokio::test]
async fn idle_connections_are_reaped_on_acquire() {
    let broker = MemoryBroker::new();
    let pool = broker
        .manager(topology())
        .max_connections(2)
        .max_idle_time(Some(Duration::ZERO))
        .into_pool()
        .unwrap();
    let mut connection = pool.get_connection().await.unwrap();
    connection.ensure_established().await.unwrap();
    pool.release(connection);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let connection = pool.get_connection().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(connection.state(), ConnectionState::Idle);
    assert!(broker.calls().contains(&Call::CloseSession));
    assert_eq!(broker.live_sessions(), 0);
    assert_eq!(pool.status().size, 1);
}

#[tokio::test]
async fn sub_second_idle_times_are_not_rounded_down() {
    let broker = MemoryBroker::new();
    let pool = broker
        .manager(topology())
        .max_connections(1)
        .max_idle_time(Some(Duration::from_millis(900)))
        .into_pool()
        .unwrap();
    let mut connection = pool.get_connection().await.unwrap();
    connection.ensure_established().await.unwrap();
    pool.release(connection);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let connection = pool.get_connection().await.unwrap();

    assert_eq!(connection.state(), ConnectionState::Established);
    assert!(!broker.calls().contains(&Call::CloseSession));
    assert_eq!(broker.live_sessions(), 1);
}

#[tokio::test]
async fn sub_millisecond_wait_timeouts_still_wait() {
    let broker = MemoryBroker::new();
    let pool = broker
        .manager(topology())
        .max_connections(1)
        .wait_timeout(Some(Duration::from_micros(900)))
        .into_pool()
        .unwrap();
    let _held = pool.get_connection().await.unwrap();

    let error = pool.get_connection().await.err().unwrap();

    match error {
        Error::PoolExhausted { waited } => assert!(waited >= Duration::from_micros(900)),
        e => panic!("Unexpected error: {e:?}"),
    }
}

#[tokio::test]
async fn a_reaped_connection_is_closed_even_if_the_acquire_is_dropped() {
    // Arrange
    let broker = MemoryBroker::new();
    let pool = broker
        .manager(topology())
        .max_connections(1)
        .max_idle_time(Some(Duration::ZERO))
        .into_pool()
        .unwrap();
    let mut connection = pool.get_connection().await.unwrap();
    connection.ensure_established().await.unwrap();
    pool.release(connection);
    broker.delay_closes(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Act
    drop(pool.get_connection().now_or_never());
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Assert
    assert_eq!(broker.count(|c| matches!(c, Call::CloseSession)), 1);
    assert_eq!(broker.live_sessions(), 0);
    assert_eq!(pool.status().size, 1);
}

#[tokio::test]
async fn the_registry_closes_every_registered_pool() {
    // Arrange
    let broker = MemoryBroker::new();
    let orders = broker.pool(topology(), 2);
    let audit = broker.pool(topology(), 2);
    for pool in [&orders, &audit] {
        let mut connection = pool.get_connection().await.unwrap();
        connection.ensure_established().await.unwrap();
    }
    let registry = PoolRegistry::default();
    registry.register("orders", &orders);
    registry.register("audit", &audit);

    // Act
    let closed = registry.close_all("worker_stopping").await;

    // Assert
    assert_eq!(closed, 2);
    assert_eq!(broker.live_sessions(), 0);
    assert_eq!(registry.names(), vec!["orders", "audit"]);
}

#[tokio::test]
async fn unregistering_while_closing_all_pools_is_not_undone() {
    // Arrange
    let broker = MemoryBroker::new();
    let orders = broker.pool(topology(), 1);
    let audit = broker.pool(topology(), 1);
    for pool in [&orders, &audit] {
        let mut connection = pool.get_connection().await.unwrap();
        connection.ensure_established().await.unwrap();
    }
    broker.delay_closes(Duration::from_millis(50));
    let registry = Arc::new(PoolRegistry::default());
    registry.register("orders", &orders);
    registry.register("audit", &audit);

    // Act
    let closing = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.close_all("worker_stopping").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let unregistered = registry.unregister("audit");
    let closed = closing.await.unwrap();

    // Assert
    assert!(unregistered);
    assert_eq!(closed, 2);
    assert_eq!(registry.names(), vec!["orders"]);
}

#[tokio::test]
async fn registering_a_name_twice_replaces_the_pool() {
    let broker = MemoryBroker::new();
    let first = broker.pool(topology(), 10);
    let second = broker.pool(topology(), 10);
    let mut connection = first.get_connection().await.unwrap();
    connection.ensure_established().await.unwrap();
    drop(connection);

    let registry = PoolRegistry::default();
    registry.register("default", &first);
    registry.register("default", &second);

    assert_eq!(registry.names(), vec!["default"]);
    assert_eq!(registry.close_all("worker_stopping").await, 0);
    assert!(registry.unregister("default"));
    assert!(!registry.unregister("default"));
}

#[tokio::test]
async fn the_registry_closes_pools_once_shutdown_completes() {
    let broker = MemoryBroker::new();
    let pool = broker.pool(topology(), 10);
    let mut connection = pool.get_connection().await.unwrap();
    connection.ensure_established().await.unwrap();
    drop(connection);
    let registry = PoolRegistry::default();
    registry.register("default", &pool);
    let (trigger, shutdown) = tokio::sync::oneshot::channel::<()>();

    let closing = registry.close_all_on_shutdown(
        async {
            let _ = shutdown.await;
        },
        "shutdown",
    );
    tokio::pin!(closing);
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut closing)
        .await
        .is_err());
    assert_eq!(broker.live_sessions(), 1);

    trigger.send(()).unwrap();
    assert_eq!(closing.await, 1);
    assert_eq!(broker.live_sessions(), 0);
}
