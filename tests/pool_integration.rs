//! Integration tests for the pooled acquire/release lifecycle.
//!
//! These exercise the public acquire/release surface end to end against real
//! loopback listeners: reuse across cycles, backpressure, pooling bypass,
//! forced teardown, and coordinated draining.

use relaypool::client::ClientManager;
use relaypool::config::PoolSettings;
use relaypool::pool::{Destination, PoolError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::time::sleep;

/// Accepts connections and reads until each peer hangs up, so teardown's
/// QUIT + half-close sequence completes cleanly.
async fn sink_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                while matches!(sock.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

fn settings(max: usize, pool_timeout: u64) -> PoolSettings {
    PoolSettings {
        connect_timeout: 5,
        pool_timeout,
        pool_concurrency_max: max,
    }
}

fn dest_for(addr: SocketAddr) -> Destination {
    Destination::tcp(addr.ip().to_string(), addr.port())
}

#[tokio::test]
async fn sequential_cycles_reuse_the_same_connection() {
    let addr = sink_server().await;
    let manager = ClientManager::new(settings(4, 50));
    let dest = dest_for(addr);

    let first = manager.get_client(&dest).await.unwrap();
    let first_id = first.id();
    manager.release_client(first, false).await;

    let second = manager.get_client(&dest).await.unwrap();
    assert_eq!(second.id(), first_id);
    manager.release_client(second, false).await;

    let stats = manager.stats().await;
    let pool_stats = stats.values().next().unwrap();
    assert_eq!(pool_stats.total_created, 1);
    assert_eq!(pool_stats.total_reused, 1);
}

#[tokio::test]
async fn disabled_pooling_bypasses_the_registry() {
    let addr = sink_server().await;
    let manager = ClientManager::new(settings(0, 50));
    let dest = dest_for(addr);

    let conn = manager.get_client(&dest).await.unwrap();
    assert!(conn.pool_key().is_none());
    assert!(manager.registry().is_empty().await);

    manager.release_client(conn, false).await;
    assert!(manager.registry().is_empty().await);
}

#[tokio::test]
async fn backpressure_rejects_once_waiters_reach_max() {
    let addr = sink_server().await;
    let manager = std::sync::Arc::new(ClientManager::new(settings(1, 50)));
    let dest = dest_for(addr);

    // Occupy the single slot.
    let held = manager.get_client(&dest).await.unwrap();

    // Second caller queues as the sole waiter.
    let waiter_manager = std::sync::Arc::clone(&manager);
    let waiter_dest = dest.clone();
    let waiter =
        tokio::spawn(async move { waiter_manager.get_client(&waiter_dest).await });
    sleep(Duration::from_millis(100)).await;

    let stats = manager.stats().await;
    assert_eq!(stats.values().next().unwrap().waiting, 1);

    // Third caller is rejected immediately, with no connection attempted.
    let rejected = manager.get_client(&dest).await;
    assert!(matches!(rejected, Err(PoolError::TooManyWaiting(_))));
    let stats = manager.stats().await;
    assert_eq!(stats.values().next().unwrap().total_created, 1);

    // The queued waiter is eventually served the released connection.
    let held_id = held.id();
    manager.release_client(held, false).await;
    let handed = waiter.await.unwrap().unwrap();
    assert_eq!(handed.id(), held_id);
    manager.release_client(handed, false).await;
}

#[tokio::test]
async fn error_release_tears_down_despite_nonzero_idle_timeout() {
    let addr = sink_server().await;
    let manager = ClientManager::new(settings(4, 30));
    let dest = dest_for(addr);

    let conn = manager.get_client(&dest).await.unwrap();
    let first_id = conn.id();
    manager.release_client(conn, true).await;

    let stats = manager.stats().await;
    assert_eq!(stats.values().next().unwrap().idle, 0);

    let replacement = manager.get_client(&dest).await.unwrap();
    assert_ne!(replacement.id(), first_id);
    manager.release_client(replacement, false).await;
}

#[tokio::test]
async fn zero_pool_timeout_always_tears_down_on_release() {
    let addr = sink_server().await;
    let manager = ClientManager::new(settings(4, 0));
    let dest = dest_for(addr);

    let conn = manager.get_client(&dest).await.unwrap();
    let first_id = conn.id();
    manager.release_client(conn, false).await;

    let stats = manager.stats().await;
    assert_eq!(stats.values().next().unwrap().idle, 0);

    let replacement = manager.get_client(&dest).await.unwrap();
    assert_ne!(replacement.id(), first_id);
    manager.release_client(replacement, false).await;
}

#[tokio::test]
async fn drain_pools_on_empty_registry_completes_immediately() {
    let manager = ClientManager::new(settings(4, 50));

    tokio::time::timeout(Duration::from_secs(1), manager.drain_pools())
        .await
        .expect("drain of an empty registry must not block");

    // No pool was created as a side effect.
    assert!(manager.registry().is_empty().await);
}

#[tokio::test]
async fn drain_pools_removes_pools_once_drained() {
    let addr = sink_server().await;
    let manager = ClientManager::new(settings(4, 50));
    let dest = dest_for(addr);

    let conn = manager.get_client(&dest).await.unwrap();
    manager.release_client(conn, false).await;
    assert_eq!(manager.registry().len().await, 1);

    manager.drain_pools().await;
    assert!(manager.registry().is_empty().await);
}

#[tokio::test]
async fn concurrent_drain_pools_calls_all_complete() {
    let addr = sink_server().await;
    let manager = std::sync::Arc::new(ClientManager::new(settings(1, 50)));
    let dest = dest_for(addr);

    let held = manager.get_client(&dest).await.unwrap();

    // Two shutdown paths draining at once must both run to completion once
    // the held connection comes back.
    let first_manager = std::sync::Arc::clone(&manager);
    let first = tokio::spawn(async move { first_manager.drain_pools().await });
    let second_manager = std::sync::Arc::clone(&manager);
    let second = tokio::spawn(async move { second_manager.drain_pools().await });
    sleep(Duration::from_millis(100)).await;

    manager.release_client(held, false).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        first.await.unwrap();
        second.await.unwrap();
    })
    .await
    .expect("every concurrent drain_pools call must complete");
    assert!(manager.registry().is_empty().await);
}

#[tokio::test]
async fn connect_failure_surfaces_to_the_caller() {
    // Bind then drop to get a port nothing is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let manager = ClientManager::new(settings(4, 50));
    let result = manager.get_client(&dest_for(addr)).await;
    assert!(matches!(result, Err(PoolError::ConnectionFailed(_, _))));
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_destinations_are_pooled_too() {
    use tokio::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.sock");
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                while matches!(sock.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });

    let manager = ClientManager::new(settings(4, 50));
    let dest = Destination::unix(path.to_string_lossy());

    let first = manager.get_client(&dest).await.unwrap();
    let first_id = first.id();
    manager.release_client(first, false).await;

    let second = manager.get_client(&dest).await.unwrap();
    assert_eq!(second.id(), first_id);
    manager.release_client(second, false).await;
    manager.drain_pools().await;
}
