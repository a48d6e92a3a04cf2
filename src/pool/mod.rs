//! Outbound connection pooling
//!
//! This module provides:
//! - Per-destination pools with bounded size and FIFO waiter queues
//! - A connection factory with bounded connect timeouts
//! - A graceful, protocol-aware teardown sequence for retiring connections
//! - Idle-timeout eviction of unused connections

pub mod connection;
pub mod destination;
pub(crate) mod factory;
#[allow(clippy::module_inception)]
pub mod pool;
pub(crate) mod teardown;

use std::time::Duration;

pub use connection::{ConnState, Connection, Stream};
pub use destination::{Destination, PoolKey};
pub use pool::{Pool, PoolStats};

/// Error types for pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Failed to connect to {0}: {1}")]
    ConnectionFailed(String, #[source] std::io::Error),

    #[error("Timed out connecting to {0} after {1:?}")]
    ConnectTimeout(String, Duration),

    #[error("Too many waiting clients for {0}")]
    TooManyWaiting(String),

    #[error("Pool for {0} is draining")]
    Draining(String),
}
