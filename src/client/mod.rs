//! Public acquire/release surface with admission control.
//!
//! [`ClientManager`] is the entry point callers above this layer use:
//! - `get_client` resolves the destination's pool (creating it lazily) and
//!   acquires, with a fail-fast backpressure check on the waiter queue; with
//!   pooling disabled it dials the factory directly and no pool state exists
//! - `release_client` routes a finished connection back into its pool or
//!   through teardown, rejecting double releases and stale pool references
//! - `drain_pools` coordinates shutdown across every pool

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::PoolSettings;
use crate::pool::teardown::teardown;
use crate::pool::{factory, ConnState, Connection, Destination, PoolError, PoolKey, PoolStats};
use crate::registry::PoolRegistry;

/// Admission gate over the pool registry.
pub struct ClientManager {
    settings: PoolSettings,
    registry: PoolRegistry,
}

impl ClientManager {
    pub fn new(settings: PoolSettings) -> Self {
        let registry = PoolRegistry::new(
            settings.pool_concurrency_max,
            Duration::from_secs(settings.connect_timeout),
        );
        Self { settings, registry }
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    /// Acquire a connection to `dest`, creating the destination's pool on
    /// first use.
    ///
    /// With pooling disabled (`pool_concurrency_max = 0`) the factory is
    /// called directly: no pool bookkeeping and no backpressure check. A pool
    /// whose waiter queue has already reached the concurrency maximum rejects
    /// the call immediately, before any connection work begins.
    pub async fn get_client(&self, dest: &Destination) -> Result<Connection, PoolError> {
        if self.settings.pool_concurrency_max == 0 {
            let mut conn = factory::connect(
                dest,
                Duration::from_secs(self.settings.connect_timeout),
                Duration::ZERO,
            )
            .await?;
            conn.mark_busy();
            debug!(id = conn.id(), dest = %dest, "pooling disabled, direct connection");
            return Ok(conn);
        }

        let key = PoolKey::new(dest, Duration::from_secs(self.settings.pool_timeout));
        let pool = self.registry.get_or_create(&key).await;

        let waiting = pool.waiting_count().await;
        if waiting >= self.settings.pool_concurrency_max {
            warn!(pool = %key, waiting, "too many waiting clients, rejecting");
            return Err(PoolError::TooManyWaiting(key.to_string()));
        }

        pool.acquire().await
    }

    /// Return a connection once the caller is done with it. `error_occurred`
    /// forces teardown instead of reuse.
    ///
    /// A connection that is not currently acquired is logged and ignored. A
    /// connection whose pool has disappeared from the registry is closed
    /// directly rather than touching a stale reference.
    pub async fn release_client(&self, conn: Connection, error_occurred: bool) {
        if conn.state() != ConnState::Busy {
            warn!(
                id = conn.id(),
                state = conn.state().name(),
                "release of a connection not marked acquired, ignoring"
            );
            return;
        }

        let Some(key) = conn.pool_key().cloned() else {
            debug!(id = conn.id(), "closing unpooled connection");
            teardown(conn).await;
            return;
        };

        match self.registry.get(&key).await {
            Some(pool) => pool.release(conn, error_occurred).await,
            None => {
                error!(
                    pool = %key,
                    id = conn.id(),
                    "release references a pool no longer registered, closing directly"
                );
                teardown(conn).await;
            }
        }
    }

    /// Drain every pool and remove it from the registry.
    pub async fn drain_pools(&self) {
        self.registry.drain_all().await;
    }

    /// Statistics for every pool, keyed by pool identity.
    pub async fn stats(&self) -> HashMap<String, PoolStats> {
        self.registry.all_stats().await
    }
}
