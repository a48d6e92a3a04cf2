//! Process-wide table of per-destination pools.
//!
//! The registry replaces ambient global pool state with an owned, injectable
//! table: created empty, populated lazily on first lookup for a key, and torn
//! down explicitly by draining every pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::pool::{Pool, PoolKey, PoolStats};

/// Mapping from destination key to its pool.
pub struct PoolRegistry {
    pools: RwLock<HashMap<PoolKey, Arc<Pool>>>,
    max_size: usize,
    connect_timeout: Duration,
}

impl PoolRegistry {
    pub fn new(max_size: usize, connect_timeout: Duration) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            max_size,
            connect_timeout,
        }
    }

    /// Return the pool for `key`, constructing and registering it on first use.
    pub async fn get_or_create(&self, key: &PoolKey) -> Arc<Pool> {
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(key) {
                return Arc::clone(pool);
            }
        }

        let mut pools = self.pools.write().await;
        // Another task may have created it between the two locks.
        if let Some(pool) = pools.get(key) {
            return Arc::clone(pool);
        }
        let pool = Pool::new(key.clone(), self.max_size, self.connect_timeout);
        pools.insert(key.clone(), Arc::clone(&pool));
        pool
    }

    pub async fn get(&self, key: &PoolKey) -> Option<Arc<Pool>> {
        self.pools.read().await.get(key).map(Arc::clone)
    }

    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.read().await.is_empty()
    }

    /// Drain every registered pool and remove it once drained. An empty
    /// registry completes immediately with no side effects.
    pub async fn drain_all(&self) {
        let pools: Vec<(PoolKey, Arc<Pool>)> = {
            let pools = self.pools.read().await;
            pools
                .iter()
                .map(|(k, p)| (k.clone(), Arc::clone(p)))
                .collect()
        };
        if pools.is_empty() {
            debug!("no pools to drain");
            return;
        }

        for (key, pool) in pools {
            pool.drain().await;
            self.pools.write().await.remove(&key);
            info!(pool = %key, "pool removed from registry");
        }
    }

    /// Statistics for every registered pool, keyed by pool identity.
    pub async fn all_stats(&self) -> HashMap<String, PoolStats> {
        let pools = self.pools.read().await;
        let mut stats = HashMap::with_capacity(pools.len());
        for (key, pool) in pools.iter() {
            stats.insert(key.to_string(), pool.stats().await);
        }
        stats
    }
}
