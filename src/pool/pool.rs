//! Per-destination connection pool.
//!
//! Each pool tracks an idle set, a busy count, and a FIFO queue of waiters.
//! Invariants:
//! - `idle + busy <= max_size`; the busy count includes slots reserved for
//!   in-flight connection attempts, so capacity is never oversubscribed
//! - a connection is in exactly one of {idle set, busy, being destroyed}
//!
//! Released connections are handed directly to the longest-waiting acquirer.
//! A background reaper evicts idle connections past the idle timeout and
//! idle connections whose transport died while pooled.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, info, warn};

use super::connection::{ConnState, Connection, IdleProbe};
use super::destination::PoolKey;
use super::teardown::teardown;
use super::{factory, PoolError};

/// Point-in-time statistics for one pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Connections created by the factory on this pool's behalf.
    pub total_created: u64,

    /// Acquisitions satisfied from the idle set.
    pub total_reused: u64,

    /// Idle connections evicted by the reaper.
    pub total_evicted: u64,

    /// Connections currently idle in the pool.
    pub idle: usize,

    /// Connections currently acquired, including in-flight dials.
    pub busy: usize,

    /// Acquirers queued for a connection or a free slot.
    pub waiting: usize,
}

type Waiter = oneshot::Sender<Result<Connection, PoolError>>;

struct PoolInner {
    idle: VecDeque<Connection>,
    busy: usize,
    waiting: VecDeque<Waiter>,
    draining: bool,
    total_created: u64,
    total_reused: u64,
    total_evicted: u64,
}

enum Plan {
    Ready(Connection),
    Dial,
    Wait(oneshot::Receiver<Result<Connection, PoolError>>),
}

/// Pool of reusable connections to a single destination.
pub struct Pool {
    key: PoolKey,
    max_size: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,

    /// Never held across an await.
    inner: Mutex<PoolInner>,

    /// Woken (all waiters) when the busy count reaches zero during a drain.
    drained: Notify,
}

impl Pool {
    pub(crate) fn new(key: PoolKey, max_size: usize, connect_timeout: Duration) -> Arc<Self> {
        let idle_timeout = key.idle_timeout();
        let pool = Arc::new(Self {
            key,
            max_size,
            connect_timeout,
            idle_timeout,
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                busy: 0,
                waiting: VecDeque::new(),
                draining: false,
                total_created: 0,
                total_reused: 0,
                total_evicted: 0,
            }),
            drained: Notify::new(),
        });
        // With a zero idle timeout nothing is ever pooled idle, so there is
        // nothing for the reaper to do.
        if !idle_timeout.is_zero() {
            Self::spawn_reaper(&pool);
        }
        info!(
            pool = %pool.key,
            max_size,
            idle_timeout_secs = idle_timeout.as_secs(),
            "pool created"
        );
        pool
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            total_created: inner.total_created,
            total_reused: inner.total_reused,
            total_evicted: inner.total_evicted,
            idle: inner.idle.len(),
            busy: inner.busy,
            waiting: inner.waiting.len(),
        }
    }

    /// Number of acquirers currently queued.
    pub async fn waiting_count(&self) -> usize {
        self.inner.lock().await.waiting.len()
    }

    /// Acquire a connection: a validated idle one if available, a fresh one
    /// if capacity remains, otherwise queue as a FIFO waiter.
    pub async fn acquire(self: &Arc<Self>) -> Result<Connection, PoolError> {
        let mut invalid = Vec::new();
        let plan = {
            let mut inner = self.inner.lock().await;
            if inner.draining {
                return Err(PoolError::Draining(self.key.to_string()));
            }

            let mut ready = None;
            while let Some(conn) = inner.idle.pop_front() {
                if self.validate(&conn) {
                    ready = Some(conn);
                    break;
                }
                invalid.push(conn);
            }

            if let Some(mut conn) = ready {
                conn.mark_busy();
                inner.busy += 1;
                inner.total_reused += 1;
                debug!(pool = %self.key, id = conn.id(), "reusing idle connection");
                Plan::Ready(conn)
            } else if inner.idle.len() + inner.busy < self.max_size {
                // Reserve the slot before dialing so concurrent acquirers
                // cannot oversubscribe the pool.
                inner.busy += 1;
                Plan::Dial
            } else {
                let (tx, rx) = oneshot::channel();
                inner.waiting.push_back(tx);
                debug!(pool = %self.key, waiting = inner.waiting.len(), "acquirer queued");
                Plan::Wait(rx)
            }
        };

        for conn in invalid {
            debug!(pool = %self.key, id = conn.id(), "discarding invalid idle connection");
            tokio::spawn(teardown(conn));
        }

        match plan {
            Plan::Ready(conn) => Ok(conn),
            Plan::Dial => self.dial().await,
            Plan::Wait(rx) => match rx.await {
                Ok(result) => result,
                // The pool dropped the sender: it was drained while we waited.
                Err(_) => Err(PoolError::Draining(self.key.to_string())),
            },
        }
    }

    /// Return a connection to the pool.
    ///
    /// A connection that is not currently acquired is rejected without
    /// touching pool state. An error release, a zero idle timeout, or a
    /// draining pool all route the connection through teardown; otherwise it
    /// goes to the longest waiter (no re-validation, it was valid a moment
    /// ago) or into the idle set.
    pub async fn release(self: &Arc<Self>, conn: Connection, error_occurred: bool) {
        if conn.state() != ConnState::Busy {
            warn!(
                pool = %self.key,
                id = conn.id(),
                state = conn.state().name(),
                "release of a connection not marked acquired, ignoring"
            );
            return;
        }

        let id = conn.id();
        let mut retire = None;
        let notify = {
            let mut inner = self.inner.lock().await;
            inner.busy -= 1;

            if error_occurred || self.idle_timeout.is_zero() || inner.draining {
                retire = Some(conn);
            } else {
                let mut pending = Some(conn);
                while let Some(c) = pending.take() {
                    match inner.waiting.pop_front() {
                        Some(waiter) => match waiter.send(Ok(c)) {
                            Ok(()) => {
                                inner.busy += 1;
                                debug!(pool = %self.key, id, "handed connection to waiter");
                            }
                            // Waiter gave up; recover the connection and try
                            // the next one in line.
                            Err(back) => pending = back.ok(),
                        },
                        None => {
                            let mut c = c;
                            c.mark_idle();
                            inner.idle.push_back(c);
                            debug!(
                                pool = %self.key,
                                id,
                                idle = inner.idle.len(),
                                "connection returned to idle set"
                            );
                        }
                    }
                }
            }

            inner.draining && inner.busy == 0
        };

        if let Some(conn) = retire {
            debug!(pool = %self.key, id, error_occurred, "retiring released connection");
            // Teardown can stall until its watchdog; a queued waiter's
            // replacement dial must not wait behind it.
            self.spawn_refill();
            tokio::spawn(teardown(conn));
        }
        if notify {
            self.drained.notify_waiters();
        }
    }

    /// Stop accepting acquisitions, fail queued waiters, wait for busy
    /// connections to be released, then destroy the remaining idle set.
    pub async fn drain(&self) {
        let waiters = {
            let mut inner = self.inner.lock().await;
            inner.draining = true;
            std::mem::take(&mut inner.waiting)
        };
        for waiter in waiters {
            let _ = waiter.send(Err(PoolError::Draining(self.key.to_string())));
        }

        // In-flight work is never force-terminated; wait for releases. The
        // notified future is registered before the busy check so concurrent
        // drains of the same pool cannot miss the single wakeup.
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.inner.lock().await;
                if inner.busy == 0 {
                    break;
                }
                info!(pool = %self.key, busy = inner.busy, "drain waiting for busy connections");
            }
            notified.await;
        }

        let idle = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.idle)
        };
        for conn in idle {
            teardown(conn).await;
        }
        info!(pool = %self.key, "pool drained");
    }

    /// An idle connection is reusable while it is marked idle, still
    /// writable, within the idle timeout, and its transport shows no pending
    /// EOF, error, or unsolicited traffic.
    fn validate(&self, conn: &Connection) -> bool {
        if conn.state() != ConnState::Idle || !conn.is_writable() {
            return false;
        }
        if conn.idle_for().is_some_and(|d| d >= self.idle_timeout) {
            return false;
        }
        matches!(conn.stream().idle_probe(), IdleProbe::Alive)
    }

    async fn dial(self: &Arc<Self>) -> Result<Connection, PoolError> {
        match factory::connect(self.key.destination(), self.connect_timeout, self.idle_timeout)
            .await
        {
            Ok(mut conn) => {
                conn.set_pool_key(self.key.clone());
                conn.mark_busy();
                let mut inner = self.inner.lock().await;
                inner.total_created += 1;
                Ok(conn)
            }
            Err(e) => {
                self.free_slot().await;
                Err(e)
            }
        }
    }

    /// Give back a reserved busy slot and service whoever can use it.
    async fn free_slot(self: &Arc<Self>) {
        let notify = {
            let mut inner = self.inner.lock().await;
            inner.busy -= 1;
            inner.draining && inner.busy == 0
        };
        if notify {
            self.drained.notify_waiters();
        }
        self.spawn_refill();
    }

    fn spawn_refill(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.refill().await });
    }

    /// Dial replacement connections for queued waiters once capacity frees
    /// up. A failed dial delivers the connect error to that waiter and moves
    /// on to the next.
    async fn refill(self: Arc<Self>) {
        loop {
            let waiter = {
                let mut inner = self.inner.lock().await;
                if inner.draining
                    || inner.waiting.is_empty()
                    || inner.idle.len() + inner.busy >= self.max_size
                {
                    return;
                }
                inner.busy += 1;
                inner.waiting.pop_front()
            };
            let Some(waiter) = waiter else { return };

            match factory::connect(self.key.destination(), self.connect_timeout, self.idle_timeout)
                .await
            {
                Ok(mut conn) => {
                    conn.set_pool_key(self.key.clone());
                    conn.mark_busy();
                    {
                        let mut inner = self.inner.lock().await;
                        inner.total_created += 1;
                    }
                    if let Err(Ok(conn)) = waiter.send(Ok(conn)) {
                        // Waiter gave up while we were dialing; the release
                        // path passes the connection on or pools it.
                        self.release(conn, false).await;
                    }
                    return;
                }
                Err(e) => {
                    let notify = {
                        let mut inner = self.inner.lock().await;
                        inner.busy -= 1;
                        inner.draining && inner.busy == 0
                    };
                    if notify {
                        self.drained.notify_waiters();
                    }
                    let _ = waiter.send(Err(e));
                    // Next waiter gets its own dial attempt.
                }
            }
        }
    }

    fn spawn_reaper(pool: &Arc<Self>) {
        let weak = Arc::downgrade(pool);
        let idle_timeout = pool.idle_timeout;
        tokio::spawn(async move {
            let tick = (idle_timeout / 2).max(Duration::from_millis(500));
            let mut interval = tokio::time::interval(tick);
            interval.tick().await; // the first tick completes immediately
            loop {
                interval.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                if !pool.sweep_idle().await {
                    break;
                }
            }
        });
    }

    /// Evict idle connections past the idle timeout or whose transport died
    /// while pooled. Returns false once the pool is draining.
    async fn sweep_idle(self: &Arc<Self>) -> bool {
        let evicted = {
            let mut inner = self.inner.lock().await;
            if inner.draining {
                return false;
            }
            let mut kept = VecDeque::with_capacity(inner.idle.len());
            let mut evicted = Vec::new();
            while let Some(conn) = inner.idle.pop_front() {
                if self.validate(&conn) {
                    kept.push_back(conn);
                } else {
                    evicted.push(conn);
                }
            }
            inner.idle = kept;
            inner.total_evicted += evicted.len() as u64;
            evicted
        };

        if evicted.is_empty() {
            return true;
        }
        debug!(pool = %self.key, evicted = evicted.len(), "evicting idle connections");
        for conn in evicted {
            teardown(conn).await;
        }
        self.spawn_refill();
        true
    }
}
