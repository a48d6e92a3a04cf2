//! Pooled connection wrapper and ownership state machine.
//!
//! A [`Connection`] owns its raw transport plus the bookkeeping the pool
//! needs: a process-unique sequence id, an explicit ownership state, a
//! back-reference to the owning pool's key, a writable flag, and timestamps.
//! Ownership states form a one-way machine:
//!
//! `Unassigned` -> `Busy` -> `Idle` or `Destroying` -> `Closed`
//!
//! The state flag is always updated before the connection is handed across a
//! channel or into teardown, so a stale holder can never double-release or
//! double-destroy it.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::trace;

use super::destination::PoolKey;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Ownership states of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Just created by the factory, not yet handed to a caller.
    Unassigned,

    /// Held by exactly one caller.
    Busy,

    /// Returned to the pool, eligible for reuse.
    Idle,

    /// In teardown.
    Destroying,

    /// Terminal; the transport is closed.
    Closed,
}

impl ConnState {
    /// Get a human-readable state name
    pub fn name(&self) -> &str {
        match self {
            ConnState::Unassigned => "Unassigned",
            ConnState::Busy => "Busy",
            ConnState::Idle => "Idle",
            ConnState::Destroying => "Destroying",
            ConnState::Closed => "Closed",
        }
    }
}

/// The raw transport underneath a connection.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),

    #[cfg(unix)]
    Unix(UnixStream),

    /// In-memory transport, used by tests.
    Memory(tokio::io::DuplexStream),
}

/// Outcome of a non-blocking liveness probe on an idle transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdleProbe {
    /// Nothing pending; the transport looks healthy.
    Alive,

    /// Peer half-closed while the connection sat idle.
    Eof,

    /// Peer sent unsolicited traffic while the connection sat idle.
    UnexpectedData,

    /// Transport-level error.
    Failed,
}

impl Stream {
    /// Probe an idle transport without blocking. An idle peer should be
    /// silent; anything readable means the connection cannot be reused.
    pub(crate) fn idle_probe(&self) -> IdleProbe {
        let mut buf = [0u8; 32];
        let result = match self {
            Stream::Tcp(s) => s.try_read(&mut buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.try_read(&mut buf),
            Stream::Memory(_) => return IdleProbe::Alive,
        };
        match result {
            Ok(0) => IdleProbe::Eof,
            Ok(_) => IdleProbe::UnexpectedData,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => IdleProbe::Alive,
            Err(_) => IdleProbe::Failed,
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Memory(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Memory(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
            Stream::Memory(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Memory(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// One outbound transport connection, owned by a pool or a caller.
#[derive(Debug)]
pub struct Connection {
    /// Process-unique sequence id, for diagnostics.
    id: u64,

    /// The raw transport.
    stream: Stream,

    /// Current ownership state.
    state: ConnState,

    /// Key of the owning pool; `None` for unpooled (bypass-mode) connections.
    pool_key: Option<PoolKey>,

    /// Whether the transport is still accepting writes.
    writable: bool,

    /// When the transport was established.
    connected_at: Instant,

    /// When the connection last entered the idle set.
    idle_since: Option<Instant>,
}

impl Connection {
    pub(crate) fn new(stream: Stream) -> Self {
        Self {
            id: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            stream,
            state: ConnState::Unassigned,
            pool_key: None,
            writable: true,
            connected_at: Instant::now(),
            idle_since: None,
        }
    }

    /// In-memory connection for tests; the returned stream is the peer end.
    pub fn memory(capacity: usize) -> (Self, tokio::io::DuplexStream) {
        let (local, peer) = tokio::io::duplex(capacity);
        (Self::new(Stream::Memory(local)), peer)
    }

    /// Process-unique sequence id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Key of the owning pool, if this connection is pooled.
    pub fn pool_key(&self) -> Option<&PoolKey> {
        self.pool_key.as_ref()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// How long the connection has sat in the idle set, if it is idle.
    pub fn idle_for(&self) -> Option<Duration> {
        self.idle_since.map(|t| t.elapsed())
    }

    /// Mutable access to the raw transport for protocol traffic.
    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    pub(crate) fn stream(&self) -> &Stream {
        &self.stream
    }

    pub(crate) fn set_pool_key(&mut self, key: PoolKey) {
        self.pool_key = Some(key);
    }

    pub(crate) fn mark_busy(&mut self) {
        self.transition(ConnState::Busy);
        self.idle_since = None;
    }

    pub(crate) fn mark_idle(&mut self) {
        self.transition(ConnState::Idle);
        self.idle_since = Some(Instant::now());
    }

    pub(crate) fn mark_destroying(&mut self) {
        self.transition(ConnState::Destroying);
    }

    pub(crate) fn mark_closed(&mut self) {
        self.transition(ConnState::Closed);
    }

    pub(crate) fn mark_unwritable(&mut self) {
        self.writable = false;
    }

    fn transition(&mut self, to: ConnState) {
        trace!(id = self.id, from = self.state.name(), to = to.name(), "connection state");
        self.state = to;
    }
}
