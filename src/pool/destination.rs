//! Destination identity and pool keys.
//!
//! A [`Destination`] names one remote peer: host, port, optional local bind
//! address, and whether the host is actually a unix-domain socket path. A
//! [`PoolKey`] extends that identity with the idle-timeout policy, so two
//! callers with different reuse policies never share a pool.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// One remote delivery target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Remote hostname or address; a filesystem path when `unix_socket` is set.
    pub host: String,

    /// Remote port; ignored for unix-domain sockets.
    pub port: u16,

    /// Local address to bind outbound connections to.
    pub local_addr: Option<IpAddr>,

    /// Interpret `host` as a unix-domain socket path.
    pub unix_socket: bool,
}

impl Destination {
    /// TCP destination.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            local_addr: None,
            unix_socket: false,
        }
    }

    /// Unix-domain socket destination; `path` takes the place of the host.
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            host: path.into(),
            port: 0,
            local_addr: None,
            unix_socket: true,
        }
    }

    /// Bind outbound connections to a specific local address.
    pub fn with_local_addr(mut self, addr: IpAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unix_socket {
            write!(f, "unix:{}", self.host)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Identity under which connections are pooled.
///
/// Requests with the same key share a pool; the key is immutable once its
/// pool exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    dest: Destination,
    idle_timeout_secs: u64,
}

impl PoolKey {
    pub fn new(dest: &Destination, idle_timeout: Duration) -> Self {
        Self {
            dest: dest.clone(),
            idle_timeout_secs: idle_timeout.as_secs(),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.dest
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self
            .dest
            .local_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "*".to_string());
        write!(f, "{}:{}:{}", self.dest, local, self.idle_timeout_secs)
    }
}
