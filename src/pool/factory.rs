//! Connection factory: dials one raw transport with a bounded timeout.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpSocket, TcpStream};
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

use super::connection::{Connection, Stream};
use super::destination::Destination;
use super::PoolError;

/// Open one connection to `dest`, bounded by `connect_timeout`.
///
/// On success the connection is `Unassigned` with a clean transport: TCP
/// keepalive enabled and nothing buffered. If the timeout elapses first the
/// attempt fails with [`PoolError::ConnectTimeout`] and the partially-open
/// transport is dropped, which closes it.
pub(crate) async fn connect(
    dest: &Destination,
    connect_timeout: Duration,
    idle_timeout: Duration,
) -> Result<Connection, PoolError> {
    let stream = match tokio::time::timeout(connect_timeout, open_stream(dest)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(PoolError::ConnectionFailed(dest.to_string(), e)),
        Err(_) => return Err(PoolError::ConnectTimeout(dest.to_string(), connect_timeout)),
    };

    let conn = Connection::new(stream);
    debug!(
        id = conn.id(),
        dest = %dest,
        idle_timeout_secs = idle_timeout.as_secs(),
        "connection established"
    );
    Ok(conn)
}

async fn open_stream(dest: &Destination) -> io::Result<Stream> {
    if dest.unix_socket {
        #[cfg(unix)]
        {
            return Ok(Stream::Unix(UnixStream::connect(&dest.host).await?));
        }
        #[cfg(not(unix))]
        {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix-domain sockets are not supported on this platform",
            ));
        }
    }

    let addr = resolve(dest).await?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(local) = dest.local_addr {
        socket.bind(SocketAddr::new(local, 0))?;
    }
    let stream = socket.connect(addr).await?;

    // Configure TCP keep-alive
    let raw = socket2::Socket::from(stream.into_std()?);
    raw.set_keepalive(true)?;
    let stream = TcpStream::from_std(raw.into())?;

    Ok(Stream::Tcp(stream))
}

async fn resolve(dest: &Destination) -> io::Result<SocketAddr> {
    let mut addrs = lookup_host((dest.host.as_str(), dest.port)).await?;
    let picked = match dest.local_addr {
        // The address family must match the local bind address.
        Some(local) => addrs.find(|a| a.is_ipv4() == local.is_ipv4()),
        None => addrs.next(),
    };
    picked.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no usable addresses resolved for {}", dest.host),
        )
    })
}
