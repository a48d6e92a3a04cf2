//! Graceful connection retirement.
//!
//! Every connection leaving service goes through the same sequence, no matter
//! why it is being retired (idle eviction, error on release, pool shutdown):
//!
//! 1. take exclusive ownership of the stream, so nothing else can touch it
//! 2. send the protocol termination command if the transport is still writable
//! 3. half-close the write direction so the peer can observe the intent
//! 4. drain and discard whatever the peer still sends, until end-of-stream or
//!    the watchdog fires
//! 5. close the transport
//!
//! Failures along the way are logged at warning level and swallowed; the
//! connection always reaches `Closed`.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::connection::Connection;

/// Protocol termination command sent to the peer before the half-close.
pub(crate) const QUIT_COMMAND: &[u8] = b"QUIT\r\n";

/// Upper bound on waiting for the peer to finish after the half-close.
pub(crate) const TEARDOWN_WATCHDOG: Duration = Duration::from_secs(5);

/// Retire a connection. Best-effort: never fails, never blocks the caller
/// beyond the watchdog.
pub(crate) async fn teardown(mut conn: Connection) {
    conn.mark_destroying();
    let id = conn.id();

    if conn.is_writable() {
        if let Err(e) = conn.stream_mut().write_all(QUIT_COMMAND).await {
            warn!(id, error = %e, "failed to send termination command");
            conn.mark_unwritable();
        }
    }

    // Half-close: stop writing, keep reading so the peer can finish cleanly.
    if let Err(e) = conn.stream_mut().shutdown().await {
        warn!(id, error = %e, "failed to half-close transport");
    }
    conn.mark_unwritable();

    // Consume any remaining protocol lines from the peer. The watchdog forces
    // the close even if the peer never half-closes its side.
    let drained = tokio::time::timeout(TEARDOWN_WATCHDOG, async {
        let mut buf = [0u8; 512];
        loop {
            match conn.stream_mut().read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) => break Err(e),
            }
        }
    })
    .await;

    match drained {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(id, error = %e, "transport error during teardown"),
        Err(_) => warn!(id, "peer did not close within watchdog, forcing close"),
    }

    // Dropping the stream with the connection fully closes the transport.
    conn.mark_closed();
    debug!(id, "connection closed");
}
