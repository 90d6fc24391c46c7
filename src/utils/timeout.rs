//! Timeout constants and helpers shared by the peer and the registry.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Per-attempt bound used while waiting for a server to come up
pub const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(750);

/// Pause between connect attempts
pub const RETRY_DELAY: Duration = Duration::from_millis(150);

/// Horizon used by `wait_for_server` when no timeout is given
pub const UNBOUNDED_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Bound on a single write so one stalled peer cannot hold a broadcast
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept before polling the listener again
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(250);

/// Bound on delivering the exit notice to every client during dispose
pub const SHUTDOWN_NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Run `future`, mapping expiry to [`ProtocolError::Timeout`]
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)
}
