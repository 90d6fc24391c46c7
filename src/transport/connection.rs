//! # Connection
//!
//! One live TCP endpoint shared between its reader task and any number of senders.
//!
//! The read half is handed to exactly one
//! [`ConnectionReader`](crate::transport::reader::ConnectionReader); the write half
//! stays here behind an async mutex so concurrent senders never interleave frames.
//!
//! ## Lifecycle
//! - `connected` drops to false once the socket is shut down for any reason
//! - `disposed` flips exactly once, on explicit close or on a received disconnect sentinel
//! - A disposed connection refuses every send with `NotConnected` before touching I/O

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace};

use crate::core::frame::{encode, encode_text, Frame, MessageType};
use crate::error::{ProtocolError, Result};
use crate::utils::timeout::{with_timeout, WRITE_TIMEOUT};
use crate::utils::Metrics;

/// Process-unique connection identifier
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection settings
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Start in raw mode
    pub raw_mode: bool,
    /// Bound on each write
    pub write_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            raw_mode: false,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    disposed: AtomicBool,
    raw_mode: watch::Sender<bool>,
    closed: CancellationToken,
    write_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Connection {
    /// Wrap a connected stream, returning the shared handle and the read half
    pub fn new(
        stream: TcpStream,
        options: ConnectionOptions,
        metrics: Arc<Metrics>,
    ) -> Result<(Arc<Self>, OwnedReadHalf)> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();

        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            local_addr,
            writer: Mutex::new(Some(write_half)),
            connected: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            raw_mode: watch::Sender::new(options.raw_mode),
            closed: CancellationToken::new(),
            write_timeout: options.write_timeout,
            metrics,
        });

        Ok((connection, read_half))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connected and not disposed
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.is_disposed()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn raw_mode(&self) -> bool {
        *self.raw_mode.borrow()
    }

    /// Switch between framed and raw reads.
    ///
    /// A read already pending in the old mode is abandoned and restarted in the
    /// new one; bytes it had buffered are kept.
    pub fn set_raw_mode(&self, raw: bool) {
        self.raw_mode.send_if_modified(|current| {
            let changed = *current != raw;
            *current = raw;
            changed
        });
    }

    pub(crate) fn raw_mode_changes(&self) -> watch::Receiver<bool> {
        self.raw_mode.subscribe()
    }

    /// Resolves once the connection has been shut down
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub(crate) fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Encode and write one frame
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send_raw(&frame.to_bytes()?).await
    }

    /// Write bytes as-is, without framing
    pub async fn send_raw(&self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        self.write(data).await
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::NotConnected)?;

        let written = with_timeout(self.write_timeout, async {
            writer.write_all(data).await?;
            writer.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => {
                trace!(id = self.id, bytes = data.len(), "Wrote to socket");
                self.metrics.frame_sent(data.len() as u64);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.send_failed();
                Err(ProtocolError::Io(e))
            }
            Err(e) => {
                self.metrics.send_failed();
                Err(e)
            }
        }
    }

    /// Shut the socket down in both directions.
    ///
    /// Sends FIN on the write half and cancels the reader, which drops the read
    /// half. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        self.closed.cancel();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = with_timeout(self.write_timeout, writer.shutdown()).await {
                debug!(id = self.id, error = %e, "Write half shutdown timed out");
            }
        }
    }

    /// Stop the reader without waiting on the writer; used from `Drop`
    pub(crate) fn abort(&self) {
        self.connected.store(false, Ordering::Release);
        self.closed.cancel();
    }

    /// Flip `disposed`; true only for the call that performed the transition
    pub(crate) fn mark_disposed(&self) -> bool {
        self.disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Dispose the connection, telling the remote end first when `notice` is given.
    ///
    /// The notice is best-effort. Returns false without doing anything if the
    /// connection was already disposed.
    pub(crate) async fn close_with_notice(&self, notice: Option<&str>) -> bool {
        if !self.mark_disposed() {
            return false;
        }

        if let Some(text) = notice {
            if self.connected.load(Ordering::Acquire) {
                let sent = match encode(MessageType::String, &encode_text(text)) {
                    Ok(frame) => self.write(&frame).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    debug!(id = self.id, error = %e, "Disconnect notice not delivered");
                }
            }
        }

        self.shutdown().await;
        true
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl std::hash::Hash for Connection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("disposed", &self.is_disposed())
            .field("raw_mode", &self.raw_mode())
            .finish()
    }
}
