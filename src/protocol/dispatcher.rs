use std::collections::BTreeMap;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::error;

use crate::error::constants::{ERR_DISPATCHER_READ_LOCK, ERR_DISPATCHER_WRITE_LOCK};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Message;
use crate::transport::connection::Connection;

/// Handle returned by [`Dispatcher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Why a connection's reader stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Closed from this side
    Closed,
    /// The remote end closed the stream on a frame boundary
    PeerClosed,
    /// The remote end sent a disconnect sentinel
    Sentinel(String),
    /// The socket failed
    Io(io::ErrorKind),
    /// The byte stream could no longer be framed
    Protocol(String),
}

impl From<ProtocolError> for DisconnectReason {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => DisconnectReason::Io(e.kind()),
            other => DisconnectReason::Protocol(other.to_string()),
        }
    }
}

/// Everything observers can be told about
#[derive(Debug, Clone)]
pub enum Event<O> {
    /// A String, Bytes or Object frame arrived
    MessageReceived {
        connection: Arc<Connection>,
        message: Message<O>,
    },
    /// Bytes arrived on a connection in raw mode
    RawMessage {
        connection: Arc<Connection>,
        data: Bytes,
    },
    /// A frame was read but could not be turned into a message
    DecodeFailed {
        connection: Arc<Connection>,
        error: Arc<ProtocolError>,
    },
    /// The registry accepted a connection
    ClientAdded(Arc<Connection>),
    /// The registry dropped a connection after its reader stopped
    ClientRemoved {
        connection: Arc<Connection>,
        reason: DisconnectReason,
    },
    /// A peer's own connection stopped
    Disconnected {
        connection: Arc<Connection>,
        reason: DisconnectReason,
    },
}

impl<O> Event<O> {
    /// The connection this event concerns
    pub fn connection(&self) -> &Arc<Connection> {
        match self {
            Event::MessageReceived { connection, .. }
            | Event::RawMessage { connection, .. }
            | Event::DecodeFailed { connection, .. }
            | Event::ClientAdded(connection)
            | Event::ClientRemoved { connection, .. }
            | Event::Disconnected { connection, .. } => connection,
        }
    }
}

type HandlerFn<O> = dyn Fn(&Event<O>) + Send + Sync + 'static;

/// Observer registry.
///
/// Handlers run on the task that raised the event, in subscription order, and
/// must not block. Events from one connection arrive in stream order.
pub struct Dispatcher<O> {
    handlers: Arc<RwLock<BTreeMap<SubscriptionId, Arc<HandlerFn<O>>>>>,
    next_id: Arc<AtomicU64>,
}

impl<O> Clone for Dispatcher<O> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<O> Default for Dispatcher<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> Dispatcher<O> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Event<O>) + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(ERR_DISPATCHER_WRITE_LOCK))?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        handlers.insert(id, Arc::new(handler));
        Ok(id)
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(ERR_DISPATCHER_WRITE_LOCK))?;

        Ok(handlers.remove(&id).is_some())
    }

    pub fn dispatch(&self, event: &Event<O>) {
        // Snapshot so handlers can (un)subscribe without deadlocking
        let handlers: Vec<Arc<HandlerFn<O>>> = match self.handlers.read() {
            Ok(handlers) => handlers.values().cloned().collect(),
            Err(_) => {
                error!("{}", ERR_DISPATCHER_READ_LOCK);
                return;
            }
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(
                    connection = event.connection().id(),
                    "Event handler panicked"
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<O: Clone + Send + 'static> Dispatcher<O> {
    /// Forward every event into an unbounded channel.
    ///
    /// Dropping the receiver leaves a no-op handler until `unsubscribe` is called.
    pub fn subscribe_channel(&self) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Event<O>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        })?;
        Ok((id, rx))
    }
}
