//! # Connection Registry
//!
//! Server role: owns the listener, the accept loop and the set of live
//! connections, and fans messages out to them.
//!
//! ## Lifecycle
//! - `start` binds, listens and spawns the accept loop; calling it while running
//!   returns the bound address again
//! - Each accepted connection is added to the set, announced with `ClientAdded`
//!   and given its own reader task
//! - When a reader stops, its connection leaves the set and exactly one
//!   `ClientRemoved` is raised
//! - `dispose` stops accepting, tells every client `"ServerDone"`, closes them and
//!   empties the set
//!
//! Adding, removing and broadcasting all hold the same set guard, so a broadcast
//! sees a consistent membership.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{NetworkConfig, ServerConfig, TransportConfig};
use crate::core::codec::FrameCodec;
use crate::core::frame::{encode_text, Frame, MessageType};
use crate::core::serialization::ObjectCodec;
use crate::error::constants::ERR_LISTENER_FAILED;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{DisconnectReason, Dispatcher, Event, SubscriptionId};
use crate::protocol::message::{Message, SERVER_EXITING};
use crate::transport::connection::{Connection, ConnectionOptions};
use crate::transport::reader::ConnectionReader;
use crate::utils::timeout::with_timeout;
use crate::utils::metrics::Timer;
use crate::utils::Metrics;

pub struct Registry<C: ObjectCodec> {
    inner: Arc<RegistryInner<C>>,
}

impl<C: ObjectCodec> Clone for Registry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RegistryInner<C: ObjectCodec> {
    server: ServerConfig,
    transport: TransportConfig,
    codec: Arc<C>,
    dispatcher: Dispatcher<C::Object>,
    metrics: Arc<Metrics>,
    clients: Mutex<Vec<Arc<Connection>>>,
    listening: AtomicBool,
    disposed: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

struct Lifecycle {
    shutdown: CancellationToken,
    /// Cancelled when the current accept loop has exited
    stopped: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    failure: Option<ProtocolError>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        let stopped = CancellationToken::new();
        stopped.cancel();
        Self {
            shutdown: CancellationToken::new(),
            stopped,
            accept_task: None,
            local_addr: None,
            failure: None,
        }
    }
}

impl<C: ObjectCodec> Registry<C> {
    /// Create a stopped registry that will listen on `port` on all interfaces
    pub fn new(port: u16, codec: C) -> Self {
        let config = NetworkConfig::default_with_overrides(|config| config.server.port = port);
        Self::with_config(codec, &config)
    }

    pub fn with_config(codec: C, config: &NetworkConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                server: config.server.clone(),
                transport: config.transport.clone(),
                codec: Arc::new(codec),
                dispatcher: Dispatcher::new(),
                metrics: Arc::new(Metrics::new()),
                clients: Mutex::new(Vec::new()),
                listening: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Create and start a registry in one step
    pub async fn start_new(port: u16, codec: C) -> Result<Self> {
        let registry = Self::new(port, codec);
        registry.start().await?;
        Ok(registry)
    }

    /// Bind, listen and spawn the accept loop. Returns the bound address.
    ///
    /// Idempotent while the accept loop is running. Starting a disposed registry
    /// brings it back up with an empty set.
    #[instrument(skip(self), fields(port = self.inner.server.port))]
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if let (Some(addr), Some(task)) = (lifecycle.local_addr, lifecycle.accept_task.as_ref()) {
            if !task.is_finished() {
                return Ok(addr);
            }
        }

        let bind = (self.inner.server.bind_address.as_str(), self.inner.server.port);
        let listener = TcpListener::bind(bind).await.map_err(|e| {
            ProtocolError::ListenerFailed(format!(
                "cannot bind {}:{}: {e}",
                self.inner.server.bind_address, self.inner.server.port
            ))
        })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();
        self.inner.disposed.store(false, Ordering::Release);
        self.inner.listening.store(true, Ordering::Release);

        lifecycle.accept_task = Some(tokio::spawn(accept_loop(
            Arc::clone(&self.inner),
            listener,
            shutdown.clone(),
            stopped.clone(),
        )));
        lifecycle.shutdown = shutdown;
        lifecycle.stopped = stopped;
        lifecycle.local_addr = Some(local_addr);
        lifecycle.failure = None;

        info!(addr = %local_addr, "Registry listening");
        Ok(local_addr)
    }

    /// Resolve when the accept loop exits.
    ///
    /// Returns the listener failure if the loop gave up on its own, `Ok` after
    /// `dispose` or when the registry was never started.
    pub async fn wait(&self) -> Result<()> {
        let stopped = self.inner.lifecycle.lock().await.stopped.clone();
        stopped.cancelled().await;

        match self.inner.lifecycle.lock().await.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Send one message to one client
    pub async fn notify_client(&self, connection: &Connection, message: &Message<C::Object>) -> bool {
        match self.encode(message) {
            Some(bytes) => report(connection, connection.send_raw(&bytes).await),
            None => false,
        }
    }

    pub async fn notify_client_text(&self, connection: &Connection, text: &str) -> bool {
        match self.checked(Frame::new(MessageType::String, encode_text(text))) {
            Some(bytes) => report(connection, connection.send_raw(&bytes).await),
            None => false,
        }
    }

    pub async fn notify_client_bytes(&self, connection: &Connection, data: &[u8]) -> bool {
        match self.checked(Frame::new(MessageType::Bytes, data.to_vec())) {
            Some(bytes) => report(connection, connection.send_raw(&bytes).await),
            None => false,
        }
    }

    pub async fn notify_client_object(&self, connection: &Connection, object: &C::Object) -> bool {
        match self.encode_object(object) {
            Some(bytes) => report(connection, connection.send_raw(&bytes).await),
            None => false,
        }
    }

    /// Write bytes to one client without a frame header
    pub async fn raw_notify_client(&self, connection: &Connection, data: &[u8]) -> bool {
        report(connection, connection.send_raw(data).await)
    }

    /// Send one message to every client. Returns how many sends succeeded.
    pub async fn notify_clients(&self, message: &Message<C::Object>) -> usize {
        match self.encode(message) {
            Some(bytes) => self.broadcast(&bytes).await,
            None => 0,
        }
    }

    pub async fn notify_clients_text(&self, text: &str) -> usize {
        match self.checked(Frame::new(MessageType::String, encode_text(text))) {
            Some(bytes) => self.broadcast(&bytes).await,
            None => 0,
        }
    }

    pub async fn notify_clients_bytes(&self, data: &[u8]) -> usize {
        match self.checked(Frame::new(MessageType::Bytes, data.to_vec())) {
            Some(bytes) => self.broadcast(&bytes).await,
            None => 0,
        }
    }

    pub async fn notify_clients_object(&self, object: &C::Object) -> usize {
        match self.encode_object(object) {
            Some(bytes) => self.broadcast(&bytes).await,
            None => 0,
        }
    }

    /// Write bytes to every client without a frame header
    pub async fn raw_notify_clients(&self, data: &[u8]) -> usize {
        self.broadcast(data).await
    }

    fn encode(&self, message: &Message<C::Object>) -> Option<Bytes> {
        match message.to_frame(self.inner.codec.as_ref()) {
            Ok(frame) => self.checked(frame),
            Err(e) => {
                warn!(error = %e, "Failed to encode message");
                None
            }
        }
    }

    fn encode_object(&self, object: &C::Object) -> Option<Bytes> {
        match self.inner.codec.serialize(object) {
            Ok(payload) => self.checked(Frame::new(MessageType::Object, payload)),
            Err(e) => {
                warn!(error = %e, "Failed to serialize object");
                None
            }
        }
    }

    fn checked(&self, frame: Frame) -> Option<Bytes> {
        if frame.payload.len() > self.inner.transport.max_frame_size {
            warn!(size = frame.payload.len(), "Refusing to send oversized frame");
            return None;
        }
        match frame.to_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "Failed to encode frame");
                None
            }
        }
    }

    async fn broadcast(&self, bytes: &[u8]) -> usize {
        let clients = self.inner.clients.lock().await;
        let results = join_all(
            clients
                .iter()
                .map(|connection| async move { report(connection, connection.send_raw(bytes).await) }),
        )
        .await;

        let delivered = results.into_iter().filter(|ok| *ok).count();
        debug!(delivered, total = clients.len(), "Broadcast complete");
        delivered
    }

    /// Stop accepting, say goodbye to every client and close them.
    ///
    /// Second and later calls do nothing.
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _timer = Timer::start("registry_dispose");

        let (shutdown, accept_task) = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            (lifecycle.shutdown.clone(), lifecycle.accept_task.take())
        };
        shutdown.cancel();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                error!(error = %e, "Accept task panicked");
            }
        }

        let notice = self.checked(Frame::new(MessageType::String, encode_text(SERVER_EXITING)));
        let clients: Vec<Arc<Connection>> = {
            let mut clients = self.inner.clients.lock().await;
            if let Some(notice) = notice {
                let sends = join_all(clients.iter().map(|connection| connection.send_raw(&notice)));
                if with_timeout(self.inner.server.shutdown_notify_timeout, sends)
                    .await
                    .is_err()
                {
                    warn!("Timed out telling clients the server is exiting");
                }
            }
            clients.drain(..).collect()
        };

        for connection in &clients {
            connection.close_with_notice(None).await;
        }

        info!(closed = clients.len(), "Registry disposed");
        self.inner.metrics.log_metrics();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Whether the accept loop is running
    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::Acquire)
    }

    /// Snapshot of the live connections in accept order
    pub async fn clients(&self) -> Vec<Arc<Connection>> {
        self.inner.clients.lock().await.clone()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.clients.lock().await.len()
    }

    /// Address bound by the last successful `start`
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lifecycle.lock().await.local_addr
    }

    pub fn events(&self) -> &Dispatcher<C::Object> {
        &self.inner.dispatcher
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Event<C::Object>) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(handler)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.inner.metrics.clone()
    }
}

impl<C: ObjectCodec> RegistryInner<C> {
    async fn admit(self: &Arc<Self>, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;

        let options = ConnectionOptions {
            raw_mode: self.transport.raw_mode,
            write_timeout: self.server.write_timeout,
        };
        let (connection, read_half) = Connection::new(stream, options, self.metrics.clone())?;

        {
            let mut clients = self.clients.lock().await;
            if self.disposed.load(Ordering::Acquire) {
                connection.abort();
                return Err(ProtocolError::ConnectionClosed);
            }
            clients.push(connection.clone());
        }

        self.metrics.connection_established();
        info!(id = connection.id(), peer = %connection.peer_addr(), "Client connected");
        self.dispatcher.dispatch(&Event::ClientAdded(connection.clone()));

        let reader = ConnectionReader::new(
            connection.clone(),
            read_half,
            FrameCodec::new(self.transport.max_frame_size),
            self.codec.clone(),
            self.dispatcher.clone(),
            self.transport.raw_chunk_size,
            self.metrics.clone(),
        );
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let reason = reader.run().await;
            inner.remove(connection, reason).await;
        });

        Ok(())
    }

    async fn remove(&self, connection: Arc<Connection>, reason: DisconnectReason) {
        {
            let mut clients = self.clients.lock().await;
            clients.retain(|client| client.id() != connection.id());
        }

        self.metrics.connection_closed();
        info!(id = connection.id(), reason = ?reason, "Client removed");
        self.dispatcher
            .dispatch(&Event::ClientRemoved { connection, reason });
    }

    async fn finish(&self, failure: Option<ProtocolError>) {
        self.listening.store(false, Ordering::Release);
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.failure = failure;
    }
}

async fn accept_loop<C: ObjectCodec>(
    inner: Arc<RegistryInner<C>>,
    listener: TcpListener,
    shutdown: CancellationToken,
    stopped: CancellationToken,
) {
    let mut failures = 0u32;

    let failure = loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break None,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    failures = 0;
                    if let Err(e) = inner.admit(stream).await {
                        warn!(peer = %peer, error = %e, "Failed to admit connection");
                    }
                }
                Err(e) => {
                    failures += 1;
                    inner.metrics.accept_error();

                    if failures > inner.server.max_accept_failures {
                        error!(error = %e, failures, "Giving up on listener");
                        break Some(ProtocolError::ListenerFailed(format!(
                            "{ERR_LISTENER_FAILED}: {e}"
                        )));
                    }

                    warn!(error = %e, failures, "Accept failed, backing off");
                    tokio::select! {
                        _ = shutdown.cancelled() => break None,
                        _ = tokio::time::sleep(inner.server.accept_backoff) => {}
                    }
                }
            },
        }
    };

    inner.finish(failure).await;
    stopped.cancel();
    debug!("Accept loop stopped");
}

fn report(connection: &Connection, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!(id = connection.id(), error = %e, "Send to client failed");
            false
        }
    }
}
