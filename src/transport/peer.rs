//! # Peer
//!
//! Client role: owns at most one outbound connection to a registry.
//!
//! ## Usage
//! ```rust,no_run
//! use remote_link::core::serialization::SerdeCodec;
//! use remote_link::protocol::Event;
//! use remote_link::transport::peer::Peer;
//!
//! # async fn run() -> remote_link::error::Result<()> {
//! let peer = Peer::new(SerdeCodec::<String>::default());
//! peer.subscribe(|event| {
//!     if let Event::MessageReceived { message, .. } = event {
//!         println!("{message:?}");
//!     }
//! })?;
//!
//! if peer.wait_for("localhost", 888, None).await {
//!     peer.send_text("hello").await;
//!     peer.close().await;
//! }
//! # Ok(())
//! # }
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{ClientConfig, NetworkConfig, TransportConfig};
use crate::core::codec::FrameCodec;
use crate::core::frame::{encode_text, Frame, MessageType};
use crate::core::serialization::ObjectCodec;
use crate::error::constants::ERR_PEER_WRITE_LOCK;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, Event, SubscriptionId};
use crate::protocol::message::{Message, CLIENT_DISCONNECTING};
use crate::transport::connection::{Connection, ConnectionOptions};
use crate::transport::reader::ConnectionReader;
use crate::utils::timeout::{with_timeout, UNBOUNDED_WAIT};
use crate::utils::metrics::Timer;
use crate::utils::Metrics;

pub struct Peer<C: ObjectCodec> {
    codec: Arc<C>,
    client: ClientConfig,
    transport: TransportConfig,
    dispatcher: Dispatcher<C::Object>,
    metrics: Arc<Metrics>,
    raw_mode: AtomicBool,
    connection: RwLock<Option<Arc<Connection>>>,
}

impl<C: ObjectCodec> Peer<C> {
    /// Create a disconnected peer with default settings
    pub fn new(codec: C) -> Self {
        Self::build(codec, ClientConfig::default(), TransportConfig::default())
    }

    pub fn with_config(codec: C, config: &NetworkConfig) -> Self {
        Self::build(codec, config.client.clone(), config.transport.clone())
    }

    fn build(codec: C, client: ClientConfig, transport: TransportConfig) -> Self {
        Self {
            codec: Arc::new(codec),
            raw_mode: AtomicBool::new(transport.raw_mode),
            client,
            transport,
            dispatcher: Dispatcher::new(),
            metrics: Arc::new(Metrics::new()),
            connection: RwLock::new(None),
        }
    }

    /// Connect once, without retrying
    pub async fn connect(address: &str, port: u16, codec: C) -> Result<Self> {
        let peer = Self::new(codec);
        peer.connect_to(address, port).await?;
        Ok(peer)
    }

    /// Keep trying to connect until a server answers or `timeout` elapses.
    ///
    /// Never fails: check [`Peer::is_connected`] on the result.
    pub async fn wait_for_server(
        address: &str,
        port: u16,
        timeout: Option<Duration>,
        codec: C,
    ) -> Self {
        let peer = Self::new(codec);
        peer.wait_for(address, port, timeout).await;
        peer
    }

    #[instrument(skip(self))]
    pub async fn connect_to(&self, address: &str, port: u16) -> Result<()> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }

        let stream = open(address, port).await?;
        self.attach(stream)?;
        info!("Connected to server");
        Ok(())
    }

    /// Retry `connect_to` until it succeeds or `timeout` elapses.
    ///
    /// Each attempt is bounded by the configured attempt timeout and attempts are
    /// spaced by the retry delay; neither overshoots the overall deadline. `None`
    /// waits for a year. Returns whether the peer ended up connected.
    #[instrument(skip(self))]
    pub async fn wait_for(&self, address: &str, port: u16, timeout: Option<Duration>) -> bool {
        let _timer = Timer::start("peer_wait_for_server");
        let deadline = Instant::now() + timeout.unwrap_or(UNBOUNDED_WAIT);
        let mut attempts = 0u32;

        loop {
            if self.is_connected() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            attempts += 1;
            let attempt = self.client.connect_attempt_timeout.min(remaining);
            match with_timeout(attempt, open(address, port)).await {
                Ok(Ok(stream)) => match self.attach(stream) {
                    Ok(()) | Err(ProtocolError::AlreadyConnected) => {
                        info!(attempts, "Connected to server");
                        return true;
                    }
                    Err(e) => warn!(error = %e, "Failed to set up connection"),
                },
                Ok(Err(e)) => trace!(attempts, error = %e, "Connect attempt failed"),
                Err(_) => trace!(attempts, "Connect attempt timed out"),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.client.retry_delay.min(remaining)).await;
        }

        debug!(attempts, "Gave up waiting for server");
        false
    }

    fn attach(&self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;

        let options = ConnectionOptions {
            raw_mode: self.raw_mode.load(Ordering::Acquire),
            write_timeout: self.client.write_timeout,
        };
        let (connection, read_half) = Connection::new(stream, options, self.metrics.clone())?;

        {
            let mut slot = self
                .connection
                .write()
                .map_err(|_| ProtocolError::LockPoisoned(ERR_PEER_WRITE_LOCK))?;

            if slot.as_ref().is_some_and(|current| current.is_connected()) {
                connection.abort();
                return Err(ProtocolError::AlreadyConnected);
            }
            *slot = Some(connection.clone());
        }

        self.metrics.connection_established();

        let reader = ConnectionReader::new(
            connection.clone(),
            read_half,
            FrameCodec::new(self.transport.max_frame_size),
            self.codec.clone(),
            self.dispatcher.clone(),
            self.transport.raw_chunk_size,
            self.metrics.clone(),
        );
        let dispatcher = self.dispatcher.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let reason = reader.run().await;
            metrics.connection_closed();
            info!(id = connection.id(), reason = ?reason, "Disconnected from server");
            dispatcher.dispatch(&Event::Disconnected { connection, reason });
        });

        Ok(())
    }

    /// The current connection, live or not
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.read().ok().and_then(|slot| slot.clone())
    }

    fn live_connection(&self) -> Option<Arc<Connection>> {
        self.connection().filter(|connection| connection.is_connected())
    }

    pub fn is_connected(&self) -> bool {
        self.live_connection().is_some()
    }

    pub async fn send(&self, message: &Message<C::Object>) -> bool {
        match message.to_frame(self.codec.as_ref()) {
            Ok(frame) => self.send_frame(frame).await,
            Err(e) => {
                warn!(error = %e, "Failed to encode message");
                false
            }
        }
    }

    pub async fn send_text(&self, text: &str) -> bool {
        self.send_frame(Frame::new(MessageType::String, encode_text(text)))
            .await
    }

    pub async fn send_bytes(&self, data: &[u8]) -> bool {
        self.send_frame(Frame::new(MessageType::Bytes, data.to_vec()))
            .await
    }

    pub async fn send_object(&self, object: &C::Object) -> bool {
        match self.codec.serialize(object) {
            Ok(payload) => self.send_frame(Frame::new(MessageType::Object, payload)).await,
            Err(e) => {
                warn!(error = %e, "Failed to serialize object");
                false
            }
        }
    }

    /// Write bytes without a frame header
    pub async fn send_raw(&self, data: &[u8]) -> bool {
        let Some(connection) = self.live_connection() else {
            return false;
        };
        report(connection.send_raw(data).await)
    }

    async fn send_frame(&self, frame: Frame) -> bool {
        let Some(connection) = self.live_connection() else {
            return false;
        };
        if frame.payload.len() > self.transport.max_frame_size {
            warn!(size = frame.payload.len(), "Refusing to send oversized frame");
            return false;
        }
        report(connection.send_frame(&frame).await)
    }

    /// Tell the server we are leaving, then shut the connection down.
    ///
    /// Does nothing when there is no live connection.
    pub async fn close(&self) {
        let Some(connection) = self.live_connection() else {
            return;
        };
        if connection.close_with_notice(Some(CLIENT_DISCONNECTING)).await {
            info!(id = connection.id(), "Connection closed");
        }
    }

    /// Resolves once the current connection has shut down; immediately if there is none
    pub async fn closed(&self) {
        if let Some(connection) = self.connection() {
            connection.closed().await;
        }
    }

    /// Switch the current and future connections between framed and raw reads
    pub fn set_raw_mode(&self, raw: bool) {
        self.raw_mode.store(raw, Ordering::Release);
        if let Some(connection) = self.connection() {
            connection.set_raw_mode(raw);
        }
    }

    pub fn events(&self) -> &Dispatcher<C::Object> {
        &self.dispatcher
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Event<C::Object>) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(handler)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }
}

impl<C: ObjectCodec> Drop for Peer<C> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection() {
            connection.abort();
        }
    }
}

async fn open(address: &str, port: u16) -> Result<TcpStream> {
    TcpStream::connect((address, port))
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::ConnectionRefused => {
                ProtocolError::ConnectionRefused(format!("{address}:{port}"))
            }
            io::ErrorKind::TimedOut => ProtocolError::Timeout,
            _ => ProtocolError::Unreachable {
                address: format!("{address}:{port}"),
                source: e,
            },
        })
}

fn report(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "Send failed");
            false
        }
    }
}
