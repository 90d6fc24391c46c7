//! # Connection Reader
//!
//! Per-connection receive loop. Reads frames (or raw chunks) until the stream
//! ends, the connection is closed, or the stream can no longer be framed, and
//! hands each decoded message to the dispatcher in stream order.
//!
//! ## Loop Rules
//! - Empty payloads are dropped without an event
//! - A disconnect sentinel shuts the socket down before it is dispatched
//! - Unknown tags and object decode failures raise `DecodeFailed` and reading continues
//! - Oversized, truncated or malformed frames end the loop

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::core::codec::{FrameCodec, FrameReader};
use crate::core::serialization::ObjectCodec;
use crate::core::frame::Frame;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::{DisconnectReason, Dispatcher, Event};
use crate::protocol::message::Message;
use crate::transport::connection::Connection;
use crate::utils::Metrics;

/// Result of one read step
#[derive(Debug)]
pub enum ReadOutcome<O> {
    Message(Message<O>),
    Raw(Bytes),
    /// A zero-length frame
    Empty,
    /// The frame was consumed but could not be decoded
    Skipped(ProtocolError),
    Closed(DisconnectReason),
}

pub struct ConnectionReader<C: ObjectCodec> {
    connection: Arc<Connection>,
    reader: FrameReader<OwnedReadHalf>,
    raw_mode: watch::Receiver<bool>,
    codec: Arc<C>,
    dispatcher: Dispatcher<C::Object>,
    raw_chunk_size: usize,
    metrics: Arc<Metrics>,
}

impl<C: ObjectCodec> ConnectionReader<C> {
    pub fn new(
        connection: Arc<Connection>,
        read_half: OwnedReadHalf,
        frame_codec: FrameCodec,
        codec: Arc<C>,
        dispatcher: Dispatcher<C::Object>,
        raw_chunk_size: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        let raw_mode = connection.raw_mode_changes();
        Self {
            connection,
            reader: FrameReader::new(read_half, frame_codec),
            raw_mode,
            codec,
            dispatcher,
            raw_chunk_size,
            metrics,
        }
    }

    /// Read and decode the next unit from the stream.
    ///
    /// Returns `Closed` as soon as the connection is shut down locally, even
    /// while a read is pending. A raw mode switch restarts a pending read in
    /// the new mode.
    pub async fn read_next(&mut self) -> ReadOutcome<C::Object> {
        let token = self.connection.close_token();
        loop {
            if token.is_cancelled() {
                return ReadOutcome::Closed(DisconnectReason::Closed);
            }

            let raw = *self.raw_mode.borrow_and_update();
            if raw {
                let chunk = tokio::select! {
                    biased;
                    _ = token.cancelled() => return ReadOutcome::Closed(DisconnectReason::Closed),
                    Ok(()) = self.raw_mode.changed() => continue,
                    chunk = self.reader.read_chunk(self.raw_chunk_size) => chunk,
                };

                return match chunk {
                    Ok(data) if data.is_empty() => ReadOutcome::Closed(DisconnectReason::PeerClosed),
                    Ok(data) => {
                        self.metrics.frame_received(data.len() as u64);
                        ReadOutcome::Raw(data)
                    }
                    Err(e) => ReadOutcome::Closed(e.into()),
                };
            }

            let frame = tokio::select! {
                biased;
                _ = token.cancelled() => return ReadOutcome::Closed(DisconnectReason::Closed),
                Ok(()) = self.raw_mode.changed() => continue,
                frame = self.reader.read_frame() => frame,
            };

            return self.decode(frame);
        }
    }

    fn decode(&self, frame: Result<Option<Frame>>) -> ReadOutcome<C::Object> {
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return ReadOutcome::Closed(DisconnectReason::PeerClosed),
            Err(e) if e.is_recoverable() => return ReadOutcome::Skipped(e),
            Err(e) => return ReadOutcome::Closed(e.into()),
        };

        self.metrics.frame_received(frame.encoded_len() as u64);

        if frame.payload.is_empty() {
            return ReadOutcome::Empty;
        }

        match Message::from_frame(frame, self.codec.as_ref()) {
            Ok(message) => ReadOutcome::Message(message),
            Err(e) if e.is_recoverable() => ReadOutcome::Skipped(e),
            Err(e) => ReadOutcome::Closed(e.into()),
        }
    }

    /// Drive the connection until it stops, dispatching along the way.
    ///
    /// The socket is shut down before this returns. The caller is responsible
    /// for the final disconnect event.
    pub async fn run(mut self) -> DisconnectReason {
        let id = self.connection.id();
        debug!(id, peer = %self.connection.peer_addr(), "Reader started");

        let reason = loop {
            match self.read_next().await {
                ReadOutcome::Message(message) => {
                    if message.is_disconnect_sentinel() {
                        let sentinel = message.as_text().unwrap_or_default().to_string();
                        debug!(id, sentinel = %sentinel, "Remote end is disconnecting");
                        self.connection.mark_disposed();
                        self.connection.shutdown().await;
                        self.dispatcher.dispatch(&Event::MessageReceived {
                            connection: self.connection.clone(),
                            message,
                        });
                        break DisconnectReason::Sentinel(sentinel);
                    }

                    trace!(id, kind = ?message.message_type(), "Message received");
                    self.dispatcher.dispatch(&Event::MessageReceived {
                        connection: self.connection.clone(),
                        message,
                    });
                }
                ReadOutcome::Raw(data) => {
                    trace!(id, bytes = data.len(), "Raw chunk received");
                    self.dispatcher.dispatch(&Event::RawMessage {
                        connection: self.connection.clone(),
                        data,
                    });
                }
                ReadOutcome::Empty => {
                    trace!(id, "Dropped empty frame");
                }
                ReadOutcome::Skipped(error) => {
                    warn!(id, error = %error, "Frame could not be decoded");
                    self.metrics.decode_failed();
                    self.dispatcher.dispatch(&Event::DecodeFailed {
                        connection: self.connection.clone(),
                        error: Arc::new(error),
                    });
                }
                ReadOutcome::Closed(reason) => break reason,
            }
        };

        self.connection.shutdown().await;
        debug!(id, reason = ?reason, "Reader stopped");
        reason
    }
}
