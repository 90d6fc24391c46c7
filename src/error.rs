//! # Error Types
//!
//! Error handling for the framing layer, the connection lifecycle and the
//! configuration surface.
//!
//! ## Error Categories
//! - **Connect errors**: refused or unreachable endpoints, surfaced to the caller of `connect`
//! - **Framing errors**: malformed headers, truncated payloads, oversized frames
//! - **Object errors**: payloads the [`ObjectCodec`](crate::core::serialization::ObjectCodec)
//!   could not serialize or reconstruct
//! - **Send errors**: writes attempted on a connection that is closed or was never opened
//!
//! Send paths on [`Peer`](crate::transport::peer::Peer) and
//! [`Registry`](crate::transport::registry::Registry) report failure as a `bool`;
//! the variants below are what the lower layers return before that conversion.
//!
//! ## Example Usage
//! ```rust
//! use remote_link::core::frame::decode_header;
//! use remote_link::error::ProtocolError;
//!
//! match decode_header(&[0x00, 0x01]) {
//!     Err(ProtocolError::MalformedHeader(available)) => assert_eq!(available, 2),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Peer-related error messages
    pub const ERR_PEER_WRITE_LOCK: &str = "Failed to acquire write lock on peer connection slot";

    /// Connection errors
    pub const ERR_NOT_CONNECTED: &str = "Connection is closed or was never opened";
    pub const ERR_ALREADY_CONNECTED: &str = "Peer already owns a live connection";
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";

    /// Listener errors
    pub const ERR_LISTENER_FAILED: &str = "Listener failed repeatedly and was stopped";
}

/// ProtocolError is the primary error type for all operations in this crate
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    #[error("Endpoint unreachable: {address} ({source})")]
    Unreachable {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Frame header shorter than 5 bytes ({0} available)")]
    MalformedHeader(usize),

    #[error("Truncated frame: expected {expected} payload bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("Unknown message type tag: {0}")]
    UnknownMessageType(u8),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("{}", constants::ERR_NOT_CONNECTED)]
    NotConnected,

    #[error("{}", constants::ERR_ALREADY_CONNECTED)]
    AlreadyConnected,

    #[error("{}", constants::ERR_CONNECTION_CLOSED)]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Listener failed: {0}")]
    ListenerFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl ProtocolError {
    /// Whether the stream can keep being read after this error.
    ///
    /// Unknown tags and undecodable objects leave the stream aligned on the next
    /// frame boundary; everything else means the byte stream is no longer usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownMessageType(_) | ProtocolError::DecodeFailure(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
