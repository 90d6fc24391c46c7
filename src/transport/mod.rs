//! # Transport Layer
//!
//! TCP endpoints built on the framing layer.
//!
//! ## Components
//! - **Connection**: shared handle over one socket, with a serialized write path
//! - **ConnectionReader**: per-connection receive loop feeding the dispatcher
//! - **Peer**: client role, one outbound connection with connect and retry
//! - **Registry**: server role, listener plus the set of accepted connections
//!
//! One tokio task runs per live connection; closing a connection cancels its
//! reader through the connection's close signal.

pub mod connection;
pub mod peer;
pub mod reader;
pub mod registry;

pub use connection::{Connection, ConnectionId, ConnectionOptions};
pub use peer::Peer;
pub use reader::{ConnectionReader, ReadOutcome};
pub use registry::Registry;
