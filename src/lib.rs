//! # remote-link
//!
//! Framed TCP messaging between a server-side [`Registry`] and client-side
//! [`Peer`]s. Every message travels as
//!
//! ```text
//! [Type(1)] [Length(4, LE)] [Payload(N)]
//! ```
//!
//! where the type is `0` for ASCII text, `1` for opaque bytes and `2` for an
//! application object serialized through an [`ObjectCodec`].
//!
//! ## Quick Start
//! ```rust,no_run
//! use remote_link::{Event, Peer, Registry, SerdeCodec};
//!
//! # async fn run() -> remote_link::Result<()> {
//! let registry = Registry::start_new(888, SerdeCodec::<String>::default()).await?;
//! registry.subscribe(|event| {
//!     if let Event::MessageReceived { connection, message } = event {
//!         println!("{} sent {message:?}", connection.peer_addr());
//!     }
//! })?;
//!
//! let peer = Peer::connect("localhost", 888, SerdeCodec::<String>::default()).await?;
//! peer.send_object(&"hello".to_string()).await;
//! peer.close().await;
//!
//! registry.dispose().await;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::frame::{Frame, MessageType};
pub use crate::core::serialization::{ObjectCodec, SerdeCodec, SerializationFormat};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{DisconnectReason, Dispatcher, Event, Message, SubscriptionId};
pub use crate::transport::{Connection, Peer, Registry};
