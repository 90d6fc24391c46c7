//! # Protocol Layer
//!
//! Typed messages on top of frames, and the observer registry that delivers them.
//!
//! ## Components
//! - **Message**: `Text` / `Bytes` / `Object` payloads and the reserved disconnect strings
//! - **Dispatcher**: subscription-based delivery of [`dispatcher::Event`]s
//!
//! ## Disconnect Protocol
//! A peer sends `"ClientDone"` before closing; a registry broadcasts `"ServerDone"`
//! before disposing. Receiving either shuts the socket down in both directions
//! before the message is dispatched.

pub mod dispatcher;
pub mod message;

pub use dispatcher::{DisconnectReason, Dispatcher, Event, SubscriptionId};
pub use message::{Message, CLIENT_DISCONNECTING, SERVER_EXITING};
