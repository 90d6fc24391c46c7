//! # Core Framing Components
//!
//! Wire format, codecs, and the object serialization boundary.
//!
//! Nothing in this module performs socket I/O on its own; the transport layer
//! drives [`codec::FrameReader`] over a connection's read half.
//!
//! ## Components
//! - **Frame**: message type tag, payload, and pure encode/decode helpers
//! - **Codec**: Tokio codec and buffered reader for framing over byte streams
//! - **Serialization**: `ObjectCodec` trait and serde-backed implementation
//!
//! ## Wire Format
//! ```text
//! [Type(1)] [Length(4, LE)] [Payload(N)]
//! ```
//!
//! ## Safety Limits
//! - Declared lengths are checked against `max_frame_size` before allocation
//! - Frames are never handed out until every payload byte has arrived

pub mod codec;
pub mod frame;
pub mod serialization;
