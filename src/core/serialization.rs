//! # Object Serialization
//!
//! The boundary between the framing layer and application objects.
//!
//! Object frames carry bytes produced by an [`ObjectCodec`]. The core never looks
//! inside them: it hands the payload to `deserialize` and dispatches whatever value
//! comes back. Applications register a closed set of payload variants as the codec's
//! `Object` type, usually a serde enum, and [`SerdeCodec`] covers the common case.
//!
//! ## Formats
//! - **Bincode**: compact binary (default)
//! - **JSON**: human-readable, handy when debugging traffic
//! - **MessagePack**: compact and self-describing
//!
//! ## Usage
//! ```rust
//! use remote_link::core::serialization::{ObjectCodec, SerdeCodec, SerializationFormat};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! enum Command {
//!     Count(u32),
//!     Reset,
//! }
//!
//! let codec = SerdeCodec::<Command>::new(SerializationFormat::MessagePack);
//! let bytes = codec.serialize(&Command::Count(3)).unwrap();
//! assert_eq!(codec.deserialize(&bytes).unwrap(), Command::Count(3));
//! ```

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
    /// Compact binary format (MessagePack, efficient)
    MessagePack,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
            SerializationFormat::MessagePack => "MessagePack",
        }
    }

    /// Serialize a value with this format
    pub fn to_bytes<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializationFormat::Bincode => bincode::serialize(value)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
            SerializationFormat::Json => serde_json::to_vec(value)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
            SerializationFormat::MessagePack => rmp_serde::to_vec(value)
                .map_err(|e| ProtocolError::SerializeError(e.to_string())),
        }
    }

    /// Deserialize a value with this format
    pub fn from_bytes<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| ProtocolError::DecodeFailure(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| ProtocolError::DecodeFailure(e.to_string())),
            SerializationFormat::MessagePack => rmp_serde::from_slice(data)
                .map_err(|e| ProtocolError::DecodeFailure(e.to_string())),
        }
    }
}

/// Opaque serializer for object payloads.
///
/// `deserialize` must report failures as [`ProtocolError::DecodeFailure`]; the
/// connection reader treats that as a recoverable, per-frame problem.
pub trait ObjectCodec: Send + Sync + 'static {
    /// The application's payload type
    type Object: Send + Sync + 'static;

    fn serialize(&self, value: &Self::Object) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Object>;
}

/// [`ObjectCodec`] for any serde type
pub struct SerdeCodec<T> {
    format: SerializationFormat,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    pub fn new(format: SerializationFormat) -> Self {
        Self {
            format,
            _marker: PhantomData,
        }
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }
}

impl<T> Default for SerdeCodec<T> {
    fn default() -> Self {
        Self::new(SerializationFormat::default())
    }
}

impl<T> Clone for SerdeCodec<T> {
    fn clone(&self) -> Self {
        Self::new(self.format)
    }
}

impl<T> fmt::Debug for SerdeCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeCodec")
            .field("format", &self.format)
            .finish()
    }
}

impl<T> ObjectCodec for SerdeCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Object = T;

    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        self.format.to_bytes(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        if bytes.is_empty() {
            return Err(ProtocolError::DecodeFailure("Empty object payload".into()));
        }
        self.format.from_bytes(bytes)
    }
}
