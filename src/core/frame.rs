//! # Frame
//!
//! The wire unit exchanged by peers.
//!
//! ```text
//! [Type(1)] [Length(4, little-endian)] [Payload(N)]
//! ```
//!
//! The type tag tells the reader how to interpret the payload, and the fixed-width
//! length tells it exactly how many bytes to pull before a message is complete.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Size of the type tag
pub const TYPE_SIZE: usize = 1;

/// Size of the little-endian payload length
pub const LENGTH_SIZE: usize = 4;

/// Full header size: type tag followed by payload length
pub const HEADER_SIZE: usize = TYPE_SIZE + LENGTH_SIZE;

/// Largest payload the length field can describe
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// Payload interpretation carried in the first byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Single-byte (ASCII) encoded text
    String = 0,
    /// Opaque bytes handed to the receiver verbatim
    Bytes = 1,
    /// Bytes produced by an [`ObjectCodec`](crate::core::serialization::ObjectCodec)
    Object = 2,
}

impl MessageType {
    /// Wire tag for this type
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(MessageType::String),
            1 => Ok(MessageType::Bytes),
            2 => Ok(MessageType::Object),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// One complete unit on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// Encoded size including the header
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append the encoded frame to `dst`.
    ///
    /// Nothing is written if the payload is too long for the length field.
    pub fn write_to(&self, dst: &mut BytesMut) -> Result<()> {
        let length = length_field(self.payload.len())?;
        dst.reserve(self.encoded_len());
        dst.put_u8(self.message_type.tag());
        dst.put_u32_le(length);
        dst.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Encode into a freshly allocated buffer
    pub fn to_bytes(&self) -> Result<Bytes> {
        encode(self.message_type, &self.payload)
    }
}

/// Length field for a payload of `len` bytes.
///
/// Fails with `OversizedFrame` above [`MAX_PAYLOAD_LEN`].
pub fn length_field(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| ProtocolError::OversizedFrame(len))
}

/// Encode a payload as a complete frame.
///
/// The length field always equals `payload.len()`.
pub fn encode(message_type: MessageType, payload: &[u8]) -> Result<Bytes> {
    let length = length_field(payload.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(message_type.tag());
    buf.put_u32_le(length);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Parse the fixed 5-byte header at the start of `header`.
///
/// Returns the message type and the declared payload length.
pub fn decode_header(header: &[u8]) -> Result<(MessageType, u32)> {
    if header.len() < HEADER_SIZE {
        return Err(ProtocolError::MalformedHeader(header.len()));
    }

    let message_type = MessageType::from_tag(header[0])?;
    let length = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
    Ok((message_type, length))
}

/// Encode text with the single-byte character set used on the wire.
///
/// Characters outside ASCII are replaced with `?`, so the byte count always equals
/// the character count.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}

/// Decode wire text, mapping bytes outside ASCII to `?`
pub fn decode_text(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}
