use bytes::Bytes;

use crate::core::frame::{decode_text, encode_text, Frame, MessageType};
use crate::core::serialization::ObjectCodec;
use crate::error::Result;

/// Sent by a peer right before it closes its connection
pub const CLIENT_DISCONNECTING: &str = "ClientDone";

/// Broadcast by the registry right before it disposes
pub const SERVER_EXITING: &str = "ServerDone";

/// Decoded payload of one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Message<O> {
    Text(String),
    Bytes(Bytes),
    Object(O),
}

impl<O> Message<O> {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Text(_) => MessageType::String,
            Message::Bytes(_) => MessageType::Bytes,
            Message::Object(_) => MessageType::Object,
        }
    }

    /// True for the reserved disconnect strings
    pub fn is_disconnect_sentinel(&self) -> bool {
        matches!(self, Message::Text(text) if is_sentinel(text))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Message::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&O> {
        match self {
            Message::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<O> {
        match self {
            Message::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Build the frame for this message, serializing objects through `codec`
    pub fn to_frame<C>(&self, codec: &C) -> Result<Frame>
    where
        C: ObjectCodec<Object = O>,
    {
        let payload = match self {
            Message::Text(text) => Bytes::from(encode_text(text)),
            Message::Bytes(bytes) => bytes.clone(),
            Message::Object(object) => Bytes::from(codec.serialize(object)?),
        };
        Ok(Frame::new(self.message_type(), payload))
    }

    /// Interpret a frame, deserializing objects through `codec`
    pub fn from_frame<C>(frame: Frame, codec: &C) -> Result<Self>
    where
        C: ObjectCodec<Object = O>,
    {
        Ok(match frame.message_type {
            MessageType::String => Message::Text(decode_text(&frame.payload)),
            MessageType::Bytes => Message::Bytes(frame.payload),
            MessageType::Object => Message::Object(codec.deserialize(&frame.payload)?),
        })
    }
}

impl<O> From<&str> for Message<O> {
    fn from(text: &str) -> Self {
        Message::Text(text.to_owned())
    }
}

impl<O> From<String> for Message<O> {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl<O> From<Vec<u8>> for Message<O> {
    fn from(bytes: Vec<u8>) -> Self {
        Message::Bytes(Bytes::from(bytes))
    }
}

impl<O> From<Bytes> for Message<O> {
    fn from(bytes: Bytes) -> Self {
        Message::Bytes(bytes)
    }
}

/// Whether `text` is one of the reserved disconnect strings
#[inline]
pub fn is_sentinel(text: &str) -> bool {
    text == CLIENT_DISCONNECTING || text == SERVER_EXITING
}
