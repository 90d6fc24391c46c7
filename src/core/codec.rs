//! # Frame Codec
//!
//! Tokio codec and stateful reader for the `[type][length][payload]` wire format.
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::Framed`, and [`FrameReader`] wraps
//! any `AsyncRead` so the connection reader can switch between framed and raw
//! reads over the same buffered stream.
//!
//! ## Guarantees
//! - A frame is only yielded once all `length` payload bytes are buffered
//! - The declared length is checked against `max_frame_size` before reserving memory
//! - End of stream inside a header is `MalformedHeader`, inside a payload `Truncated`

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::core::frame::{Frame, MessageType, HEADER_SIZE};
use crate::error::{ProtocolError, Result};

/// Upper bound on memory reserved ahead of a single raw read
const RAW_READ_RESERVE: usize = 256 * 1024;

/// Codec for length-prefixed frames
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    #[inline]
    fn declared_length(src: &[u8]) -> usize {
        u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let tag = src[0];
        let length = Self::declared_length(src);
        if length > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(length));
        }

        let total = HEADER_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        // The payload is consumed first so an unknown tag leaves the stream on
        // the next frame boundary.
        let message_type = MessageType::from_tag(tag)?;
        Ok(Some(Frame {
            message_type,
            payload,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match src.len() {
            0 => Ok(None),
            n if n < HEADER_SIZE => Err(ProtocolError::MalformedHeader(n)),
            n => Err(ProtocolError::Truncated {
                expected: Self::declared_length(src),
                received: n - HEADER_SIZE,
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(frame.payload.len()));
        }
        frame.write_to(dst)
    }
}

/// Buffered frame reader over an async byte source
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
    codec: FrameCodec,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, codec: FrameCodec) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(8 * 1024),
            codec,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Ok(None)` when the source closes cleanly on a frame boundary.
    /// Cancel safe: partially received bytes stay buffered for the next call.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            if self.inner.read_buf(&mut self.buffer).await? == 0 {
                return self.codec.decode_eof(&mut self.buffer);
            }
        }
    }

    /// Read whatever is available, up to `max` bytes, without framing.
    ///
    /// Bytes left over from framed reads are returned first. An empty chunk means
    /// the source reached end of stream.
    pub async fn read_chunk(&mut self, max: usize) -> Result<Bytes> {
        if !self.buffer.is_empty() {
            let n = self.buffer.len().min(max);
            return Ok(self.buffer.split_to(n).freeze());
        }

        self.buffer.reserve(max.min(RAW_READ_RESERVE));
        let mut limited = (&mut self.inner).take(max as u64);
        limited.read_buf(&mut self.buffer).await?;
        Ok(self.buffer.split().freeze())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::core::frame::encode;

    #[test]
    fn test_decode_waits_for_full_payload() {
        let mut codec = FrameCodec::default();
        let bytes = encode(MessageType::Bytes, &[1, 2, 3, 4]).unwrap();

        let mut buf = BytesMut::from(&bytes[..7]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);

        buf.extend_from_slice(&bytes[7..]);
        let frame = codec.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(frame.payload.as_ref(), &[1, 2, 3, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_tag_consumes_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[9, 2, 0, 0, 0, 0xAA, 0xBB]);
        buf.extend_from_slice(&encode(MessageType::String, b"ok").unwrap());

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnknownMessageType(9))
        ));
        let next = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.message_type, MessageType::String);
        assert_eq!(next.payload.as_ref(), b"ok");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::from(&[1u8, 17, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedFrame(17))
        ));
    }

    #[test]
    fn test_decode_eof_truncated() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[1u8, 10, 0, 0, 0, 1, 2, 3][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::Truncated {
                expected: 10,
                received: 3
            })
        ));
    }

    #[test]
    fn test_decode_eof_partial_header() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[1u8, 10][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::MalformedHeader(2))
        ));
    }

    #[test]
    fn test_encoder_matches_frame_encoding() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new(MessageType::String, &b"hi"[..]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], &encode(MessageType::String, b"hi").unwrap()[..]);
    }

    #[tokio::test]
    async fn test_reader_across_partial_reads() {
        use tokio::io::AsyncWriteExt;

        let bytes = encode(MessageType::Object, &[5u8; 300]).unwrap();
        let (mut tx, rx) = tokio::io::duplex(16);
        tokio::spawn(async move {
            for chunk in bytes.chunks(7) {
                tx.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut reader = FrameReader::new(rx, FrameCodec::default());
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.message_type, MessageType::Object);
        assert_eq!(frame.payload.len(), 300);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_chunk_drains_buffer_first() {
        let mut data = encode(MessageType::Bytes, b"abc").unwrap().to_vec();
        data.extend_from_slice(b"tail");
        let mut reader = FrameReader::new(&data[..], FrameCodec::default());

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"abc");
        let chunk = reader.read_chunk(1024).await.unwrap();
        assert_eq!(chunk.as_ref(), b"tail");
        assert!(reader.read_chunk(1024).await.unwrap().is_empty());
    }
}
