//! Property-based tests using proptest
//!
//! These tests check framing invariants across randomly generated payloads,
//! split points and text inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use proptest::prelude::*;
use remote_link::core::codec::FrameCodec;
use remote_link::core::frame::{decode_header, decode_text, encode, encode_text, MessageType};
use remote_link::core::serialization::{ObjectCodec, SerdeCodec, SerializationFormat};
use remote_link::ProtocolError;
use tokio_util::codec::Decoder;

fn message_type() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::String),
        Just(MessageType::Bytes),
        Just(MessageType::Object),
    ]
}

// Property: every encoded frame decodes to the same type and payload
proptest! {
    #[test]
    fn prop_frame_roundtrip(
        kind in message_type(),
        payload in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let mut buf = BytesMut::from(&encode(kind, &payload).unwrap()[..]);
        let frame = FrameCodec::default().decode(&mut buf).unwrap().expect("complete frame");

        prop_assert_eq!(frame.message_type, kind);
        prop_assert_eq!(&frame.payload[..], &payload[..]);
        prop_assert!(buf.is_empty());
    }
}

// Property: the header always declares exactly the payload length
proptest! {
    #[test]
    fn prop_length_field_matches_payload(
        kind in message_type(),
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let bytes = encode(kind, &payload).unwrap();
        let (decoded_kind, length) = decode_header(&bytes).unwrap();

        prop_assert_eq!(decoded_kind, kind);
        prop_assert_eq!(length as usize, payload.len());
        prop_assert_eq!(bytes.len(), 5 + payload.len());
    }
}

// Property: cutting a frame short never yields a frame
proptest! {
    #[test]
    fn prop_truncated_frame_is_rejected(
        kind in message_type(),
        payload in prop::collection::vec(any::<u8>(), 1..512),
        cut in any::<prop::sample::Index>(),
    ) {
        let bytes = encode(kind, &payload).unwrap();
        let keep = 1 + cut.index(bytes.len() - 1);
        let mut buf = BytesMut::from(&bytes[..keep]);

        let result = FrameCodec::default().decode_eof(&mut buf);
        match result {
            Err(ProtocolError::MalformedHeader(n)) => prop_assert!(n < 5 && n == keep),
            Err(ProtocolError::Truncated { expected, received }) => {
                prop_assert_eq!(expected, payload.len());
                prop_assert_eq!(received, keep - 5);
            }
            other => prop_assert!(false, "unexpected result: {:?}", other),
        }
    }
}

// Property: frames split at any point reassemble in order
proptest! {
    #[test]
    fn prop_stream_reassembly(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8),
        split in any::<prop::sample::Index>(),
    ) {
        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend_from_slice(&encode(MessageType::Bytes, payload).unwrap());
        }
        let at = split.index(stream.len() + 1);

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in [&stream[..at], &stream[at..]] {
            buf.extend_from_slice(chunk);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame.payload.to_vec());
            }
        }

        prop_assert_eq!(decoded, payloads);
    }
}

// Property: ASCII text survives the wire unchanged
proptest! {
    #[test]
    fn prop_ascii_text_roundtrip(text in "[ -~]{0,200}") {
        prop_assert_eq!(decode_text(&encode_text(&text)), text);
    }
}

// Property: one wire byte per character, whatever the input
proptest! {
    #[test]
    fn prop_text_is_single_byte(text in "\\PC{0,100}") {
        let bytes = encode_text(&text);
        prop_assert_eq!(bytes.len(), text.chars().count());
        prop_assert!(bytes.iter().all(|b| b.is_ascii()));
    }
}

// Property: object codecs reconstruct what they serialized, in every format
proptest! {
    #[test]
    fn prop_object_roundtrip(
        values in prop::collection::vec(any::<i64>(), 0..64),
        label in "[a-z]{0,16}",
    ) {
        let value = (values, label);
        for format in [
            SerializationFormat::Bincode,
            SerializationFormat::Json,
            SerializationFormat::MessagePack,
        ] {
            let codec = SerdeCodec::<(Vec<i64>, String)>::new(format);
            let bytes = codec.serialize(&value).unwrap();
            prop_assert_eq!(&codec.deserialize(&bytes).unwrap(), &value);
        }
    }
}
