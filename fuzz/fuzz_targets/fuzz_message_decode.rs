#![no_main]

use libfuzzer_sys::fuzz_target;
use remote_link::core::frame::{Frame, MessageType};
use remote_link::core::serialization::{SerdeCodec, SerializationFormat};
use remote_link::protocol::message::Message;

fuzz_target!(|data: &[u8]| {
    // Object payloads from the wire are untrusted; decoding must fail cleanly
    for format in [
        SerializationFormat::Bincode,
        SerializationFormat::Json,
        SerializationFormat::MessagePack,
    ] {
        let codec = SerdeCodec::<(u32, String, Vec<u8>)>::new(format);
        let frame = Frame::new(MessageType::Object, data.to_vec());
        let _ = Message::from_frame(frame, &codec);
    }
});
