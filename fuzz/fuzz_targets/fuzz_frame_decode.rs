#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use remote_link::core::codec::FrameCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never panic the decoder or make it allocate past the limit
    let mut codec = FrameCodec::new(64 * 1024);
    let mut buf = BytesMut::from(data);
    loop {
        match codec.decode(&mut buf) {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) if e.is_recoverable() => continue,
            Err(_) => return,
        }
    }
    let _ = codec.decode_eof(&mut buf);
});
