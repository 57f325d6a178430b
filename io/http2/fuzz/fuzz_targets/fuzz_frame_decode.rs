#![no_main]

use bytes::BytesMut;
use http2::{FrameDecoder, FrameEncoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let decoder = FrameDecoder::new();
    let encoder = FrameEncoder::new();
    let mut buf = BytesMut::from(data);

    while let Ok(Some(frame)) = decoder.decode(&mut buf) {
        let _ = frame.stream_id();

        // Whatever decodes must encode, and the encoding must decode again.
        let mut out = BytesMut::new();
        encoder.encode(&frame, &mut out);
        let again = decoder.decode(&mut out);
        assert!(matches!(again, Ok(Some(_))), "re-encoded frame failed to decode");
    }
});
