#![no_main]

use bytes::BytesMut;
use http2::{HpackDecoder, HpackEncoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = HpackDecoder::new();
    let Ok(headers) = decoder.decode(data) else {
        return;
    };
    if headers.is_empty() {
        return;
    }

    let mut encoder = HpackEncoder::new();
    let mut encoded = BytesMut::new();
    encoder.encode(&headers, &mut encoded);

    let decoded = HpackDecoder::new()
        .decode(&encoded)
        .expect("re-encoded block must decode");
    assert_eq!(headers, decoded, "roundtrip mismatch");
});
