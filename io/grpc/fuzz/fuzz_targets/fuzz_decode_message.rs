#![no_main]

use bytes::{Bytes, BytesMut};
use grpc_client::frame::strip_message_header;
use grpc_client::{decode_message, encode_message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = strip_message_header(Bytes::copy_from_slice(data));

    let mut buf = BytesMut::from(data);
    while let Ok(Some((message, _compressed))) = decode_message(&mut buf) {
        let reencoded =
            encode_message(&message).expect("decoded message is within the size limit");
        assert_eq!(
            strip_message_header(reencoded.clone()).ok(),
            Some(message.clone())
        );

        let mut rebuf = BytesMut::from(&reencoded[..]);
        let (redecoded, compressed) = decode_message(&mut rebuf)
            .expect("re-encoded message must decode")
            .expect("re-encoded message is complete");
        assert_eq!(message, redecoded);
        assert!(!compressed);
    }
});
