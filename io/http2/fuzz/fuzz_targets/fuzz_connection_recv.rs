#![no_main]

use bytes::Bytes;
use http2::{Connection, HeaderField, PlainTransport, Transport};
use libfuzzer_sys::fuzz_target;

// Arbitrary server bytes must never panic the client engine.
fuzz_target!(|data: &[u8]| {
    let mut conn = Connection::new(PlainTransport::new());
    if conn.on_transport_ready().is_err() {
        return;
    }
    let headers = [
        HeaderField::new(":method", "POST"),
        HeaderField::new(":scheme", "http"),
        HeaderField::new(":path", "/fuzz.Svc/Call"),
        HeaderField::new(":authority", "localhost"),
    ];
    if let Ok(stream_id) = conn.start_request(&headers, false) {
        let _ = conn.send_data(stream_id, Bytes::from_static(b"\0\0\0\0\0"), true);
    }

    for chunk in data.chunks(97) {
        if conn.on_recv(chunk).is_err() {
            break;
        }
        let _ = conn.poll_events();
        let _ = conn.flush();
        let pending = conn.transport().pending_send().len();
        conn.transport_mut().advance_send(pending);
    }
});
