#![no_main]

use grpc_client::Target;
use grpc_client::metadata::{Timeout, percent_decode};
use libfuzzer_sys::fuzz_target;
use std::time::Duration;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let decoded = percent_decode(text);
    assert!(decoded.len() <= text.len() * 3);

    if let Some(nanos) = data.get(..8) {
        let nanos = u64::from_le_bytes(nanos.try_into().unwrap_or_default());
        let wire = Timeout::from_duration(Duration::from_nanos(nanos)).to_grpc_format();
        let (digits, unit) = wire.split_at(wire.len() - 1);
        assert!(digits.len() <= 8, "{wire}");
        assert!("numSMH".contains(unit), "{wire}");
    }

    if let Ok(target) = Target::parse(text, false) {
        assert!(!target.host().is_empty());
        assert_ne!(target.port(), 0);
    }
});
