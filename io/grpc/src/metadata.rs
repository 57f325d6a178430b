//! gRPC header conventions: timeouts, status messages and reserved names.
//!
//! Only the directions a client needs are here: `grpc-timeout` is encoded
//! and `grpc-message` is decoded.

use std::time::Duration;

/// Default `user-agent` value.
pub const USER_AGENT: &str = concat!("grpc-rust-client/", env!("CARGO_PKG_VERSION"));

pub const CONTENT_TYPE: &str = "application/grpc+proto";

/// Headers the channel sets itself. Caller metadata with these names is
/// dropped.
const RESERVED: &[&str] = &["content-type", "te", "user-agent", "grpc-timeout"];

/// `user-agent` for a call, with an optional caller prefix.
pub fn user_agent(prefix: Option<&str>) -> String {
    match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix} {USER_AGENT}"),
        None => USER_AGENT.to_string(),
    }
}

/// Whether a header name (already lower-case) is owned by the channel.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(':') || RESERVED.contains(&name)
}

/// A `grpc-timeout` value.
///
/// Wire format: up to 8 ASCII digits followed by a unit:
/// - `n`: nanoseconds
/// - `u`: microseconds
/// - `m`: milliseconds
/// - `S`: seconds
/// - `M`: minutes
/// - `H`: hours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    nanos: u128,
}

const MAX_TIMEOUT_VALUE: u128 = 99_999_999;

const UNITS: [(u128, char); 6] = [
    (1, 'n'),
    (1_000, 'u'),
    (1_000_000, 'm'),
    (1_000_000_000, 'S'),
    (60_000_000_000, 'M'),
    (3_600_000_000_000, 'H'),
];

impl Timeout {
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            nanos: duration.as_nanos(),
        }
    }

    /// Format as a header value using the finest unit whose value fits in
    /// 8 digits. Values are rounded up so the server never sees a shorter
    /// timeout than the caller asked for.
    pub fn to_grpc_format(self) -> String {
        for (scale, unit) in UNITS {
            let value = self.nanos.div_ceil(scale);
            if value <= MAX_TIMEOUT_VALUE {
                return format!("{value}{unit}");
            }
        }
        format!("{MAX_TIMEOUT_VALUE}H")
    }
}

/// Decode a `grpc-message` value. `%XX` escapes are decoded; malformed
/// escapes are kept as they are.
pub fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2]))
        {
            out.push((hi << 4) | lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
