//! HTTP/2 frame layer (RFC 9113 Section 4 and 6).
//!
//! Every frame starts with the same 9-byte header:
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! |                   Frame Payload (0...)                      ...
//! +---------------------------------------------------------------+
//! ```

mod decode;
mod encode;
mod error;
mod types;

pub use decode::FrameDecoder;
pub use encode::FrameEncoder;
pub use error::{ErrorCode, FrameError};
pub use types::*;

/// Largest frame payload the protocol can express (2^24 - 1).
pub const MAX_FRAME_SIZE: u32 = 16_777_215;

/// Frame payload limit every peer must accept.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Connection preface written by the client before its first SETTINGS.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Flow-control window size at connection start.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Largest flow-control window (2^31 - 1).
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// HPACK dynamic table size at connection start.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

/// Concurrent stream limit advertised to servers.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;
