//! Frame type definitions.

use bytes::Bytes;

/// Frame types (RFC 9113 Section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        let ty = match byte {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            _ => return None,
        };
        Some(ty)
    }
}

/// Frame flag bits.
pub mod flags {
    /// DATA/HEADERS: last frame the sender will emit on this stream.
    pub const END_STREAM: u8 = 0x1;
    /// SETTINGS/PING: acknowledgment.
    pub const ACK: u8 = 0x1;
    /// HEADERS/PUSH_PROMISE/CONTINUATION: header block is complete.
    pub const END_HEADERS: u8 = 0x4;
    /// DATA/HEADERS/PUSH_PROMISE: payload is padded.
    pub const PADDED: u8 = 0x8;
    /// HEADERS: priority fields precede the header block.
    pub const PRIORITY: u8 = 0x20;
}

/// Stream identifier. The reserved high bit is always cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Stream 0, used by connection-level frames.
    pub const CONNECTION: StreamId = StreamId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        StreamId(id & 0x7FFF_FFFF)
    }

    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_connection_level(self) -> bool {
        self.0 == 0
    }

    /// Client-initiated streams use odd identifiers.
    #[inline]
    pub fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        StreamId::new(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed 9-byte header in front of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, flags: u8, stream_id: StreamId, length: u32) -> Self {
        Self {
            length,
            frame_type: frame_type as u8,
            flags,
            stream_id,
        }
    }

    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A decoded frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    GoAway(GoAwayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    /// Frames of unknown type are ignored by receivers.
    Unknown(UnknownFrame),
}

impl Frame {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data(f) => f.stream_id,
            Frame::Headers(f) => f.stream_id,
            Frame::Priority(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::PushPromise(f) => f.stream_id,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Continuation(f) => f.stream_id,
            Frame::Unknown(f) => f.stream_id,
            Frame::Settings(_) | Frame::Ping(_) | Frame::GoAway(_) => StreamId::CONNECTION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub end_stream: bool,
    pub data: Bytes,
    /// Payload bytes consumed by padding, including the pad length octet.
    /// Padding counts against flow control even though it carries no data.
    pub padding: u32,
}

impl DataFrame {
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        Self {
            stream_id,
            end_stream,
            data,
            padding: 0,
        }
    }

    /// Bytes this frame charges against the receive window.
    pub fn flow_controlled_len(&self) -> u32 {
        self.data.len() as u32 + self.padding
    }
}

#[derive(Debug, Clone)]
pub struct HeadersFrame {
    pub stream_id: StreamId,
    pub end_stream: bool,
    pub end_headers: bool,
    pub priority: Option<Priority>,
    /// HPACK-encoded header block fragment.
    pub header_block: Bytes,
}

/// Stream dependency fields carried by HEADERS and PRIORITY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: StreamId,
    /// Weight minus one (the wire value).
    pub weight: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct PriorityFrame {
    pub stream_id: StreamId,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    pub error_code: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsFrame {
    pub ack: bool,
    pub settings: Vec<Setting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub id: SettingId,
    pub value: u32,
}

impl Setting {
    pub fn new(id: SettingId, value: u32) -> Self {
        Self { id, value }
    }
}

/// Setting identifiers (RFC 9113 Section 6.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
    /// Unknown settings must be ignored.
    Unknown(u16),
}

impl SettingId {
    pub fn from_u16(id: u16) -> Self {
        match id {
            0x1 => SettingId::HeaderTableSize,
            0x2 => SettingId::EnablePush,
            0x3 => SettingId::MaxConcurrentStreams,
            0x4 => SettingId::InitialWindowSize,
            0x5 => SettingId::MaxFrameSize,
            0x6 => SettingId::MaxHeaderListSize,
            other => SettingId::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            SettingId::HeaderTableSize => 0x1,
            SettingId::EnablePush => 0x2,
            SettingId::MaxConcurrentStreams => 0x3,
            SettingId::InitialWindowSize => 0x4,
            SettingId::MaxFrameSize => 0x5,
            SettingId::MaxHeaderListSize => 0x6,
            SettingId::Unknown(id) => id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushPromiseFrame {
    pub stream_id: StreamId,
    pub end_headers: bool,
    pub promised_stream_id: StreamId,
    pub header_block: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    pub ack: bool,
    pub data: [u8; 8],
}

#[derive(Debug, Clone)]
pub struct GoAwayFrame {
    pub last_stream_id: StreamId,
    pub error_code: u32,
    pub debug_data: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    pub stream_id: StreamId,
    pub increment: u32,
}

#[derive(Debug, Clone)]
pub struct ContinuationFrame {
    pub stream_id: StreamId,
    pub end_headers: bool,
    pub header_block: Bytes,
}

#[derive(Debug, Clone)]
pub struct UnknownFrame {
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
    pub payload: Bytes,
}
