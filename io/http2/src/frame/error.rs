//! Protocol error codes and frame-level failures.

use std::fmt;

/// Error codes carried by RST_STREAM and GOAWAY (RFC 9113 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    /// Unknown codes must not trigger special behavior.
    Unknown(u32),
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            other => ErrorCode::Unknown(other),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
            ErrorCode::Unknown(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
            ErrorCode::Unknown(code) => return write!(f, "UNKNOWN(0x{code:x})"),
        };
        f.write_str(name)
    }
}

/// Failures detected while decoding a frame.
///
/// All of these are connection errors: the byte stream can no longer be
/// trusted once one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("frame type 0x{frame_type:x} is not allowed on stream 0")]
    StreamIdRequired { frame_type: u8 },
    #[error("frame type 0x{frame_type:x} must be sent on stream 0")]
    StreamIdNotAllowed { frame_type: u8 },
    #[error("frame type 0x{frame_type:x} expected {expected} byte payload, got {actual}")]
    InvalidPayloadLength {
        frame_type: u8,
        expected: usize,
        actual: usize,
    },
    #[error("pad length {pad_length} exceeds payload length {payload_length}")]
    InvalidPadding {
        pad_length: u8,
        payload_length: usize,
    },
    #[error("invalid value {value} for setting 0x{id:x}")]
    InvalidSettingValue { id: u16, value: u32 },
    #[error("window increment must be non-zero")]
    ZeroWindowIncrement,
}

impl FrameError {
    /// The error code to report in GOAWAY for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::FrameTooLarge { .. } | FrameError::InvalidPayloadLength { .. } => {
                ErrorCode::FrameSizeError
            }
            FrameError::InvalidSettingValue { id: 0x4, .. } => ErrorCode::FlowControlError,
            _ => ErrorCode::ProtocolError,
        }
    }
}
