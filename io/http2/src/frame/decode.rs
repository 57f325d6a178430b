//! Frame parsing.

use bytes::{Buf, Bytes, BytesMut};

use super::error::FrameError;
use super::types::*;
use super::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, MAX_FRAME_SIZE, MAX_WINDOW_SIZE};

/// Parses frames out of a receive buffer.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Largest payload accepted from the peer. This is the value we
    /// advertised in SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size.clamp(DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_SIZE);
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` until a whole frame is buffered. Consumed bytes
    /// are removed from `buf` only when a frame is returned.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = peek_header(buf);
        if header.length > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: header.length,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + header.length as usize;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.length as usize).freeze();
        parse_frame(header, payload).map(Some)
    }
}

fn peek_header(buf: &[u8]) -> FrameHeader {
    let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
    let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
    FrameHeader {
        length,
        frame_type: buf[3],
        flags: buf[4],
        stream_id: StreamId::new(stream_id),
    }
}

fn parse_frame(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    let Some(kind) = header.kind() else {
        return Ok(Frame::Unknown(UnknownFrame {
            frame_type: header.frame_type,
            flags: header.flags,
            stream_id: header.stream_id,
            payload,
        }));
    };

    match kind {
        FrameType::Data => parse_data(header, payload),
        FrameType::Headers => parse_headers(header, payload),
        FrameType::Priority => {
            require_stream(&header)?;
            expect_length(&header, &payload, 5)?;
            Ok(Frame::Priority(PriorityFrame {
                stream_id: header.stream_id,
                priority: read_priority(&payload),
            }))
        }
        FrameType::RstStream => {
            require_stream(&header)?;
            expect_length(&header, &payload, 4)?;
            Ok(Frame::RstStream(RstStreamFrame {
                stream_id: header.stream_id,
                error_code: read_u32(&payload),
            }))
        }
        FrameType::Settings => parse_settings(header, payload),
        FrameType::PushPromise => parse_push_promise(header, payload),
        FrameType::Ping => {
            forbid_stream(&header)?;
            expect_length(&header, &payload, 8)?;
            let mut data = [0u8; 8];
            data.copy_from_slice(&payload);
            Ok(Frame::Ping(PingFrame {
                ack: header.has_flag(flags::ACK),
                data,
            }))
        }
        FrameType::GoAway => {
            forbid_stream(&header)?;
            if payload.len() < 8 {
                return Err(FrameError::InvalidPayloadLength {
                    frame_type: header.frame_type,
                    expected: 8,
                    actual: payload.len(),
                });
            }
            Ok(Frame::GoAway(GoAwayFrame {
                last_stream_id: StreamId::new(read_u32(&payload)),
                error_code: read_u32(&payload[4..]),
                debug_data: payload.slice(8..),
            }))
        }
        FrameType::WindowUpdate => {
            expect_length(&header, &payload, 4)?;
            let increment = read_u32(&payload) & 0x7FFF_FFFF;
            if increment == 0 {
                return Err(FrameError::ZeroWindowIncrement);
            }
            Ok(Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: header.stream_id,
                increment,
            }))
        }
        FrameType::Continuation => {
            require_stream(&header)?;
            Ok(Frame::Continuation(ContinuationFrame {
                stream_id: header.stream_id,
                end_headers: header.has_flag(flags::END_HEADERS),
                header_block: payload,
            }))
        }
    }
}

fn parse_data(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;
    let total = payload.len() as u32;
    let data = if header.has_flag(flags::PADDED) {
        remove_padding(payload)?
    } else {
        payload
    };
    Ok(Frame::Data(DataFrame {
        stream_id: header.stream_id,
        end_stream: header.has_flag(flags::END_STREAM),
        padding: total - data.len() as u32,
        data,
    }))
}

fn parse_headers(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;
    let mut block = if header.has_flag(flags::PADDED) {
        remove_padding(payload)?
    } else {
        payload
    };

    let priority = if header.has_flag(flags::PRIORITY) {
        if block.len() < 5 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: header.frame_type,
                expected: 5,
                actual: block.len(),
            });
        }
        let priority = read_priority(&block);
        block.advance(5);
        Some(priority)
    } else {
        None
    };

    Ok(Frame::Headers(HeadersFrame {
        stream_id: header.stream_id,
        end_stream: header.has_flag(flags::END_STREAM),
        end_headers: header.has_flag(flags::END_HEADERS),
        priority,
        header_block: block,
    }))
}

fn parse_settings(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    forbid_stream(&header)?;
    let ack = header.has_flag(flags::ACK);
    if ack {
        expect_length(&header, &payload, 0)?;
        return Ok(Frame::Settings(SettingsFrame { ack, settings: Vec::new() }));
    }
    if payload.len() % 6 != 0 {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: payload.len() - payload.len() % 6,
            actual: payload.len(),
        });
    }

    let mut settings = Vec::with_capacity(payload.len() / 6);
    for chunk in payload.chunks_exact(6) {
        let raw_id = u16::from_be_bytes([chunk[0], chunk[1]]);
        let value = read_u32(&chunk[2..]);
        let id = SettingId::from_u16(raw_id);
        let valid = match id {
            SettingId::EnablePush => value <= 1,
            SettingId::InitialWindowSize => value <= MAX_WINDOW_SIZE,
            SettingId::MaxFrameSize => (DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&value),
            _ => true,
        };
        if !valid {
            return Err(FrameError::InvalidSettingValue { id: raw_id, value });
        }
        settings.push(Setting { id, value });
    }

    Ok(Frame::Settings(SettingsFrame { ack, settings }))
}

fn parse_push_promise(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;
    let mut block = if header.has_flag(flags::PADDED) {
        remove_padding(payload)?
    } else {
        payload
    };
    if block.len() < 4 {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected: 4,
            actual: block.len(),
        });
    }
    let promised_stream_id = StreamId::new(read_u32(&block));
    block.advance(4);

    Ok(Frame::PushPromise(PushPromiseFrame {
        stream_id: header.stream_id,
        end_headers: header.has_flag(flags::END_HEADERS),
        promised_stream_id,
        header_block: block,
    }))
}

/// Strip the pad length octet and trailing padding.
fn remove_padding(mut payload: Bytes) -> Result<Bytes, FrameError> {
    if payload.is_empty() {
        return Err(FrameError::InvalidPadding {
            pad_length: 0,
            payload_length: 0,
        });
    }
    let pad_length = payload[0];
    let payload_length = payload.len();
    // The pad length octet itself is part of the payload.
    if pad_length as usize > payload_length - 1 {
        return Err(FrameError::InvalidPadding {
            pad_length,
            payload_length,
        });
    }
    payload.advance(1);
    payload.truncate(payload_length - 1 - pad_length as usize);
    Ok(payload)
}

fn require_stream(header: &FrameHeader) -> Result<(), FrameError> {
    if header.stream_id.is_connection_level() {
        return Err(FrameError::StreamIdRequired {
            frame_type: header.frame_type,
        });
    }
    Ok(())
}

fn forbid_stream(header: &FrameHeader) -> Result<(), FrameError> {
    if !header.stream_id.is_connection_level() {
        return Err(FrameError::StreamIdNotAllowed {
            frame_type: header.frame_type,
        });
    }
    Ok(())
}

fn expect_length(header: &FrameHeader, payload: &[u8], expected: usize) -> Result<(), FrameError> {
    if payload.len() != expected {
        return Err(FrameError::InvalidPayloadLength {
            frame_type: header.frame_type,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn read_priority(buf: &[u8]) -> Priority {
    let raw = read_u32(buf);
    Priority {
        exclusive: raw & 0x8000_0000 != 0,
        dependency: StreamId::new(raw),
        weight: buf[4],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ErrorCode, FrameEncoder};

    fn raw_frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        let len = payload.len() as u32;
        buf.extend_from_slice(&len.to_be_bytes()[1..]);
        buf.extend_from_slice(&[frame_type, flags]);
        buf.extend_from_slice(&stream_id.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    // Buffering

    #[test]
    fn test_decode_needs_full_header() {
        let mut buf = BytesMut::from(&[0u8, 0, 5, 0][..]);
        assert!(FrameDecoder::new().decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_decode_needs_full_payload() {
        let mut buf = raw_frame(0x0, 0, 1, b"hello");
        buf.truncate(buf.len() - 1);
        assert!(FrameDecoder::new().decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), FRAME_HEADER_SIZE + 4);
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let mut buf = raw_frame(0x0, 0, 1, b"ab");
        buf.extend_from_slice(&raw_frame(0x0, flags::END_STREAM, 1, b"cd"));
        let decoder = FrameDecoder::new();

        let Some(Frame::Data(first)) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(&first.data[..], b"ab");
        assert!(!first.end_stream);

        let Some(Frame::Data(second)) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(&second.data[..], b"cd");
        assert!(second.end_stream);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x40, 0x01, 0x0, 0, 0, 0, 0, 1]);
        let err = FrameDecoder::new().decode(&mut buf).unwrap_err();
        assert_eq!(err, FrameError::FrameTooLarge { size: 16385, max: 16384 });
    }

    // DATA

    #[test]
    fn test_decode_padded_data() {
        // pad length 2, data "hi", two padding bytes
        let mut buf = raw_frame(0x0, flags::PADDED, 1, &[2, b'h', b'i', 0, 0]);
        let Some(Frame::Data(frame)) = FrameDecoder::new().decode(&mut buf).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(&frame.data[..], b"hi");
        assert_eq!(frame.padding, 3);
        assert_eq!(frame.flow_controlled_len(), 5);
    }

    #[test]
    fn test_decode_padding_may_fill_payload() {
        let mut buf = raw_frame(0x0, flags::PADDED, 1, &[2, 0, 0]);
        let Some(Frame::Data(frame)) = FrameDecoder::new().decode(&mut buf).unwrap() else {
            panic!("expected data frame");
        };
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_decode_padding_too_long() {
        let mut buf = raw_frame(0x0, flags::PADDED, 1, &[3, 0, 0]);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::InvalidPadding { .. })
        ));
    }

    #[test]
    fn test_decode_data_on_stream_zero() {
        let mut buf = raw_frame(0x0, 0, 0, b"x");
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::StreamIdRequired { frame_type: 0 })
        ));
    }

    // HEADERS

    #[test]
    fn test_decode_headers_with_priority_and_padding() {
        let payload = [1, 0x80, 0, 0, 3, 10, 0x82, 0];
        let mut buf = raw_frame(
            0x1,
            flags::PADDED | flags::PRIORITY | flags::END_HEADERS,
            5,
            &payload,
        );
        let Some(Frame::Headers(frame)) = FrameDecoder::new().decode(&mut buf).unwrap() else {
            panic!("expected headers frame");
        };
        assert!(frame.end_headers);
        assert!(!frame.end_stream);
        let priority = frame.priority.unwrap();
        assert!(priority.exclusive);
        assert_eq!(priority.dependency, StreamId::new(3));
        assert_eq!(priority.weight, 10);
        assert_eq!(&frame.header_block[..], &[0x82]);
    }

    // SETTINGS

    #[test]
    fn test_decode_settings() {
        let payload = [0, 4, 0, 1, 0, 0, 0, 0x99, 0, 0, 0, 1];
        let mut buf = raw_frame(0x4, 0, 0, &payload);
        let Some(Frame::Settings(frame)) = FrameDecoder::new().decode(&mut buf).unwrap() else {
            panic!("expected settings frame");
        };
        assert!(!frame.ack);
        assert_eq!(frame.settings[0], Setting::new(SettingId::InitialWindowSize, 65536));
        assert_eq!(frame.settings[1].id, SettingId::Unknown(0x99));
    }

    #[test]
    fn test_decode_settings_rejects_bad_values() {
        let mut buf = raw_frame(0x4, 0, 0, &[0, 2, 0, 0, 0, 2]);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::InvalidSettingValue { id: 2, value: 2 })
        ));

        let mut buf = raw_frame(0x4, 0, 0, &[0, 5, 0, 0, 0x10, 0]);
        assert!(FrameDecoder::new().decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_settings_ack_with_payload() {
        let mut buf = raw_frame(0x4, flags::ACK, 0, &[0, 1, 0, 0, 0, 0]);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::InvalidPayloadLength { expected: 0, .. })
        ));
    }

    #[test]
    fn test_decode_settings_on_stream() {
        let mut buf = raw_frame(0x4, 0, 1, &[]);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::StreamIdNotAllowed { frame_type: 4 })
        ));
    }

    // Control frames

    #[test]
    fn test_decode_window_update_zero_increment() {
        let mut buf = raw_frame(0x8, 0, 0, &[0, 0, 0, 0]);
        assert_eq!(
            FrameDecoder::new().decode(&mut buf).unwrap_err(),
            FrameError::ZeroWindowIncrement
        );
    }

    #[test]
    fn test_decode_goaway_with_debug_data() {
        let mut payload = vec![0, 0, 0, 7, 0, 0, 0, 0xb];
        payload.extend_from_slice(b"calm");
        let mut buf = raw_frame(0x7, 0, 0, &payload);
        let Some(Frame::GoAway(frame)) = FrameDecoder::new().decode(&mut buf).unwrap() else {
            panic!("expected goaway frame");
        };
        assert_eq!(frame.last_stream_id, StreamId::new(7));
        assert_eq!(ErrorCode::from_u32(frame.error_code), ErrorCode::EnhanceYourCalm);
        assert_eq!(&frame.debug_data[..], b"calm");
    }

    #[test]
    fn test_decode_ping_wrong_length() {
        let mut buf = raw_frame(0x6, 0, 0, &[1, 2, 3]);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(FrameError::InvalidPayloadLength { expected: 8, actual: 3, .. })
        ));
    }

    #[test]
    fn test_decode_unknown_frame_type() {
        let mut buf = raw_frame(0xfa, 0x3, 9, b"ext");
        let Some(Frame::Unknown(frame)) = FrameDecoder::new().decode(&mut buf).unwrap() else {
            panic!("expected unknown frame");
        };
        assert_eq!(frame.frame_type, 0xfa);
        assert_eq!(&frame.payload[..], b"ext");
    }

    #[test]
    fn test_decode_encoder_output() {
        let mut buf = BytesMut::new();
        let encoder = FrameEncoder::new();
        encoder.encode_rst_stream(StreamId::new(3), ErrorCode::Cancel, &mut buf);
        encoder.encode_window_update(StreamId::CONNECTION, 1024, &mut buf);

        let decoder = FrameDecoder::new();
        let Some(Frame::RstStream(rst)) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected rst_stream");
        };
        assert_eq!(rst.stream_id, StreamId::new(3));
        assert_eq!(ErrorCode::from_u32(rst.error_code), ErrorCode::Cancel);

        let Some(Frame::WindowUpdate(update)) = decoder.decode(&mut buf).unwrap() else {
            panic!("expected window_update");
        };
        assert_eq!(update.increment, 1024);
    }
}
