//! Frame serialization.

use bytes::{BufMut, Bytes, BytesMut};

use super::types::*;
use super::{ErrorCode, FRAME_HEADER_SIZE};

/// Writes frames into a growable buffer.
///
/// The encoder never splits payloads; callers are responsible for keeping
/// DATA and header block fragments within the peer's maximum frame size.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameEncoder;

impl FrameEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) {
        match frame {
            Frame::Data(f) => self.encode_data(f, buf),
            Frame::Headers(f) => self.encode_headers(f, buf),
            Frame::Priority(f) => {
                write_header(buf, 5, FrameType::Priority as u8, 0, f.stream_id);
                put_priority(buf, &f.priority);
            }
            Frame::RstStream(f) => {
                write_header(buf, 4, FrameType::RstStream as u8, 0, f.stream_id);
                buf.put_u32(f.error_code);
            }
            Frame::Settings(f) => self.encode_settings(f, buf),
            Frame::PushPromise(f) => {
                let flags = if f.end_headers { flags::END_HEADERS } else { 0 };
                let length = 4 + f.header_block.len() as u32;
                write_header(buf, length, FrameType::PushPromise as u8, flags, f.stream_id);
                buf.put_u32(f.promised_stream_id.value());
                buf.extend_from_slice(&f.header_block);
            }
            Frame::Ping(f) => {
                let flags = if f.ack { flags::ACK } else { 0 };
                write_header(buf, 8, FrameType::Ping as u8, flags, StreamId::CONNECTION);
                buf.extend_from_slice(&f.data);
            }
            Frame::GoAway(f) => {
                let length = 8 + f.debug_data.len() as u32;
                write_header(buf, length, FrameType::GoAway as u8, 0, StreamId::CONNECTION);
                buf.put_u32(f.last_stream_id.value());
                buf.put_u32(f.error_code);
                buf.extend_from_slice(&f.debug_data);
            }
            Frame::WindowUpdate(f) => {
                write_header(buf, 4, FrameType::WindowUpdate as u8, 0, f.stream_id);
                buf.put_u32(f.increment & 0x7FFF_FFFF);
            }
            Frame::Continuation(f) => {
                let flags = if f.end_headers { flags::END_HEADERS } else { 0 };
                let length = f.header_block.len() as u32;
                write_header(buf, length, FrameType::Continuation as u8, flags, f.stream_id);
                buf.extend_from_slice(&f.header_block);
            }
            Frame::Unknown(f) => {
                let length = f.payload.len() as u32;
                write_header(buf, length, f.frame_type, f.flags, f.stream_id);
                buf.extend_from_slice(&f.payload);
            }
        }
    }

    fn encode_data(&self, frame: &DataFrame, buf: &mut BytesMut) {
        let flags = if frame.end_stream { flags::END_STREAM } else { 0 };
        let length = frame.data.len() as u32;
        write_header(buf, length, FrameType::Data as u8, flags, frame.stream_id);
        buf.extend_from_slice(&frame.data);
    }

    fn encode_headers(&self, frame: &HeadersFrame, buf: &mut BytesMut) {
        let mut flags = 0;
        if frame.end_stream {
            flags |= flags::END_STREAM;
        }
        if frame.end_headers {
            flags |= flags::END_HEADERS;
        }
        if frame.priority.is_some() {
            flags |= flags::PRIORITY;
        }

        let priority_len = if frame.priority.is_some() { 5 } else { 0 };
        let length = priority_len + frame.header_block.len() as u32;
        write_header(buf, length, FrameType::Headers as u8, flags, frame.stream_id);
        if let Some(priority) = &frame.priority {
            put_priority(buf, priority);
        }
        buf.extend_from_slice(&frame.header_block);
    }

    fn encode_settings(&self, frame: &SettingsFrame, buf: &mut BytesMut) {
        if frame.ack {
            write_header(buf, 0, FrameType::Settings as u8, flags::ACK, StreamId::CONNECTION);
            return;
        }

        let length = (frame.settings.len() * 6) as u32;
        write_header(buf, length, FrameType::Settings as u8, 0, StreamId::CONNECTION);
        for setting in &frame.settings {
            buf.put_u16(setting.id.to_u16());
            buf.put_u32(setting.value);
        }
    }

    pub fn encode_settings_ack(&self, buf: &mut BytesMut) {
        self.encode(&Frame::Settings(SettingsFrame { ack: true, settings: Vec::new() }), buf);
    }

    pub fn encode_ping_ack(&self, data: [u8; 8], buf: &mut BytesMut) {
        self.encode(&Frame::Ping(PingFrame { ack: true, data }), buf);
    }

    pub fn encode_window_update(&self, stream_id: StreamId, increment: u32, buf: &mut BytesMut) {
        self.encode(
            &Frame::WindowUpdate(WindowUpdateFrame { stream_id, increment }),
            buf,
        );
    }

    pub fn encode_rst_stream(&self, stream_id: StreamId, code: ErrorCode, buf: &mut BytesMut) {
        self.encode(
            &Frame::RstStream(RstStreamFrame {
                stream_id,
                error_code: code.to_u32(),
            }),
            buf,
        );
    }

    pub fn encode_goaway(&self, last_stream_id: StreamId, code: ErrorCode, buf: &mut BytesMut) {
        self.encode(
            &Frame::GoAway(GoAwayFrame {
                last_stream_id,
                error_code: code.to_u32(),
                debug_data: Bytes::new(),
            }),
            buf,
        );
    }
}

#[inline]
fn write_header(buf: &mut BytesMut, length: u32, frame_type: u8, flags: u8, stream_id: StreamId) {
    buf.reserve(FRAME_HEADER_SIZE + length as usize);
    // 24-bit length
    buf.put_u8((length >> 16) as u8);
    buf.put_u16(length as u16);
    buf.put_u8(frame_type);
    buf.put_u8(flags);
    buf.put_u32(stream_id.value() & 0x7FFF_FFFF);
}

fn put_priority(buf: &mut BytesMut, priority: &Priority) {
    let mut dependency = priority.dependency.value();
    if priority.exclusive {
        dependency |= 0x8000_0000;
    }
    buf.put_u32(dependency);
    buf.put_u8(priority.weight);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_data_header_layout() {
        let mut buf = BytesMut::new();
        let frame = DataFrame::new(StreamId::new(3), Bytes::from_static(b"hello"), true);
        FrameEncoder::new().encode(&Frame::Data(frame), &mut buf);

        assert_eq!(
            &buf[..FRAME_HEADER_SIZE],
            &[0, 0, 5, 0x0, flags::END_STREAM, 0, 0, 0, 3]
        );
        assert_eq!(&buf[FRAME_HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_encode_settings() {
        let mut buf = BytesMut::new();
        let frame = SettingsFrame {
            ack: false,
            settings: vec![Setting::new(SettingId::MaxConcurrentStreams, 100)],
        };
        FrameEncoder::new().encode(&Frame::Settings(frame), &mut buf);

        assert_eq!(buf.len(), FRAME_HEADER_SIZE + 6);
        assert_eq!(buf[3], FrameType::Settings as u8);
        assert_eq!(&buf[FRAME_HEADER_SIZE..], &[0, 3, 0, 0, 0, 100]);
    }

    #[test]
    fn test_encode_settings_ack_is_empty() {
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode_settings_ack(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 0x4, flags::ACK, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_goaway() {
        let mut buf = BytesMut::new();
        FrameEncoder::new().encode_goaway(StreamId::new(5), ErrorCode::NoError, &mut buf);
        assert_eq!(buf.len(), FRAME_HEADER_SIZE + 8);
        assert_eq!(&buf[FRAME_HEADER_SIZE..], &[0, 0, 0, 5, 0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_headers_with_priority() {
        let mut buf = BytesMut::new();
        let frame = HeadersFrame {
            stream_id: StreamId::new(1),
            end_stream: false,
            end_headers: true,
            priority: Some(Priority {
                exclusive: true,
                dependency: StreamId::new(0),
                weight: 15,
            }),
            header_block: Bytes::from_static(b"\x82"),
        };
        FrameEncoder::new().encode(&Frame::Headers(frame), &mut buf);
        assert_eq!(buf[2], 6);
        assert_eq!(buf[4], flags::END_HEADERS | flags::PRIORITY);
        assert_eq!(&buf[FRAME_HEADER_SIZE..], &[0x80, 0, 0, 0, 15, 0x82]);
    }
}
