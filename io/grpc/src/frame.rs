//! gRPC message framing.
//!
//! Each message on the wire is:
//! - 1 byte: compressed flag (0 = uncompressed)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the message prefix (flag + length).
pub const HEADER_SIZE: usize = 5;

/// Largest message sent by [`encode_message`] or accepted by
/// [`decode_message`] (the usual gRPC default).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("invalid gRPC response format: {len} bytes is shorter than the message header")]
    Truncated { len: usize },
    #[error("message too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },
}

/// Prefix `data` with an uncompressed message header.
pub fn encode_message(data: &[u8]) -> Result<Bytes, FramingError> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());
    encode_message_into(data, &mut buf)?;
    Ok(buf.freeze())
}

/// Append a framed message to `buf`. Nothing is written if `data` is larger
/// than [`MAX_MESSAGE_SIZE`].
pub fn encode_message_into(data: &[u8], buf: &mut BytesMut) -> Result<(), FramingError> {
    let len = u32::try_from(data.len())
        .ok()
        .filter(|_| data.len() <= MAX_MESSAGE_SIZE)
        .ok_or(FramingError::TooLarge {
            len: data.len(),
            max: MAX_MESSAGE_SIZE,
        })?;
    buf.reserve(HEADER_SIZE + data.len());
    buf.put_u8(0);
    buf.put_u32(len);
    buf.put_slice(data);
    Ok(())
}

/// Decode one message from the front of `buf`.
///
/// Returns `Ok(Some((message, compressed)))` when a whole message was
/// buffered, `Ok(None)` when more data is needed.
pub fn decode_message(buf: &mut BytesMut) -> Result<Option<(Bytes, bool)>, FramingError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let compressed = buf[0] != 0;
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::TooLarge {
            len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if buf.len() < HEADER_SIZE + len {
        return Ok(None);
    }

    buf.advance(HEADER_SIZE);
    Ok(Some((buf.split_to(len).freeze(), compressed)))
}

/// Drop the 5-byte prefix from a unary response body.
///
/// The declared length and flag are not checked: everything after the
/// prefix is the payload.
pub fn strip_message_header(body: Bytes) -> Result<Bytes, FramingError> {
    if body.len() < HEADER_SIZE {
        return Err(FramingError::Truncated { len: body.len() });
    }
    Ok(body.slice(HEADER_SIZE..))
}
