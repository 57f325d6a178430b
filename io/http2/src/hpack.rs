//! HPACK header compression (RFC 7541).
//!
//! The compression tables and Huffman coding come from `fluke-hpack`. This
//! module pins its API to [`HeaderField`] and adds the limits the connection
//! enforces on decoded header lists.

use bytes::BytesMut;

/// Upper bound on the decoded size of one header list, counted as in
/// SETTINGS_MAX_HEADER_LIST_SIZE (name + value + 32 per field).
pub const DEFAULT_MAX_HEADER_LIST_SIZE: usize = 64 * 1024;

/// A single header name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of this field for header list accounting.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }

    /// Name as text, if it is valid UTF-8.
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.name).ok()
    }

    /// Value as text, if it is valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HpackError {
    #[error("header block decoding failed: {0}")]
    Decode(String),
    #[error("header list size {size} exceeds limit {max}")]
    HeaderListTooLarge { size: usize, max: usize },
}

/// Stateful header block encoder.
///
/// One encoder per connection; blocks must be written to the wire in the
/// order they are encoded.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Encode `headers` and append the block to `buf`.
    pub fn encode(&mut self, headers: &[HeaderField], buf: &mut BytesMut) {
        let block = self
            .inner
            .encode(headers.iter().map(|h| (&h.name[..], &h.value[..])));
        buf.extend_from_slice(&block);
    }
}

/// Stateful header block decoder.
///
/// Every block received on the connection must pass through the same decoder
/// in arrival order, including blocks for streams we no longer track.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
    max_header_list_size: usize,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Decoder::new(),
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
        }
    }

    pub fn set_max_header_list_size(&mut self, size: usize) {
        self.max_header_list_size = size;
    }

    pub fn max_header_list_size(&self) -> usize {
        self.max_header_list_size
    }

    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let fields = self
            .inner
            .decode(block)
            .map_err(|e| HpackError::Decode(format!("{e:?}")))?;

        let mut size = 0;
        let mut headers = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let field = HeaderField { name, value };
            size += field.size();
            headers.push(field);
        }
        if size > self.max_header_list_size {
            return Err(HpackError::HeaderListTooLarge {
                size,
                max: self.max_header_list_size,
            });
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_request_headers() {
        let headers = vec![
            HeaderField::new(":method", "POST"),
            HeaderField::new(":scheme", "http"),
            HeaderField::new(":path", "/pkg.Service/Method"),
            HeaderField::new(":authority", "localhost:50051"),
            HeaderField::new("content-type", "application/grpc+proto"),
            HeaderField::new("te", "trailers"),
        ];

        let mut buf = BytesMut::new();
        HpackEncoder::new().encode(&headers, &mut buf);
        let decoded = HpackDecoder::new().decode(&buf).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn test_decode_static_indexed() {
        // 0x82 = indexed :method GET, 0x88 = indexed :status 200
        let decoded = HpackDecoder::new().decode(&[0x82, 0x88]).unwrap();
        assert_eq!(decoded[0], HeaderField::new(":method", "GET"));
        assert_eq!(decoded[1], HeaderField::new(":status", "200"));
    }

    #[test]
    fn test_decode_huffman_literal() {
        // RFC 7541 C.4.1: :authority www.example.com, Huffman coded
        let block = [
            0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab,
            0x90, 0xf4, 0xff,
        ];
        let decoded = HpackDecoder::new().decode(&block).unwrap();
        assert_eq!(decoded[3], HeaderField::new(":authority", "www.example.com"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        // literal with a new name whose declared length runs past the block
        assert!(matches!(
            HpackDecoder::new().decode(&[0x40, 0x05, b'a']),
            Err(HpackError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_enforces_header_list_size() {
        let headers = vec![HeaderField::new("x-large", vec![b'a'; 200])];
        let mut buf = BytesMut::new();
        HpackEncoder::new().encode(&headers, &mut buf);

        let mut decoder = HpackDecoder::new();
        decoder.set_max_header_list_size(100);
        assert!(matches!(
            decoder.decode(&buf),
            Err(HpackError::HeaderListTooLarge { max: 100, .. })
        ));
    }

    #[test]
    fn test_header_field_helpers() {
        let field = HeaderField::new(":status", "200");
        assert!(field.is_pseudo());
        assert_eq!(field.name_str(), Some(":status"));
        assert_eq!(field.value_str(), Some("200"));
        assert_eq!(field.size(), 7 + 3 + 32);
        assert!(!HeaderField::new("te", "trailers").is_pseudo());
    }
}
