/// Minimal DER encoding primitives for the CMS signature container
///
/// Only the forms the signature builder needs: definite lengths,
/// SET OF ordering per X.690 11.6, and a small TLV reader for walking
/// the signing certificate.
///
/// Requirements: 3.5
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DerError {
    /// Input ended inside a tag, length or content field
    #[error("truncated DER structure at offset {0}")]
    Truncated(usize),
    /// BER indefinite lengths never appear in DER
    #[error("indefinite length is not valid DER (offset {0})")]
    IndefiniteLength(usize),
    /// Length field wider than this parser supports
    #[error("unsupported length encoding at offset {0}")]
    UnsupportedLength(usize),
}

/// Encode a definite length (short form below 128, long form above)
pub fn encode_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let mut out = Vec::with_capacity(1 + bytes.len() - skip);
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
    out
}

/// Tag-length-value with the given tag byte
pub fn wrap(tag: u8, content: &[u8]) -> Vec<u8> {
    let len = encode_len(content.len());
    let mut out = Vec::with_capacity(1 + len.len() + content.len());
    out.push(tag);
    out.extend_from_slice(&len);
    out.extend_from_slice(content);
    out
}

/// SEQUENCE (constructed)
pub fn sequence(content: &[u8]) -> Vec<u8> {
    wrap(0x30, content)
}

/// SET (constructed), content taken as already ordered
pub fn set(content: &[u8]) -> Vec<u8> {
    wrap(0x31, content)
}

/// SET OF with DER ordering: element encodings sorted as octet strings
/// (X.690 11.6). Lexicographic byte order is equivalent because the
/// padding octet is zero, the minimum byte value.
pub fn set_of(mut items: Vec<Vec<u8>>) -> Vec<u8> {
    items.sort();
    set(&items.concat())
}

/// INTEGER, non-negative, minimal encoding
pub fn integer(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    let mut content = Vec::with_capacity(9 - skip);
    // A set high bit would read as negative, so prepend a zero octet
    if bytes[skip] & 0x80 != 0 {
        content.push(0x00);
    }
    content.extend_from_slice(&bytes[skip..]);
    wrap(0x02, &content)
}

/// OCTET STRING
pub fn octet_string(content: &[u8]) -> Vec<u8> {
    wrap(0x04, content)
}

/// OBJECT IDENTIFIER from its arc values
pub fn oid(arcs: &[u64]) -> Vec<u8> {
    debug_assert!(arcs.len() >= 2);
    let mut content = vec![(arcs[0] * 40 + arcs[1]) as u8];
    for &arc in &arcs[2..] {
        content.extend_from_slice(&base128(arc));
    }
    wrap(0x06, &content)
}

/// UTCTime from a preformatted YYMMDDHHMMSSZ string
pub fn utc_time(value: &str) -> Vec<u8> {
    wrap(0x17, value.as_bytes())
}

/// NULL
pub fn null() -> Vec<u8> {
    vec![0x05, 0x00]
}

/// Context-specific tag [n], constructed or primitive
pub fn context(n: u8, constructed: bool, content: &[u8]) -> Vec<u8> {
    let tag = 0x80 | if constructed { 0x20 } else { 0x00 } | (n & 0x1f);
    wrap(tag, content)
}

fn base128(mut value: u64) -> Vec<u8> {
    let mut out = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        out.push(0x80 | (value & 0x7f) as u8);
        value >>= 7;
    }
    out.reverse();
    out
}

/// Header of one TLV element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvHeader {
    pub tag: u8,
    /// Content length in bytes
    pub len: usize,
    /// Bytes occupied by tag plus length field
    pub header_len: usize,
}

impl TlvHeader {
    /// Offset just past this element's content, relative to its start
    pub fn total_len(&self) -> usize {
        self.header_len + self.len
    }
}

/// Read the tag and length of the TLV element starting at `offset`
pub fn read_header(buf: &[u8], offset: usize) -> Result<TlvHeader, DerError> {
    let tag = *buf.get(offset).ok_or(DerError::Truncated(offset))?;
    let first = *buf.get(offset + 1).ok_or(DerError::Truncated(offset))?;
    if first < 0x80 {
        return Ok(TlvHeader {
            tag,
            len: first as usize,
            header_len: 2,
        });
    }
    if first == 0x80 {
        return Err(DerError::IndefiniteLength(offset));
    }
    let num_bytes = (first & 0x7f) as usize;
    if num_bytes > 4 {
        return Err(DerError::UnsupportedLength(offset));
    }
    let end = offset + 2 + num_bytes;
    if buf.len() < end {
        return Err(DerError::Truncated(offset));
    }
    let mut len = 0usize;
    for &b in &buf[offset + 2..end] {
        len = (len << 8) | b as usize;
    }
    Ok(TlvHeader {
        tag,
        len,
        header_len: 2 + num_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Length Encoding Tests ====================

    #[test]
    fn test_encode_len_short_form() {
        assert_eq!(encode_len(0), vec![0x00]);
        assert_eq!(encode_len(5), vec![0x05]);
        assert_eq!(encode_len(127), vec![0x7f]);
    }

    #[test]
    fn test_encode_len_long_form_one_byte() {
        assert_eq!(encode_len(128), vec![0x81, 0x80]);
        assert_eq!(encode_len(255), vec![0x81, 0xff]);
    }

    #[test]
    fn test_encode_len_long_form_two_bytes() {
        assert_eq!(encode_len(256), vec![0x82, 0x01, 0x00]);
        assert_eq!(encode_len(300), vec![0x82, 0x01, 0x2c]);
        assert_eq!(encode_len(65535), vec![0x82, 0xff, 0xff]);
    }

    // ==================== Primitive Encoding Tests ====================

    #[test]
    fn test_integer_minimal_encoding() {
        assert_eq!(integer(0), vec![0x02, 0x01, 0x00]);
        assert_eq!(integer(1), vec![0x02, 0x01, 0x01]);
        assert_eq!(integer(127), vec![0x02, 0x01, 0x7f]);
        // High bit set needs a leading zero octet
        assert_eq!(integer(128), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(integer(256), vec![0x02, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_oid_sha256() {
        // 2.16.840.1.101.3.4.2.1 (NIST sha256)
        assert_eq!(
            oid(&[2, 16, 840, 1, 101, 3, 4, 2, 1]),
            vec![0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01]
        );
    }

    #[test]
    fn test_oid_pkcs7_data() {
        // 1.2.840.113549.1.7.1 (id-data)
        assert_eq!(
            oid(&[1, 2, 840, 113549, 1, 7, 1]),
            vec![0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01]
        );
    }

    #[test]
    fn test_null_encoding() {
        assert_eq!(null(), vec![0x05, 0x00]);
    }

    #[test]
    fn test_utc_time_encoding() {
        let encoded = utc_time("250101120000Z");
        assert_eq!(encoded[0], 0x17);
        assert_eq!(encoded[1], 13);
        assert_eq!(&encoded[2..], b"250101120000Z");
    }

    #[test]
    fn test_octet_string_encoding() {
        assert_eq!(octet_string(&[0xde, 0xad]), vec![0x04, 0x02, 0xde, 0xad]);
    }

    #[test]
    fn test_context_tags() {
        assert_eq!(context(0, true, &[]), vec![0xa0, 0x00]);
        assert_eq!(context(0, false, &[0x01]), vec![0x80, 0x01, 0x01]);
        assert_eq!(context(1, true, &[0x05, 0x00]), vec![0xa1, 0x02, 0x05, 0x00]);
    }

    #[test]
    fn test_sequence_wraps_content() {
        let inner = integer(1);
        let seq = sequence(&inner);
        assert_eq!(seq, vec![0x30, 0x03, 0x02, 0x01, 0x01]);
    }

    // ==================== SET OF Ordering Tests ====================

    #[test]
    fn test_set_of_sorts_encodings() {
        let a = vec![0x31, 0x01, 0x00];
        let b = vec![0x30, 0x01, 0x00];
        let encoded = set_of(vec![a.clone(), b.clone()]);
        // 0x30 sorts before 0x31
        let mut expected_content = b.clone();
        expected_content.extend_from_slice(&a);
        assert_eq!(encoded, set(&expected_content));
    }

    #[test]
    fn test_set_of_sorts_by_length_bytes() {
        let short = wrap(0x30, &[0x01]);
        let long = wrap(0x30, &[0x00; 40]);
        let encoded = set_of(vec![long.clone(), short.clone()]);
        // Same tag, so the shorter length byte (0x01 < 0x28) sorts first
        let mut expected_content = short;
        expected_content.extend_from_slice(&long);
        assert_eq!(encoded, set(&expected_content));
    }

    // ==================== TLV Reader Tests ====================

    #[test]
    fn test_read_header_short_form() {
        let buf = vec![0x30, 0x03, 0x02, 0x01, 0x01];
        let header = read_header(&buf, 0).unwrap();
        assert_eq!(header.tag, 0x30);
        assert_eq!(header.len, 3);
        assert_eq!(header.header_len, 2);
        assert_eq!(header.total_len(), 5);
    }

    #[test]
    fn test_read_header_long_form() {
        let mut buf = vec![0x30, 0x82, 0x01, 0x00];
        buf.extend_from_slice(&[0u8; 256]);
        let header = read_header(&buf, 0).unwrap();
        assert_eq!(header.len, 256);
        assert_eq!(header.header_len, 4);
    }

    #[test]
    fn test_read_header_at_offset() {
        let buf = vec![0xff, 0xff, 0x02, 0x01, 0x2a];
        let header = read_header(&buf, 2).unwrap();
        assert_eq!(header.tag, 0x02);
        assert_eq!(header.len, 1);
    }

    #[test]
    fn test_read_header_truncated() {
        assert_eq!(read_header(&[], 0), Err(DerError::Truncated(0)));
        assert_eq!(read_header(&[0x30], 0), Err(DerError::Truncated(0)));
    }

    #[test]
    fn test_read_header_rejects_indefinite_length() {
        let buf = vec![0x30, 0x80, 0x00, 0x00];
        assert_eq!(read_header(&buf, 0), Err(DerError::IndefiniteLength(0)));
    }

    #[test]
    fn test_round_trip_write_then_read() {
        let encoded = sequence(&[0u8; 200]);
        let header = read_header(&encoded, 0).unwrap();
        assert_eq!(header.tag, 0x30);
        assert_eq!(header.len, 200);
        assert_eq!(header.total_len(), encoded.len());
    }
}
