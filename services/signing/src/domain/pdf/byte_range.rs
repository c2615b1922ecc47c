/// ByteRange handling for the planted signature
///
/// The /ByteRange array names two spans of the final document, everything
/// before and everything after the /Contents hex hole. The array itself is
/// covered by the digest, so it is finalized in place inside a fixed-width
/// slot reserved by the placeholder.
///
/// Requirements: 3.2, 3.3
use std::ops::Range;

use sha2::{Digest, Sha256};

use super::tail::PdfError;

/// Width of each padded number in the reserved slot
pub const RANGE_DIGITS: usize = 10;

/// ByteRange pairs `[offset1 len1 offset2 len2]` for a document of
/// `doc_len` bytes with the hole at `contents_start..contents_end`
pub fn compute(doc_len: usize, contents_start: usize, contents_end: usize) -> [usize; 4] {
    [0, contents_start, contents_end, doc_len - contents_end]
}

/// Write the real ranges into the placeholder slot, keeping its width
///
/// The slot was reserved as `[0 0000000000 0000000000 0000000000]`; the
/// replacement must be byte-for-byte the same length because every offset
/// after it is already fixed.
pub fn finalize(doc: &mut [u8], slot: &Range<usize>, ranges: &[usize; 4]) -> Result<(), PdfError> {
    if slot.end > doc.len() || slot.start > slot.end {
        return Err(PdfError::InvalidByteRange);
    }
    let limit = 10usize.pow(RANGE_DIGITS as u32);
    if ranges[1] >= limit || ranges[2] >= limit || ranges[3] >= limit {
        return Err(PdfError::ByteRangeOverflow);
    }
    let text = format!(
        "[{} {:0w$} {:0w$} {:0w$}]",
        ranges[0],
        ranges[1],
        ranges[2],
        ranges[3],
        w = RANGE_DIGITS
    );
    if text.len() != slot.len() {
        return Err(PdfError::ByteRangeOverflow);
    }
    doc[slot.clone()].copy_from_slice(text.as_bytes());
    Ok(())
}

/// SHA-256 over the two ranges, skipping the /Contents hole (Req 3.3)
pub fn digest(doc: &[u8], ranges: &[usize; 4]) -> Result<[u8; 32], PdfError> {
    let first_end = ranges[0].checked_add(ranges[1]).ok_or(PdfError::InvalidByteRange)?;
    let second_end = ranges[2].checked_add(ranges[3]).ok_or(PdfError::InvalidByteRange)?;
    if first_end > doc.len() || second_end > doc.len() || first_end > ranges[2] {
        return Err(PdfError::InvalidByteRange);
    }
    let mut hasher = Sha256::new();
    hasher.update(&doc[ranges[0]..first_end]);
    hasher.update(&doc[ranges[2]..second_end]);
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOT_TEXT: &str = "[0 0000000000 0000000000 0000000000]";

    #[test]
    fn test_compute_pairs() {
        assert_eq!(compute(1000, 100, 300), [0, 100, 300, 700]);
    }

    #[test]
    fn test_finalize_keeps_slot_width() {
        let mut doc = format!("xxxx{SLOT_TEXT}yyyy").into_bytes();
        let slot = 4..4 + SLOT_TEXT.len();
        let before_len = doc.len();
        finalize(&mut doc, &slot, &[0, 123, 456, 789]).unwrap();
        assert_eq!(doc.len(), before_len);
        assert_eq!(
            &doc[slot],
            b"[0 0000000123 0000000456 0000000789]".as_slice()
        );
        assert!(doc.starts_with(b"xxxx"));
        assert!(doc.ends_with(b"yyyy"));
    }

    #[test]
    fn test_finalize_rejects_overflowing_values() {
        let mut doc = SLOT_TEXT.as_bytes().to_vec();
        let slot = 0..doc.len();
        let result = finalize(&mut doc, &slot, &[0, 10_000_000_000, 0, 0]);
        assert_eq!(result, Err(PdfError::ByteRangeOverflow));
    }

    #[test]
    fn test_finalize_rejects_out_of_bounds_slot() {
        let mut doc = vec![0u8; 10];
        let result = finalize(&mut doc, &(5..50), &[0, 1, 2, 3]);
        assert_eq!(result, Err(PdfError::InvalidByteRange));
    }

    #[test]
    fn test_digest_skips_the_hole() {
        // Document: "AAAA" + hole "<00>" + "BBBB"
        let doc = b"AAAA<00>BBBB";
        let ranges = compute(doc.len(), 4, 8);
        let got = digest(doc, &ranges).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"AAAA");
        hasher.update(b"BBBB");
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_digest_ignores_hole_contents() {
        let ranges = compute(12, 4, 8);
        let a = digest(b"AAAA<00>BBBB", &ranges).unwrap();
        let b = digest(b"AAAA<ff>BBBB", &ranges).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_rejects_out_of_bounds() {
        let doc = b"short";
        assert_eq!(
            digest(doc, &[0, 3, 10, 5]),
            Err(PdfError::InvalidByteRange)
        );
    }

    #[test]
    fn test_digest_rejects_overlapping_ranges() {
        let doc = b"AAAA<00>BBBB";
        assert_eq!(
            digest(doc, &[0, 6, 4, 8]),
            Err(PdfError::InvalidByteRange)
        );
    }
}
