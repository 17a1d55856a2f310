//! `Range` header parsing for single-range byte requests.

/// An inclusive byte range within a resource of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses a `Range` header against a resource of `total_len` bytes.
///
/// Only the single-range `bytes=a-b` and open-ended `bytes=a-` forms are
/// honored. An upper bound past the end is clamped to the last byte.
/// Everything else, suffix ranges, multiple ranges, junk, and ranges
/// starting at or past the end, yields `None`; the caller then serves the
/// complete resource with a plain 200 instead of failing the request.
pub fn parse_range(header: &str, total_len: u64) -> Option<ByteRange> {
    let ranges = header.strip_prefix("bytes=")?;
    if ranges.contains(',') {
        return None;
    }
    let (start, end) = ranges.split_once('-')?;
    let start = parse_decimal(start)?;
    let last = total_len.checked_sub(1)?;
    let end = if end.is_empty() {
        last
    } else {
        parse_decimal(end)?.min(last)
    };
    if start > end {
        return None;
    }
    Some(ByteRange { start, end })
}

/// Digits only; no sign, no whitespace.
fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
