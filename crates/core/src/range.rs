//! `Range: bytes=...` header parsing for staged buffer reads.

/// A requested byte range before it is resolved against a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=START-END` or `bytes=START-` (end inclusive, optional).
    From { start: u64, end: Option<u64> },
    /// `bytes=-N`: the last `N` bytes.
    Suffix(u64),
}

/// Outcome of resolving a [`ByteRange`] against a buffer length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeResolution {
    /// Inclusive `start..=end` bounds inside the buffer.
    Satisfiable { start: u64, end: u64 },
    /// The range lies outside the buffer; answer 416.
    Unsatisfiable,
}

/// Parse a `Range` header value.
///
/// Returns `None` for anything that is not a single `bytes` range, in which
/// case the header is ignored and the full body served.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        return end.parse::<u64>().ok().map(ByteRange::Suffix);
    }

    let start = start.parse::<u64>().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().ok()?)
    };
    Some(ByteRange::From { start, end })
}

impl ByteRange {
    /// Resolve against a buffer of `len` bytes, clamping the end to the
    /// final byte.
    pub fn resolve(self, len: u64) -> RangeResolution {
        if len == 0 {
            return RangeResolution::Unsatisfiable;
        }
        let last = len - 1;
        match self {
            ByteRange::From { start, end } => {
                let end = end.map_or(last, |e| e.min(last));
                if start > end {
                    RangeResolution::Unsatisfiable
                } else {
                    RangeResolution::Satisfiable { start, end }
                }
            }
            ByteRange::Suffix(0) => RangeResolution::Unsatisfiable,
            ByteRange::Suffix(n) => RangeResolution::Satisfiable {
                start: len.saturating_sub(n),
                end: last,
            },
        }
    }
}
