use once_cell::sync::Lazy;
use regex::Regex;

use crate::infra::errors::AppError;

/// Strict single-range grammar. Suffix ranges (`bytes=-N`) and multi-range
/// sets are rejected with 400 rather than silently mis-served.
static RANGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^bytes=(\d+)-(\d*)$").unwrap());

/// Inclusive byte range within a file of `fsize` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value for a file of `fsize` bytes.
    pub fn content_range(&self, fsize: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, fsize)
    }
}

/// Parse a `Range` header against a file of `fsize` bytes. A missing end
/// defaults to `fsize - 1`; anything not matching `bytes=A-[B]`, an inverted
/// range, or a start beyond the file is a 400.
pub fn parse_range(header: &str, fsize: u64) -> Result<ByteRange, AppError> {
    let captures = RANGE_RE
        .captures(header)
        .ok_or_else(|| AppError::bad_request("Range expression invalid!"))?;

    let start: u64 = captures[1]
        .parse()
        .map_err(|_| AppError::bad_request("Range expression invalid!"))?;

    let end = if captures[2].is_empty() {
        fsize.saturating_sub(1)
    } else {
        let end: u64 = captures[2]
            .parse()
            .map_err(|_| AppError::bad_request("Range expression invalid!"))?;
        end.min(fsize.saturating_sub(1))
    };

    if start > end || start >= fsize {
        return Err(AppError::bad_request("Range expression invalid!"));
    }

    Ok(ByteRange { start, end })
}
