//! Decode failures for the broadcasting wire format
//!
//! Every variant describes a malformed datagram. Callers treat them as
//! per-datagram failures: log, discard, keep receiving.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Datagram carried no bytes at all
    #[error("malformed message: empty datagram")]
    Empty,

    /// First byte is not a known message tag for this direction
    #[error("malformed message: unknown tag {0}")]
    UnknownTag(u8),

    /// Payload ended before the field at `offset` could be read
    #[error("malformed message: tag {tag} truncated at offset {offset} (needed {needed} more bytes)")]
    Truncated { tag: u8, offset: usize, needed: usize },

    /// Length-prefixed string was not valid UTF-8
    #[error("malformed message: tag {tag} has invalid UTF-8 at offset {offset}")]
    InvalidString { tag: u8, offset: usize },
}

/// A shared-memory page copy was shorter than the fields we read from it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{page} page is {len} bytes, expected at least {needed}")]
pub struct PageTooShort {
    pub page: &'static str,
    pub len: usize,
    pub needed: usize,
}
