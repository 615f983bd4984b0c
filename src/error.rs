//! Error types for frame parsing and link bookkeeping.

use thiserror::Error;

/// Frame codec errors.
///
/// A codec error always means "drop the frame": it never reaches the
/// negotiation state machines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes than a header needs.
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    /// Header length field is below the header size or beyond the buffer.
    #[error("declared length {declared} invalid for {available} available bytes")]
    BadLength { declared: usize, available: usize },

    /// Cursor read past the end of its slice.
    #[error("read past end of buffer: need {need} bytes, have {have}")]
    Underrun { need: usize, have: usize },

    /// Frame would not fit the output buffer or the 16-bit length field.
    #[error("frame of {0} bytes exceeds output buffer")]
    Overflow(usize),
}

/// Link registry errors.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("unknown link handle {0}")]
    UnknownLink(usize),
}
