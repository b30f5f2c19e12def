//! Wire-level error taxonomy (spec.md §4.A, §7). Every variant here is
//! handled by disconnecting the offending peer and continuing; none of
//! them should ever propagate up into ledger state.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("peer socket is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bad magic bytes in frame header")]
    Protocol,

    #[error("frame length {0} exceeds the {1}-byte cap")]
    FrameTooLarge(u32, u32),

    #[error("connection closed mid-frame")]
    ConnectionClosed,

    #[error("frame payload is not valid UTF-8 JSON: {0}")]
    MalformedPayload(String),
}
