//! Protocol error types.
//!
//! Strongly-typed errors for wire decoding. A decode that runs off the end
//! of a datagram and a datagram that would not fit on the bus are the two
//! failure modes the session layer must distinguish, because they map to
//! different client disconnect reasons.

use thiserror::Error;

/// Errors produced while encoding or decoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A read ran past the end of the datagram.
    #[error("datagram truncated: needed {needed} more bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the datagram.
        remaining: usize,
    },

    /// A datagram exceeded the representable size limit.
    #[error("datagram too large: {size} bytes exceeds limit of {limit}")]
    Oversized {
        /// Actual size in bytes.
        size: usize,
        /// Limit that was exceeded.
        limit: usize,
    },

    /// A length-prefixed string was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidString,

    /// An MD datagram was shorter than its fixed routing header.
    #[error("bus datagram too short for routing header: {actual} of {expected} bytes")]
    HeaderTooShort {
        /// Required header size.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },
}
