//! Doorman wire protocol.
//!
//! Shared wire-level types for the client agent: the little-endian
//! [`Datagram`] writer and [`DatagramView`] cursor, the client-facing
//! message ids, the message-director (MD) bus message ids, disconnect
//! reason codes, and the packed MD routing header.
//!
//! # Layers
//!
//! Two protocols meet in the agent and both are defined here:
//!
//! - **Client wire**: `u16 message id` + positional little-endian fields.
//!   Length-prefix framing is the transport's problem, not this crate's.
//! - **MD bus**: an 18-byte routing header (`to`, `from`, `msgtype`) plus an
//!   opaque body, capped at [`MD_DATAGRAM_LIMIT`] bytes total.
//!
//! Everything decodes with explicit `Result`s; malformed network bytes can
//! never panic.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod datagram;
mod errors;
mod md;
mod message;

pub use datagram::{Datagram, DatagramView};
pub use errors::ProtocolError;
pub use md::{location2channel, MdDatagram, MdHeader};
pub use message::{BusMessage, ClientMessage, DisconnectReason};

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Hard size cap for a datagram routed over the MD bus, including its
/// routing header. Bus framing uses a u16 length, so nothing larger can
/// be represented on the wire.
pub const MD_DATAGRAM_LIMIT: usize = 65_535;
