//! MD bus datagrams and the packed routing header.
//!
//! Every datagram on the message-director bus opens with a fixed 18-byte
//! header: destination channel, sender channel, message type. The header is
//! raw little-endian binary so the bus can route on the `to` field without
//! touching the body; [`zerocopy`] casts it straight out of the receive
//! buffer.

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{errors::ProtocolError, message::BusMessage, Result, MD_DATAGRAM_LIMIT};

/// Map an object location to its multicast bus channel.
///
/// A deterministic bijection: the parent occupies the high 32 bits, the
/// zone the low 32. Sessions subscribe to this channel for every
/// `(parent, zone)` in the union of their interests.
#[must_use]
pub const fn location2channel(parent: u32, zone: u32) -> u64 {
    ((parent as u64) << 32) | zone as u64
}

/// Fixed 18-byte MD routing header (little-endian).
///
/// Fields are raw byte arrays to avoid alignment issues; all bit patterns
/// are valid, so casting untrusted bytes cannot misbehave.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MdHeader {
    to: [u8; 8],
    from: [u8; 8],
    msgtype: [u8; 2],
}

impl MdHeader {
    /// Serialized header size.
    pub const SIZE: usize = 18;

    /// Build a header from its fields.
    #[must_use]
    pub fn new(to: u64, from: u64, msgtype: u16) -> Self {
        Self { to: to.to_le_bytes(), from: from.to_le_bytes(), msgtype: msgtype.to_le_bytes() }
    }

    /// Parse a header from the front of a buffer (zero-copy).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::HeaderTooShort` if fewer than 18 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(bytes)
            .map(|(header, _)| header)
            .map_err(|_| ProtocolError::HeaderTooShort { expected: Self::SIZE, actual: bytes.len() })
    }

    /// Destination channel.
    #[must_use]
    pub fn to(&self) -> u64 {
        u64::from_le_bytes(self.to)
    }

    /// Sender channel.
    #[must_use]
    pub fn from(&self) -> u64 {
        u64::from_le_bytes(self.from)
    }

    /// Raw message type.
    #[must_use]
    pub fn msgtype(&self) -> u16 {
        u16::from_le_bytes(self.msgtype)
    }
}

impl std::fmt::Debug for MdHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdHeader")
            .field("to", &self.to())
            .field("from", &self.from())
            .field("msgtype", &self.msgtype())
            .finish()
    }
}

/// One complete bus datagram: routing header plus opaque body.
///
/// # Invariants
///
/// - Total encoded size (header + body) never exceeds
///   [`MD_DATAGRAM_LIMIT`]; [`MdDatagram::encode`] is the enforcement
///   point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdDatagram {
    /// Destination channel.
    pub to: u64,
    /// Sender channel.
    pub from: u64,
    /// Raw message type. Use [`MdDatagram::bus_message`] for the enum view.
    pub msgtype: u16,
    /// Type-specific body, positional little-endian fields.
    pub body: Bytes,
}

impl MdDatagram {
    /// Build a datagram from its parts.
    #[must_use]
    pub fn new(to: u64, from: u64, msgtype: BusMessage, body: impl Into<Bytes>) -> Self {
        Self { to, from, msgtype: msgtype.to_u16(), body: body.into() }
    }

    /// Message type as the enum. `None` if unrecognized.
    #[must_use]
    pub fn bus_message(&self) -> Option<BusMessage> {
        BusMessage::from_u16(self.msgtype)
    }

    /// Total size once encoded.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        MdHeader::SIZE + self.body.len()
    }

    /// Encode into a buffer: `[header (18 bytes)] + [body]`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Oversized` if the total exceeds
    ///   [`MD_DATAGRAM_LIMIT`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let total = self.encoded_len();
        if total > MD_DATAGRAM_LIMIT {
            return Err(ProtocolError::Oversized { size: total, limit: MD_DATAGRAM_LIMIT });
        }

        dst.put_slice(MdHeader::new(self.to, self.from, self.msgtype).as_bytes());
        dst.put_slice(&self.body);
        Ok(())
    }

    /// Decode from wire bytes.
    ///
    /// The body is everything after the header; there is no separate length
    /// field because bus framing already delimits datagrams.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::HeaderTooShort` if the header is incomplete.
    /// - `ProtocolError::Oversized` if the input exceeds
    ///   [`MD_DATAGRAM_LIMIT`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MD_DATAGRAM_LIMIT {
            return Err(ProtocolError::Oversized { size: bytes.len(), limit: MD_DATAGRAM_LIMIT });
        }

        let header = MdHeader::from_bytes(bytes)?;
        let (to, from, msgtype) = (header.to(), header.from(), header.msgtype());
        let body = Bytes::copy_from_slice(&bytes[MdHeader::SIZE..]);

        Ok(Self { to, from, msgtype, body })
    }
}
