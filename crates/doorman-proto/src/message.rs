//! Message ids and disconnect reason codes.
//!
//! Every wire message starts with a `u16` id. Client-facing ids and MD bus
//! ids live in separate number spaces: [`ClientMessage`] for the TCP side,
//! [`BusMessage`] for the internal bus. Unknown ids decode to `None`; what
//! that means (fatal for clients, log-and-drop for the bus) is session
//! policy, not a protocol property.

/// Client-facing message ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ClientMessage {
    /// Opening handshake: `dc_hash: u32, version: string`.
    Hello = 1,
    /// Successful handshake acknowledgment (empty body).
    HelloResp = 2,
    /// Terminal notice: `reason: u16, message: string`.
    GoGetLost = 4,
    /// Field update, both directions: `do_id: u32, field_id: u16, payload`.
    ObjectUpdateField = 24,
    /// Object left visibility: `do_id: u32`.
    ObjectDisable = 25,
    /// Object creation with required fields:
    /// `parent: u32, zone: u32, dc_id: u16, do_id: u32, required`.
    CreateObjectRequired = 34,
    /// As above plus optional fields.
    CreateObjectRequiredOther = 35,
    /// Owner-view creation (required + other fields).
    CreateObjectRequiredOtherOwner = 36,
    /// Interest readiness reply: `interest_id: u16, context: u32`.
    DoneInterestResp = 48,
    /// Declare interest: `interest_id: u16, context: u32, parent: u32,
    /// zones: u32...` (zones run to the end of the datagram).
    AddInterest = 97,
    /// Retract interest: `interest_id: u16 [, context: u32]`.
    RemoveInterest = 99,
    /// Object location, both directions: `do_id: u32, parent: u32, zone: u32`.
    ObjectLocation = 102,
}

impl ClientMessage {
    /// Raw u16 id.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Decode a raw id. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::Hello),
            2 => Some(Self::HelloResp),
            4 => Some(Self::GoGetLost),
            24 => Some(Self::ObjectUpdateField),
            25 => Some(Self::ObjectDisable),
            34 => Some(Self::CreateObjectRequired),
            35 => Some(Self::CreateObjectRequiredOther),
            36 => Some(Self::CreateObjectRequiredOtherOwner),
            48 => Some(Self::DoneInterestResp),
            97 => Some(Self::AddInterest),
            99 => Some(Self::RemoveInterest),
            102 => Some(Self::ObjectLocation),
            _ => None,
        }
    }
}

/// MD bus message ids.
///
/// `ClientAgent*` messages are addressed to a session's identity channel by
/// other roles; `StateServer*` messages arrive on identity or location
/// channels and describe authoritative object state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BusMessage {
    /// Disconnect a client with a reason: `reason: u16, message: string`.
    ClientAgentDisconnect = 1001,
    /// Drop a client silently (no notice).
    ClientAgentDrop = 1002,
    /// Force the session FSM state: `state: u16`.
    ClientAgentSetState = 1003,
    /// Reassign the session's identity channel: `channel: u64`.
    ClientAgentSetSenderId = 1004,
    /// Relay an opaque blob to the client: `blob`.
    ClientAgentSendDatagram = 1005,
    /// Add an ad-hoc channel subscription: `channel: u64`.
    ClientAgentOpenChannel = 1006,
    /// Remove an ad-hoc channel subscription: `channel: u64`.
    ClientAgentCloseChannel = 1007,
    /// Append a teardown datagram: `blob`.
    ClientAgentAddPostRemove = 1008,
    /// Clear the teardown datagram list.
    ClientAgentClearPostRemove = 1009,

    /// Field update from the state server:
    /// `do_id: u32, field_id: u16, payload`.
    StateServerObjectUpdateField = 2004,
    /// Object entered a zone, required fields only:
    /// `parent: u32, zone: u32, dc_id: u16, do_id: u32, required`.
    StateServerObjectEnterZoneWithRequired = 2005,
    /// Object entered a zone, required + other fields.
    StateServerObjectEnterZoneWithRequiredOther = 2006,
    /// Object pushed as owned by this client.
    StateServerObjectEnterOwnerRecv = 2007,
    /// Enumerate zones under a parent:
    /// `parent: u32, count: u16, zones: u32...`.
    StateServerObjectQueryZoneAll = 2008,
    /// Zone enumeration finished: `parent: u32, count: u16, zones: u32...`.
    StateServerObjectQueryZoneAllDone = 2009,
    /// Object moved: `do_id: u32, new_parent: u32, new_zone: u32,
    /// old_parent: u32, old_zone: u32`.
    StateServerObjectChangeZone = 2010,
}

impl BusMessage {
    /// Raw u16 id.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Decode a raw id. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(v: u16) -> Option<Self> {
        match v {
            1001 => Some(Self::ClientAgentDisconnect),
            1002 => Some(Self::ClientAgentDrop),
            1003 => Some(Self::ClientAgentSetState),
            1004 => Some(Self::ClientAgentSetSenderId),
            1005 => Some(Self::ClientAgentSendDatagram),
            1006 => Some(Self::ClientAgentOpenChannel),
            1007 => Some(Self::ClientAgentCloseChannel),
            1008 => Some(Self::ClientAgentAddPostRemove),
            1009 => Some(Self::ClientAgentClearPostRemove),
            2004 => Some(Self::StateServerObjectUpdateField),
            2005 => Some(Self::StateServerObjectEnterZoneWithRequired),
            2006 => Some(Self::StateServerObjectEnterZoneWithRequiredOther),
            2007 => Some(Self::StateServerObjectEnterOwnerRecv),
            2008 => Some(Self::StateServerObjectQueryZoneAll),
            2009 => Some(Self::StateServerObjectQueryZoneAllDone),
            2010 => Some(Self::StateServerObjectChangeZone),
            _ => None,
        }
    }
}

/// Reason codes carried in `CLIENT_GO_GET_LOST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DisconnectReason {
    /// Catch-all for faults with no more specific code.
    Generic = 1,
    /// First datagram was not CLIENT_HELLO.
    NoHello = 2,
    /// Schema hash mismatch in the handshake.
    BadDcHash = 3,
    /// Protocol version mismatch in the handshake.
    BadVersion = 4,
    /// Message id not valid for the session's current state.
    InvalidMsgtype = 5,
    /// A decode ran off the end of the datagram.
    TruncatedDatagram = 6,
    /// Trailing bytes after a complete message, or a payload too large to
    /// route.
    OversizedDatagram = 7,
    /// Operation requires an established session.
    AnonymousViolation = 8,
    /// Field does not exist or the client may not send it.
    ForbiddenField = 9,
    /// Client tried to relocate an object it does not own.
    ForbiddenRelocate = 10,
    /// Object unknown to this client.
    MissingObject = 11,
}

impl DisconnectReason {
    /// Raw u16 code.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Decode a raw code. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::Generic),
            2 => Some(Self::NoHello),
            3 => Some(Self::BadDcHash),
            4 => Some(Self::BadVersion),
            5 => Some(Self::InvalidMsgtype),
            6 => Some(Self::TruncatedDatagram),
            7 => Some(Self::OversizedDatagram),
            8 => Some(Self::AnonymousViolation),
            9 => Some(Self::ForbiddenField),
            10 => Some(Self::ForbiddenRelocate),
            11 => Some(Self::MissingObject),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_round_trip() {
        for msg in [
            ClientMessage::Hello,
            ClientMessage::HelloResp,
            ClientMessage::GoGetLost,
            ClientMessage::ObjectUpdateField,
            ClientMessage::ObjectDisable,
            ClientMessage::CreateObjectRequired,
            ClientMessage::CreateObjectRequiredOther,
            ClientMessage::CreateObjectRequiredOtherOwner,
            ClientMessage::DoneInterestResp,
            ClientMessage::AddInterest,
            ClientMessage::RemoveInterest,
            ClientMessage::ObjectLocation,
        ] {
            assert_eq!(ClientMessage::from_u16(msg.to_u16()), Some(msg));
        }
        assert_eq!(ClientMessage::from_u16(0xFFFF), None);
    }

    #[test]
    fn bus_ids_round_trip() {
        for msg in [
            BusMessage::ClientAgentDisconnect,
            BusMessage::ClientAgentDrop,
            BusMessage::ClientAgentSetState,
            BusMessage::ClientAgentSetSenderId,
            BusMessage::ClientAgentSendDatagram,
            BusMessage::ClientAgentOpenChannel,
            BusMessage::ClientAgentCloseChannel,
            BusMessage::ClientAgentAddPostRemove,
            BusMessage::ClientAgentClearPostRemove,
            BusMessage::StateServerObjectUpdateField,
            BusMessage::StateServerObjectEnterZoneWithRequired,
            BusMessage::StateServerObjectEnterZoneWithRequiredOther,
            BusMessage::StateServerObjectEnterOwnerRecv,
            BusMessage::StateServerObjectQueryZoneAll,
            BusMessage::StateServerObjectQueryZoneAllDone,
            BusMessage::StateServerObjectChangeZone,
        ] {
            assert_eq!(BusMessage::from_u16(msg.to_u16()), Some(msg));
        }
        assert_eq!(BusMessage::from_u16(0), None);
    }

    #[test]
    fn reason_codes_round_trip() {
        for code in 1..=11u16 {
            let reason = DisconnectReason::from_u16(code).unwrap();
            assert_eq!(reason.to_u16(), code);
        }
        assert_eq!(DisconnectReason::from_u16(12), None);
    }
}
