//! Per-client session state machine.
//!
//! One [`ClientSession`] per accepted socket. Handlers take a decoded event
//! (a client datagram or a bus datagram) plus the shared registries and
//! return [`SessionAction`]s; the runtime executes them. The session never
//! touches a socket or the bus directly, which keeps every protocol path
//! deterministic.
//!
//! # State Machine
//!
//! ```text
//! ┌─────┐ CLIENT_HELLO ok ┌───────────┐ SET_STATE(2) ┌─────────────┐
//! │ New │────────────────>│ Anonymous │─────────────>│ Established │
//! └─────┘                 └───────────┘              └─────────────┘
//!    │ anything else           │ non-uberdog traffic        │
//!    ↓                         ↓                            ↓
//!  closed(NO_HELLO)      closed(INVALID_MSGTYPE)   closed on violation
//! ```
//!
//! The interest engine lives here too: every `(parent, zone)` in the union
//! of the session's interests maps to exactly one live subscription on
//! `location2channel(parent, zone)`, and readiness replies fire exactly
//! once per interest activation.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use doorman_proto::{
    location2channel, BusMessage, ClientMessage, Datagram, DatagramView, DisconnectReason,
    MdDatagram, ProtocolError, MD_DATAGRAM_LIMIT,
};

use crate::{
    allocator::ChannelAllocator,
    interest::{covered_elsewhere, readiness_elsewhere, Interest},
    schema::SchemaRegistry,
    uberdog::UberdogRegistry,
    visibility::VisibilityTable,
};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no handshake yet.
    New,
    /// Handshake done, not authenticated.
    Anonymous,
    /// Authenticated by the server side.
    Established,
}

impl SessionState {
    /// Decode the wire encoding used by CLIENTAGENT_SET_STATE.
    #[must_use]
    pub const fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Self::New),
            1 => Some(Self::Anonymous),
            2 => Some(Self::Established),
            _ => None,
        }
    }

    /// Wire encoding of this state.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::New => 0,
            Self::Anonymous => 1,
            Self::Established => 2,
        }
    }
}

/// Log severities carried by [`SessionAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Informational message.
    Info,
    /// Something off, session continues or is closing by policy.
    Warn,
    /// Internal fault.
    Error,
}

/// Actions returned by session handlers for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write this datagram to the client socket.
    SendToClient(Datagram),
    /// Publish this datagram on the MD bus.
    Publish(MdDatagram),
    /// Subscribe the session to a bus channel.
    Subscribe(u64),
    /// Unsubscribe the session from a bus channel.
    Unsubscribe(u64),
    /// Close the connection. Any queued `SendToClient` actions are flushed
    /// first.
    Close {
        /// Human-readable reason, for logs.
        reason: String,
    },
    /// Forward a message to the logging layer.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
    },
}

/// A client protocol violation: the reason code and text that go out in
/// CLIENT_GO_GET_LOST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Disconnect reason code.
    pub reason: DisconnectReason,
    /// Message for the client and the logs.
    pub message: String,
}

impl Violation {
    /// Build a violation.
    #[must_use]
    pub fn new(reason: DisconnectReason, message: impl Into<String>) -> Self {
        Self { reason, message: message.into() }
    }
}

impl From<ProtocolError> for Violation {
    fn from(err: ProtocolError) -> Self {
        let reason = match err {
            ProtocolError::Oversized { .. } => DisconnectReason::OversizedDatagram,
            ProtocolError::Truncated { .. }
            | ProtocolError::InvalidString
            | ProtocolError::HeaderTooShort { .. } => DisconnectReason::TruncatedDatagram,
        };
        Self::new(reason, err.to_string())
    }
}

/// Shared agent state a session handler runs against.
///
/// The supervisor owns all of this; handlers borrow it for the duration of
/// exactly one event, which is what serializes access across sessions.
pub struct SessionContext<'a> {
    /// Class catalog and schema hash.
    pub schema: &'a SchemaRegistry,
    /// Well-known object catalog.
    pub uberdogs: &'a UberdogRegistry,
    /// Process-wide object visibility table.
    pub visibility: &'a mut VisibilityTable,
    /// Identity channel allocator.
    pub allocator: &'a mut ChannelAllocator,
    /// Protocol version expected in CLIENT_HELLO.
    pub expected_version: &'a str,
}

/// Per-connection state machine.
#[derive(Debug)]
pub struct ClientSession {
    state: SessionState,
    /// Channel currently representing this client as sender/recipient.
    identity_channel: u64,
    /// Channel originally drawn from the allocator; reserved until
    /// teardown.
    allocated_channel: u64,
    /// Whether the identity channel is still the allocated one.
    identity_is_allocated: bool,
    owned_objects: BTreeSet<u32>,
    interests: BTreeMap<u16, Interest>,
    /// Mirror of the session's live bus subscriptions.
    subscribed: BTreeSet<u64>,
    /// Datagrams to publish at teardown, in append order.
    post_removes: Vec<Bytes>,
    /// No further events are processed once set.
    closed: bool,
    torn_down: bool,
}

impl ClientSession {
    /// Create a session around an allocated identity channel.
    #[must_use]
    pub fn new(channel: u64) -> Self {
        Self {
            state: SessionState::New,
            identity_channel: channel,
            allocated_channel: channel,
            identity_is_allocated: true,
            owned_objects: BTreeSet::new(),
            interests: BTreeMap::new(),
            subscribed: BTreeSet::new(),
            post_removes: Vec::new(),
            closed: false,
            torn_down: false,
        }
    }

    /// Initial actions: subscribe the identity channel.
    pub fn start(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.subscribe(self.identity_channel, &mut actions);
        actions
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current identity channel.
    #[must_use]
    pub fn identity_channel(&self) -> u64 {
        self.identity_channel
    }

    /// The channel drawn from the allocator at construction.
    #[must_use]
    pub fn allocated_channel(&self) -> u64 {
        self.allocated_channel
    }

    /// Whether the session has stopped processing events.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Object ids the server has pushed as owned.
    #[must_use]
    pub fn owned_objects(&self) -> &BTreeSet<u32> {
        &self.owned_objects
    }

    /// Live interests by id.
    #[must_use]
    pub fn interests(&self) -> &BTreeMap<u16, Interest> {
        &self.interests
    }

    /// Channels this session believes it is subscribed to.
    pub fn subscriptions(&self) -> impl Iterator<Item = u64> + '_ {
        self.subscribed.iter().copied()
    }

    /// Number of queued post-remove datagrams.
    #[must_use]
    pub fn post_remove_count(&self) -> usize {
        self.post_removes.len()
    }

    // ------------------------------------------------------------------
    // Client-side events
    // ------------------------------------------------------------------

    /// Process one datagram from the client socket.
    pub fn handle_client_datagram(
        &mut self,
        ctx: &mut SessionContext<'_>,
        data: Bytes,
    ) -> Vec<SessionAction> {
        if self.closed {
            return Vec::new();
        }

        let mut view = DatagramView::new(data);
        match self.dispatch_client(ctx, &mut view) {
            Ok(mut actions) => {
                // The handler's effects stand; trailing bytes are still
                // fatal for the session.
                if !self.closed && !view.is_exhausted() {
                    actions.extend(self.disconnect(
                        DisconnectReason::OversizedDatagram,
                        "Datagram contains excess data.".to_string(),
                    ));
                }
                actions
            },
            Err(v) => self.disconnect(v.reason, v.message),
        }
    }

    fn dispatch_client(
        &mut self,
        ctx: &mut SessionContext<'_>,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        let raw = view.read_u16()?;

        match self.state {
            SessionState::New => {
                if ClientMessage::from_u16(raw) != Some(ClientMessage::Hello) {
                    return Err(Violation::new(
                        DisconnectReason::NoHello,
                        "First packet is not CLIENT_HELLO",
                    ));
                }
                self.handle_hello(ctx, view)
            },
            SessionState::Anonymous => {
                if ClientMessage::from_u16(raw) == Some(ClientMessage::ObjectUpdateField) {
                    self.handle_update_field(ctx, view)
                } else {
                    Err(Violation::new(
                        DisconnectReason::InvalidMsgtype,
                        format!("Message type {raw} not allowed prior to authentication."),
                    ))
                }
            },
            SessionState::Established => match ClientMessage::from_u16(raw) {
                Some(ClientMessage::ObjectUpdateField) => self.handle_update_field(ctx, view),
                Some(ClientMessage::ObjectLocation) => self.handle_object_location(ctx, view),
                Some(ClientMessage::AddInterest) => self.handle_add_interest(ctx, view),
                Some(ClientMessage::RemoveInterest) => self.handle_remove_interest(ctx, view),
                _ => Err(Violation::new(
                    DisconnectReason::InvalidMsgtype,
                    format!("Message type {raw} not valid."),
                )),
            },
        }
    }

    fn handle_hello(
        &mut self,
        ctx: &mut SessionContext<'_>,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        let dc_hash = view.read_u32()?;
        let expected_hash = ctx.schema.hash();
        if dc_hash != expected_hash {
            return Err(Violation::new(
                DisconnectReason::BadDcHash,
                format!("Client DC hash mismatch: server={expected_hash:#x}, client={dc_hash:#x}"),
            ));
        }

        let version = view.read_string()?;
        if version != ctx.expected_version {
            return Err(Violation::new(
                DisconnectReason::BadVersion,
                format!(
                    "Client version mismatch: server={}, client={}",
                    ctx.expected_version, version
                ),
            ));
        }

        self.state = SessionState::Anonymous;
        Ok(vec![SessionAction::SendToClient(Datagram::client(ClientMessage::HelloResp))])
    }

    /// Field-update gate: resolve the class, resolve the field, check the
    /// send permission, validate the payload against the schema, and only
    /// then let the update onto the bus.
    fn handle_update_field(
        &mut self,
        ctx: &mut SessionContext<'_>,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        let do_id = view.read_u32()?;
        let field_id = view.read_u16()?;

        let class_id = if let Some(dog) = ctx.uberdogs.get(do_id) {
            if self.state != SessionState::Established && !dog.anonymous {
                return Err(Violation::new(
                    DisconnectReason::AnonymousViolation,
                    format!("Object {do_id} does not accept anonymous updates."),
                ));
            }
            dog.class_id
        } else if self.state != SessionState::Established {
            return Err(Violation::new(
                DisconnectReason::AnonymousViolation,
                format!("Object {do_id} is not an uberdog."),
            ));
        } else if let Some(obj) = ctx.visibility.get(do_id) {
            obj.class_id
        } else {
            return Err(Violation::new(
                DisconnectReason::MissingObject,
                format!("Object {do_id} does not exist."),
            ));
        };

        let class_name =
            ctx.schema.class(class_id).map_or("<unknown class>", |c| c.name.as_str());
        let Some(field) = ctx.schema.field(class_id, field_id) else {
            return Err(Violation::new(
                DisconnectReason::ForbiddenField,
                format!("Update for nonexistent field {field_id} on {class_name}({do_id})"),
            ));
        };

        let is_owned = self.owned_objects.contains(&do_id);
        if !field.clsend && !(is_owned && field.ownsend) {
            return Err(Violation::new(
                DisconnectReason::ForbiddenField,
                format!("Update for non-sendable field {class_name}({do_id}).{}", field.name),
            ));
        }

        let start = view.tell();
        field.consume(view)?;
        let payload = view.slice(start, view.tell());

        let mut body = Datagram::new();
        body.add_u32(do_id);
        body.add_u16(field_id);
        body.add_raw(&payload);
        let md = MdDatagram::new(
            u64::from(do_id),
            self.identity_channel,
            BusMessage::StateServerObjectUpdateField,
            body.into_bytes(),
        );

        if md.encoded_len() > MD_DATAGRAM_LIMIT {
            return Err(Violation::new(
                DisconnectReason::OversizedDatagram,
                "Field update too large to be routed on MD.",
            ));
        }

        Ok(vec![SessionAction::Publish(md)])
    }

    /// Client-initiated relocation: the gate validates ownership and drops
    /// the message. Forwarding semantics belong to the surrounding system.
    fn handle_object_location(
        &mut self,
        ctx: &mut SessionContext<'_>,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        let do_id = view.read_u32()?;

        if !ctx.visibility.contains(do_id) {
            return Err(Violation::new(
                DisconnectReason::MissingObject,
                format!("Client tried to manipulate unknown object {do_id}"),
            ));
        }
        if !self.owned_objects.contains(&do_id) {
            return Err(Violation::new(
                DisconnectReason::ForbiddenRelocate,
                "Client cannot relocate an object it does not own.",
            ));
        }

        let _parent = view.read_u32()?;
        let _zone = view.read_u32()?;
        Ok(Vec::new())
    }

    fn handle_add_interest(
        &mut self,
        ctx: &mut SessionContext<'_>,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        let interest_id = view.read_u16()?;
        let context = view.read_u32()?;
        let parent = view.read_u32()?;

        let mut zones: Vec<u32> = Vec::new();
        while !view.is_exhausted() {
            let zone = view.read_u32()?;
            if !zones.contains(&zone) {
                zones.push(zone);
            }
        }

        if self.interests.contains_key(&interest_id) {
            Ok(self.alter_interest(ctx, interest_id, context, parent, zones))
        } else {
            Ok(self.open_interest(interest_id, context, parent, zones))
        }
    }

    fn handle_remove_interest(
        &mut self,
        ctx: &mut SessionContext<'_>,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        let interest_id = view.read_u16()?;
        let context = if view.is_exhausted() { 0 } else { view.read_u32()? };

        if !self.interests.contains_key(&interest_id) {
            return Err(Violation::new(
                DisconnectReason::Generic,
                "Tried to remove a non-existent interest.",
            ));
        }

        let mut actions = self.retire_interest(ctx, interest_id, true);
        if context != 0 {
            actions.push(Self::done_interest_resp(interest_id, context));
        }
        Ok(actions)
    }

    // ------------------------------------------------------------------
    // Interest engine
    // ------------------------------------------------------------------

    /// Add path for a fresh interest id.
    ///
    /// Zones already covered by another interest on the same parent are not
    /// re-queried and inherit their current ready state; only genuinely new
    /// zones get a subscription and a zone query.
    fn open_interest(
        &mut self,
        interest_id: u16,
        context: u32,
        parent: u32,
        zones: Vec<u32>,
    ) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        let mut interest = Interest::new(parent, context, []);
        let mut new_zones = Vec::new();

        for zone in zones {
            match readiness_elsewhere(&self.interests, None, parent, zone) {
                Some(ready) => interest.push_zone(zone, ready),
                None => {
                    interest.push_zone(zone, false);
                    new_zones.push(zone);
                    self.subscribe(location2channel(parent, zone), &mut actions);
                },
            }
        }

        if !new_zones.is_empty() {
            actions.push(self.query_zone_all(parent, &new_zones));
        }

        self.interests.insert(interest_id, interest);

        if new_zones.is_empty() {
            actions.push(Self::done_interest_resp(interest_id, context));
        }
        actions
    }

    /// Alter path: same interest id declared again.
    fn alter_interest(
        &mut self,
        ctx: &mut SessionContext<'_>,
        interest_id: u16,
        context: u32,
        parent: u32,
        zones: Vec<u32>,
    ) -> Vec<SessionAction> {
        let Some(old) = self.interests.get(&interest_id).cloned() else {
            return self.open_interest(interest_id, context, parent, zones);
        };

        if old.parent != parent {
            // Parent moved: full remove of the old view, full add of the new.
            let mut actions = self.retire_interest(ctx, interest_id, true);
            actions.extend(self.open_interest(interest_id, context, parent, zones));
            return actions;
        }

        let mut actions = Vec::new();
        let mut interest = Interest::new(parent, context, []);
        let mut new_zones = Vec::new();

        for &zone in &zones {
            if let Some(ready) = old.zone_ready(zone) {
                interest.push_zone(zone, ready);
            } else {
                match readiness_elsewhere(&self.interests, Some(interest_id), parent, zone) {
                    Some(ready) => interest.push_zone(zone, ready),
                    None => {
                        interest.push_zone(zone, false);
                        new_zones.push(zone);
                        self.subscribe(location2channel(parent, zone), &mut actions);
                    },
                }
            }
        }

        if !new_zones.is_empty() {
            actions.push(self.query_zone_all(parent, &new_zones));
        }

        let removed: Vec<u32> = old.zone_ids().filter(|z| !interest.contains_zone(*z)).collect();
        self.interests.insert(interest_id, interest);

        for zone in removed {
            if !covered_elsewhere(&self.interests, None, parent, zone) {
                self.unsubscribe(location2channel(parent, zone), &mut actions);
                self.release_zone_objects(ctx, parent, zone, true, &mut actions);
            }
        }

        if self.interests.get(&interest_id).is_some_and(Interest::is_ready) {
            actions.push(Self::done_interest_resp(interest_id, context));
        }
        actions
    }

    /// Remove an interest, unsubscribing and disabling whatever its zones
    /// alone were holding visible.
    fn retire_interest(
        &mut self,
        ctx: &mut SessionContext<'_>,
        interest_id: u16,
        emit_disables: bool,
    ) -> Vec<SessionAction> {
        let Some(interest) = self.interests.remove(&interest_id) else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        for zone in interest.zone_ids() {
            if !covered_elsewhere(&self.interests, None, interest.parent, zone) {
                self.unsubscribe(location2channel(interest.parent, zone), &mut actions);
                self.release_zone_objects(ctx, interest.parent, zone, emit_disables, &mut actions);
            }
        }
        actions
    }

    /// Disable every visible, non-owned object at `(parent, zone)` and drop
    /// its visibility reference.
    fn release_zone_objects(
        &self,
        ctx: &mut SessionContext<'_>,
        parent: u32,
        zone: u32,
        emit_disables: bool,
        actions: &mut Vec<SessionAction>,
    ) {
        let ids: Vec<u32> = ctx
            .visibility
            .iter()
            .filter(|o| o.parent == parent && o.zone == zone)
            .filter(|o| !self.owned_objects.contains(&o.id))
            .map(|o| o.id)
            .collect();

        for do_id in ids {
            if emit_disables {
                let mut dg = Datagram::client(ClientMessage::ObjectDisable);
                dg.add_u32(do_id);
                actions.push(SessionAction::SendToClient(dg));
            }
            ctx.visibility.release(do_id);
        }
    }

    fn query_zone_all(&self, parent: u32, zones: &[u32]) -> SessionAction {
        let mut body = Datagram::new();
        body.add_u32(parent);
        body.add_u16(zones.len() as u16);
        for &zone in zones {
            body.add_u32(zone);
        }
        SessionAction::Publish(MdDatagram::new(
            u64::from(parent),
            self.identity_channel,
            BusMessage::StateServerObjectQueryZoneAll,
            body.into_bytes(),
        ))
    }

    fn done_interest_resp(interest_id: u16, context: u32) -> SessionAction {
        let mut dg = Datagram::client(ClientMessage::DoneInterestResp);
        dg.add_u16(interest_id);
        dg.add_u32(context);
        SessionAction::SendToClient(dg)
    }

    // ------------------------------------------------------------------
    // Bus-side events
    // ------------------------------------------------------------------

    /// Process one datagram delivered from the MD bus.
    ///
    /// Unknown bus message types are logged and dropped (forward compat);
    /// malformed datagrams from the trusted side are internal faults and
    /// terminate the session with GENERIC.
    pub fn handle_bus_datagram(
        &mut self,
        ctx: &mut SessionContext<'_>,
        dg: &MdDatagram,
    ) -> Vec<SessionAction> {
        if self.closed {
            return Vec::new();
        }

        let Some(msg) = dg.bus_message() else {
            return vec![SessionAction::Log {
                level: LogLevel::Error,
                message: format!("received unknown bus message type {:#06x}", dg.msgtype),
            }];
        };

        let mut view = DatagramView::new(dg.body.clone());
        match self.dispatch_bus(ctx, msg, dg, &mut view) {
            Ok(actions) => actions,
            Err(fault) => {
                let mut actions = vec![SessionAction::Log {
                    level: LogLevel::Error,
                    message: format!("bus handler fault on {msg:?}: {}", fault.message),
                }];
                actions.extend(self.send_disconnect(
                    DisconnectReason::Generic.to_u16(),
                    "Internal error.".to_string(),
                ));
                actions
            },
        }
    }

    fn dispatch_bus(
        &mut self,
        ctx: &mut SessionContext<'_>,
        msg: BusMessage,
        dg: &MdDatagram,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        match msg {
            BusMessage::ClientAgentDisconnect => {
                let reason = view.read_u16()?;
                let message = view.read_string()?;
                Ok(self.send_disconnect(reason, message))
            },

            BusMessage::ClientAgentDrop => {
                self.closed = true;
                Ok(vec![SessionAction::Close { reason: "dropped by server".to_string() }])
            },

            BusMessage::ClientAgentSetState => {
                let raw = view.read_u16()?;
                let state = SessionState::from_u16(raw)
                    .ok_or_else(|| Violation::new(
                        DisconnectReason::Generic,
                        format!("invalid session state {raw}"),
                    ))?;
                self.state = state;
                Ok(Vec::new())
            },

            BusMessage::ClientAgentSetSenderId => {
                let channel = view.read_u64()?;
                let mut actions = Vec::new();
                if self.identity_is_allocated {
                    // First reassignment: the allocated channel stays
                    // subscribed until teardown.
                    self.identity_is_allocated = false;
                } else {
                    self.unsubscribe(self.identity_channel, &mut actions);
                }
                self.identity_channel = channel;
                self.subscribe(channel, &mut actions);
                Ok(actions)
            },

            BusMessage::ClientAgentSendDatagram => {
                let blob = view.read_blob()?;
                let mut dg_out = Datagram::new();
                dg_out.add_raw(&blob);
                Ok(vec![SessionAction::SendToClient(dg_out)])
            },

            BusMessage::ClientAgentOpenChannel => {
                let channel = view.read_u64()?;
                let mut actions = Vec::new();
                self.subscribe(channel, &mut actions);
                Ok(actions)
            },

            BusMessage::ClientAgentCloseChannel => {
                let channel = view.read_u64()?;
                let mut actions = Vec::new();
                self.unsubscribe(channel, &mut actions);
                Ok(actions)
            },

            BusMessage::ClientAgentAddPostRemove => {
                let blob = view.read_blob()?;
                self.post_removes.push(blob);
                Ok(Vec::new())
            },

            BusMessage::ClientAgentClearPostRemove => {
                self.post_removes.clear();
                Ok(Vec::new())
            },

            BusMessage::StateServerObjectUpdateField => {
                if dg.from == self.identity_channel {
                    // Own update echoed back through a location channel.
                    return Ok(Vec::new());
                }
                let mut out = Datagram::client(ClientMessage::ObjectUpdateField);
                out.add_raw(&view.read_remainder());
                Ok(vec![SessionAction::SendToClient(out)])
            },

            BusMessage::StateServerObjectEnterZoneWithRequired
            | BusMessage::StateServerObjectEnterZoneWithRequiredOther => {
                self.handle_enter_zone(ctx, msg, view)
            },

            BusMessage::StateServerObjectEnterOwnerRecv => {
                let parent = view.read_u32()?;
                let zone = view.read_u32()?;
                let dc_id = view.read_u16()?;
                let do_id = view.read_u32()?;

                self.owned_objects.insert(do_id);
                ctx.visibility.observe(do_id, parent, zone, dc_id);

                let mut out = Datagram::client(ClientMessage::CreateObjectRequiredOtherOwner);
                out.add_u32(parent);
                out.add_u32(zone);
                out.add_u16(dc_id);
                out.add_u32(do_id);
                out.add_raw(&view.read_remainder());
                Ok(vec![SessionAction::SendToClient(out)])
            },

            BusMessage::StateServerObjectQueryZoneAllDone => self.handle_query_done(view),

            BusMessage::StateServerObjectChangeZone => self.handle_change_zone(ctx, view),

            BusMessage::StateServerObjectQueryZoneAll => {
                // Agent-originated; seeing one inbound means a routing loop.
                Ok(vec![SessionAction::Log {
                    level: LogLevel::Error,
                    message: "query-zone-all delivered back to a client session".to_string(),
                }])
            },
        }
    }

    fn handle_enter_zone(
        &mut self,
        ctx: &mut SessionContext<'_>,
        msg: BusMessage,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        let parent = view.read_u32()?;
        let zone = view.read_u32()?;
        let dc_id = view.read_u16()?;
        let do_id = view.read_u32()?;

        // Owned objects take the owner path; the zone echo is dropped.
        if self.owned_objects.contains(&do_id) {
            return Ok(Vec::new());
        }

        ctx.visibility.observe(do_id, parent, zone, dc_id);

        let out_msg = if msg == BusMessage::StateServerObjectEnterZoneWithRequired {
            ClientMessage::CreateObjectRequired
        } else {
            ClientMessage::CreateObjectRequiredOther
        };
        let mut out = Datagram::client(out_msg);
        out.add_u32(parent);
        out.add_u32(zone);
        out.add_u16(dc_id);
        out.add_u32(do_id);
        out.add_raw(&view.read_remainder());
        Ok(vec![SessionAction::SendToClient(out)])
    }

    /// Zone enumeration finished: mark matching zones ready, replying
    /// exactly once per interest that transitions to ready.
    fn handle_query_done(
        &mut self,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        let parent = view.read_u32()?;
        let count = view.read_u16()?;
        let mut zones = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            zones.push(view.read_u32()?);
        }

        let pending: Vec<u16> = self
            .interests
            .iter()
            .filter(|(_, i)| i.parent == parent && !i.is_ready())
            .map(|(id, _)| *id)
            .collect();

        let mut actions = Vec::new();
        for id in pending {
            let Some(interest) = self.interests.get_mut(&id) else { continue };
            for &zone in &zones {
                interest.mark_zone_ready(zone);
            }
            if interest.is_ready() {
                let context = interest.context;
                actions.push(Self::done_interest_resp(id, context));
            }
        }
        Ok(actions)
    }

    /// Authoritative relocation: keep the table current, then either tell
    /// the client the new location or disable the object out of its world.
    fn handle_change_zone(
        &mut self,
        ctx: &mut SessionContext<'_>,
        view: &mut DatagramView,
    ) -> Result<Vec<SessionAction>, Violation> {
        let do_id = view.read_u32()?;
        let new_parent = view.read_u32()?;
        let new_zone = view.read_u32()?;
        let _old_parent = view.read_u32()?;
        let _old_zone = view.read_u32()?;

        // Visibility is judged on the new location only; the old location's
        // channel simply stops delivering once unsubscribed.
        let still_visible = self
            .interests
            .values()
            .any(|i| i.parent == new_parent && i.contains_zone(new_zone));
        let is_owned = self.owned_objects.contains(&do_id);
        let known = ctx.visibility.contains(do_id);

        if known {
            ctx.visibility.relocate(do_id, new_parent, new_zone);
        }

        if still_visible || is_owned {
            let mut out = Datagram::client(ClientMessage::ObjectLocation);
            out.add_u32(do_id);
            out.add_u32(new_parent);
            out.add_u32(new_zone);
            return Ok(vec![SessionAction::SendToClient(out)]);
        }

        if !known {
            // Stale traffic for an object this agent never saw.
            return Ok(vec![SessionAction::Log {
                level: LogLevel::Debug,
                message: format!("change-zone for unknown object {do_id}, dropped"),
            }]);
        }

        let mut out = Datagram::client(ClientMessage::ObjectDisable);
        out.add_u32(do_id);
        ctx.visibility.release(do_id);
        Ok(vec![SessionAction::SendToClient(out)])
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Tear the session down: release visibility references, drop every
    /// subscription, return the allocated channel, then publish the
    /// post-remove datagrams in append order.
    ///
    /// Idempotent; the runtime calls this on socket close and after any
    /// `Close` action.
    pub fn teardown(&mut self, ctx: &mut SessionContext<'_>) -> Vec<SessionAction> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;
        self.closed = true;

        let mut actions = Vec::new();

        // Release interest-held visibility one interest at a time, so a
        // zone shared between two of our interests releases its objects
        // exactly once. No disables: the socket is gone.
        while let Some(id) = self.interests.keys().next().copied() {
            actions.extend(self.retire_interest(ctx, id, false));
        }

        // One reference per owned object.
        for &do_id in &self.owned_objects {
            ctx.visibility.release(do_id);
        }
        self.owned_objects.clear();

        for channel in std::mem::take(&mut self.subscribed) {
            actions.push(SessionAction::Unsubscribe(channel));
        }

        ctx.allocator.free(self.allocated_channel);

        for blob in std::mem::take(&mut self.post_removes) {
            match MdDatagram::decode(&blob) {
                Ok(md) => actions.push(SessionAction::Publish(md)),
                Err(e) => actions.push(SessionAction::Log {
                    level: LogLevel::Error,
                    message: format!("discarding malformed post-remove datagram: {e}"),
                }),
            }
        }

        actions
    }

    fn disconnect(&mut self, reason: DisconnectReason, message: String) -> Vec<SessionAction> {
        self.send_disconnect(reason.to_u16(), message)
    }

    /// Queue the GO_GET_LOST notice and close. Client faults arrive here
    /// with their specific reason code; server-relayed disconnects pass the
    /// code through raw.
    fn send_disconnect(&mut self, reason: u16, message: String) -> Vec<SessionAction> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;

        let mut dg = Datagram::client(ClientMessage::GoGetLost);
        dg.add_u16(reason);
        // INVARIANT: disconnect messages are either short internal strings
        // or strings read back out of a u16-length-prefixed field, so they
        // always fit the prefix.
        #[allow(clippy::expect_used)]
        dg.add_string(&message).expect("invariant: disconnect message fits a u16 length prefix");

        vec![
            SessionAction::Log {
                level: LogLevel::Warn,
                message: format!("terminating client connection ({reason}): {message}"),
            },
            SessionAction::SendToClient(dg),
            SessionAction::Close { reason: message },
        ]
    }

    fn subscribe(&mut self, channel: u64, actions: &mut Vec<SessionAction>) {
        if self.subscribed.insert(channel) {
            actions.push(SessionAction::Subscribe(channel));
        }
    }

    fn unsubscribe(&mut self, channel: u64, actions: &mut Vec<SessionAction>) {
        if self.subscribed.remove(&channel) {
            actions.push(SessionAction::Unsubscribe(channel));
        }
    }
}
