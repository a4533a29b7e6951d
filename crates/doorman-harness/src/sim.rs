//! In-memory agent simulation.
//!
//! Wires real [`ClientSession`]s to a synchronous channel → subscriber map
//! standing in for the MD bus. Client-bound datagrams and bus publishes
//! are recorded per session for assertions; bus routing loops published
//! datagrams back to subscribed sessions the way the real bus would.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use doorman_core::{
    ChannelAllocator, ClientSession, SchemaRegistry, SessionAction, SessionContext,
    UberdogRegistry, VisibilityTable,
};
use doorman_proto::{Datagram, MdDatagram};

use crate::invariants::{AgentSnapshot, ObjectSnapshot, SessionSnapshot};

/// A whole client agent in a box: sessions, registries, and a synchronous
/// bus.
pub struct SimAgent {
    schema: SchemaRegistry,
    uberdogs: UberdogRegistry,
    visibility: VisibilityTable,
    allocator: ChannelAllocator,
    version: String,
    sessions: BTreeMap<u64, ClientSession>,
    /// Bus-side subscription state: channel → session ids.
    channels: BTreeMap<u64, BTreeSet<u64>>,
    /// Recorded client-bound datagrams per session.
    client_out: BTreeMap<u64, Vec<Datagram>>,
    /// Recorded datagrams published onto the bus (by sessions or teardown).
    bus_out: Vec<MdDatagram>,
    /// Sessions that emitted Close and have been torn down.
    closed: BTreeSet<u64>,
    next_session_id: u64,
}

impl SimAgent {
    /// Create a simulated agent.
    #[must_use]
    pub fn new(
        schema: SchemaRegistry,
        uberdogs: UberdogRegistry,
        version: &str,
        channel_min: u64,
        channel_max: u64,
    ) -> Self {
        Self {
            schema,
            uberdogs,
            visibility: VisibilityTable::new(),
            allocator: ChannelAllocator::new(channel_min, channel_max),
            version: version.to_string(),
            sessions: BTreeMap::new(),
            channels: BTreeMap::new(),
            client_out: BTreeMap::new(),
            bus_out: Vec::new(),
            closed: BTreeSet::new(),
            next_session_id: 0,
        }
    }

    /// The schema the agent was built with.
    #[must_use]
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// The shared visibility table.
    #[must_use]
    pub fn visibility(&self) -> &VisibilityTable {
        &self.visibility
    }

    /// The channel allocator.
    #[must_use]
    pub fn allocator(&self) -> &ChannelAllocator {
        &self.allocator
    }

    /// Accept a new client. `None` if the channel range is exhausted.
    pub fn connect(&mut self) -> Option<u64> {
        let channel = self.allocator.alloc()?;
        self.next_session_id += 1;
        let session_id = self.next_session_id;

        let mut session = ClientSession::new(channel);
        let actions = session.start();
        self.sessions.insert(session_id, session);
        self.client_out.entry(session_id).or_default();
        self.apply_actions(session_id, actions);
        Some(session_id)
    }

    /// Feed one client datagram into a session.
    pub fn client_send(&mut self, session_id: u64, dg: impl Into<Bytes>) {
        let actions = {
            let (sessions, mut ctx) = split(
                &mut self.sessions,
                &self.schema,
                &self.uberdogs,
                &mut self.visibility,
                &mut self.allocator,
                &self.version,
            );
            match sessions.get_mut(&session_id) {
                Some(session) => session.handle_client_datagram(&mut ctx, dg.into()),
                None => Vec::new(),
            }
        };
        self.apply_actions(session_id, actions);
    }

    /// Deliver one bus datagram directly to a session, bypassing routing.
    pub fn deliver(&mut self, session_id: u64, dg: &MdDatagram) {
        let actions = {
            let (sessions, mut ctx) = split(
                &mut self.sessions,
                &self.schema,
                &self.uberdogs,
                &mut self.visibility,
                &mut self.allocator,
                &self.version,
            );
            match sessions.get_mut(&session_id) {
                Some(session) => session.handle_bus_datagram(&mut ctx, dg),
                None => Vec::new(),
            }
        };
        self.apply_actions(session_id, actions);
    }

    /// Publish a datagram on the bus, delivering it to every session
    /// subscribed to its `to` channel (once each, in session order).
    pub fn publish(&mut self, dg: &MdDatagram) {
        let targets: Vec<u64> =
            self.channels.get(&dg.to).into_iter().flatten().copied().collect();
        for session_id in targets {
            self.deliver(session_id, dg);
        }
    }

    /// Close a session (as on TCP close): teardown, bus cleanup.
    pub fn disconnect(&mut self, session_id: u64) {
        let actions = {
            let (sessions, mut ctx) = split(
                &mut self.sessions,
                &self.schema,
                &self.uberdogs,
                &mut self.visibility,
                &mut self.allocator,
                &self.version,
            );
            match sessions.get_mut(&session_id) {
                Some(session) => session.teardown(&mut ctx),
                None => Vec::new(),
            }
        };
        self.apply_actions(session_id, actions);
        self.sessions.remove(&session_id);
        self.closed.insert(session_id);
        for subs in self.channels.values_mut() {
            subs.remove(&session_id);
        }
        self.channels.retain(|_, subs| !subs.is_empty());
    }

    /// Drain the recorded client-bound datagrams of a session.
    pub fn take_client_out(&mut self, session_id: u64) -> Vec<Datagram> {
        self.client_out.get_mut(&session_id).map(std::mem::take).unwrap_or_default()
    }

    /// Drain the recorded bus publishes.
    pub fn take_bus_out(&mut self) -> Vec<MdDatagram> {
        std::mem::take(&mut self.bus_out)
    }

    /// Borrow a live session.
    #[must_use]
    pub fn session(&self, session_id: u64) -> Option<&ClientSession> {
        self.sessions.get(&session_id)
    }

    /// Bus-side subscription set of a session.
    #[must_use]
    pub fn bus_subscriptions(&self, session_id: u64) -> BTreeSet<u64> {
        self.channels
            .iter()
            .filter(|(_, subs)| subs.contains(&session_id))
            .map(|(ch, _)| *ch)
            .collect()
    }

    /// Whether a session has been closed and torn down.
    #[must_use]
    pub fn is_closed(&self, session_id: u64) -> bool {
        self.closed.contains(&session_id)
    }

    /// Snapshot the observable state for invariant checks.
    #[must_use]
    pub fn snapshot(&self) -> AgentSnapshot {
        let objects = self
            .visibility
            .iter()
            .map(|o| ObjectSnapshot {
                id: o.id,
                parent: o.parent,
                zone: o.zone,
                refcount: o.refcount,
            })
            .collect();

        let sessions = self
            .sessions
            .iter()
            .map(|(&id, session)| SessionSnapshot {
                id,
                identity_channel: session.identity_channel(),
                allocated_channel: session.allocated_channel(),
                owned: session.owned_objects().clone(),
                interests: session
                    .interests()
                    .iter()
                    .map(|(&iid, i)| (iid, i.parent, i.zone_ids().collect()))
                    .collect(),
                subscriptions: session.subscriptions().collect(),
                bus_subscriptions: self.bus_subscriptions(id),
            })
            .collect();

        AgentSnapshot { objects, sessions }
    }

    fn apply_actions(&mut self, session_id: u64, actions: Vec<SessionAction>) {
        let mut close = false;
        for action in actions {
            match action {
                SessionAction::SendToClient(dg) => {
                    self.client_out.entry(session_id).or_default().push(dg);
                },
                SessionAction::Publish(md) => {
                    self.bus_out.push(md.clone());
                    self.publish(&md);
                },
                SessionAction::Subscribe(ch) => {
                    self.channels.entry(ch).or_default().insert(session_id);
                },
                SessionAction::Unsubscribe(ch) => {
                    if let Some(subs) = self.channels.get_mut(&ch) {
                        subs.remove(&session_id);
                        if subs.is_empty() {
                            self.channels.remove(&ch);
                        }
                    }
                },
                SessionAction::Close { .. } => close = true,
                SessionAction::Log { .. } => {},
            }
        }

        if close && !self.closed.contains(&session_id) {
            self.disconnect(session_id);
        }
    }
}

/// Field-level split so session handlers can borrow the registries while
/// the session itself is borrowed out of the map.
fn split<'a>(
    sessions: &'a mut BTreeMap<u64, ClientSession>,
    schema: &'a SchemaRegistry,
    uberdogs: &'a UberdogRegistry,
    visibility: &'a mut VisibilityTable,
    allocator: &'a mut ChannelAllocator,
    version: &'a str,
) -> (&'a mut BTreeMap<u64, ClientSession>, SessionContext<'a>) {
    (sessions, SessionContext {
        schema,
        uberdogs,
        visibility,
        allocator,
        expected_version: version,
    })
}
