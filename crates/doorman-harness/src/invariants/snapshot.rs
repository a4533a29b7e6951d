//! Observable state snapshots for invariant checking.
//!
//! Invariants operate on snapshots rather than live state so every check
//! sees one consistent instant of the agent.

use std::collections::BTreeSet;

/// Snapshot of the whole agent: visibility table plus every live session.
#[derive(Debug, Clone, Default)]
pub struct AgentSnapshot {
    /// Visibility table entries.
    pub objects: Vec<ObjectSnapshot>,
    /// Live sessions.
    pub sessions: Vec<SessionSnapshot>,
}

/// One visibility table entry.
#[derive(Debug, Clone, Copy)]
pub struct ObjectSnapshot {
    /// Object id.
    pub id: u32,
    /// Current parent.
    pub parent: u32,
    /// Current zone.
    pub zone: u32,
    /// Live references.
    pub refcount: u32,
}

/// One session's observable state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Runtime session id.
    pub id: u64,
    /// Current identity channel.
    pub identity_channel: u64,
    /// Channel reserved in the allocator.
    pub allocated_channel: u64,
    /// Owned object ids.
    pub owned: BTreeSet<u32>,
    /// Interests: `(interest_id, parent, zones)`.
    pub interests: Vec<(u16, u32, Vec<u32>)>,
    /// Channels the session believes it is subscribed to.
    pub subscriptions: BTreeSet<u64>,
    /// Channels the bus has the session subscribed to.
    pub bus_subscriptions: BTreeSet<u64>,
}

impl SessionSnapshot {
    /// Whether any of this session's interests covers `(parent, zone)`.
    #[must_use]
    pub fn covers(&self, parent: u32, zone: u32) -> bool {
        self.interests.iter().any(|(_, p, zones)| *p == parent && zones.contains(&zone))
    }
}
