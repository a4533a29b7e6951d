//! Standard agent invariants.
//!
//! These are the quantified properties of the interest/visibility engine:
//! what must be true after any event, independent of the scenario that got
//! the agent there.

use doorman_proto::location2channel;

use super::{AgentSnapshot, Invariant, InvariantResult, Violation};

/// Every object's refcount equals the number of sessions that either own
/// it or cover its current location with an interest.
///
/// Holds at quiescence (no zone queries in flight): enter messages for
/// owned objects skip the interest path and overlapping interests never
/// re-query a zone, so each session contributes at most one reference.
pub struct RefcountSoundness;

impl Invariant for RefcountSoundness {
    fn name(&self) -> &'static str {
        "refcount_soundness"
    }

    fn check(&self, state: &AgentSnapshot) -> InvariantResult {
        for obj in &state.objects {
            let holders = state
                .sessions
                .iter()
                .filter(|s| s.owned.contains(&obj.id) || s.covers(obj.parent, obj.zone))
                .count() as u32;

            if obj.refcount != holders {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "object {} at ({}, {}): refcount {} but {} session(s) hold it",
                        obj.id, obj.parent, obj.zone, obj.refcount, holders
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Every `(parent, zone)` in the union of a session's interests has a live
/// subscription on its location channel.
pub struct SubscriptionMirror;

impl Invariant for SubscriptionMirror {
    fn name(&self) -> &'static str {
        "subscription_mirror"
    }

    fn check(&self, state: &AgentSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for (interest_id, parent, zones) in &session.interests {
                for zone in zones {
                    let channel = location2channel(*parent, *zone);
                    if !session.subscriptions.contains(&channel) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "session {}: interest {} covers ({}, {}) but channel {:#x} is \
                                 not subscribed",
                                session.id, interest_id, parent, zone, channel
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// The bus's subscription table agrees with each session's own mirror.
pub struct BusMirrorsSession;

impl Invariant for BusMirrorsSession {
    fn name(&self) -> &'static str {
        "bus_mirrors_session"
    }

    fn check(&self, state: &AgentSnapshot) -> InvariantResult {
        for session in &state.sessions {
            if session.subscriptions != session.bus_subscriptions {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "session {}: session mirror {:?} != bus view {:?}",
                        session.id, session.subscriptions, session.bus_subscriptions
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Every owned object is present in the visibility table.
///
/// OWNER_RECV observes the object into the table, and owned objects never
/// take the disable path, so ownership without an entry means bookkeeping
/// drifted.
pub struct OwnedObjectsKnown;

impl Invariant for OwnedObjectsKnown {
    fn name(&self) -> &'static str {
        "owned_objects_known"
    }

    fn check(&self, state: &AgentSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for owned in &session.owned {
                if !state.objects.iter().any(|o| o.id == *owned) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "session {}: owned object {} missing from visibility table",
                            session.id, owned
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
