//! The message-director bus seam.
//!
//! The real MD is an external service; the agent only needs the small
//! capability set in [`PubSubBus`]: subscribe, unsubscribe, publish. The
//! [`InProcessBus`] here implements it for single-process deployments and
//! for the test harness. Routing is a channel/subscriber map, with
//! at-most-one delivery per participant no matter how many of its
//! subscriptions match.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use doorman_proto::MdDatagram;
use tokio::sync::mpsc;

/// Capability set a bus implementation provides to the agent.
pub trait PubSubBus: Send + Sync + 'static {
    /// Subscribe a participant to a channel. Duplicate subscriptions are
    /// idempotent.
    fn subscribe(&self, channel: u64, participant: u64);

    /// Drop one subscription. Unknown pairs are ignored.
    fn unsubscribe(&self, channel: u64, participant: u64);

    /// Publish a datagram to whoever is subscribed to its `to` channel.
    fn publish(&self, dg: MdDatagram);
}

#[derive(Default)]
struct BusState {
    /// Channel → subscribed participant ids.
    channels: HashMap<u64, HashSet<u64>>,
    /// Participant id → delivery queue.
    participants: HashMap<u64, mpsc::UnboundedSender<MdDatagram>>,
}

/// In-process pub/sub router.
///
/// Delivery is a non-blocking enqueue onto each matching participant's
/// queue, so publishing from inside an event handler can never deadlock or
/// re-enter.
#[derive(Default)]
pub struct InProcessBus {
    state: Mutex<BusState>,
}

impl InProcessBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant's delivery queue.
    pub fn attach(&self, participant: u64, tx: mpsc::UnboundedSender<MdDatagram>) {
        let mut state = self.lock();
        state.participants.insert(participant, tx);
    }

    /// Remove a participant and every subscription it still holds.
    pub fn detach(&self, participant: u64) {
        let mut state = self.lock();
        state.participants.remove(&participant);
        state.channels.retain(|_, subs| {
            subs.remove(&participant);
            !subs.is_empty()
        });
    }

    /// Participants currently subscribed to a channel. For tests and
    /// invariant checks.
    #[must_use]
    pub fn subscribers(&self, channel: u64) -> Vec<u64> {
        let state = self.lock();
        let mut subs: Vec<u64> =
            state.channels.get(&channel).into_iter().flatten().copied().collect();
        subs.sort_unstable();
        subs
    }

    /// Channels a participant is subscribed to. For tests and invariant
    /// checks.
    #[must_use]
    pub fn subscriptions_of(&self, participant: u64) -> Vec<u64> {
        let state = self.lock();
        let mut channels: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, subs)| subs.contains(&participant))
            .map(|(ch, _)| *ch)
            .collect();
        channels.sort_unstable();
        channels
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        // Mutex poisoning only happens if a panic occurred while holding
        // the lock; continuing with the inner state is the right recovery
        // for a router.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PubSubBus for InProcessBus {
    fn subscribe(&self, channel: u64, participant: u64) {
        let mut state = self.lock();
        state.channels.entry(channel).or_default().insert(participant);
    }

    fn unsubscribe(&self, channel: u64, participant: u64) {
        let mut state = self.lock();
        if let Some(subs) = state.channels.get_mut(&channel) {
            subs.remove(&participant);
            if subs.is_empty() {
                state.channels.remove(&channel);
            }
        }
    }

    fn publish(&self, dg: MdDatagram) {
        let state = self.lock();
        let Some(subs) = state.channels.get(&dg.to) else { return };
        for participant in subs {
            if let Some(tx) = state.participants.get(participant) {
                // A closed queue means the participant is tearing down;
                // losing the datagram matches MD semantics for a gone
                // subscriber.
                let _ = tx.send(dg.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use doorman_proto::BusMessage;

    use super::*;

    fn datagram(to: u64) -> MdDatagram {
        MdDatagram::new(to, 7, BusMessage::ClientAgentSendDatagram, Bytes::from_static(b"x"))
    }

    #[tokio::test]
    async fn publish_reaches_only_subscribers() {
        let bus = InProcessBus::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        bus.attach(1, tx_a);
        bus.attach(2, tx_b);

        bus.subscribe(100, 1);
        bus.publish(datagram(100));
        bus.publish(datagram(200));

        assert_eq!(rx_a.recv().await.unwrap().to, 100);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_subscription_delivers_once() {
        let bus = InProcessBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.attach(1, tx);

        bus.subscribe(100, 1);
        bus.subscribe(100, 1);
        bus.publish(datagram(100));

        assert_eq!(rx.recv().await.unwrap().to, 100);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = InProcessBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.attach(1, tx);

        bus.subscribe(100, 1);
        bus.unsubscribe(100, 1);
        bus.publish(datagram(100));

        assert!(rx.try_recv().is_err());
        assert!(bus.subscribers(100).is_empty());
    }

    #[tokio::test]
    async fn detach_removes_all_subscriptions() {
        let bus = InProcessBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        bus.attach(1, tx);

        bus.subscribe(100, 1);
        bus.subscribe(200, 1);
        bus.detach(1);

        assert!(bus.subscribers(100).is_empty());
        assert!(bus.subscribers(200).is_empty());
        assert!(bus.subscriptions_of(1).is_empty());
    }
}
