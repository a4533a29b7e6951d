//! Interest bookkeeping.
//!
//! An interest is a client-declared view onto a set of zones under one
//! parent. Zones carry a readiness flag: a zone is ready once the state
//! server has acknowledged enumerating it to this session. Zone order is
//! preserved from the request; lookups are by zone value.

use std::collections::BTreeMap;

/// One zone of an interest and whether its enumeration has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneState {
    /// Zone number.
    pub zone: u32,
    /// Whether the state server has acknowledged this zone to us.
    pub ready: bool,
}

/// A client-declared interest: a parent, a set of zones, and the opaque
/// context echoed back in the readiness reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    /// Parent object the zones live under.
    pub parent: u32,
    /// Client-supplied correlation token.
    pub context: u32,
    zones: Vec<ZoneState>,
}

impl Interest {
    /// Create an interest with all zones unready.
    #[must_use]
    pub fn new(parent: u32, context: u32, zones: impl IntoIterator<Item = u32>) -> Self {
        let zones = zones.into_iter().map(|zone| ZoneState { zone, ready: false }).collect();
        Self { parent, context, zones }
    }

    /// Push a zone with an explicit readiness flag, skipping duplicates.
    pub fn push_zone(&mut self, zone: u32, ready: bool) {
        if !self.contains_zone(zone) {
            self.zones.push(ZoneState { zone, ready });
        }
    }

    /// Whether the interest covers a zone.
    #[must_use]
    pub fn contains_zone(&self, zone: u32) -> bool {
        self.zones.iter().any(|z| z.zone == zone)
    }

    /// Readiness of one zone. `None` if the zone is not covered.
    #[must_use]
    pub fn zone_ready(&self, zone: u32) -> Option<bool> {
        self.zones.iter().find(|z| z.zone == zone).map(|z| z.ready)
    }

    /// Mark a zone ready. Returns `true` if the flag changed.
    pub fn mark_zone_ready(&mut self, zone: u32) -> bool {
        match self.zones.iter_mut().find(|z| z.zone == zone) {
            Some(z) if !z.ready => {
                z.ready = true;
                true
            },
            _ => false,
        }
    }

    /// The interest is ready iff every zone is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.zones.iter().all(|z| z.ready)
    }

    /// Zones in request order.
    pub fn zones(&self) -> impl Iterator<Item = &ZoneState> {
        self.zones.iter()
    }

    /// Zone numbers in request order.
    pub fn zone_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.zones.iter().map(|z| z.zone)
    }

    /// Number of zones.
    #[must_use]
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }
}

/// Whether `(parent, zone)` is covered by any interest other than
/// `skip_id`.
///
/// This is the coverage test behind every subscribe/unsubscribe decision:
/// a location channel belongs to the session as long as at least one
/// interest covers it.
pub(crate) fn covered_elsewhere(
    interests: &BTreeMap<u16, Interest>,
    skip_id: Option<u16>,
    parent: u32,
    zone: u32,
) -> bool {
    interests
        .iter()
        .filter(|(id, _)| Some(**id) != skip_id)
        .any(|(_, i)| i.parent == parent && i.contains_zone(zone))
}

/// Ready flag of `(parent, zone)` as seen through any interest other than
/// `skip_id`. `None` if no other interest covers it.
pub(crate) fn readiness_elsewhere(
    interests: &BTreeMap<u16, Interest>,
    skip_id: Option<u16>,
    parent: u32,
    zone: u32,
) -> Option<bool> {
    interests
        .iter()
        .filter(|(id, _)| Some(**id) != skip_id)
        .filter(|(_, i)| i.parent == parent)
        .filter_map(|(_, i)| i.zone_ready(zone))
        .reduce(|a, b| a || b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_all_zones() {
        let mut interest = Interest::new(1000, 42, [2, 3]);
        assert!(!interest.is_ready());

        assert!(interest.mark_zone_ready(2));
        assert!(!interest.is_ready());

        assert!(interest.mark_zone_ready(3));
        assert!(interest.is_ready());

        // Second mark is a no-op.
        assert!(!interest.mark_zone_ready(3));
    }

    #[test]
    fn zoneless_interest_is_vacuously_ready() {
        let interest = Interest::new(1000, 0, []);
        assert!(interest.is_ready());
    }

    #[test]
    fn push_zone_skips_duplicates() {
        let mut interest = Interest::new(1000, 0, [2]);
        interest.push_zone(2, true);
        assert_eq!(interest.zone_count(), 1);
        assert_eq!(interest.zone_ready(2), Some(false));
    }

    #[test]
    fn coverage_ignores_skipped_interest() {
        let mut interests = BTreeMap::new();
        interests.insert(1, Interest::new(1000, 0, [2]));
        interests.insert(2, Interest::new(1000, 0, [2, 3]));

        assert!(covered_elsewhere(&interests, Some(1), 1000, 2));
        assert!(!covered_elsewhere(&interests, Some(2), 1000, 3));
        assert!(!covered_elsewhere(&interests, None, 2000, 2));
    }

    #[test]
    fn readiness_elsewhere_ors_across_interests() {
        let mut interests = BTreeMap::new();
        let mut a = Interest::new(1000, 0, [2]);
        a.mark_zone_ready(2);
        interests.insert(1, a);
        interests.insert(2, Interest::new(1000, 0, [2]));

        assert_eq!(readiness_elsewhere(&interests, None, 1000, 2), Some(true));
        assert_eq!(readiness_elsewhere(&interests, Some(1), 1000, 2), Some(false));
        assert_eq!(readiness_elsewhere(&interests, None, 1000, 9), None);
    }
}
