// vigil/src/state/store.rs
//
// Keyed correlation state.
// DashMap = sharded concurrent HashMap — reports for different keys never
// contend, and the entry API makes each read-modify-write for a single key
// one atomic step under that key's shard lock.
//
// PartialStore  — (camera, zone) → accumulated partial pair. The entry is
//                 removed in the same atomic step that completes it, so a
//                 pair can never fuse twice.
// RateWindows   — (camera, zone) → fusion timestamps in the trailing 60 s,
//                 pruned lazily on every check; memory per key is bounded
//                 by the fusion limit.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use crate::events::{CorrelationKey, DensityResult, ThreatResult};

/// One in-flight correlation: whatever has arrived so far for a key.
#[derive(Debug, Clone)]
pub struct PartialEntry {
    pub threat: Option<ThreatResult>,
    pub density: Option<DensityResult>,
    pub location: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Both halves of a consumed correlation, handed out exactly once.
#[derive(Debug, Clone)]
pub struct CompletePair {
    pub threat: ThreatResult,
    pub density: DensityResult,
    pub location: String,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum Upsert {
    /// The counterpart was already present: the entry has been removed and
    /// its contents are returned.
    Complete(CompletePair),
    /// Stored; still waiting for the other part.
    Waiting,
}

#[derive(Default)]
pub struct PartialStore {
    inner: DashMap<CorrelationKey, PartialEntry>,
}

impl PartialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_threat(
        &self,
        key: &CorrelationKey,
        location: &str,
        part: ThreatResult,
        now: DateTime<Utc>,
    ) -> Upsert {
        self.upsert(key, location, now, |entry| {
            if entry.threat.replace(part).is_some() {
                warn!("[{}] overwriting unconsumed threat part (last write wins)", key);
            }
        })
    }

    pub fn upsert_density(
        &self,
        key: &CorrelationKey,
        location: &str,
        part: DensityResult,
        now: DateTime<Utc>,
    ) -> Upsert {
        self.upsert(key, location, now, |entry| {
            if entry.density.replace(part).is_some() {
                warn!(
                    "[{}] overwriting unconsumed density part (last write wins)",
                    key
                );
            }
        })
    }

    // Single atomic step per key: the entry lock is held across the upsert,
    // the completeness check, and the removal.
    fn upsert(
        &self,
        key: &CorrelationKey,
        location: &str,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut PartialEntry),
    ) -> Upsert {
        match self.inner.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                apply(entry);
                entry.location = location.to_string();
                if entry.threat.is_some() && entry.density.is_some() {
                    let entry = slot.remove();
                    Upsert::Complete(CompletePair {
                        threat: entry.threat.expect("checked above"),
                        density: entry.density.expect("checked above"),
                        location: entry.location,
                        first_seen_at: entry.first_seen_at,
                    })
                } else {
                    Upsert::Waiting
                }
            }
            Entry::Vacant(slot) => {
                let mut entry = PartialEntry {
                    threat: None,
                    density: None,
                    location: location.to_string(),
                    first_seen_at: now,
                };
                apply(&mut entry);
                slot.insert(entry);
                Upsert::Waiting
            }
        }
    }

    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

// ── Rate windows ──────────────────────────────────────────────────────────────

const WINDOW_SECS: i64 = 60;

#[derive(Default)]
pub struct RateWindows {
    inner: DashMap<CorrelationKey, VecDeque<DateTime<Utc>>>,
}

impl RateWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `limit` fusions already happened for this key within the
    /// trailing window. Prunes expired timestamps as a side effect.
    pub fn is_limited(&self, key: &CorrelationKey, now: DateTime<Utc>, limit: usize) -> bool {
        match self.inner.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                let window = slot.get_mut();
                prune(window, now);
                if window.is_empty() {
                    slot.remove();
                    false
                } else {
                    window.len() >= limit
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Record one fusion at `now`.
    pub fn record(&self, key: &CorrelationKey, now: DateTime<Utc>) {
        let mut window = self.inner.entry(key.clone()).or_default();
        prune(&mut window, now);
        window.push_back(now);
    }

    pub fn len(&self, key: &CorrelationKey) -> usize {
        self.inner.get(key).map(|w| w.len()).unwrap_or(0)
    }
}

fn prune(window: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    let cutoff = now - Duration::seconds(WINDOW_SECS);
    while window.front().map(|t| *t < cutoff).unwrap_or(false) {
        window.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DensityBucket, ThreatHit};

    fn key() -> CorrelationKey {
        CorrelationKey::new("cam-1", "z-1")
    }

    fn threat(label: &str) -> ThreatResult {
        ThreatResult {
            threats: vec![ThreatHit {
                label: label.into(),
                confidence: 0.9,
            }],
            model_version: None,
        }
    }

    fn density(bucket: DensityBucket) -> DensityResult {
        DensityResult {
            density_bucket: bucket,
        }
    }

    #[test]
    fn completes_regardless_of_arrival_order() {
        let now = Utc::now();

        let store = PartialStore::new();
        assert!(matches!(
            store.upsert_threat(&key(), "gate", threat("fire"), now),
            Upsert::Waiting
        ));
        let Upsert::Complete(pair) =
            store.upsert_density(&key(), "gate", density(DensityBucket::High), now)
        else {
            panic!("second part must complete the pair");
        };
        assert_eq!(pair.threat.threats[0].label, "fire");
        assert_eq!(pair.density.density_bucket, DensityBucket::High);

        let store = PartialStore::new();
        assert!(matches!(
            store.upsert_density(&key(), "gate", density(DensityBucket::High), now),
            Upsert::Waiting
        ));
        let Upsert::Complete(pair) = store.upsert_threat(&key(), "gate", threat("fire"), now)
        else {
            panic!("second part must complete the pair");
        };
        assert_eq!(pair.threat.threats[0].label, "fire");
    }

    #[test]
    fn completion_removes_the_entry() {
        let now = Utc::now();
        let store = PartialStore::new();
        store.upsert_threat(&key(), "gate", threat("gun"), now);
        store.upsert_density(&key(), "gate", density(DensityBucket::Low), now);
        assert!(store.is_empty());
        // A lone follow-up report starts a fresh cycle.
        assert!(matches!(
            store.upsert_threat(&key(), "gate", threat("gun"), now),
            Upsert::Waiting
        ));
    }

    #[test]
    fn duplicate_part_overwrites_last_write_wins() {
        let now = Utc::now();
        let store = PartialStore::new();
        store.upsert_threat(&key(), "gate", threat("knife"), now);
        store.upsert_threat(&key(), "gate", threat("gun"), now);
        assert_eq!(store.len(), 1);
        let Upsert::Complete(pair) =
            store.upsert_density(&key(), "gate", density(DensityBucket::Low), now)
        else {
            panic!("pair must complete");
        };
        assert_eq!(pair.threat.threats[0].label, "gun");
    }

    #[test]
    fn keys_do_not_interfere() {
        let now = Utc::now();
        let store = PartialStore::new();
        let other = CorrelationKey::new("cam-2", "z-9");
        store.upsert_threat(&key(), "gate", threat("fire"), now);
        assert!(matches!(
            store.upsert_density(&other, "lot", density(DensityBucket::High), now),
            Upsert::Waiting
        ));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn window_limits_and_prunes() {
        let windows = RateWindows::new();
        let t0 = Utc::now();
        for i in 0..5 {
            assert!(!windows.is_limited(&key(), t0 + Duration::seconds(i), 5));
            windows.record(&key(), t0 + Duration::seconds(i));
        }
        assert!(windows.is_limited(&key(), t0 + Duration::seconds(5), 5));
        // 61 s after the first fusion, one slot has expired.
        assert!(!windows.is_limited(&key(), t0 + Duration::seconds(61), 5));
        assert_eq!(windows.len(&key()), 4);
    }

    #[test]
    fn window_memory_stays_bounded() {
        let windows = RateWindows::new();
        let t0 = Utc::now();
        for i in 0..500 {
            windows.record(&key(), t0 + Duration::seconds(i));
        }
        // Everything outside the trailing 60 s was pruned on the way.
        assert!(windows.len(&key()) <= 61);
    }
}
