// vigil/src/engine/correlator.rs
//
// Keyed, rate-limited fusion of the two analysis partials.
//
// Per report, in order:
//   1. rate window check — at the per-key fusion budget, the report is
//      dropped (load-shedding, not buffering)
//   2. atomic upsert into the partial store
//   3. if both parts are now present the entry is consumed (same atomic
//      step as the upsert) and a FusedEvent is built
//
// Arrival order of the two parts is arbitrary; fusion output is identical
// either way. A second report for an already-populated field overwrites the
// stale value — one active incident per physical key at a time.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::events::{
    CorrelationKey, DensityBucket, DensityResult, DispatchType, FusedEvent, ReportOutcome,
    Severity, ThreatHit, ThreatResult,
};
use crate::state::store::{CompletePair, PartialStore, RateWindows, Upsert};

const HIGH_CONF_THRESHOLD: f32 = 0.8;
const MED_CONF_THRESHOLD: f32 = 0.5;
const CRITICAL_LABELS: &[&str] = &["fire", "gun", "knife"];
const FIRE_LABELS: &[&str] = &["fire", "smoke"];

pub const SOURCE_THREAT: &str = "threat-analysis";
pub const SOURCE_DENSITY: &str = "density-analysis";

pub struct Correlator {
    parts: PartialStore,
    windows: RateWindows,
    rate_limit: usize,

    pub fusions_total: AtomicU64,
    pub waiting_total: AtomicU64,
    pub rate_limited_total: AtomicU64,
}

impl Correlator {
    pub fn new(rate_limit_per_min: usize) -> Self {
        Self {
            parts: PartialStore::new(),
            windows: RateWindows::new(),
            rate_limit: rate_limit_per_min,
            fusions_total: AtomicU64::new(0),
            waiting_total: AtomicU64::new(0),
            rate_limited_total: AtomicU64::new(0),
        }
    }

    pub fn report_threat(
        &self,
        key: &CorrelationKey,
        location: &str,
        part: ThreatResult,
    ) -> ReportOutcome {
        self.report_threat_at(key, location, part, Utc::now())
    }

    pub fn report_density(
        &self,
        key: &CorrelationKey,
        location: &str,
        part: DensityResult,
    ) -> ReportOutcome {
        self.report_density_at(key, location, part, Utc::now())
    }

    pub fn report_threat_at(
        &self,
        key: &CorrelationKey,
        location: &str,
        part: ThreatResult,
        now: DateTime<Utc>,
    ) -> ReportOutcome {
        if self.shed(key, now) {
            return ReportOutcome::RateLimited;
        }
        self.settle(key, self.parts.upsert_threat(key, location, part, now), now)
    }

    pub fn report_density_at(
        &self,
        key: &CorrelationKey,
        location: &str,
        part: DensityResult,
        now: DateTime<Utc>,
    ) -> ReportOutcome {
        if self.shed(key, now) {
            return ReportOutcome::RateLimited;
        }
        self.settle(key, self.parts.upsert_density(key, location, part, now), now)
    }

    fn shed(&self, key: &CorrelationKey, now: DateTime<Utc>) -> bool {
        if self.windows.is_limited(key, now, self.rate_limit) {
            self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
            warn!("[{}] rate limited, dropping report", key);
            return true;
        }
        false
    }

    fn settle(&self, key: &CorrelationKey, upsert: Upsert, now: DateTime<Utc>) -> ReportOutcome {
        match upsert {
            Upsert::Waiting => {
                self.waiting_total.fetch_add(1, Ordering::Relaxed);
                ReportOutcome::Waiting
            }
            Upsert::Complete(pair) => {
                self.windows.record(key, now);
                self.fusions_total.fetch_add(1, Ordering::Relaxed);
                let event = fuse(key, pair, now);
                info!(
                    "[{}] fused {} | dispatch={} severity={}",
                    key, event.event_id, event.dispatch_type, event.severity
                );
                ReportOutcome::Combined(event)
            }
        }
    }

    /// True while a lone partial is waiting for its counterpart.
    pub fn has_pending(&self, key: &CorrelationKey) -> bool {
        self.parts.contains(key)
    }

    pub fn pending_keys(&self) -> usize {
        self.parts.len()
    }

    pub fn fusions_in_window(&self, key: &CorrelationKey) -> usize {
        self.windows.len(key)
    }
}

fn fuse(key: &CorrelationKey, pair: CompletePair, now: DateTime<Utc>) -> FusedEvent {
    let CompletePair {
        threat, density, location, ..
    } = pair;
    let bucket = density.density_bucket;
    FusedEvent {
        event_id: FusedEvent::generate_id(key, now),
        timestamp: now,
        camera_id: key.camera_id.clone(),
        location,
        zone_id: key.zone_id.clone(),
        model_version: threat.model_version,
        dispatch_type: map_dispatch_type(&threat.threats, bucket),
        severity: map_severity(&threat.threats),
        density_bucket: bucket,
        message: build_message(&threat.threats, bucket),
        threats: threat.threats,
        safe: false,
        source: vec![SOURCE_THREAT.to_string(), SOURCE_DENSITY.to_string()],
    }
}

/// `high` when a critical label reaches 0.8 confidence, `medium` when any
/// threat reaches 0.5, `low` otherwise.
pub fn map_severity(threats: &[ThreatHit]) -> Severity {
    if threats
        .iter()
        .any(|t| CRITICAL_LABELS.contains(&t.label.as_str()) && t.confidence >= HIGH_CONF_THRESHOLD)
    {
        return Severity::High;
    }
    if threats.iter().any(|t| t.confidence >= MED_CONF_THRESHOLD) {
        return Severity::Medium;
    }
    Severity::Low
}

/// `fire` beats density-driven `medical`; everything else is `security`.
pub fn map_dispatch_type(threats: &[ThreatHit], bucket: DensityBucket) -> DispatchType {
    if threats
        .iter()
        .any(|t| FIRE_LABELS.contains(&t.label.as_str()))
    {
        return DispatchType::Fire;
    }
    if bucket == DensityBucket::High {
        return DispatchType::Medical;
    }
    DispatchType::Security
}

fn build_message(threats: &[ThreatHit], bucket: DensityBucket) -> String {
    let labels: Vec<&str> = threats.iter().map(|t| t.label.as_str()).collect();
    format!("Threats: {} | Crowd: {}", labels.join(", "), bucket)
}
