// vigil/src/events.rs
//
// Shared event types and all domain types flowing through Vigil.
// Frames move extraction → queue → fan-out; partial results move
// fan-out → correlator; fused events move correlator → dispatch sink.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Frames ────────────────────────────────────────────────────────────────────

/// Identity of the physical sensor a video came from. Attached to every
/// frame and carried through both analysis calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameIdentity {
    pub camera_id: String,
    pub zone_id: String,
    pub location: String,
}

impl FrameIdentity {
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey {
            camera_id: self.camera_id.clone(),
            zone_id: self.zone_id.clone(),
        }
    }
}

/// One motion-significant frame extracted from a video.
/// `payload` is the JPEG-compressed frame at original resolution; `Bytes`
/// makes the two-way fan-out clone cheap.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: u64,
    pub motion_score: f64,
    pub payload: Bytes,
    pub camera_id: String,
    pub zone_id: String,
    pub location: String,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey {
            camera_id: self.camera_id.clone(),
            zone_id: self.zone_id.clone(),
        }
    }
}

// ── Correlation key ───────────────────────────────────────────────────────────

/// The (camera, zone) identity two partial results must share to be fused.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationKey {
    pub camera_id: String,
    pub zone_id: String,
}

impl CorrelationKey {
    pub fn new(camera_id: impl Into<String>, zone_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            zone_id: zone_id.into(),
        }
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.camera_id, self.zone_id)
    }
}

// ── Analysis partials ─────────────────────────────────────────────────────────

/// One labeled threat with the collaborator's confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatHit {
    pub label: String,
    pub confidence: f32,
}

/// Partial result from the threat-analysis collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatResult {
    pub threats: Vec<ThreatHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

/// Crowd-density bucket reported by the density-estimation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityBucket {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for DensityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Partial result from the density-estimation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DensityResult {
    pub density_bucket: DensityBucket,
}

/// Outcome of one analysis call for one frame. A failed call is recorded
/// inline and never aborts the sibling call or subsequent frames.
/// Serializes as either the result object or `{"error": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisOutcome<T> {
    Completed(T),
    Failed { error: String },
}

impl<T> AnalysisOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn as_completed(&self) -> Option<&T> {
        match self {
            Self::Completed(v) => Some(v),
            Self::Failed { .. } => None,
        }
    }
}

/// Per-frame record assembled by the fan-out dispatcher and returned to the
/// upload caller, so "no motion found" is distinguishable from "motion
/// found but analysis unavailable".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame_id: u64,
    pub motion_score: f64,
    pub timestamp: DateTime<Utc>,
    pub threat: AnalysisOutcome<ThreatResult>,
    pub density: AnalysisOutcome<DensityResult>,
}

// ── Fused events ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchType {
    Fire,
    Security,
    Medical,
}

impl std::fmt::Display for DispatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fire => write!(f, "fire"),
            Self::Security => write!(f, "security"),
            Self::Medical => write!(f, "medical"),
        }
    }
}

/// A fully correlated incident, built once per accumulated partial pair and
/// handed to the dispatch sink. `safe` is always false: fusion only happens
/// when both signals carried actionable content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub camera_id: String,
    pub location: String,
    pub zone_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    pub dispatch_type: DispatchType,
    pub severity: Severity,
    pub density_bucket: DensityBucket,
    pub threats: Vec<ThreatHit>,
    pub message: String,
    pub safe: bool,
    pub source: Vec<String>,
}

impl FusedEvent {
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Unique event id: SHA256[:4] over key + fusion instant, hex encoded.
    pub fn generate_id(key: &CorrelationKey, at: DateTime<Utc>) -> String {
        use sha2::{Digest, Sha256};
        let mut h = Sha256::new();
        h.update(b"vigil_event:");
        h.update(key.camera_id.as_bytes());
        h.update(b":");
        h.update(key.zone_id.as_bytes());
        h.update(at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
        format!("fused_{}", hex::encode(&h.finalize()[..4]))
    }
}

/// Correlator verdict for one reported partial.
#[derive(Debug, Clone)]
pub enum ReportOutcome {
    /// Both parts were present: the entry was consumed and fused.
    Combined(FusedEvent),
    /// Stored; the counterpart has not arrived yet.
    Waiting,
    /// Per-key fusion budget exhausted; the report was dropped.
    RateLimited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_outcome_serializes_error_inline() {
        let ok: AnalysisOutcome<DensityResult> = AnalysisOutcome::Completed(DensityResult {
            density_bucket: DensityBucket::High,
        });
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"density_bucket":"high"}"#
        );

        let failed: AnalysisOutcome<DensityResult> = AnalysisOutcome::Failed {
            error: "timed out".into(),
        };
        assert_eq!(
            serde_json::to_string(&failed).unwrap(),
            r#"{"error":"timed out"}"#
        );

        let parsed: AnalysisOutcome<DensityResult> =
            serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert!(!parsed.is_completed());
    }

    #[test]
    fn event_ids_are_prefixed_and_distinct_across_keys() {
        let at = Utc::now();
        let a = FusedEvent::generate_id(&CorrelationKey::new("cam-1", "z-1"), at);
        let b = FusedEvent::generate_id(&CorrelationKey::new("cam-2", "z-1"), at);
        assert!(a.starts_with("fused_"));
        assert_eq!(a.len(), "fused_".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn density_bucket_roundtrips_lowercase() {
        let parsed: DensityBucket = serde_json::from_str(r#""medium""#).unwrap();
        assert_eq!(parsed, DensityBucket::Medium);
        assert_eq!(parsed.to_string(), "medium");
    }
}
