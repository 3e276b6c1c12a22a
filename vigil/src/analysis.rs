// vigil/src/analysis.rs
//
// Contracts for the two external analysis collaborators, plus wire clients
// speaking the framed-JSON protocol. The pipeline only ever sees the
// traits, so tests (and future transports) inject their own analyzers.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{CorrelationKey, DensityBucket, DensityResult, ThreatHit, ThreatResult};
use crate::wire;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request carried to either collaborator: the frame payload plus the
/// sensor identity the response will be correlated under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub camera_id: String,
    pub zone_id: String,
    pub location: String,
    pub image_hex: String,
}

impl AnalyzeRequest {
    pub fn new(key: &CorrelationKey, location: &str, image: &Bytes) -> Self {
        Self {
            camera_id: key.camera_id.clone(),
            zone_id: key.zone_id.clone(),
            location: location.to_string(),
            image_hex: hex::encode(image),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatResponse {
    pub threats: Vec<ThreatHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityResponse {
    pub density_bucket: DensityBucket,
}

/// Image-labeling collaborator: ordered threat labels with confidences.
pub trait ThreatAnalyzer: Send + Sync {
    fn analyze(&self, req: AnalyzeRequest) -> BoxFuture<'_, Result<ThreatResult>>;
}

/// Density-estimation collaborator: one crowd-density bucket.
pub trait DensityAnalyzer: Send + Sync {
    fn analyze(&self, req: AnalyzeRequest) -> BoxFuture<'_, Result<DensityResult>>;
}

// ── Wire clients ──────────────────────────────────────────────────────────────

pub struct WireThreatAnalyzer {
    addr: String,
}

impl WireThreatAnalyzer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl ThreatAnalyzer for WireThreatAnalyzer {
    fn analyze(&self, req: AnalyzeRequest) -> BoxFuture<'_, Result<ThreatResult>> {
        Box::pin(async move {
            let resp: ThreatResponse = wire::call(&self.addr, &req, wire::MAX_CONTROL_FRAME)
                .await
                .map_err(|e| Error::AnalysisCallFailed(e.to_string()))?;
            Ok(ThreatResult {
                threats: resp.threats,
                model_version: resp.model_version,
            })
        })
    }
}

pub struct WireDensityAnalyzer {
    addr: String,
}

impl WireDensityAnalyzer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl DensityAnalyzer for WireDensityAnalyzer {
    fn analyze(&self, req: AnalyzeRequest) -> BoxFuture<'_, Result<DensityResult>> {
        Box::pin(async move {
            let resp: DensityResponse = wire::call(&self.addr, &req, wire::MAX_CONTROL_FRAME)
                .await
                .map_err(|e| Error::AnalysisCallFailed(e.to_string()))?;
            Ok(DensityResult {
                density_bucket: resp.density_bucket,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_request_carries_identity_and_payload() {
        let key = CorrelationKey::new("cam-1", "z-1");
        let req = AnalyzeRequest::new(&key, "east gate", &Bytes::from_static(b"\x01\x02"));
        assert_eq!(req.camera_id, "cam-1");
        assert_eq!(req.image_hex, "0102");
    }

    #[tokio::test]
    async fn unreachable_collaborator_fails_as_analysis_error() {
        // Port 1 is reserved and never listening.
        let client = WireThreatAnalyzer::new("127.0.0.1:1");
        let key = CorrelationKey::new("cam-1", "z-1");
        let req = AnalyzeRequest::new(&key, "east gate", &Bytes::from_static(b"x"));
        let err = client.analyze(req).await.unwrap_err();
        assert!(matches!(err, Error::AnalysisCallFailed(_)));
    }
}
