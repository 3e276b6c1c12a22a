// vigil/src/engine/dispatcher.rs
//
// Dispatch sink: where fused events go for action.
// JsonlSink routes each event to a per-responder JSONL queue file plus an
// audit log. Wire these files to your paging / notification integrations
// in production, or point VIGIL_DISPATCH_ADDR at a remote dispatch service
// to use WireSink instead.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::analysis::BoxFuture;
use crate::error::{Error, Result};
use crate::events::{DispatchType, FusedEvent};
use crate::wire;

pub trait DispatchSink: Send + Sync {
    /// Hand one fused event to the sink; resolves once acknowledged.
    fn dispatch<'a>(&'a self, event: &'a FusedEvent) -> BoxFuture<'a, Result<()>>;
}

// ── Local JSONL sink ──────────────────────────────────────────────────────────

pub struct JsonlSink {
    out: PathBuf,
}

impl JsonlSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)?;
        Ok(Self { out })
    }

    async fn write(&self, file: &str, content: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.out.join(file))
            .await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }

    fn queue_file(dispatch_type: DispatchType) -> &'static str {
        match dispatch_type {
            DispatchType::Fire => "fire_queue.jsonl",
            DispatchType::Medical => "medical_queue.jsonl",
            DispatchType::Security => "security_queue.jsonl",
        }
    }
}

impl DispatchSink for JsonlSink {
    fn dispatch<'a>(&'a self, event: &'a FusedEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(
                "DISPATCH {} team | event={} severity={} location={}",
                event.dispatch_type, event.event_id, event.severity, event.location
            );
            let line = event.to_jsonl() + "\n";
            self.write(Self::queue_file(event.dispatch_type), &line)
                .await?;
            self.write("audit_log.jsonl", &line).await?;
            Ok(())
        })
    }
}

// ── Remote wire sink ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAck {
    pub status: String,
    pub event_id: String,
}

pub struct WireSink {
    addr: String,
}

impl WireSink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl DispatchSink for WireSink {
    fn dispatch<'a>(&'a self, event: &'a FusedEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let ack: DispatchAck =
                wire::call(&self.addr, event, wire::MAX_CONTROL_FRAME).await?;
            if ack.status != "dispatched" {
                return Err(Error::Remote(format!(
                    "dispatch sink rejected {}: {}",
                    event.event_id, ack.status
                )));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DensityBucket, Severity, ThreatHit};
    use chrono::Utc;

    fn event(dispatch_type: DispatchType) -> FusedEvent {
        FusedEvent {
            event_id: "fused_00ff00ff".into(),
            timestamp: Utc::now(),
            camera_id: "cam-1".into(),
            location: "east gate".into(),
            zone_id: "z-1".into(),
            model_version: None,
            dispatch_type,
            severity: Severity::High,
            density_bucket: DensityBucket::High,
            threats: vec![ThreatHit {
                label: "fire".into(),
                confidence: 0.95,
            }],
            message: "Threats: fire | Crowd: high".into(),
            safe: false,
            source: vec!["threat-analysis".into(), "density-analysis".into()],
        }
    }

    #[tokio::test]
    async fn routes_by_dispatch_type_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path()).unwrap();

        sink.dispatch(&event(DispatchType::Fire)).await.unwrap();
        sink.dispatch(&event(DispatchType::Medical)).await.unwrap();

        let fire = std::fs::read_to_string(dir.path().join("fire_queue.jsonl")).unwrap();
        assert_eq!(fire.lines().count(), 1);
        assert!(fire.contains("\"fused_00ff00ff\""));
        let audit = std::fs::read_to_string(dir.path().join("audit_log.jsonl")).unwrap();
        assert_eq!(audit.lines().count(), 2);
        assert!(!dir.path().join("security_queue.jsonl").exists());

        // Each line is a parseable event.
        let parsed: FusedEvent = serde_json::from_str(fire.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.dispatch_type, DispatchType::Fire);
    }
}
