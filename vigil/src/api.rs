// vigil/src/api.rs
//
// Ingestion + correlator report server over the framed-JSON wire protocol.
//
// Operations:
//   process_video  — video (inline hex, or a server-local path) + identity;
//                    responds with the per-frame upload summary
//   report_threat  — threat partial for a (camera, zone) key
//   report_density — density partial for a (camera, zone) key
//   report_*       → {"status": "combined" | "waiting" | "rate_limited"}
//   status         — pipeline counters
//
// Failures answer with an {"error": ...} envelope on the same connection;
// the connection stays open for further requests.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::events::{
    CorrelationKey, DensityBucket, DensityResult, FrameIdentity, FusedEvent, ReportOutcome,
    ThreatHit, ThreatResult,
};
use crate::pipeline::{Pipeline, StatusBody, UploadSummary};
use crate::wire::{self, ErrorBody};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApiRequest {
    ProcessVideo {
        camera_id: String,
        zone_id: String,
        location: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_hex: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    ReportThreat {
        camera_id: String,
        zone_id: String,
        location: String,
        threats: Vec<ThreatHit>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_version: Option<String>,
    },
    ReportDensity {
        camera_id: String,
        zone_id: String,
        location: String,
        density_bucket: DensityBucket,
    },
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Combined,
    Waiting,
    RateLimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<FusedEvent>,
}

impl From<ReportOutcome> for ReportResponse {
    fn from(outcome: ReportOutcome) -> Self {
        match outcome {
            ReportOutcome::Combined(event) => Self {
                status: ReportStatus::Combined,
                event: Some(event),
            },
            ReportOutcome::Waiting => Self {
                status: ReportStatus::Waiting,
                event: None,
            },
            ReportOutcome::RateLimited => Self {
                status: ReportStatus::RateLimited,
                event: None,
            },
        }
    }
}

pub struct ApiServer {
    listener: TcpListener,
    pipeline: Arc<Pipeline>,
}

impl ApiServer {
    pub async fn bind(addr: &str, pipeline: Arc<Pipeline>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, pipeline })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> Result<()> {
        info!("API listening on {}", self.local_addr()?);
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, pipeline).await {
                    warn!("Connection error from {}: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(mut stream: TcpStream, pipeline: Arc<Pipeline>) -> Result<()> {
    while let Some(body) = wire::read_frame(&mut stream, wire::MAX_UPLOAD_FRAME).await? {
        let request = match serde_json::from_slice::<ApiRequest>(&body) {
            Ok(req) => req,
            Err(e) => {
                wire::write_json(
                    &mut stream,
                    &ErrorBody {
                        error: format!("malformed request: {e}"),
                    },
                )
                .await?;
                continue;
            }
        };

        match handle_request(request, &pipeline).await {
            Ok(response) => wire::write_frame(&mut stream, &response).await?,
            Err(e) => {
                wire::write_json(&mut stream, &ErrorBody { error: e.to_string() }).await?
            }
        }
    }
    Ok(())
}

async fn handle_request(request: ApiRequest, pipeline: &Arc<Pipeline>) -> Result<Vec<u8>> {
    match request {
        ApiRequest::ProcessVideo {
            camera_id,
            zone_id,
            location,
            video_hex,
            path,
        } => {
            let identity = FrameIdentity {
                camera_id,
                zone_id,
                location,
            };
            let summary = process_video(pipeline, identity, video_hex, path).await?;
            Ok(serde_json::to_vec(&summary)?)
        }

        ApiRequest::ReportThreat {
            camera_id,
            zone_id,
            location,
            threats,
            model_version,
        } => {
            let key = CorrelationKey::new(camera_id, zone_id);
            let outcome = pipeline.correlator.report_threat(
                &key,
                &location,
                ThreatResult {
                    threats,
                    model_version,
                },
            );
            respond_report(pipeline, outcome).await
        }

        ApiRequest::ReportDensity {
            camera_id,
            zone_id,
            location,
            density_bucket,
        } => {
            let key = CorrelationKey::new(camera_id, zone_id);
            let outcome = pipeline.correlator.report_density(
                &key,
                &location,
                DensityResult { density_bucket },
            );
            respond_report(pipeline, outcome).await
        }

        ApiRequest::Status => {
            let status: StatusBody = pipeline.status();
            Ok(serde_json::to_vec(&status)?)
        }
    }
}

async fn respond_report(pipeline: &Arc<Pipeline>, outcome: ReportOutcome) -> Result<Vec<u8>> {
    if let ReportOutcome::Combined(event) = &outcome {
        pipeline.sink.dispatch(event).await?;
    }
    Ok(serde_json::to_vec(&ReportResponse::from(outcome))?)
}

async fn process_video(
    pipeline: &Arc<Pipeline>,
    identity: FrameIdentity,
    video_hex: Option<String>,
    path: Option<PathBuf>,
) -> Result<UploadSummary> {
    match (video_hex, path) {
        (Some(encoded), _) => {
            let bytes = hex::decode(encoded)
                .map_err(|e| Error::Wire(format!("invalid video_hex: {e}")))?;
            // Buffered to a named tempfile; RAII removes it on every exit
            // path, including mid-processing failures.
            let tmp = tokio::task::spawn_blocking(move || -> Result<tempfile::NamedTempFile> {
                let mut tmp = tempfile::Builder::new()
                    .prefix("vigil_upload_")
                    .suffix(".mp4")
                    .tempfile()?;
                tmp.write_all(&bytes)?;
                tmp.flush()?;
                Ok(tmp)
            })
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

            pipeline
                .process_video(tmp.path().to_path_buf(), identity)
                .await
        }
        (None, Some(path)) => pipeline.process_video(path, identity).await,
        (None, None) => Err(Error::Config(
            "process_video requires video_hex or path".into(),
        )),
    }
}
