// vigil/src/error.rs

use thiserror::Error;

use crate::events::CorrelationKey;

/// Errors that can occur in the fusion pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The video cannot be opened at all. Fatal to the upload request.
    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),

    /// A decoded frame could not be interpreted. Fatal to the upload request.
    #[error("frame decode failed: {0}")]
    FrameDecode(String),

    /// Timeout / connection failure / non-success from an analysis
    /// collaborator. Recorded per-frame, never fatal to the batch.
    #[error("analysis call failed: {0}")]
    AnalysisCallFailed(String),

    /// The correlator rejected a report; the caller's data was dropped.
    #[error("report rate-limited for key {0}")]
    RateLimited(CorrelationKey),

    /// A part was upserted but the fusion check lost it. Should not occur
    /// under correct per-key atomicity.
    #[error("correlation state lost for key {0}")]
    CorrelationLost(CorrelationKey),

    /// The remote side of a wire call answered with an error envelope.
    #[error("remote error: {0}")]
    Remote(String),

    /// Malformed or oversized wire frame.
    #[error("wire protocol error: {0}")]
    Wire(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
