// vigil/src/pipeline.rs
//
// Wires one video through extraction → bounded queue → fan-out. Extraction
// runs on a blocking thread and suspends on the full queue; the fan-out
// drains concurrently. Either side finishing (or failing) closes the queue
// and the other side winds down.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::engine::correlator::Correlator;
use crate::engine::dispatcher::DispatchSink;
use crate::error::{Error, Result};
use crate::events::{FrameIdentity, FrameReport};
use crate::extract::FrameExtractor;
use crate::fanout::FanOut;
use crate::queue;

/// Upload response: headline plus per-frame detail, so callers can tell
/// "no motion found" apart from "motion found but analysis unavailable".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSummary {
    pub message: String,
    pub results: Vec<FrameReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    pub videos_processed: u64,
    pub frames_extracted: u64,
    pub frames_dispatched: u64,
    pub analysis_errors: u64,
    pub fusions_total: u64,
    pub waiting_total: u64,
    pub rate_limited_total: u64,
    pub pending_keys: usize,
}

pub struct Pipeline {
    pub cfg: Config,
    pub correlator: Arc<Correlator>,
    pub fanout: Arc<FanOut>,
    pub sink: Arc<dyn DispatchSink>,

    pub videos_processed: AtomicU64,
    pub frames_extracted: AtomicU64,
}

impl Pipeline {
    pub fn new(
        cfg: Config,
        correlator: Arc<Correlator>,
        fanout: Arc<FanOut>,
        sink: Arc<dyn DispatchSink>,
    ) -> Self {
        Self {
            cfg,
            correlator,
            fanout,
            sink,
            videos_processed: AtomicU64::new(0),
            frames_extracted: AtomicU64::new(0),
        }
    }

    /// Run one video end to end. Fatal only when the source cannot be
    /// opened; per-frame analysis failures stay inline in the summary.
    pub async fn process_video(
        &self,
        path: PathBuf,
        identity: FrameIdentity,
    ) -> Result<UploadSummary> {
        let (tx, rx) = queue::bounded(self.cfg.queue_capacity);
        let interval = self.cfg.sample_interval_secs;
        let threshold = self.cfg.motion_threshold;

        let extraction = tokio::task::spawn_blocking(move || -> Result<u64> {
            let extractor = FrameExtractor::open(&path, interval, threshold, identity)?;
            let mut emitted = 0u64;
            for frame in extractor {
                let frame = frame?;
                emitted += 1;
                if tx.enqueue_blocking(frame).is_err() {
                    // Consumer gone (request aborted); stop decoding.
                    break;
                }
            }
            Ok(emitted)
        });

        let results = self.fanout.run(rx).await;
        let emitted = extraction
            .await
            .map_err(|e| Error::SourceUnavailable(format!("extraction task failed: {e}")))??;

        self.videos_processed.fetch_add(1, Ordering::Relaxed);
        self.frames_extracted.fetch_add(emitted, Ordering::Relaxed);

        Ok(UploadSummary {
            message: format!("Processed and forwarded {} high-motion frames.", emitted),
            results,
        })
    }

    pub fn status(&self) -> StatusBody {
        StatusBody {
            videos_processed: self.videos_processed.load(Ordering::Relaxed),
            frames_extracted: self.frames_extracted.load(Ordering::Relaxed),
            frames_dispatched: self.fanout.frames_dispatched.load(Ordering::Relaxed),
            analysis_errors: self.fanout.analysis_errors.load(Ordering::Relaxed),
            fusions_total: self.correlator.fusions_total.load(Ordering::Relaxed),
            waiting_total: self.correlator.waiting_total.load(Ordering::Relaxed),
            rate_limited_total: self.correlator.rate_limited_total.load(Ordering::Relaxed),
            pending_keys: self.correlator.pending_keys(),
        }
    }
}
