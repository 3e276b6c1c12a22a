// vigil/src/fanout.rs
//
// Fan-out dispatcher: drains the bounded queue one frame at a time and, per
// frame, issues both analysis calls concurrently. Either call may fail or
// time out without touching its sibling; a failure is recorded inline in
// the frame's report and contributes nothing to the correlator.
//
// Successive frames overlap on spawned tasks up to MAX_IN_FLIGHT, so a slow
// pair of calls does not stall dequeuing — beyond that the queue itself is
// the backpressure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::error;

use crate::analysis::{AnalyzeRequest, DensityAnalyzer, ThreatAnalyzer};
use crate::engine::correlator::Correlator;
use crate::engine::dispatcher::DispatchSink;
use crate::error::{Error, Result};
use crate::events::{
    AnalysisOutcome, DensityResult, Frame, FrameReport, ReportOutcome, ThreatResult,
};
use crate::queue::FrameReceiver;
use crate::retry::RetryPolicy;

// In-flight frame dispatches; past this the dispatcher joins before it
// dequeues again and backpressure reaches the extractor.
const MAX_IN_FLIGHT: usize = 4;

pub struct FanOut {
    threat: Arc<dyn ThreatAnalyzer>,
    density: Arc<dyn DensityAnalyzer>,
    correlator: Arc<Correlator>,
    sink: Arc<dyn DispatchSink>,
    timeout: Duration,
    retry: RetryPolicy,

    pub frames_dispatched: AtomicU64,
    pub analysis_errors: AtomicU64,
}

impl FanOut {
    pub fn new(
        threat: Arc<dyn ThreatAnalyzer>,
        density: Arc<dyn DensityAnalyzer>,
        correlator: Arc<Correlator>,
        sink: Arc<dyn DispatchSink>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            threat,
            density,
            correlator,
            sink,
            timeout,
            retry,
            frames_dispatched: AtomicU64::new(0),
            analysis_errors: AtomicU64::new(0),
        }
    }

    /// Drain the queue to end-of-stream. Reports come back in frame order
    /// even though dispatches complete out of order.
    pub async fn run(self: &Arc<Self>, mut rx: FrameReceiver) -> Vec<FrameReport> {
        let mut tasks: JoinSet<(usize, FrameReport)> = JoinSet::new();
        let mut reports: Vec<(usize, FrameReport)> = Vec::new();
        let mut seq = 0usize;

        while let Some(frame) = rx.dequeue().await {
            while tasks.len() >= MAX_IN_FLIGHT {
                if let Some(Ok(item)) = tasks.join_next().await {
                    reports.push(item);
                }
            }
            let this = Arc::clone(self);
            let idx = seq;
            seq += 1;
            tasks.spawn(async move { (idx, this.process_frame(frame).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok(item) = joined {
                reports.push(item);
            }
        }
        reports.sort_by_key(|(idx, _)| *idx);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// Fan one frame out to both collaborators and assemble its report.
    pub async fn process_frame(&self, frame: Frame) -> FrameReport {
        self.frames_dispatched.fetch_add(1, Ordering::Relaxed);
        let key = frame.key();
        let req = AnalyzeRequest::new(&key, &frame.location, &frame.payload);

        let (threat, density) =
            tokio::join!(self.call_threat(req.clone()), self.call_density(req));

        if let AnalysisOutcome::Completed(part) = &threat {
            let outcome = self.correlator.report_threat(&key, &frame.location, part.clone());
            self.deliver(outcome).await;
        }
        if let AnalysisOutcome::Completed(part) = &density {
            let outcome = self
                .correlator
                .report_density(&key, &frame.location, *part);
            self.deliver(outcome).await;
        }

        FrameReport {
            frame_id: frame.frame_id,
            motion_score: frame.motion_score,
            timestamp: frame.captured_at,
            threat,
            density,
        }
    }

    async fn deliver(&self, outcome: ReportOutcome) {
        if let ReportOutcome::Combined(event) = outcome {
            if let Err(e) = self.sink.dispatch(&event).await {
                error!("Dispatch failed for {}: {}", event.event_id, e);
            }
        }
    }

    async fn call_threat(&self, req: AnalyzeRequest) -> AnalysisOutcome<ThreatResult> {
        let result = self
            .retry
            .run("threat analysis", || self.timed(self.threat.analyze(req.clone())))
            .await;
        self.settle("threat", result)
    }

    async fn call_density(&self, req: AnalyzeRequest) -> AnalysisOutcome<DensityResult> {
        let result = self
            .retry
            .run("density analysis", || {
                self.timed(self.density.analyze(req.clone()))
            })
            .await;
        self.settle("density", result)
    }

    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::AnalysisCallFailed(format!(
                "timed out after {:.1}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }

    fn settle<T>(&self, which: &str, result: Result<T>) -> AnalysisOutcome<T> {
        match result {
            Ok(v) => AnalysisOutcome::Completed(v),
            Err(e) => {
                self.analysis_errors.fetch_add(1, Ordering::Relaxed);
                error!("{} call failed: {}", which, e);
                AnalysisOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
