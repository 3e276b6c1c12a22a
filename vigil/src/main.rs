// vigil — motion-triggered incident fusion daemon
//
// Two operational modes:
//   serve    — run the ingestion + correlator report API over TCP
//   process  — push one local video file through the pipeline and print
//              the per-frame summary as JSON
//
// Usage:
//   vigil --mode serve --listen 127.0.0.1:8470
//   vigil --mode process --input clip.mp4 --camera-id cam-1 \
//         --zone-id z-1 --location "east gate"

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil::analysis::{WireDensityAnalyzer, WireThreatAnalyzer};
use vigil::api::ApiServer;
use vigil::config::Config;
use vigil::engine::correlator::Correlator;
use vigil::engine::dispatcher::{DispatchSink, JsonlSink, WireSink};
use vigil::events::FrameIdentity;
use vigil::fanout::FanOut;
use vigil::pipeline::Pipeline;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "vigil",
    about   = "Motion-triggered incident fusion pipeline for camera video feeds",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "serve")]
    mode: Mode,

    #[arg(long, default_value = "127.0.0.1:8470", help = "API bind address (serve mode)")]
    listen: String,

    #[arg(long, help = "Video file to process (process mode)")]
    input: Option<PathBuf>,

    #[arg(long, default_value = "cam-local", help = "Camera id (process mode)")]
    camera_id: String,

    #[arg(long, default_value = "zone-local", help = "Zone id (process mode)")]
    zone_id: String,

    #[arg(long, default_value = "unspecified", help = "Location (process mode)")]
    location: String,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Serve,   // ingestion + report API
    Process, // one-shot local file run
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("vigil=info".parse()?),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env();

    let correlator = Arc::new(Correlator::new(cfg.rate_limit_per_min));
    let sink: Arc<dyn DispatchSink> = match &cfg.dispatch_addr {
        Some(addr) => Arc::new(WireSink::new(addr.clone())),
        None => Arc::new(JsonlSink::new(cfg.output_dir.clone())?),
    };
    let fanout = Arc::new(FanOut::new(
        Arc::new(WireThreatAnalyzer::new(cfg.threat_addr.clone())),
        Arc::new(WireDensityAnalyzer::new(cfg.density_addr.clone())),
        Arc::clone(&correlator),
        Arc::clone(&sink),
        cfg.analysis_timeout,
        cfg.retry.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(cfg, correlator, fanout, sink));

    match cli.mode {
        Mode::Serve => {
            let stats = Arc::clone(&pipeline);
            tokio::spawn(stats_loop(stats));
            let server = ApiServer::bind(&cli.listen, pipeline).await?;
            server.serve().await?;
        }
        Mode::Process => {
            let input = cli
                .input
                .ok_or_else(|| anyhow::anyhow!("--input is required in process mode"))?;
            let identity = FrameIdentity {
                camera_id: cli.camera_id,
                zone_id: cli.zone_id,
                location: cli.location,
            };
            let summary = pipeline.process_video(input, identity).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

async fn stats_loop(pipeline: Arc<Pipeline>) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let s = pipeline.status();
        info!(
            "stats videos={} frames={} dispatched={} fusions={} waiting={} rate_limited={} errors={} pending_keys={}",
            s.videos_processed,
            s.frames_extracted,
            s.frames_dispatched,
            s.fusions_total,
            s.waiting_total,
            s.rate_limited_total,
            s.analysis_errors,
            s.pending_keys
        );
    }
}
