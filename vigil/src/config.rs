// vigil/src/config.rs
//
// Env-var configuration. Every knob has a default matching the reference
// deployment; unset or unparsable values fall back with a warning.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::retry::RetryPolicy;

pub const DEFAULT_SAMPLE_INTERVAL_SECS: f64 = 5.0;
pub const DEFAULT_MOTION_THRESHOLD: f64 = 20.0;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_RATE_LIMIT_PER_MIN: usize = 5;
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_THREAT_ADDR: &str = "127.0.0.1:8473";
pub const DEFAULT_DENSITY_ADDR: &str = "127.0.0.1:8472";
pub const DEFAULT_OUTPUT_DIR: &str = "/tmp/vigil_output";

#[derive(Debug, Clone)]
pub struct Config {
    /// Seconds of source footage between consecutive motion samples.
    pub sample_interval_secs: f64,
    /// Mean grayscale absolute difference a sample must reach to be emitted.
    pub motion_threshold: f64,
    /// Frame queue capacity — the sole backpressure point.
    pub queue_capacity: usize,
    /// Max fusions per correlation key in the trailing 60 s.
    pub rate_limit_per_min: usize,
    /// Per-attempt timeout for each analysis collaborator call.
    pub analysis_timeout: Duration,
    /// Retry policy applied at every collaborator call site.
    pub retry: RetryPolicy,
    /// Threat-analysis collaborator address.
    pub threat_addr: String,
    /// Density-estimation collaborator address.
    pub density_addr: String,
    /// Remote dispatch sink address. Absent → local JSONL sink only.
    pub dispatch_addr: Option<String>,
    /// Directory for the JSONL dispatch queues + audit log.
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_interval_secs: DEFAULT_SAMPLE_INTERVAL_SECS,
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rate_limit_per_min: DEFAULT_RATE_LIMIT_PER_MIN,
            analysis_timeout: Duration::from_secs(DEFAULT_ANALYSIS_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            threat_addr: DEFAULT_THREAT_ADDR.to_string(),
            density_addr: DEFAULT_DENSITY_ADDR.to_string(),
            dispatch_addr: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.sample_interval_secs =
            env_parse("VIGIL_SAMPLE_INTERVAL_SECS", cfg.sample_interval_secs);
        cfg.motion_threshold = env_parse("VIGIL_MOTION_THRESHOLD", cfg.motion_threshold);
        cfg.queue_capacity = env_parse("VIGIL_QUEUE_CAPACITY", cfg.queue_capacity).max(1);
        cfg.rate_limit_per_min = env_parse("VIGIL_RATE_LIMIT_PER_MIN", cfg.rate_limit_per_min);
        cfg.analysis_timeout = Duration::from_secs(env_parse(
            "VIGIL_ANALYSIS_TIMEOUT_SECS",
            DEFAULT_ANALYSIS_TIMEOUT_SECS,
        ));
        cfg.retry.max_attempts = env_parse("VIGIL_RETRY_MAX_ATTEMPTS", cfg.retry.max_attempts);
        cfg.retry.base_delay = Duration::from_millis(env_parse(
            "VIGIL_RETRY_BASE_DELAY_MS",
            cfg.retry.base_delay.as_millis() as u64,
        ));
        if let Ok(addr) = std::env::var("VIGIL_THREAT_ADDR") {
            cfg.threat_addr = addr;
        }
        if let Ok(addr) = std::env::var("VIGIL_DENSITY_ADDR") {
            cfg.density_addr = addr;
        }
        cfg.dispatch_addr = std::env::var("VIGIL_DISPATCH_ADDR").ok();
        if let Ok(dir) = std::env::var("VIGIL_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(dir);
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}, using default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.sample_interval_secs, 5.0);
        assert_eq!(cfg.motion_threshold, 20.0);
        assert_eq!(cfg.queue_capacity, 10);
        assert_eq!(cfg.rate_limit_per_min, 5);
        assert_eq!(cfg.analysis_timeout, Duration::from_secs(5));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.dispatch_addr.is_none());
    }

    #[test]
    fn env_overrides_and_garbage_fallback() {
        // One test mutating the process env, run sequentially within it.
        std::env::set_var("VIGIL_QUEUE_CAPACITY", "32");
        std::env::set_var("VIGIL_MOTION_THRESHOLD", "not-a-number");
        std::env::set_var("VIGIL_DISPATCH_ADDR", "10.0.0.9:8474");
        let cfg = Config::from_env();
        assert_eq!(cfg.queue_capacity, 32);
        assert_eq!(cfg.motion_threshold, DEFAULT_MOTION_THRESHOLD);
        assert_eq!(cfg.dispatch_addr.as_deref(), Some("10.0.0.9:8474"));
        std::env::remove_var("VIGIL_QUEUE_CAPACITY");
        std::env::remove_var("VIGIL_MOTION_THRESHOLD");
        std::env::remove_var("VIGIL_DISPATCH_ADDR");
    }
}
