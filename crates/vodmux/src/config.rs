use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fetcher: FetcherConfig,
    pub scheduler: SchedulerConfig,
    pub output: OutputConfig,
    pub merge: MergeConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.download_concurrency == 0 {
            return Err(Error::configuration("download_concurrency must be at least 1"));
        }
        if self.fetcher.max_attempts == 0 {
            return Err(Error::configuration("max_attempts must be at least 1"));
        }
        if self.fetcher.segment_timeout_ms == 0 {
            return Err(Error::configuration("segment_timeout_ms must be positive"));
        }
        if !self.merge.duration_tolerance_secs.is_finite() || self.merge.duration_tolerance_secs < 0.0
        {
            return Err(Error::configuration(
                "duration_tolerance_secs must be a non-negative number",
            ));
        }
        if self.scheduler.assumed_throughput_bytes_per_sec == 0 {
            return Err(Error::configuration(
                "assumed_throughput_bytes_per_sec must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Upper bound on one whole fetch attempt, body included.
    pub segment_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Attempts per segment, counting the first.
    pub max_attempts: u32,
    /// First backoff window; doubles per failed attempt up to `retry_max_delay_ms`.
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: bool,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            segment_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            retry_jitter: true,
            user_agent: concat!("vodmux/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn segment_timeout(&self) -> Duration {
        Duration::from_millis(self.segment_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max concurrent segment fetches per job.
    pub download_concurrency: usize,
    /// Throughput assumed for `estimated_download_secs` (default 5 Mbit/s).
    pub assumed_throughput_bytes_per_sec: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 4,
            assumed_throughput_bytes_per_sec: 625_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Spool files and elementary streams live under `<work_dir>/<job_id>/`.
    pub work_dir: PathBuf,
    /// Where merged files go. Defaults to `work_dir`.
    pub output_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("vodmux"),
            output_dir: None,
        }
    }
}

impl OutputConfig {
    pub fn merged_dir(&self) -> &PathBuf {
        self.output_dir.as_ref().unwrap_or(&self.work_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Largest accepted video/audio duration difference.
    pub duration_tolerance_secs: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_secs: 1.0,
        }
    }
}
