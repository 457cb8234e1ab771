//! Per-job progress cell.
//!
//! Each job owns one [`ProgressCell`]. Every write goes through
//! `watch::Sender::send_if_modified`, which serializes writers and publishes
//! the whole record at once, so readers always see a consistent status and
//! counter pair. Once the status is terminal the cell rejects every write.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::job::JobFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutable part of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub status: JobStatus,
    pub downloaded_chunks: u64,
    pub total_chunks: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<JobFailure>,
    pub output_path: Option<PathBuf>,
}

impl JobProgress {
    fn new(total_chunks: u64) -> Self {
        Self {
            status: JobStatus::Queued,
            downloaded_chunks: 0,
            total_chunks,
            started_at: None,
            completed_at: None,
            failure: None,
            output_path: None,
        }
    }

    /// `downloaded / total`, clamped to `[0, 1]`; 0 for an empty job.
    pub fn fraction(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        (self.downloaded_chunks as f64 / self.total_chunks as f64).clamp(0.0, 1.0)
    }
}

/// Why a write was not applied. Carries the status observed at the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected(pub JobStatus);

#[derive(Debug)]
pub struct ProgressCell {
    tx: watch::Sender<JobProgress>,
}

impl ProgressCell {
    pub fn new(total_chunks: u64) -> Self {
        let (tx, _rx) = watch::channel(JobProgress::new(total_chunks));
        Self { tx }
    }

    pub fn snapshot(&self) -> JobProgress {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> JobStatus {
        self.tx.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.tx.subscribe()
    }

    /// Apply `update` under the cell's lock. `update` returns `Err` to leave
    /// the record untouched.
    fn write<T>(
        &self,
        update: impl FnOnce(&mut JobProgress) -> Result<T, Rejected>,
    ) -> Result<T, Rejected> {
        let mut outcome = None;
        self.tx.send_if_modified(|progress| {
            if progress.status.is_terminal() {
                outcome = Some(Err(Rejected(progress.status)));
                return false;
            }
            let result = update(progress);
            let modified = result.is_ok();
            outcome = Some(result);
            modified
        });
        outcome.unwrap_or(Err(Rejected(JobStatus::Error)))
    }

    /// Move to `to` if the current status is one of `from`.
    ///
    /// Entering `downloading` (or `processing` straight from `queued`) stamps
    /// `started_at`.
    pub fn transition(&self, from: &[JobStatus], to: JobStatus) -> Result<(), Rejected> {
        self.write(|progress| {
            if !from.contains(&progress.status) {
                return Err(Rejected(progress.status));
            }
            if progress.started_at.is_none()
                && matches!(to, JobStatus::Downloading | JobStatus::Processing)
            {
                progress.started_at = Some(Utc::now());
            }
            progress.status = to;
            Ok(())
        })
    }

    /// Count one more fetched chunk. Only valid while downloading and never
    /// past `total_chunks`. Returns the new count.
    pub fn advance(&self) -> Result<u64, Rejected> {
        self.write(|progress| {
            if progress.status != JobStatus::Downloading
                || progress.downloaded_chunks >= progress.total_chunks
            {
                return Err(Rejected(progress.status));
            }
            progress.downloaded_chunks += 1;
            Ok(progress.downloaded_chunks)
        })
    }

    /// `processing → completed`.
    pub fn complete(&self, output_path: Option<PathBuf>) -> Result<(), Rejected> {
        self.write(|progress| {
            if progress.status != JobStatus::Processing {
                return Err(Rejected(progress.status));
            }
            progress.status = JobStatus::Completed;
            progress.completed_at = Some(Utc::now());
            progress.output_path = output_path;
            Ok(())
        })
    }

    /// Any non-terminal status → `error`. Returns `false` if the job had
    /// already reached a terminal status.
    pub fn fail(&self, failure: JobFailure) -> bool {
        self.write(|progress| {
            progress.status = JobStatus::Error;
            progress.failure = Some(failure);
            Ok(())
        })
        .is_ok()
    }

    /// Wait until the job reaches `completed` or `error`.
    pub async fn wait_terminal(&self) -> JobProgress {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|p| p.status.is_terminal()).await {
            Ok(progress) => progress.clone(),
            // the sender lives in `self`, so the channel cannot close while we wait
            Err(_) => self.snapshot(),
        }
    }
}
