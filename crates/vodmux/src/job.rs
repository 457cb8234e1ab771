use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use manifest::Selection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::progress::{JobProgress, JobStatus};

/// Opaque job identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch and assemble one rendition.
    Download { selection: Selection },
    /// Mux the outputs of two completed download jobs.
    Merge { video: JobId, audio: JobId },
}

impl JobKind {
    pub fn is_merge(&self) -> bool {
        matches!(self, Self::Merge { .. })
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download { selection } => write!(f, "download {selection}"),
            Self::Merge { video, audio } => write!(f, "merge {video} + {audio}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FetchFailed,
    MergeFailed,
    EmptyRendition,
    Cancelled,
    Io,
    Internal,
}

/// Recorded cause of a job entering `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "job cancelled")
    }
}

impl From<&Error> for JobFailure {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::FetchFailed { .. }
            | Error::HttpStatus { .. }
            | Error::Timeout { .. }
            | Error::Network { .. } => FailureKind::FetchFailed,
            Error::MergeFailed { .. } => FailureKind::MergeFailed,
            Error::Cancelled => FailureKind::Cancelled,
            Error::Io { .. } => FailureKind::Io,
            _ => FailureKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Serializable job record handed to observers and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub downloaded_chunks: u64,
    pub total_chunks: u64,
    pub progress: f64,
    pub file_size_estimate: u64,
    pub estimated_download_secs: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<JobFailure>,
    pub output_path: Option<PathBuf>,
}

impl JobSnapshot {
    pub(crate) fn new(
        id: JobId,
        kind: JobKind,
        created_at: DateTime<Utc>,
        file_size_estimate: u64,
        estimated_download_secs: u64,
        progress: JobProgress,
    ) -> Self {
        Self {
            id,
            kind,
            status: progress.status,
            downloaded_chunks: progress.downloaded_chunks,
            total_chunks: progress.total_chunks,
            progress: progress.fraction(),
            file_size_estimate,
            estimated_download_secs,
            created_at,
            started_at: progress.started_at,
            completed_at: progress.completed_at,
            failure: progress.failure,
            output_path: progress.output_path,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn failure_kind_follows_error() {
        let err = Error::FetchFailed {
            index: 2,
            reason: "HTTP 404".into(),
        };
        let failure = JobFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::FetchFailed);
        assert!(failure.message.contains("segment 2"));

        assert_eq!(JobFailure::from(&Error::Cancelled).kind, FailureKind::Cancelled);
    }

    #[test]
    fn kind_serializes_with_tag() {
        let kind = JobKind::Download {
            selection: Selection::video(720),
        };
        let json = serde_json::to_value(kind).unwrap();
        assert_eq!(json["type"], "download");
        assert_eq!(json["selection"]["kind"], "video");
        assert_eq!(json["selection"]["height"], 720);
    }
}
