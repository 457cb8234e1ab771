use std::time::Duration;

use manifest::ManifestError;
use reqwest::StatusCode;

use crate::job::JobId;
use crate::progress::JobStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("segment {index} fetch failed: {reason}")]
    FetchFailed { index: usize, reason: String },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("request timed out after {timeout:?} for {url}")]
    Timeout { timeout: Duration, url: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("merge failed: {source}")]
    MergeFailed {
        #[from]
        source: mp4::Mp4Error,
    },

    #[error("job {job_id} is {status}, cannot {action}")]
    InvalidState {
        job_id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("segment {index} not found (job has {total} segments)")]
    SegmentNotFound { index: usize, total: usize },

    #[error("job {job_id} is not in progress ({status})")]
    NotInProgress { job_id: JobId, status: JobStatus },

    #[error("output of job {job_id} is not available: {reason}")]
    NotReady { job_id: JobId, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn invalid_state(job_id: JobId, status: JobStatus, action: &'static str) -> Self {
        Self::InvalidState {
            job_id,
            status,
            action,
        }
    }

    pub fn not_ready(job_id: JobId, reason: impl Into<String>) -> Self {
        Self::NotReady {
            job_id,
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Whether a fetch attempt that failed with this error is worth repeating.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Timeout { .. } => true,
            Self::Network { source } => is_retryable_reqwest_error(source),
            Self::Manifest(_)
            | Self::FetchFailed { .. }
            | Self::MergeFailed { .. }
            | Self::InvalidState { .. }
            | Self::JobNotFound(_)
            | Self::SegmentNotFound { .. }
            | Self::NotInProgress { .. }
            | Self::NotReady { .. }
            | Self::Cancelled
            | Self::Configuration { .. }
            | Self::Io { .. }
            | Self::Internal { .. } => false,
        }
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}
