//! Source-video record: the metadata the surrounding layer keeps per
//! submitted source URL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::error::Result;
use crate::manifest::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVideo {
    pub source_url: String,
    pub video_id: Option<String>,
    pub title: String,
    pub base_url: Option<String>,
    pub available_resolutions: Vec<String>,
    pub duration_secs: u64,
    pub status: SourceStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl SourceVideo {
    pub fn new(source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        let video_id = video_id_from_url(&source_url);
        let title = format!("Video {}", video_id.as_deref().unwrap_or("Unknown"));
        Self {
            source_url,
            video_id,
            title,
            base_url: None,
            available_resolutions: Vec::new(),
            duration_secs: 0,
            status: SourceStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Parse the fetched manifest document and fill in the derived metadata.
    ///
    /// Moves the record through `processing` to `ready`, or to `error` when
    /// the document is unusable.
    pub fn ingest(&mut self, raw: &[u8]) -> Result<Arc<Manifest>> {
        self.status = SourceStatus::Processing;

        match Manifest::resolve(raw, &self.source_url) {
            Ok(manifest) => {
                self.base_url = Some(manifest.base_url().to_string());
                self.available_resolutions = manifest.available_resolutions();
                self.duration_secs = manifest.total_duration() as u64;
                self.status = SourceStatus::Ready;
                self.processed_at = Some(Utc::now());
                info!(
                    source = %self.source_url,
                    resolutions = ?self.available_resolutions,
                    duration_secs = self.duration_secs,
                    "Source ready"
                );
                Ok(Arc::new(manifest))
            }
            Err(e) => {
                warn!(source = %self.source_url, error = %e, "Source manifest rejected");
                self.status = SourceStatus::Error;
                Err(e)
            }
        }
    }
}

/// The second-to-last path segment, when the path mentions `video`.
fn video_id_from_url(source_url: &str) -> Option<String> {
    let url = Url::parse(source_url).ok()?;
    if !url.path().contains("video") {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .len()
        .checked_sub(2)
        .and_then(|i| segments.get(i))
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
}
