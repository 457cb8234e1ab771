//! Segmented download orchestration and fMP4 reassembly.
//!
//! The [`Orchestrator`] turns a resolved [`Manifest`] into download jobs. Each
//! job fetches one rendition's segments with bounded concurrency, assembles
//! them behind the rendition's initialization segment into an elementary
//! file, and reports progress through a watchable record. A completed video
//! job and a completed audio job can then be merged into one fragmented MP4.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vodmux_engine::{EngineConfig, Orchestrator, Selection, resolve_manifest};
//!
//! # async fn run(raw: &[u8]) -> vodmux_engine::Result<()> {
//! let manifest = Arc::new(resolve_manifest(raw, "https://cdn.example.com/v/1/master.json")?);
//! let orchestrator = Orchestrator::new(EngineConfig::default())?;
//!
//! let video = orchestrator.create_job(Arc::clone(&manifest), Selection::video(720))?;
//! let audio = orchestrator.create_job(manifest, Selection::Audio)?;
//! orchestrator.start_job(video)?;
//! orchestrator.start_job(audio)?;
//! orchestrator.wait_for_terminal(video).await?;
//! orchestrator.wait_for_terminal(audio).await?;
//!
//! let merge = orchestrator.request_merge(video, audio)?;
//! orchestrator.wait_for_terminal(merge).await?;
//! println!("{}", orchestrator.get_output(merge)?.display());
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod retry;

pub use config::{EngineConfig, FetcherConfig, MergeConfig, OutputConfig, SchedulerConfig};
pub use error::{Error, Result};
pub use fetcher::SegmentFetcher;
pub use job::{FailureKind, JobFailure, JobId, JobKind, JobSnapshot};
pub use manifest::{Manifest, ManifestError, Rendition, Selection, SourceVideo, TrackKind};
pub use orchestrator::Orchestrator;
pub use progress::{JobProgress, JobStatus};

/// Parse a raw manifest document fetched from `source_url`.
pub fn resolve_manifest(raw: &[u8], source_url: &str) -> Result<Manifest> {
    Ok(Manifest::resolve(raw, source_url)?)
}
