//! Download orchestrator.
//!
//! Owns the job registry and drives every job through its state machine:
//!
//! ```text
//! download: queued → downloading → processing → completed
//! merge:    queued → processing → completed
//! ```
//!
//! `error` is reachable from every non-terminal state and is final. Each
//! download job runs in one task that keeps at most `download_concurrency`
//! segment fetches in flight; a merge job runs the muxer on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::{BoxStream, FuturesUnordered};
use manifest::{Manifest, RenditionId, Selection};
use mp4::MuxOptions;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::assembler::{Assembler, remove_job_dir};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fetcher::SegmentFetcher;
use crate::job::{FailureKind, JobFailure, JobId, JobKind, JobSnapshot};
use crate::progress::{JobProgress, JobStatus, ProgressCell, Rejected};

/// Where a download job's segments come from.
struct DownloadSource {
    manifest: Arc<Manifest>,
    rendition: RenditionId,
    /// Absolute segment URLs, resolved once at creation.
    urls: Vec<Url>,
}

/// Ownership of a job's output file.
#[derive(Debug, Clone, PartialEq)]
enum OutputSlot {
    Empty,
    Ready(PathBuf),
    /// Taken by a merge job, which now owns the file.
    Consumed { by: JobId },
}

struct JobEntry {
    id: JobId,
    kind: JobKind,
    download: Option<DownloadSource>,
    created_at: DateTime<Utc>,
    file_size_estimate: u64,
    estimated_download_secs: u64,
    progress: ProgressCell,
    /// Child of the orchestrator's shutdown token.
    token: CancellationToken,
    output: Mutex<OutputSlot>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobEntry {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot::new(
            self.id,
            self.kind,
            self.created_at,
            self.file_size_estimate,
            self.estimated_download_secs,
            self.progress.snapshot(),
        )
    }

    fn fail(&self, err: &Error) {
        let failure = JobFailure::from(err);
        if self.progress.fail(failure) {
            warn!(job_id = %self.id, error = %err, "Job failed");
        }
    }
}

struct Inner {
    config: EngineConfig,
    fetcher: SegmentFetcher,
    jobs: DashMap<JobId, Arc<JobEntry>>,
    shutdown: CancellationToken,
}

/// Job registry and scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = SegmentFetcher::new(&config.fetcher)?;
        Self::with_fetcher(config, fetcher)
    }

    /// Build around an existing fetcher.
    pub fn with_fetcher(config: EngineConfig, fetcher: SegmentFetcher) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                jobs: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn fetcher(&self) -> &SegmentFetcher {
        &self.inner.fetcher
    }

    fn entry(&self, job_id: JobId) -> Result<Arc<JobEntry>> {
        self.inner
            .jobs
            .get(&job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Register a queued download job for `selection`.
    pub fn create_job(&self, manifest: Arc<Manifest>, selection: Selection) -> Result<JobId> {
        let rendition_id = manifest.locate(selection)?;
        let rendition = manifest
            .rendition(rendition_id)
            .ok_or_else(|| Error::internal("located rendition is missing"))?;
        let urls = manifest.segment_urls(rendition)?;
        let file_size_estimate = manifest.size_estimate(rendition);
        let estimated_download_secs = file_size_estimate
            .checked_div(self.inner.config.scheduler.assumed_throughput_bytes_per_sec)
            .unwrap_or(0);

        let id = JobId::new();
        let entry = JobEntry {
            id,
            kind: JobKind::Download { selection },
            progress: ProgressCell::new(urls.len() as u64),
            download: Some(DownloadSource {
                manifest: Arc::clone(&manifest),
                rendition: rendition_id,
                urls,
            }),
            created_at: Utc::now(),
            file_size_estimate,
            estimated_download_secs,
            token: self.inner.shutdown.child_token(),
            output: Mutex::new(OutputSlot::Empty),
            worker: Mutex::new(None),
        };

        info!(
            job_id = %id,
            %selection,
            total_chunks = rendition.total_chunks(),
            file_size_estimate,
            "Job created"
        );
        self.inner.jobs.insert(id, Arc::new(entry));
        Ok(id)
    }

    /// `queued → downloading` and spawn the job's worker.
    ///
    /// Starting a job that is already downloading is a no-op. A job whose
    /// rendition has no segments goes straight to `error`.
    pub fn start_job(&self, job_id: JobId) -> Result<()> {
        let entry = self.entry(job_id)?;
        let Some(source) = entry.download.as_ref() else {
            return Err(Error::invalid_state(job_id, entry.progress.status(), "start"));
        };

        if source.urls.is_empty() && entry.progress.status() == JobStatus::Queued {
            entry.progress.fail(JobFailure::new(
                FailureKind::EmptyRendition,
                "rendition has no segments",
            ));
            warn!(job_id = %job_id, "Rendition has no segments, job failed");
            return Ok(());
        }

        match entry
            .progress
            .transition(&[JobStatus::Queued], JobStatus::Downloading)
        {
            Ok(()) => {}
            Err(Rejected(JobStatus::Downloading)) => {
                debug!(job_id = %job_id, "Job already downloading");
                return Ok(());
            }
            Err(Rejected(status)) => return Err(Error::invalid_state(job_id, status, "start")),
        }

        let handle = tokio::spawn(run_download(Arc::clone(&self.inner), Arc::clone(&entry)));
        *entry.worker.lock() = Some(handle);
        info!(job_id = %job_id, "Job started");
        Ok(())
    }

    pub fn job_status(&self, job_id: JobId) -> Result<JobSnapshot> {
        Ok(self.entry(job_id)?.snapshot())
    }

    /// Every known job, oldest first.
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<_> = self
            .inner
            .jobs
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Watch a job's progress record.
    pub fn subscribe(&self, job_id: JobId) -> Result<watch::Receiver<JobProgress>> {
        Ok(self.entry(job_id)?.progress.subscribe())
    }

    /// Resolve once the job is `completed` or `error`.
    pub async fn wait_for_terminal(&self, job_id: JobId) -> Result<JobSnapshot> {
        let entry = self.entry(job_id)?;
        entry.progress.wait_terminal().await;
        Ok(entry.snapshot())
    }

    /// Stream one segment of an in-progress download straight from its
    /// origin. Does not touch the job's progress.
    pub async fn fetch_segment(
        &self,
        job_id: JobId,
        index: usize,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let entry = self.entry(job_id)?;
        let status = entry.progress.status();
        let Some(source) = entry.download.as_ref() else {
            return Err(Error::invalid_state(job_id, status, "stream segments of"));
        };
        if !matches!(status, JobStatus::Downloading | JobStatus::Processing) {
            return Err(Error::NotInProgress { job_id, status });
        }
        let url = source.urls.get(index).ok_or(Error::SegmentNotFound {
            index,
            total: source.urls.len(),
        })?;

        self.inner.fetcher.open_stream(url, &entry.token).await
    }

    /// Combine a completed video download and a completed audio download.
    ///
    /// Takes ownership of both elementary files and returns the id of the
    /// new merge job. The sibling jobs stay `completed`; their outputs become
    /// unavailable.
    pub fn request_merge(&self, video_job: JobId, audio_job: JobId) -> Result<JobId> {
        let video = self.entry(video_job)?;
        let audio = self.entry(audio_job)?;
        require_completed_download(
            &video,
            |s| matches!(s, Selection::Video { .. }),
            "merge as video",
        )?;
        require_completed_download(&audio, |s| *s == Selection::Audio, "merge as audio")?;

        let id = JobId::new();
        // video slots are always locked before audio slots
        let (video_path, audio_path) = {
            let mut video_slot = video.output.lock();
            let mut audio_slot = audio.output.lock();
            let video_path = ready_path(&video_slot, video_job)?;
            let audio_path = ready_path(&audio_slot, audio_job)?;
            *video_slot = OutputSlot::Consumed { by: id };
            *audio_slot = OutputSlot::Consumed { by: id };
            (video_path, audio_path)
        };

        let entry = Arc::new(JobEntry {
            id,
            kind: JobKind::Merge {
                video: video_job,
                audio: audio_job,
            },
            download: None,
            created_at: Utc::now(),
            file_size_estimate: video
                .file_size_estimate
                .saturating_add(audio.file_size_estimate),
            estimated_download_secs: 0,
            progress: ProgressCell::new(0),
            token: self.inner.shutdown.child_token(),
            output: Mutex::new(OutputSlot::Empty),
            worker: Mutex::new(None),
        });
        entry
            .progress
            .transition(&[JobStatus::Queued], JobStatus::Processing)
            .map_err(|Rejected(status)| Error::invalid_state(id, status, "merge"))?;
        self.inner.jobs.insert(id, Arc::clone(&entry));

        let task = MergeTask {
            video,
            audio,
            video_path,
            audio_path,
        };
        let handle = tokio::spawn(run_merge(Arc::clone(&self.inner), Arc::clone(&entry), task));
        *entry.worker.lock() = Some(handle);

        info!(job_id = %id, video = %video_job, audio = %audio_job, "Merge requested");
        Ok(id)
    }

    /// Path of a completed job's output file.
    pub fn get_output(&self, job_id: JobId) -> Result<PathBuf> {
        let entry = self.entry(job_id)?;
        let status = entry.progress.status();
        if status != JobStatus::Completed {
            return Err(Error::not_ready(job_id, format!("job is {status}")));
        }
        match &*entry.output.lock() {
            OutputSlot::Ready(path) => Ok(path.clone()),
            OutputSlot::Consumed { by } => Err(Error::not_ready(
                job_id,
                format!("output was consumed by merge job {by}"),
            )),
            OutputSlot::Empty => Err(Error::not_ready(job_id, "no output recorded")),
        }
    }

    /// Move a non-terminal job to `error` and stop its worker.
    pub fn cancel_job(&self, job_id: JobId) -> Result<()> {
        let entry = self.entry(job_id)?;
        if !entry.progress.fail(JobFailure::cancelled()) {
            return Err(Error::invalid_state(job_id, entry.progress.status(), "cancel"));
        }
        entry.token.cancel();
        info!(job_id = %job_id, "Job cancelled");
        Ok(())
    }

    /// Cancel every job and wait for the workers to wind down.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles: Vec<_> = self
            .inner
            .jobs
            .iter()
            .filter_map(|entry| entry.value().worker.lock().take())
            .collect();
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Job worker panicked");
            }
        }
        info!(workers = count, "Orchestrator shut down");
    }
}

fn require_completed_download(
    entry: &JobEntry,
    accepts: impl Fn(&Selection) -> bool,
    action: &'static str,
) -> Result<()> {
    let status = entry.progress.status();
    match entry.kind {
        JobKind::Download { selection } if accepts(&selection) => {}
        _ => return Err(Error::invalid_state(entry.id, status, action)),
    }
    if status != JobStatus::Completed {
        return Err(Error::invalid_state(entry.id, status, action));
    }
    Ok(())
}

fn ready_path(slot: &OutputSlot, job_id: JobId) -> Result<PathBuf> {
    match slot {
        OutputSlot::Ready(path) => Ok(path.clone()),
        OutputSlot::Consumed { by } => Err(Error::not_ready(
            job_id,
            format!("output was consumed by merge job {by}"),
        )),
        OutputSlot::Empty => Err(Error::not_ready(job_id, "no output recorded")),
    }
}

#[instrument(skip_all, fields(job_id = %entry.id))]
async fn run_download(inner: Arc<Inner>, entry: Arc<JobEntry>) {
    match download(&inner, &entry).await {
        Ok(path) => {
            *entry.output.lock() = OutputSlot::Ready(path.clone());
            match entry.progress.complete(Some(path.clone())) {
                Ok(()) => info!(path = %path.display(), "Download completed"),
                Err(Rejected(status)) => {
                    debug!(%status, "Job ended while finalizing, discarding output");
                    *entry.output.lock() = OutputSlot::Empty;
                    if let Some(dir) = path.parent() {
                        remove_job_dir(dir).await;
                    }
                }
            }
        }
        Err(err) => entry.fail(&err),
    }
}

async fn download(inner: &Inner, entry: &JobEntry) -> Result<PathBuf> {
    let source = entry
        .download
        .as_ref()
        .ok_or_else(|| Error::internal("not a download job"))?;
    let rendition = source
        .manifest
        .rendition(source.rendition)
        .ok_or_else(|| Error::internal("rendition vanished from manifest"))?;

    let mut assembler = Assembler::create(
        &inner.config.output.work_dir,
        entry.id,
        rendition.kind,
        &rendition.init_segment,
        source.urls.len(),
    )
    .await?;

    let fetched = match fetch_segments(inner, entry, source, &mut assembler).await {
        Ok(()) => entry
            .progress
            .transition(&[JobStatus::Downloading], JobStatus::Processing)
            .map_err(|_| Error::Cancelled),
        Err(err) => Err(err),
    };
    if let Err(err) = fetched {
        assembler.abort().await;
        return Err(err);
    }
    assembler.finish().await
}

/// Fetch every segment with bounded concurrency, handing each completed one
/// to the assembler.
async fn fetch_segments(
    inner: &Inner,
    entry: &JobEntry,
    source: &DownloadSource,
    assembler: &mut Assembler,
) -> Result<()> {
    // cancelled on the first failure so sibling fetches stop early
    let fetch_token = entry.token.child_token();
    let _guard = fetch_token.clone().drop_guard();
    let concurrency = inner.config.scheduler.download_concurrency;
    let mut queue = source.urls.iter().enumerate();
    let mut in_flight = FuturesUnordered::new();

    loop {
        while in_flight.len() < concurrency {
            let Some((index, url)) = queue.next() else {
                break;
            };
            let spool = assembler.spool_path(index);
            let fetcher = &inner.fetcher;
            let token = &fetch_token;
            in_flight.push(async move {
                let result = fetcher.fetch_to_file(url, &spool, token).await;
                (index, spool, result)
            });
        }
        if in_flight.is_empty() {
            break;
        }

        let (index, spool, result) = tokio::select! {
            biased;
            _ = entry.token.cancelled() => return Err(Error::Cancelled),
            Some(done) = in_flight.next() => done,
        };

        match result {
            Ok(bytes) => {
                assembler.accept(index, spool).await?;
                match entry.progress.advance() {
                    Ok(downloaded) => debug!(index, bytes, downloaded, "Chunk done"),
                    Err(Rejected(status)) => {
                        debug!(%status, "Job left downloading, stopping worker");
                        return Err(Error::Cancelled);
                    }
                }
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                error!(index, error = %err, "Segment fetch failed");
                return Err(Error::FetchFailed {
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok(())
}

async fn discard_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove merge output"),
    }
}

/// Inputs a merge job took over from its sibling jobs.
struct MergeTask {
    video: Arc<JobEntry>,
    audio: Arc<JobEntry>,
    video_path: PathBuf,
    audio_path: PathBuf,
}

impl MergeTask {
    /// Give the elementary files back to their jobs.
    fn restore(&self) {
        *self.video.output.lock() = OutputSlot::Ready(self.video_path.clone());
        *self.audio.output.lock() = OutputSlot::Ready(self.audio_path.clone());
    }

    async fn remove_inputs(&self) {
        for path in [&self.video_path, &self.audio_path] {
            if let Some(dir) = path.parent() {
                remove_job_dir(dir).await;
            }
        }
    }
}

#[instrument(skip_all, fields(job_id = %entry.id))]
async fn run_merge(inner: Arc<Inner>, entry: Arc<JobEntry>, task: MergeTask) {
    let merged_dir = inner.config.output.merged_dir().clone();
    if let Err(e) = tokio::fs::create_dir_all(&merged_dir).await {
        task.restore();
        entry.fail(&Error::from(e));
        return;
    }

    let output = merged_dir.join(format!("{}.mp4", entry.id));
    let options = MuxOptions {
        duration_tolerance: inner.config.merge.duration_tolerance_secs,
    };
    let mut mux = tokio::task::spawn_blocking({
        let video = task.video_path.clone();
        let audio = task.audio_path.clone();
        let output = output.clone();
        move || mp4::mux_files(&video, &audio, &output, &options)
    });

    let joined = tokio::select! {
        biased;
        _ = entry.token.cancelled() => {
            debug!("Merge cancelled, waiting for muxer to stop");
            let joined = (&mut mux).await;
            if matches!(joined, Ok(Ok(_))) {
                discard_output(&output).await;
            }
            task.restore();
            entry.fail(&Error::Cancelled);
            return;
        }
        joined = &mut mux => joined,
    };

    match joined {
        Ok(Ok(summary)) => {
            *entry.output.lock() = OutputSlot::Ready(output.clone());
            if entry.progress.complete(Some(output.clone())).is_err() {
                *entry.output.lock() = OutputSlot::Empty;
                discard_output(&output).await;
                task.restore();
                return;
            }
            task.remove_inputs().await;
            info!(
                path = %output.display(),
                video_secs = summary.video_duration,
                audio_secs = summary.audio_duration,
                fragments = summary.fragments,
                bytes = summary.bytes_written,
                "Merge completed"
            );
        }
        Ok(Err(e)) => {
            task.restore();
            entry.fail(&Error::from(e));
        }
        Err(e) => {
            task.restore();
            entry.fail(&Error::internal(format!("muxer task failed: {e}")));
        }
    }
}
