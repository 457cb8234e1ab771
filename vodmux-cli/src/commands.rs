use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;
use vodmux_engine::{
    JobId, JobStatus, Manifest, Orchestrator, Rendition, SegmentFetcher, Selection, SourceVideo,
};

use crate::cli::{DownloadArgs, OutputFormat};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::progress::ProgressView;

/// Where a manifest document comes from.
#[derive(Debug, Clone, PartialEq)]
enum ManifestSource {
    Remote(Url),
    File(PathBuf),
}

impl ManifestSource {
    fn parse(source: &str) -> Self {
        match Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Remote(url),
            _ => Self::File(PathBuf::from(source)),
        }
    }

    /// The URL relative paths in the document resolve against.
    fn source_url(&self, base_url: Option<&str>) -> Result<String> {
        if let Some(base) = base_url {
            return Ok(base.to_string());
        }
        match self {
            Self::Remote(url) => Ok(url.to_string()),
            Self::File(path) => {
                let absolute = std::path::absolute(path)?;
                Url::from_file_path(&absolute)
                    .map(|url| url.to_string())
                    .map_err(|_| {
                        AppError::InvalidInput(format!(
                            "cannot express {} as a URL, pass --base-url",
                            path.display()
                        ))
                    })
            }
        }
    }

    async fn read(&self, fetcher: &SegmentFetcher) -> Result<Vec<u8>> {
        match self {
            Self::Remote(url) => Ok(fetcher
                .fetch_bytes(url, &CancellationToken::new())
                .await?
                .to_vec()),
            Self::File(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

async fn load_source(
    fetcher: &SegmentFetcher,
    source: &str,
    base_url: Option<&str>,
) -> Result<(SourceVideo, Arc<Manifest>)> {
    let source = ManifestSource::parse(source);
    let raw = source.read(fetcher).await?;
    let mut record = SourceVideo::new(source.source_url(base_url)?);
    let manifest = record.ingest(&raw)?;
    Ok((record, manifest))
}

fn best_height(manifest: &Manifest) -> Option<u32> {
    manifest
        .video_renditions()
        .iter()
        .filter_map(Rendition::label)
        .max()
}

async fn join_progress(task: tokio::task::JoinHandle<()>) {
    if let Err(e) = task.await {
        warn!(error = %e, "Progress display task failed");
    }
}

pub struct CommandExecutor {
    config: AppConfig,
}

impl CommandExecutor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn inspect(
        &self,
        source: &str,
        base_url: Option<&str>,
        output: OutputFormat,
    ) -> Result<()> {
        let fetcher = SegmentFetcher::new(&self.config.engine.fetcher)?;
        let (record, manifest) = load_source(&fetcher, source, base_url).await?;

        match output {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&record)
                    .map_err(|e| AppError::InvalidInput(e.to_string()))?;
                println!("{json}");
            }
            OutputFormat::Pretty => {
                println!("{}", record.title);
                println!("  base url:    {}", manifest.base_url());
                println!("  duration:    {}s", record.duration_secs);
                println!("  resolutions: {}", record.available_resolutions.join(", "));
                for rendition in manifest
                    .video_renditions()
                    .iter()
                    .chain(manifest.audio_renditions())
                {
                    println!(
                        "  {:<5} {:<8} {:>10} bit/s  {:>4} segments  ~{} bytes",
                        rendition.kind.as_str(),
                        rendition.resolution_label().unwrap_or_default(),
                        rendition.bitrate.unwrap_or(0),
                        rendition.total_chunks(),
                        manifest.size_estimate(rendition),
                    );
                }
            }
        }
        Ok(())
    }

    pub async fn download(&self, args: DownloadArgs, hide_progress: bool) -> Result<PathBuf> {
        let mut config = self.config.clone();
        config.apply(&args)?;

        let engine = Orchestrator::new(config.engine.clone())?;
        let (record, manifest) =
            load_source(engine.fetcher(), &args.source, args.base_url.as_deref()).await?;
        info!(title = %record.title, resolutions = ?record.available_resolutions, "Source loaded");

        let video = if args.tracks.video() {
            let height = config
                .default_height
                .or_else(|| best_height(&manifest))
                .ok_or_else(|| AppError::InvalidInput("source has no video renditions".into()))?;
            Some(engine.create_job(Arc::clone(&manifest), Selection::video(height))?)
        } else {
            None
        };
        let audio = if args.tracks.audio() && !manifest.audio_renditions().is_empty() {
            Some(engine.create_job(Arc::clone(&manifest), Selection::Audio)?)
        } else {
            None
        };

        let view = ProgressView::new(hide_progress);
        let jobs: Vec<(&str, JobId)> = [("video", video), ("audio", audio)]
            .into_iter()
            .filter_map(|(label, job)| job.map(|job| (label, job)))
            .collect();
        if jobs.is_empty() {
            return Err(AppError::InvalidInput("nothing to download".into()));
        }

        let mut bars = Vec::new();
        for (label, job) in &jobs {
            bars.push(view.track_download(label, engine.subscribe(*job)?));
            engine.start_job(*job)?;
        }
        for (_, job) in &jobs {
            self.await_job(&engine, *job).await?;
        }
        for bar in bars {
            join_progress(bar).await;
        }

        let output = match (video, audio) {
            (Some(video), Some(audio)) if !args.no_merge => {
                let merge = engine.request_merge(video, audio)?;
                let spinner = view.track_merge("merge", engine.subscribe(merge)?);
                self.await_job(&engine, merge).await?;
                join_progress(spinner).await;
                engine.get_output(merge)?
            }
            (Some(video), audio) => {
                if let Some(audio) = audio {
                    println!("{}", engine.get_output(audio)?.display());
                }
                engine.get_output(video)?
            }
            (None, Some(audio)) => engine.get_output(audio)?,
            (None, None) => return Err(AppError::InvalidInput("nothing to download".into())),
        };

        engine.shutdown().await;
        Ok(output)
    }

    async fn await_job(&self, engine: &Orchestrator, job: JobId) -> Result<()> {
        let snapshot = tokio::select! {
            snapshot = engine.wait_for_terminal(job) => snapshot?,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling jobs");
                engine.shutdown().await;
                return Err(AppError::Interrupted);
            }
        };
        match (snapshot.status, snapshot.failure) {
            (JobStatus::Completed, _) => Ok(()),
            (_, Some(failure)) => Err(AppError::JobFailed { job, failure }),
            (status, None) => Err(AppError::InvalidInput(format!(
                "job {job} ended as {status}"
            ))),
        }
    }

    pub fn config_command(
        &self,
        path: Option<&Path>,
        show: bool,
        reset: bool,
        print_path: bool,
    ) -> Result<()> {
        if print_path {
            match path.map(Path::to_path_buf).or_else(AppConfig::default_path) {
                Some(path) => println!("{}", path.display()),
                None => return Err(AppError::Config("no user configuration directory".into())),
            }
        } else if reset {
            let path = AppConfig::reset(path)?;
            println!("Configuration reset to defaults at {}", path.display());
        } else if show {
            println!("{}", self.config.show()?);
        } else {
            println!("Use --show to display the configuration or --reset to restore defaults");
        }
        Ok(())
    }
}
