use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "vodmux",
    version,
    about = "Download segmented video-on-demand renditions and mux them into one MP4"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "VODMUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long, global = true, env = "VODMUX_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download the renditions of a source and merge them
    Download(DownloadArgs),

    /// Show what a manifest offers without downloading anything
    Inspect {
        /// Manifest document: an http(s) URL or a local file
        source: String,

        /// URL the document was published at, used to resolve relative paths
        #[arg(long)]
        base_url: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Show or reset the configuration file
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Overwrite the configuration file with defaults
        #[arg(long)]
        reset: bool,

        /// Print the configuration file location
        #[arg(long)]
        path: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Manifest document: an http(s) URL or a local file
    pub source: String,

    /// URL the document was published at, used to resolve relative paths
    #[arg(long)]
    pub base_url: Option<String>,

    /// Video height to download, e.g. 720 (defaults to the highest available)
    #[arg(long)]
    pub height: Option<u32>,

    /// What to download
    #[arg(long, value_enum, default_value_t = Tracks::Both)]
    pub tracks: Tracks,

    /// Keep video and audio as separate files
    #[arg(long)]
    pub no_merge: bool,

    /// Directory for intermediate files
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Directory for merged files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Concurrent segment downloads per track
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Per-segment timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Attempts per segment, counting the first
    #[arg(long)]
    pub attempts: Option<u32>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tracks {
    Both,
    Video,
    Audio,
}

impl Tracks {
    pub fn video(self) -> bool {
        matches!(self, Self::Both | Self::Video)
    }

    pub fn audio(self) -> bool {
        matches!(self, Self::Both | Self::Audio)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}
