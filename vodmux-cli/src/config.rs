use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use vodmux_engine::EngineConfig;

use crate::cli::DownloadArgs;
use crate::error::{AppError, Result};

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Height picked when `--height` is not given.
    pub default_height: Option<u32>,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// `<config dir>/vodmux/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vodmux").join("config.toml"))
    }

    fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::default_path()
                .ok_or_else(|| AppError::Config("no user configuration directory".into())),
        }
    }

    /// Load the configuration file, falling back to defaults when it does
    /// not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&text)?;
        config.engine.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Write the default configuration to `path`.
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve_path(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::default().show()?)?;
        Ok(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply command-line overrides on top of the file configuration.
    pub fn apply(&mut self, args: &DownloadArgs) -> Result<()> {
        let engine = &mut self.engine;
        if let Some(dir) = &args.work_dir {
            engine.output.work_dir = dir.clone();
        }
        if let Some(dir) = &args.output_dir {
            engine.output.output_dir = Some(dir.clone());
        }
        if let Some(concurrency) = args.concurrency {
            engine.scheduler.download_concurrency = concurrency;
        }
        if let Some(secs) = args.timeout {
            engine.fetcher.segment_timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(attempts) = args.attempts {
            engine.fetcher.max_attempts = attempts;
        }
        if args.height.is_some() {
            self.default_height = args.height;
        }
        engine.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, Commands};
    use clap::Parser;

    fn download_args(extra: &[&str]) -> DownloadArgs {
        let mut argv = vec!["vodmux", "download", "master.json"];
        argv.extend_from_slice(extra);
        match Args::parse_from(argv).command {
            Commands::Download(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn reset_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        AppConfig::reset(Some(&path)).unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "default_height = 1080\n[engine.scheduler]\ndownload_concurrency = 2\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.default_height, Some(1080));
        assert_eq!(config.engine.scheduler.download_concurrency, 2);
        assert_eq!(config.engine.fetcher.max_attempts, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine.scheduler]\ndownload_concurrency = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(AppError::Engine(_))
        ));
    }

    #[test]
    fn command_line_overrides_file() {
        let mut config = AppConfig::default();
        config
            .apply(&download_args(&["-j", "6", "--timeout", "5", "--height", "480"]))
            .unwrap();
        assert_eq!(config.engine.scheduler.download_concurrency, 6);
        assert_eq!(config.engine.fetcher.segment_timeout_ms, 5000);
        assert_eq!(config.default_height, Some(480));

        assert!(config.apply(&download_args(&["--attempts", "0"])).is_err());
    }
}
