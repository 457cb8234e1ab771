use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vodmux_engine::{JobProgress, JobStatus};

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:>6.bold} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>6.bold} {spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Progress bars for a set of jobs.
pub struct ProgressView {
    multi: MultiProgress,
}

impl ProgressView {
    pub fn new(hidden: bool) -> Self {
        let multi = MultiProgress::new();
        if hidden {
            multi.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }
        Self { multi }
    }

    /// Mirror a download job's progress record onto a bar until the job ends.
    pub fn track_download(
        &self,
        label: &str,
        rx: watch::Receiver<JobProgress>,
    ) -> JoinHandle<()> {
        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(bar_style());
        bar.set_prefix(label.to_string());
        tokio::spawn(follow(bar, rx))
    }

    /// Spinner for a job without countable steps (merges).
    pub fn track_merge(&self, label: &str, rx: watch::Receiver<JobProgress>) -> JoinHandle<()> {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        tokio::spawn(follow(bar, rx))
    }
}

async fn follow(bar: ProgressBar, mut rx: watch::Receiver<JobProgress>) {
    loop {
        let status = {
            let progress = rx.borrow_and_update();
            if progress.total_chunks > 0 {
                bar.set_length(progress.total_chunks);
                bar.set_position(progress.downloaded_chunks);
            }
            bar.set_message(progress.status.to_string());
            progress.status
        };
        if status.is_terminal() || rx.changed().await.is_err() {
            match status {
                JobStatus::Completed => bar.finish_with_message("done"),
                _ => bar.abandon_with_message(
                    rx.borrow()
                        .failure
                        .as_ref()
                        .map(|failure| failure.to_string())
                        .unwrap_or_else(|| status.to_string()),
                ),
            }
            return;
        }
    }
}
