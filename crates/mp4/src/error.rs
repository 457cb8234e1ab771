use std::io;

pub type Result<T> = std::result::Result<T, Mp4Error>;

#[derive(Debug, thiserror::Error)]
pub enum Mp4Error {
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error(
        "track durations diverge: video {video:.3}s vs audio {audio:.3}s (tolerance {tolerance:.3}s)"
    )]
    DurationMismatch {
        video: f64,
        audio: f64,
        tolerance: f64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Mp4Error {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    /// Prefix a malformed-input reason with the input it came from.
    pub(crate) fn in_input(self, label: &str) -> Self {
        match self {
            Self::Malformed(reason) => Self::Malformed(format!("{label}: {reason}")),
            other => other,
        }
    }
}
