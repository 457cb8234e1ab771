use crate::rendition::Selection;

pub type Result<T> = std::result::Result<T, ManifestError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest invalid: {reason}")]
    Invalid { reason: String },

    #[error("rendition not found for {selection}")]
    RenditionNotFound { selection: Selection },

    #[error("segment {index} out of range (rendition has {len} segments)")]
    SegmentOutOfRange { index: usize, len: usize },
}

impl ManifestError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn rendition_not_found(selection: Selection) -> Self {
        Self::RenditionNotFound { selection }
    }
}

impl From<serde_json::Error> for ManifestError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid(format!("malformed document: {err}"))
    }
}

impl From<url::ParseError> for ManifestError {
    fn from(err: url::ParseError) -> Self {
        Self::invalid(format!("unresolvable URL: {err}"))
    }
}
