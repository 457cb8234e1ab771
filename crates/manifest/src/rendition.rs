use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, Result};
use crate::raw::{RawRendition, RawSegment};

/// Kind of elementary track a rendition carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rendition a download should fetch.
///
/// Video is keyed by its numeric height label; audio always resolves to the
/// highest-bitrate rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Selection {
    Video { height: u32 },
    Audio,
}

impl Selection {
    pub fn video(height: u32) -> Self {
        Self::Video { height }
    }

    pub fn track_kind(&self) -> TrackKind {
        match self {
            Self::Video { .. } => TrackKind::Video,
            Self::Audio => TrackKind::Audio,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video { height } => write!(f, "video {height}p"),
            Self::Audio => f.write_str("audio (best bitrate)"),
        }
    }
}

/// Stable address of a rendition inside one [`crate::Manifest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenditionId {
    pub kind: TrackKind,
    pub index: usize,
}

/// One fetchable unit of a rendition. Its position in the rendition is its
/// only identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub relative_url: String,
    /// Declared byte size (`size`, falling back to `length`).
    pub size_hint: Option<u64>,
    /// Declared duration in seconds (`duration`, falling back to `end - start`).
    pub duration_hint: Option<f64>,
}

impl From<RawSegment> for Segment {
    fn from(raw: RawSegment) -> Self {
        let duration_hint = raw.duration.or(match (raw.start, raw.end) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        });
        Self {
            relative_url: raw.url,
            size_hint: raw.size.or(raw.length),
            duration_hint,
        }
    }
}

/// One quality/track variant of the source.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub kind: TrackKind,
    pub id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate: Option<u64>,
    /// Explicit duration in seconds, when the document declares one.
    pub duration: Option<f64>,
    pub codecs: Option<String>,
    pub mime_type: Option<String>,
    pub relative_base_url: String,
    /// Decoded initialization segment; empty when the document carries none.
    pub init_segment: Bytes,
    /// Playback-ordered segments. Never reordered or deduplicated.
    pub segments: Vec<Segment>,
}

impl Rendition {
    pub(crate) fn from_raw(kind: TrackKind, raw: RawRendition) -> Result<Self> {
        let init_segment = match raw.init_segment.as_deref() {
            None | Some("") => Bytes::new(),
            Some(encoded) => Bytes::from(STANDARD.decode(encoded).map_err(|e| {
                ManifestError::invalid(format!(
                    "{kind} rendition {} has an undecodable init segment: {e}",
                    raw.id.as_deref().unwrap_or("?")
                ))
            })?),
        };

        Ok(Self {
            kind,
            id: raw.id,
            width: raw.width,
            height: raw.height,
            bitrate: raw.bitrate,
            duration: raw.duration,
            codecs: raw.codecs,
            mime_type: raw.mime_type,
            relative_base_url: raw.base_url.unwrap_or_default(),
            init_segment,
            segments: raw.segments.into_iter().map(Segment::from).collect(),
        })
    }

    /// Numeric quality label: the height, or the width for width-only renditions.
    pub fn label(&self) -> Option<u32> {
        self.height.or(self.width)
    }

    /// Display form of [`Self::label`], e.g. `"720p"`.
    pub fn resolution_label(&self) -> Option<String> {
        self.label().map(|value| format!("{value}p"))
    }

    pub fn total_chunks(&self) -> usize {
        self.segments.len()
    }

    /// Sum of the declared segment sizes, or `None` if no segment declares one.
    pub fn total_size_hint(&self) -> Option<u64> {
        self.segments
            .iter()
            .filter_map(|s| s.size_hint)
            .fold(None, |acc, size| Some(acc.unwrap_or(0) + size))
    }

    /// Sum of the declared segment durations.
    pub fn segments_duration(&self) -> f64 {
        self.segments.iter().filter_map(|s| s.duration_hint).sum()
    }

    /// Download size estimate in bytes.
    ///
    /// Uses the declared segment sizes; if none are declared, falls back to
    /// `bitrate * source_duration / 8`.
    pub fn size_estimate(&self, source_duration: f64) -> u64 {
        if let Some(total) = self.total_size_hint().filter(|total| *total > 0) {
            return total;
        }
        match self.bitrate {
            Some(bitrate) if source_duration > 0.0 => {
                (bitrate as f64 * source_duration / 8.0) as u64
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_segment(url: &str) -> RawSegment {
        RawSegment {
            url: url.to_string(),
            size: None,
            length: None,
            duration: None,
            start: None,
            end: None,
        }
    }

    #[test]
    fn segment_size_falls_back_to_length() {
        let mut raw = raw_segment("a.m4s");
        raw.length = Some(42);
        assert_eq!(Segment::from(raw).size_hint, Some(42));

        let mut raw = raw_segment("b.m4s");
        raw.size = Some(7);
        raw.length = Some(42);
        assert_eq!(Segment::from(raw).size_hint, Some(7));
    }

    #[test]
    fn segment_duration_from_start_end() {
        let mut raw = raw_segment("a.m4s");
        raw.start = Some(6.0);
        raw.end = Some(10.5);
        assert_eq!(Segment::from(raw).duration_hint, Some(4.5));

        let mut raw = raw_segment("b.m4s");
        raw.start = Some(6.0);
        assert_eq!(Segment::from(raw).duration_hint, None);
    }

    #[test]
    fn size_estimate_prefers_hints_then_bitrate() {
        let mut rendition = Rendition {
            kind: TrackKind::Video,
            id: None,
            width: None,
            height: Some(720),
            bitrate: Some(800_000),
            duration: None,
            codecs: None,
            mime_type: None,
            relative_base_url: String::new(),
            init_segment: Bytes::new(),
            segments: vec![
                Segment {
                    relative_url: "1".into(),
                    size_hint: Some(100),
                    duration_hint: None,
                },
                Segment {
                    relative_url: "2".into(),
                    size_hint: None,
                    duration_hint: None,
                },
            ],
        };
        assert_eq!(rendition.size_estimate(10.0), 100);

        rendition.segments[0].size_hint = None;
        assert_eq!(rendition.size_estimate(10.0), 1_000_000);
        assert_eq!(rendition.size_estimate(0.0), 0);
    }

    #[test]
    fn label_falls_back_to_width() {
        let rendition = Rendition {
            kind: TrackKind::Video,
            id: None,
            width: Some(640),
            height: None,
            bitrate: None,
            duration: None,
            codecs: None,
            mime_type: None,
            relative_base_url: String::new(),
            init_segment: Bytes::new(),
            segments: Vec::new(),
        };
        assert_eq!(rendition.label(), Some(640));
        assert_eq!(rendition.resolution_label().as_deref(), Some("640p"));
    }
}
