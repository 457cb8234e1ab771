use tracing::debug;
use url::Url;

use crate::error::{ManifestError, Result};
use crate::raw::RawManifest;
use crate::rendition::{Rendition, RenditionId, Selection, TrackKind};

/// Path segment that marks the container directory in provider playlist URLs.
const PLAYLIST_DIR: &str = "playlist";

/// Parsed, immutable manifest. Safe to share across jobs behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Manifest {
    base_url: Url,
    clip_id: Option<String>,
    video: Vec<Rendition>,
    audio: Vec<Rendition>,
}

impl Manifest {
    /// Parse a raw manifest document fetched from `source_url`.
    pub fn resolve(raw: &[u8], source_url: &str) -> Result<Self> {
        let document: RawManifest = serde_json::from_slice(raw)?;

        let source = Url::parse(source_url).ok();
        let base_url = resolve_base_url(document.base_url.as_deref(), source.as_ref())?;

        let video = document
            .video
            .into_iter()
            .map(|raw| Rendition::from_raw(TrackKind::Video, raw))
            .collect::<Result<Vec<_>>>()?;
        let audio = document
            .audio
            .into_iter()
            .map(|raw| Rendition::from_raw(TrackKind::Audio, raw))
            .collect::<Result<Vec<_>>>()?;

        if video.is_empty() && audio.is_empty() {
            return Err(ManifestError::invalid("document declares no renditions"));
        }

        debug!(
            base_url = %base_url,
            video_renditions = video.len(),
            audio_renditions = audio.len(),
            "Resolved manifest"
        );

        Ok(Self {
            base_url,
            clip_id: document.clip_id,
            video,
            audio,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn clip_id(&self) -> Option<&str> {
        self.clip_id.as_deref()
    }

    pub fn video_renditions(&self) -> &[Rendition] {
        &self.video
    }

    pub fn audio_renditions(&self) -> &[Rendition] {
        &self.audio
    }

    fn renditions(&self, kind: TrackKind) -> &[Rendition] {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        }
    }

    pub fn rendition(&self, id: RenditionId) -> Option<&Rendition> {
        self.renditions(id.kind).get(id.index)
    }

    /// First video rendition whose label equals `height`.
    pub fn select_video(&self, height: u32) -> Result<&Rendition> {
        self.locate(Selection::video(height))
            .map(|id| &self.video[id.index])
    }

    /// Highest-bitrate audio rendition; ties resolve to the first encountered.
    pub fn select_audio(&self) -> Result<&Rendition> {
        self.locate(Selection::Audio).map(|id| &self.audio[id.index])
    }

    pub fn select(&self, selection: Selection) -> Result<&Rendition> {
        match selection {
            Selection::Video { height } => self.select_video(height),
            Selection::Audio => self.select_audio(),
        }
    }

    /// Resolve a selection to a rendition address.
    pub fn locate(&self, selection: Selection) -> Result<RenditionId> {
        let index = match selection {
            Selection::Video { height } => self
                .video
                .iter()
                .position(|r| r.label() == Some(height)),
            Selection::Audio => {
                let mut best: Option<(usize, u64)> = None;
                for (index, rendition) in self.audio.iter().enumerate() {
                    let bitrate = rendition.bitrate.unwrap_or(0);
                    // strict comparison keeps the first of equal bitrates
                    if best.is_none_or(|(_, current)| bitrate > current) {
                        best = Some((index, bitrate));
                    }
                }
                best.map(|(index, _)| index)
            }
        };

        index
            .map(|index| RenditionId {
                kind: selection.track_kind(),
                index,
            })
            .ok_or(ManifestError::rendition_not_found(selection))
    }

    /// Absolute URL of segment `index` of `rendition`.
    ///
    /// `base_url`, the rendition's relative base and the segment's relative
    /// URL are merged with RFC 3986 reference resolution.
    pub fn segment_url(&self, rendition: &Rendition, index: usize) -> Result<Url> {
        let segment = rendition
            .segments
            .get(index)
            .ok_or(ManifestError::SegmentOutOfRange {
                index,
                len: rendition.segments.len(),
            })?;
        let rendition_base = self.base_url.join(&rendition.relative_base_url)?;
        Ok(rendition_base.join(&segment.relative_url)?)
    }

    /// Absolute URLs of every segment of `rendition`, in playback order.
    pub fn segment_urls(&self, rendition: &Rendition) -> Result<Vec<Url>> {
        let rendition_base = self.base_url.join(&rendition.relative_base_url)?;
        rendition
            .segments
            .iter()
            .map(|segment| Ok(rendition_base.join(&segment.relative_url)?))
            .collect()
    }

    /// Display labels of the video renditions, e.g. `["1080p", "720p"]`.
    pub fn available_resolutions(&self) -> Vec<String> {
        self.video
            .iter()
            .filter_map(Rendition::resolution_label)
            .collect()
    }

    /// Source duration in seconds: the first video rendition's explicit
    /// duration, else the sum of its segment durations.
    pub fn total_duration(&self) -> f64 {
        self.video
            .first()
            .map(|first| first.duration.unwrap_or_else(|| first.segments_duration()))
            .unwrap_or(0.0)
    }

    /// Download size estimate for one rendition of this source.
    pub fn size_estimate(&self, rendition: &Rendition) -> u64 {
        rendition.size_estimate(self.total_duration())
    }
}

fn resolve_base_url(declared: Option<&str>, source: Option<&Url>) -> Result<Url> {
    match declared.filter(|base| !base.is_empty()) {
        Some(declared) => match Url::parse(declared) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let source = source.ok_or_else(|| {
                    ManifestError::invalid(format!(
                        "relative base URL `{declared}` without a usable source URL"
                    ))
                })?;
                Ok(source.join(declared)?)
            }
            Err(e) => Err(e.into()),
        },
        None => {
            let source = source.ok_or_else(|| {
                ManifestError::invalid("no base URL declared and no usable source URL")
            })?;
            derive_base_url(source)
        }
    }
}

/// Best-effort base derived from the document's own URL.
///
/// Truncates just before the last `playlist` directory when there is one,
/// otherwise uses the directory holding the document.
fn derive_base_url(source: &Url) -> Result<Url> {
    let segments: Vec<&str> = source
        .path_segments()
        .ok_or_else(|| ManifestError::invalid(format!("source URL `{source}` has no path")))?
        .collect();

    let playlist_dir = segments
        .iter()
        .rposition(|segment| *segment == PLAYLIST_DIR)
        .filter(|pos| pos + 1 < segments.len());

    match playlist_dir {
        Some(pos) => {
            let mut base = source.clone();
            let path: String = segments[..pos]
                .iter()
                .fold(String::from("/"), |mut path, segment| {
                    path.push_str(segment);
                    path.push('/');
                    path
                });
            base.set_path(&path);
            base.set_query(None);
            base.set_fragment(None);
            Ok(base)
        }
        None => Ok(source.join("./")?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "https://cdn.example.com/exp=1~acl=x/sep/video/abc/master.json?base64_init=1";

    fn document(base_url: Option<&str>) -> String {
        let base = base_url
            .map(|b| format!(r#""base_url": "{b}","#))
            .unwrap_or_default();
        format!(
            r#"{{
                "clip_id": "clip-1",
                {base}
                "video": [
                    {{"id": "v720", "base_url": "video/720/", "height": 720, "width": 1280,
                      "bitrate": 2000000, "init_segment": "AAECAw==",
                      "segments": [
                        {{"url": "s-1.m4s", "size": 10, "start": 0, "end": 4}},
                        {{"url": "s-2.m4s", "size": 20, "start": 4, "end": 8}},
                        {{"url": "s-3.m4s", "size": 30, "start": 8, "end": 10}}
                      ]}},
                    {{"id": "v480", "base_url": "video/480/", "height": 480,
                      "bitrate": 900000, "segments": [{{"url": "s-1.m4s"}}]}}
                ],
                "audio": [
                    {{"id": "a64", "base_url": "audio/64/", "bitrate": 64000,
                      "segments": [{{"url": "a-1.m4s"}}]}},
                    {{"id": "a128", "base_url": "audio/128/", "bitrate": 128000,
                      "segments": [{{"url": "a-1.m4s"}}, {{"url": "a-2.m4s"}}]}},
                    {{"id": "a128b", "base_url": "audio/128b/", "bitrate": 128000,
                      "segments": [{{"url": "a-1.m4s"}}]}}
                ]
            }}"#
        )
    }

    #[test]
    fn resolves_declared_relative_base() {
        let manifest = Manifest::resolve(document(Some("../")).as_bytes(), SOURCE).unwrap();
        assert_eq!(
            manifest.base_url().as_str(),
            "https://cdn.example.com/exp=1~acl=x/sep/video/"
        );
        assert_eq!(manifest.clip_id(), Some("clip-1"));

        let video = manifest.select_video(720).unwrap();
        assert_eq!(
            manifest.segment_url(video, 1).unwrap().as_str(),
            "https://cdn.example.com/exp=1~acl=x/sep/video/video/720/s-2.m4s"
        );
    }

    #[test]
    fn absolute_declared_base_stands_alone() {
        let manifest = Manifest::resolve(
            document(Some("https://other.example.net/media/")).as_bytes(),
            SOURCE,
        )
        .unwrap();
        let audio = manifest.select_audio().unwrap();
        assert_eq!(
            manifest.segment_url(audio, 0).unwrap().as_str(),
            "https://other.example.net/media/audio/128/a-1.m4s"
        );
    }

    #[test]
    fn derives_base_from_document_directory() {
        let manifest = Manifest::resolve(document(None).as_bytes(), SOURCE).unwrap();
        assert_eq!(
            manifest.base_url().as_str(),
            "https://cdn.example.com/exp=1~acl=x/sep/video/abc/"
        );
    }

    #[test]
    fn derives_base_before_playlist_directory() {
        let source = "https://cdn.example.com/a/b/playlist/av/primary/playlist.json?x=1";
        let manifest = Manifest::resolve(document(None).as_bytes(), source).unwrap();
        assert_eq!(manifest.base_url().as_str(), "https://cdn.example.com/a/b/");
    }

    #[test]
    fn segment_urls_follow_rfc3986_merge() {
        let raw = r#"{
            "base_url": "https://h.example/root/",
            "video": [{"height": 360, "base_url": "../other/dir",
                       "segments": [{"url": "seg.m4s"}, {"url": "/abs/seg.m4s"},
                                    {"url": "https://x.example/full.m4s"}]}]
        }"#;
        let manifest = Manifest::resolve(raw.as_bytes(), "").unwrap();
        let video = manifest.select_video(360).unwrap();
        let urls: Vec<String> = manifest
            .segment_urls(video)
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://h.example/other/seg.m4s",
                "https://h.example/abs/seg.m4s",
                "https://x.example/full.m4s",
            ]
        );
    }

    #[test]
    fn select_video_by_exact_height() {
        let manifest = Manifest::resolve(document(None).as_bytes(), SOURCE).unwrap();
        assert_eq!(manifest.select_video(480).unwrap().id.as_deref(), Some("v480"));
        assert_eq!(
            manifest.select_video(1080).unwrap_err(),
            ManifestError::RenditionNotFound {
                selection: Selection::video(1080)
            }
        );
    }

    #[test]
    fn select_video_falls_back_to_width_label() {
        let raw = r#"{"base_url": "https://h.example/",
                     "video": [{"width": 640, "segments": []}]}"#;
        let manifest = Manifest::resolve(raw.as_bytes(), "").unwrap();
        assert!(manifest.select_video(640).is_ok());
        assert_eq!(manifest.available_resolutions(), vec!["640p".to_string()]);
    }

    #[test]
    fn select_audio_prefers_first_of_highest_bitrate() {
        let manifest = Manifest::resolve(document(None).as_bytes(), SOURCE).unwrap();
        assert_eq!(manifest.select_audio().unwrap().id.as_deref(), Some("a128"));
    }

    #[test]
    fn select_audio_without_audio_renditions() {
        let raw = r#"{"base_url": "https://h.example/", "video": [{"height": 720}]}"#;
        let manifest = Manifest::resolve(raw.as_bytes(), "").unwrap();
        assert!(matches!(
            manifest.select_audio(),
            Err(ManifestError::RenditionNotFound { .. })
        ));
    }

    #[test]
    fn derived_metadata() {
        let manifest = Manifest::resolve(document(None).as_bytes(), SOURCE).unwrap();
        assert_eq!(manifest.available_resolutions(), vec!["720p", "480p"]);
        assert_eq!(manifest.total_duration(), 10.0);

        let video = manifest.select_video(720).unwrap();
        assert_eq!(video.total_chunks(), 3);
        assert_eq!(manifest.size_estimate(video), 60);
        assert_eq!(video.init_segment.as_ref(), &[0, 1, 2, 3]);

        // No size hints: bitrate * duration / 8
        let low = manifest.select_video(480).unwrap();
        assert_eq!(manifest.size_estimate(low), 1_125_000);
    }

    #[test]
    fn explicit_duration_wins_over_segments() {
        let raw = r#"{"base_url": "https://h.example/",
                     "video": [{"height": 720, "duration": 33.5,
                                "segments": [{"url": "a", "duration": 4}]}]}"#;
        let manifest = Manifest::resolve(raw.as_bytes(), "").unwrap();
        assert_eq!(manifest.total_duration(), 33.5);
    }

    #[test]
    fn rejects_invalid_documents() {
        for raw in [
            "not json",
            "{}",
            r#"{"video": [], "audio": []}"#,
            r#"{"video": [{"height": "tall"}]}"#,
        ] {
            let err = Manifest::resolve(raw.as_bytes(), SOURCE).unwrap_err();
            assert!(matches!(err, ManifestError::Invalid { .. }), "{raw}: {err:?}");
        }
    }

    #[test]
    fn rejects_undecodable_init_segment() {
        let raw = r#"{"base_url": "https://h.example/",
                     "video": [{"height": 720, "init_segment": "%%%"}]}"#;
        assert!(matches!(
            Manifest::resolve(raw.as_bytes(), ""),
            Err(ManifestError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_relative_base_without_source() {
        let raw = r#"{"base_url": "../", "video": [{"height": 720}]}"#;
        assert!(matches!(
            Manifest::resolve(raw.as_bytes(), "not a url"),
            Err(ManifestError::Invalid { .. })
        ));
    }

    #[test]
    fn segment_out_of_range() {
        let manifest = Manifest::resolve(document(None).as_bytes(), SOURCE).unwrap();
        let video = manifest.select_video(720).unwrap();
        assert_eq!(
            manifest.segment_url(video, 3).unwrap_err(),
            ManifestError::SegmentOutOfRange { index: 3, len: 3 }
        );
    }
}
