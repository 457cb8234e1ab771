//! Two-track fMP4 muxing.
//!
//! Combines a fragmented video-only file and a fragmented audio-only file into
//! one fragmented file carrying both tracks. Samples are never decoded or
//! re-encoded: `moof` boxes are rewritten in place and the bytes that follow
//! each `moof` up to its last `mdat` are copied verbatim.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::box_utils::{box_at, children, fourcc_to_string, read_box_header, write_box};
use crate::error::{Mp4Error, Result};
use crate::fragment::{FragmentInfo, FragmentRewrite, inspect_moof, rewrite_moof};
use crate::isobmff::{
    TrackInfo, parse_movie, set_mvhd_next_track_id, set_trak_track_id, set_trex_track_id,
    trex_box,
};

pub const VIDEO_TRACK_ID: u32 = 1;
pub const AUDIO_TRACK_ID: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuxOptions {
    /// Largest accepted difference between the two track durations, in seconds.
    pub duration_tolerance: f64,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            duration_tolerance: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuxSummary {
    pub video_duration: f64,
    pub audio_duration: f64,
    pub fragments: usize,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Role {
    Video,
    Audio,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Self::Video => "video input",
            Self::Audio => "audio input",
        }
    }

    fn output_track_id(self) -> u32 {
        match self {
            Self::Video => VIDEO_TRACK_ID,
            Self::Audio => AUDIO_TRACK_ID,
        }
    }

    fn accepts(self, track: &TrackInfo) -> bool {
        match self {
            Self::Video => track.is_video(),
            Self::Audio => track.is_audio(),
        }
    }
}

#[derive(Debug)]
struct Fragment {
    moof: Vec<u8>,
    moof_offset: u64,
    /// Bytes after the `moof` through the end of its last `mdat`.
    tail: Range<u64>,
    info: FragmentInfo,
    /// Decode time in the track timescale: `tfdt`, or the running sum of
    /// previous durations when `tfdt` is absent.
    start: u64,
}

#[derive(Debug)]
struct TrackInput {
    role: Role,
    file: File,
    ftyp: Option<Vec<u8>>,
    moov: Vec<u8>,
    track: TrackInfo,
    fragments: Vec<Fragment>,
    first_start: u64,
}

struct PendingFragment {
    moof: Vec<u8>,
    moof_offset: u64,
    tail_end: Option<u64>,
}

impl TrackInput {
    fn open(path: &Path, role: Role) -> Result<Self> {
        Self::scan(path, role).map_err(|e| e.in_input(role.label()))
    }

    fn scan(path: &Path, role: Role) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut ftyp = None;
        let mut moov = None;
        let mut pending: Option<PendingFragment> = None;
        let mut raw_fragments = Vec::new();

        let mut offset = 0u64;
        while offset < len {
            let mut header = [0u8; 16];
            let available = (len - offset).min(16) as usize;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut header[..available])?;
            let (size, fourcc, header_size) = read_box_header(&header[..available], len - offset)
                .ok_or_else(|| Mp4Error::malformed(format!("truncated box header at {offset}")))?;
            let end = offset
                .checked_add(size)
                .filter(|&end| size >= header_size as u64 && end <= len)
                .ok_or_else(|| {
                    Mp4Error::malformed(format!(
                        "box {} at {offset} overruns the file",
                        fourcc_to_string(&fourcc)
                    ))
                })?;

            match &fourcc {
                b"ftyp" if ftyp.is_none() => ftyp = Some(read_range(&mut file, offset, size)?),
                b"moov" => {
                    if moov.is_some() {
                        return Err(Mp4Error::malformed("more than one moov"));
                    }
                    moov = Some(read_range(&mut file, offset, size)?);
                }
                b"moof" => {
                    if let Some(done) = pending.take() {
                        raw_fragments.push(finish_fragment(done)?);
                    }
                    pending = Some(PendingFragment {
                        moof: read_range(&mut file, offset, size)?,
                        moof_offset: offset,
                        tail_end: None,
                    });
                }
                b"mdat" => match pending.as_mut() {
                    Some(current) => current.tail_end = Some(end),
                    None => {
                        return Err(Mp4Error::malformed(format!(
                            "mdat at {offset} has no preceding moof"
                        )));
                    }
                },
                other => debug!(
                    input = role.label(),
                    fourcc = %fourcc_to_string(other),
                    offset,
                    "Skipping top-level box"
                ),
            }

            offset = end;
        }
        if let Some(done) = pending.take() {
            raw_fragments.push(finish_fragment(done)?);
        }

        let moov = moov.ok_or_else(|| Mp4Error::malformed("no moov box"))?;
        let movie = parse_movie(&moov)?;
        let track = match movie.tracks.as_slice() {
            [track] => *track,
            tracks => {
                return Err(Mp4Error::malformed(format!(
                    "expected exactly one track, found {}",
                    tracks.len()
                )));
            }
        };
        if !role.accepts(&track) {
            return Err(Mp4Error::malformed(format!(
                "track handler is {}",
                fourcc_to_string(&track.handler)
            )));
        }
        if raw_fragments.is_empty() {
            return Err(Mp4Error::malformed("no media fragments"));
        }

        let mut fragments = Vec::with_capacity(raw_fragments.len());
        let mut running = 0u64;
        for (moof, moof_offset, tail) in raw_fragments {
            let info = inspect_moof(&moof, track.default_sample_duration)?;
            if info.track_id != track.track_id {
                return Err(Mp4Error::malformed(format!(
                    "fragment at {moof_offset} references track {}, movie declares {}",
                    info.track_id, track.track_id
                )));
            }
            let start = info.base_media_decode_time.unwrap_or(running);
            running = start.saturating_add(info.duration);
            fragments.push(Fragment {
                moof,
                moof_offset,
                tail,
                info,
                start,
            });
        }

        debug!(
            input = role.label(),
            path = %path.display(),
            fragments = fragments.len(),
            timescale = track.timescale,
            "Indexed fragmented input"
        );

        let first_start = fragments.iter().map(|f| f.start).min().unwrap_or(0);
        Ok(Self {
            role,
            file,
            ftyp,
            moov,
            track,
            fragments,
            first_start,
        })
    }

    fn duration_secs(&self) -> f64 {
        let total: u64 = self.fragments.iter().map(|f| f.info.duration).sum();
        total as f64 / f64::from(self.track.timescale)
    }

    fn relative_start_secs(&self, index: usize) -> f64 {
        let start = self.fragments[index].start - self.first_start;
        start as f64 / f64::from(self.track.timescale)
    }

    /// Copy of this input's single `trak` with its track id replaced.
    fn renumbered_trak(&self) -> Result<Vec<u8>> {
        let root = box_at(&self.moov, 0, self.moov.len())
            .ok_or_else(|| Mp4Error::malformed("moov box is truncated"))?;
        let trak = children(&self.moov, root.body_start, root.body_end)
            .and_then(|boxes| boxes.into_iter().find(|b| b.fourcc == *b"trak"))
            .ok_or_else(|| Mp4Error::malformed("moov has no trak"))?;
        let mut out = self.moov[trak.start..trak.end].to_vec();
        set_trak_track_id(&mut out, self.role.output_track_id())?;
        Ok(out)
    }

    fn renumbered_trex(&self) -> Result<Vec<u8>> {
        let mut out = trex_box(&self.moov, self.track.track_id).ok_or_else(|| {
            Mp4Error::malformed(format!("no trex for track {}", self.track.track_id))
        })?;
        set_trex_track_id(&mut out, self.role.output_track_id())?;
        Ok(out)
    }
}

fn finish_fragment(pending: PendingFragment) -> Result<(Vec<u8>, u64, Range<u64>)> {
    let moof_end = pending.moof_offset + pending.moof.len() as u64;
    let tail_end = pending.tail_end.ok_or_else(|| {
        Mp4Error::malformed(format!("moof at {} has no mdat", pending.moof_offset))
    })?;
    Ok((pending.moof, pending.moof_offset, moof_end..tail_end))
}

fn read_range(file: &mut File, offset: u64, len: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(len).map_err(|_| Mp4Error::malformed("box too large"))?;
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Mux `video` and `audio` into `output`.
///
/// The output is written to a temporary file next to `output` and renamed
/// into place only on success, so a failed mux never leaves a partial file.
pub fn mux_files(
    video: &Path,
    audio: &Path,
    output: &Path,
    options: &MuxOptions,
) -> Result<MuxSummary> {
    let video = TrackInput::open(video, Role::Video)?;
    let audio = TrackInput::open(audio, Role::Audio)?;

    let video_duration = video.duration_secs();
    let audio_duration = audio.duration_secs();
    if (video_duration - audio_duration).abs() > options.duration_tolerance {
        return Err(Mp4Error::DurationMismatch {
            video: video_duration,
            audio: audio_duration,
            tolerance: options.duration_tolerance,
        });
    }

    let header = build_header(&video, &audio)?;
    let order = interleave(&video, &audio);

    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut staging = tempfile::Builder::new()
        .prefix(".vodmux-")
        .suffix(".part")
        .tempfile_in(&dir)?;

    let mut written;
    {
        let mut writer = BufWriter::new(staging.as_file_mut());
        writer.write_all(&header)?;
        written = header.len() as u64;

        for (sequence, (role, index)) in order.iter().enumerate() {
            let input = match role {
                Role::Video => &video,
                Role::Audio => &audio,
            };
            let fragment = &input.fragments[*index];

            let mut moof = fragment.moof.clone();
            rewrite_moof(
                &mut moof,
                &FragmentRewrite {
                    track_id: role.output_track_id(),
                    sequence_number: sequence as u32 + 1,
                    decode_time_offset: input.first_start,
                    data_offset_shift: written as i64 - fragment.moof_offset as i64,
                },
            )
            .map_err(|e| e.in_input(role.label()))?;
            writer.write_all(&moof)?;
            written += moof.len() as u64;

            written += copy_range(&input.file, fragment.tail.clone(), &mut writer)?;
        }
        writer.flush()?;
    }
    staging.as_file().sync_all()?;
    staging.persist(output).map_err(|e| Mp4Error::Io(e.error))?;

    info!(
        output = %output.display(),
        fragments = order.len(),
        bytes = written,
        video_duration,
        audio_duration,
        "Muxed video and audio"
    );

    Ok(MuxSummary {
        video_duration,
        audio_duration,
        fragments: order.len(),
        bytes_written: written,
    })
}

/// `ftyp` + combined `moov`: the video movie header, video trak as track 1,
/// audio trak as track 2, and an `mvex` with both `trex` boxes.
fn build_header(video: &TrackInput, audio: &TrackInput) -> Result<Vec<u8>> {
    let root = box_at(&video.moov, 0, video.moov.len())
        .ok_or_else(|| Mp4Error::malformed("moov box is truncated"))?;
    let boxes = children(&video.moov, root.body_start, root.body_end)
        .ok_or_else(|| Mp4Error::malformed("moov child overruns its parent"))?;

    let mut moov_body = Vec::with_capacity(video.moov.len() + audio.moov.len());
    let mut mvex_body = Vec::new();
    for child in &boxes {
        let bytes = &video.moov[child.start..child.end];
        match &child.fourcc {
            b"mvhd" => {
                let mut mvhd = bytes.to_vec();
                set_mvhd_next_track_id(&mut mvhd, AUDIO_TRACK_ID + 1)?;
                moov_body.extend_from_slice(&mvhd);
            }
            b"trak" => moov_body.extend_from_slice(&video.renumbered_trak()?),
            b"mvex" => {
                // keep mehd and friends, trex is rebuilt below
                let inner = children(&video.moov, child.body_start, child.body_end)
                    .ok_or_else(|| Mp4Error::malformed("mvex child overruns its parent"))?;
                for entry in inner.iter().filter(|b| b.fourcc != *b"trex") {
                    mvex_body.extend_from_slice(&video.moov[entry.start..entry.end]);
                }
            }
            _ => moov_body.extend_from_slice(bytes),
        }
    }
    moov_body.extend_from_slice(&audio.renumbered_trak()?);

    mvex_body.extend_from_slice(&video.renumbered_trex()?);
    mvex_body.extend_from_slice(&audio.renumbered_trex()?);
    write_box(&mut moov_body, b"mvex", &mvex_body);

    let mut out = match video.ftyp.as_ref().or(audio.ftyp.as_ref()) {
        Some(ftyp) => ftyp.clone(),
        None => {
            let mut out = Vec::new();
            write_box(&mut out, b"ftyp", b"iso6\0\0\0\0iso6mp41");
            out
        }
    };
    write_box(&mut out, b"moov", &moov_body);
    Ok(out)
}

/// Fragment order for the output: by relative decode time, video first on ties.
fn interleave(video: &TrackInput, audio: &TrackInput) -> Vec<(Role, usize)> {
    let mut entries: Vec<(f64, Role, usize)> = Vec::new();
    for input in [video, audio] {
        for index in 0..input.fragments.len() {
            entries.push((input.relative_start_secs(index), input.role, index));
        }
    }
    entries.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });
    entries
        .into_iter()
        .map(|(_, role, index)| (role, index))
        .collect()
}

fn copy_range(file: &File, range: Range<u64>, out: &mut impl Write) -> io::Result<u64> {
    let mut reader = file;
    reader.seek(SeekFrom::Start(range.start))?;
    let expected = range.end - range.start;
    let copied = io::copy(&mut reader.take(expected), out)?;
    if copied != expected {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "input shrank while muxing",
        ));
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::probe;
    use crate::test_support::{FragmentSpec, make_fragment, make_init, make_track_file};
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    /// 3 video segments of 2s at 90kHz, 2 audio segments of 3s at 48kHz.
    fn fixture(dir: &TempDir) -> (PathBuf, PathBuf) {
        let video = make_track_file(1, b"vide", 90_000, 3000, 3, 60);
        let audio = make_track_file(1, b"soun", 48_000, 1024, 2, 140);
        (
            write(dir, "video.mp4", &video),
            write(dir, "audio.mp4", &audio),
        )
    }

    #[test]
    fn muxes_two_tracks_with_interleaved_fragments() {
        let dir = TempDir::new().unwrap();
        let (video, audio) = fixture(&dir);
        let output = dir.path().join("merged.mp4");

        let summary = mux_files(&video, &audio, &output, &MuxOptions::default()).unwrap();
        assert_eq!(summary.fragments, 5);
        assert!((summary.video_duration - 6.0).abs() < 1e-9);
        assert!((summary.audio_duration - 5.973).abs() < 1e-3);

        let data = fs::read(&output).unwrap();
        assert_eq!(summary.bytes_written, data.len() as u64);

        let probed = probe(&data).unwrap();
        let ids: Vec<u32> = probed.movie.tracks.iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![VIDEO_TRACK_ID, AUDIO_TRACK_ID]);
        assert!(probed.movie.tracks[0].is_video());
        assert!(probed.movie.tracks[1].is_audio());

        // video 0s, audio 0s, video 2s, audio ~2.99s, video 4s
        let order: Vec<(u32, u32)> = probed
            .fragments
            .iter()
            .map(|f| (f.track_id, f.sequence_number))
            .collect();
        assert_eq!(order, vec![(1, 1), (2, 2), (1, 3), (2, 4), (1, 5)]);

        // no staging files left behind
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn sample_bytes_are_carried_over_and_offsets_stay_valid() {
        let dir = TempDir::new().unwrap();
        let (video, audio) = fixture(&dir);
        let output = dir.path().join("merged.mp4");
        mux_files(&video, &audio, &output, &MuxOptions::default()).unwrap();

        let data = fs::read(&output).unwrap();
        let probed = probe(&data).unwrap();
        for fragment in &probed.fragments {
            let fill = if fragment.track_id == VIDEO_TRACK_ID {
                b'v'
            } else {
                b'a'
            };
            assert!(fragment.payload_range.clone().all(|i| data[i] == fill));
        }
    }

    #[test]
    fn decode_times_are_rebased_to_zero() {
        let dir = TempDir::new().unwrap();
        let mut video = make_init(1, b"vide", 90_000, 3000);
        video.extend_from_slice(&make_fragment(1, 1, 900_000, &[90_000], b"vvvv"));
        video.extend_from_slice(&make_fragment(2, 1, 990_000, &[90_000], b"vvvv"));
        let mut audio = make_init(3, b"soun", 48_000, 1024);
        audio.extend_from_slice(&make_fragment(1, 3, 480_000, &[96_000], b"aaaa"));

        let video = write(&dir, "v.mp4", &video);
        let audio = write(&dir, "a.mp4", &audio);
        let output = dir.path().join("out.mp4");
        mux_files(&video, &audio, &output, &MuxOptions::default()).unwrap();

        let probed = probe(&fs::read(&output).unwrap()).unwrap();
        let times: Vec<(u32, Option<u64>)> = probed
            .fragments
            .iter()
            .map(|f| (f.track_id, f.base_media_decode_time))
            .collect();
        assert_eq!(
            times,
            vec![(1, Some(0)), (2, Some(0)), (1, Some(90_000))]
        );
    }

    #[test]
    fn explicit_base_data_offsets_are_relocated() {
        let dir = TempDir::new().unwrap();
        let mut video = make_init(1, b"vide", 1000, 1000);
        let moof_offset = video.len() as u64;
        video.extend_from_slice(
            &FragmentSpec {
                explicit_base_data_offset: Some(moof_offset),
                sample_durations: vec![1000, 1000],
                payload: b"vvvvvvvv".to_vec(),
                ..FragmentSpec::default()
            }
            .build(),
        );
        let mut audio = make_init(1, b"soun", 1000, 1000);
        audio.extend_from_slice(&make_fragment(1, 1, 0, &[2000], b"aaaa"));

        let video = write(&dir, "v.mp4", &video);
        let audio = write(&dir, "a.mp4", &audio);
        let output = dir.path().join("out.mp4");
        mux_files(&video, &audio, &output, &MuxOptions::default()).unwrap();

        let data = fs::read(&output).unwrap();
        let probed = probe(&data).unwrap();
        let first = &probed.fragments[0];
        assert_eq!(first.track_id, VIDEO_TRACK_ID);
        assert_eq!(first.explicit_base_data_offset, Some(first.moof_offset as u64));
        assert!(first.payload_range.clone().all(|i| data[i] == b'v'));
    }

    #[test]
    fn duration_mismatch_is_rejected_without_output() {
        let dir = TempDir::new().unwrap();
        let video = write(&dir, "v.mp4", &make_track_file(1, b"vide", 90_000, 3000, 3, 60));
        let audio = write(&dir, "a.mp4", &make_track_file(1, b"soun", 48_000, 1024, 1, 140));
        let output = dir.path().join("out.mp4");

        let err = mux_files(&video, &audio, &output, &MuxOptions::default()).unwrap_err();
        assert!(matches!(err, Mp4Error::DurationMismatch { .. }), "{err}");
        assert!(!output.exists());

        let lenient = MuxOptions {
            duration_tolerance: 5.0,
        };
        mux_files(&video, &audio, &output, &lenient).unwrap();
        assert!(output.exists());
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let dir = TempDir::new().unwrap();
        let good_audio = write(&dir, "a.mp4", &make_track_file(1, b"soun", 48_000, 1024, 1, 10));
        let output = dir.path().join("out.mp4");

        let garbage = write(&dir, "garbage.mp4", b"definitely not an mp4 file");
        let err = mux_files(&garbage, &good_audio, &output, &MuxOptions::default()).unwrap_err();
        assert!(matches!(err, Mp4Error::Malformed(_)), "{err}");
        assert!(err.to_string().contains("video input"), "{err}");

        let init_only = write(&dir, "init.mp4", &make_init(1, b"vide", 90_000, 3000));
        let err = mux_files(&init_only, &good_audio, &output, &MuxOptions::default()).unwrap_err();
        assert!(err.to_string().contains("no media fragments"), "{err}");

        // audio supplied where video is expected
        let err = mux_files(&good_audio, &good_audio, &output, &MuxOptions::default()).unwrap_err();
        assert!(err.to_string().contains("handler"), "{err}");

        let mut truncated = make_track_file(1, b"vide", 90_000, 3000, 1, 10);
        truncated.truncate(truncated.len() - 3);
        let truncated = write(&dir, "truncated.mp4", &truncated);
        let err = mux_files(&truncated, &good_audio, &output, &MuxOptions::default()).unwrap_err();
        assert!(err.to_string().contains("overruns"), "{err}");

        assert!(!output.exists());
    }

    #[test]
    fn oversized_large_box_is_rejected() {
        let dir = TempDir::new().unwrap();
        let good_audio = write(&dir, "a.mp4", &make_track_file(1, b"soun", 48_000, 1024, 1, 10));
        let output = dir.path().join("out.mp4");

        let mut hostile = Vec::new();
        write_box(&mut hostile, b"free", b"");
        hostile.extend_from_slice(&1u32.to_be_bytes());
        hostile.extend_from_slice(b"mdat");
        hostile.extend_from_slice(&(u64::MAX - 7).to_be_bytes());
        let hostile = write(&dir, "hostile.mp4", &hostile);

        let err = mux_files(&hostile, &good_audio, &output, &MuxOptions::default()).unwrap_err();
        assert!(matches!(err, Mp4Error::Malformed(_)), "{err}");
        assert!(err.to_string().contains("overruns"), "{err}");

        // same box trailing a valid audio track
        let mut trailing = make_track_file(1, b"soun", 48_000, 1024, 1, 10);
        trailing.extend_from_slice(&1u32.to_be_bytes());
        trailing.extend_from_slice(b"free");
        trailing.extend_from_slice(&u64::MAX.to_be_bytes());
        let trailing = write(&dir, "trailing.mp4", &trailing);
        let video = write(&dir, "v.mp4", &make_track_file(1, b"vide", 90_000, 3000, 1, 10));
        let err = mux_files(&video, &trailing, &output, &MuxOptions::default()).unwrap_err();
        assert!(err.to_string().contains("audio input"), "{err}");

        assert!(!output.exists());
    }

    #[test]
    fn segment_prefix_boxes_are_dropped() {
        let dir = TempDir::new().unwrap();
        let mut video = make_init(1, b"vide", 1000, 1000);
        for i in 0..2u32 {
            let mut styp = Vec::new();
            write_box(&mut styp, b"styp", b"msdhmsdh");
            video.extend_from_slice(&styp);
            video.extend_from_slice(&make_fragment(i + 1, 1, u64::from(i) * 1000, &[1000], b"vv"));
        }
        let mut audio = make_init(1, b"soun", 1000, 1000);
        audio.extend_from_slice(&make_fragment(1, 1, 0, &[2000], b"aa"));

        let video = write(&dir, "v.mp4", &video);
        let audio = write(&dir, "a.mp4", &audio);
        let output = dir.path().join("out.mp4");
        mux_files(&video, &audio, &output, &MuxOptions::default()).unwrap();

        let data = fs::read(&output).unwrap();
        assert!(!data.windows(4).any(|w| w == b"styp"));
        assert_eq!(probe(&data).unwrap().fragments.len(), 3);
    }
}
